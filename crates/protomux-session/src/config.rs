//! Connection configuration.

/// Error text used by the root session once the connection is gone.
pub const DEFAULT_BROWSER_ERROR_TEXT: &str = "Browser has been closed.";

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Error text of the root session, reported by requests that fail
    /// because the connection closed.
    pub browser_error_text: String,

    /// Whether sessions log pretty-printed envelopes on the
    /// `protomux::wrapped` target.
    pub trace_envelopes: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            browser_error_text: DEFAULT_BROWSER_ERROR_TEXT.to_string(),
            trace_envelopes: false,
        }
    }
}

impl ConnectionConfig {
    /// Builder: set the root session error text.
    pub fn with_browser_error_text(mut self, text: impl Into<String>) -> Self {
        self.browser_error_text = text.into();
        self
    }

    /// Builder: enable envelope traces.
    pub fn with_trace_envelopes(mut self, enabled: bool) -> Self {
        self.trace_envelopes = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.browser_error_text, "Browser has been closed.");
        assert!(!config.trace_envelopes);
    }

    #[test]
    fn custom_config() {
        let config = ConnectionConfig::default()
            .with_browser_error_text("Connection lost.")
            .with_trace_envelopes(true);

        assert_eq!(config.browser_error_text, "Connection lost.");
        assert!(config.trace_envelopes);
    }
}
