use thiserror::Error;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Empty response from provider")]
    EmptyResponse,
}

impl AiError {
    /// Whether a retry has a chance of succeeding.
    ///
    /// Network failures, rate limits, server-side errors and malformed upstream
    /// payloads are transient. Configuration problems and client-side 4xx
    /// rejections are not.
    pub fn is_transient(&self) -> bool {
        match self {
            AiError::Config(_) => false,
            AiError::Network(_) | AiError::RateLimited(_) => true,
            AiError::Api { status, .. } => *status >= 500 || *status == 408,
            AiError::Parse(_) | AiError::EmptyResponse => true,
        }
    }

    /// Configuration failures are fatal for the whole run, not just one call.
    /// A rejected credential (401/403) is a configuration failure too.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AiError::Config(_) | AiError::Api { status: 401 | 403, .. }
        )
    }
}

impl From<reqwest::Error> for AiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            AiError::Parse(e.to_string())
        } else {
            AiError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for AiError {
    fn from(e: serde_json::Error) -> Self {
        AiError::Parse(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_fatal_and_not_retried() {
        let err = AiError::Config("DEEPSEEK_API_KEY not set".into());
        assert!(err.is_fatal());
        assert!(!err.is_transient());
    }

    #[test]
    fn server_errors_and_rate_limits_are_transient() {
        assert!(AiError::RateLimited("slow down".into()).is_transient());
        assert!(AiError::Api { status: 503, message: "unavailable".into() }.is_transient());
        assert!(AiError::Network("connection reset".into()).is_transient());
        assert!(AiError::Parse("expected value".into()).is_transient());
    }

    #[test]
    fn client_errors_are_not_transient() {
        let err = AiError::Api { status: 400, message: "bad request".into() };
        assert!(!err.is_transient());
        assert!(!err.is_fatal());
    }

    #[test]
    fn rejected_credentials_are_fatal() {
        for status in [401, 403] {
            let err = AiError::Api { status, message: "invalid api key".into() };
            assert!(err.is_fatal(), "{status}");
            assert!(!err.is_transient(), "{status}");
        }
    }
}
