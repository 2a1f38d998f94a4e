use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChatError>;

/// Errors that end a turn. None of them are fatal to the session.
#[derive(Error, Debug)]
pub enum ChatError {
    /// Required settings are missing; the user has to configure the endpoint first.
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    /// The endpoint answered with a non-2xx status before streaming began.
    #[error("API Error: {status} - {body}")]
    Request { status: u16, body: String },

    /// The connection failed or dropped while sending or streaming.
    #[error("connection error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("request cancelled")]
    Cancelled,
}

impl ChatError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, ChatError::Configuration(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Please configure your API settings first (missing: {})", .0.join(", "))]
    MissingFields(Vec<&'static str>),
}

/// A single SSE frame that could not be understood. Recovered by skipping the frame.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("invalid JSON in data frame: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_error_carries_status_and_body() {
        let err = ChatError::Request {
            status: 401,
            body: "unauthorized".to_string(),
        };
        assert_eq!(err.to_string(), "API Error: 401 - unauthorized");
    }

    #[test]
    fn test_missing_fields_message() {
        let err: ChatError = ConfigError::MissingFields(vec!["apiEndpoint", "apiKey"]).into();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("apiEndpoint, apiKey"));
    }
}
