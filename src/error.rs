use thiserror::Error;

/// Failure of a call to an AI provider or to the streaming proxy.
#[derive(Debug, Error)]
pub enum AiError {
    #[error("API key missing for provider {0}")]
    MissingApiKey(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Stream error: {0}")]
    Stream(String),
}

impl AiError {
    /// Whether retrying the same request may succeed.
    ///
    /// Network failures, timeouts, 429 and 5xx responses are retryable. Other 4xx
    /// responses, missing keys and malformed payloads are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            AiError::Http(_) | AiError::Stream(_) => true,
            AiError::Status { status, .. } => {
                *status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            AiError::MissingApiKey(_) | AiError::MalformedResponse(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    fn status_error(status: StatusCode) -> AiError {
        AiError::Status {
            status,
            body: "body".to_string(),
        }
    }

    #[test]
    fn test_rate_limit_is_retryable() {
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS).is_retryable());
    }

    #[test]
    fn test_server_errors_are_retryable() {
        assert!(status_error(StatusCode::INTERNAL_SERVER_ERROR).is_retryable());
        assert!(status_error(StatusCode::BAD_GATEWAY).is_retryable());
        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE).is_retryable());
    }

    #[test]
    fn test_client_errors_are_not_retryable() {
        assert!(!status_error(StatusCode::BAD_REQUEST).is_retryable());
        assert!(!status_error(StatusCode::UNAUTHORIZED).is_retryable());
        assert!(!status_error(StatusCode::FORBIDDEN).is_retryable());
    }

    #[test]
    fn test_local_errors_are_not_retryable() {
        assert!(!AiError::MissingApiKey("openai".to_string()).is_retryable());
        assert!(!AiError::MalformedResponse("no array".to_string()).is_retryable());
        assert!(AiError::Stream("connection reset".to_string()).is_retryable());
    }

    #[test]
    fn test_status_error_display() {
        let err = AiError::Status {
            status: StatusCode::BAD_REQUEST,
            body: "invalid model".to_string(),
        };
        assert_eq!(err.to_string(), "API error (400 Bad Request): invalid model");
    }
}
