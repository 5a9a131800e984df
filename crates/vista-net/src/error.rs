use thiserror::Error;

/// A request that produced no HTTP response at all.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server is offline or unreachable: {0}")]
    Offline(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Response too large: {size} bytes (max: {max})")]
    TooLarge { size: u64, max: u64 },
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_connect() {
            FetchError::Offline(err.to_string())
        } else if err.is_builder() {
            FetchError::InvalidUrl(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}
