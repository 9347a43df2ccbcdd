use thiserror::Error;

/// Unified error type for the shared Igloo types.
#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error("Invalid endpoint address '{address}': {reason}")]
    InvalidEndpoint { address: String, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid_endpoint(address: &str, reason: impl Into<String>) -> Self {
        Error::InvalidEndpoint {
            address: address.to_string(),
            reason: reason.into(),
        }
    }
}
