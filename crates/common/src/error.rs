//! Common error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::Channel("report channel closed".to_string()).to_string(),
            "Channel error: report channel closed"
        );
        assert!(Error::Config("bad level".to_string()).to_string().contains("bad level"));
    }
}
