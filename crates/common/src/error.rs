//! Configuration and startup error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Encryption key error: {0}")]
    Key(#[from] crate::codec::CodecError),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_context() {
        let config_err = Error::Config("missing [oauth] client_id".into());
        assert_eq!(
            config_err.to_string(),
            "Configuration error: missing [oauth] client_id"
        );

        let io_err = Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));
        assert!(io_err.to_string().starts_with("I/O error:"), "got: {io_err}");
    }

    #[test]
    fn key_error_wraps_codec_error() {
        let err: Error = crate::codec::CodecError::InvalidKey.into();
        assert!(
            err.to_string().starts_with("Encryption key error:"),
            "got: {err}"
        );
    }
}
