// Error types
// Venue and store failures are logged and skipped per batch item; config errors abort startup

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Network or HTTP failure talking to the venue.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The venue answered with an error code.
    #[error("venue rejected request ({code}): {message}")]
    Venue { code: i64, message: String },

    /// A venue payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Order store read or write failure.
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Configuration loading or validation failure.
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

impl Error {
    /// Venue-side failures (transport, rejection, bad payload).
    pub fn is_venue(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Venue { .. } | Error::Decode(_)
        )
    }
}
