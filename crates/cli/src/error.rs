//! CLI error types.

use thiserror::Error;

use crate::config::ConfigError;

/// CLI errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration is invalid or unreadable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An error occurred in the counter engine.
    #[error(transparent)]
    Capping(#[from] capping::Error),

    /// The store could not be opened.
    #[error(transparent)]
    Store(#[from] store::Error),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether running the same command again may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Capping(e) => e.is_transient(),
            Self::Store(store::Error::Timeout | store::Error::Unavailable(_)) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
