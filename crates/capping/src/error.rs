use thiserror::Error;

/// Errors returned by the counter engine.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A session or campaign id was empty or malformed. Retrying will not help.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No record exists for the session.
    #[error("session not found: {session_id}")]
    NotFound { session_id: String },

    /// Every conditional write lost to a concurrent writer.
    #[error("write conflict persisted after {attempts} attempts")]
    Conflict { attempts: u32 },

    /// A stored record does not have the expected shape.
    #[error("corrupt record: {0}")]
    CorruptRecord(String),

    /// The backend could not be reached or failed internally.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend gave up waiting on its own deadline.
    #[error("backend timed out")]
    Timeout,

    /// The counter is already at the largest representable value.
    #[error("counter {campaign_id:?} in session {session_id:?} cannot grow further")]
    CounterOverflow {
        session_id: String,
        campaign_id: String,
    },
}

impl Error {
    /// Whether retrying the whole operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::BackendUnavailable(_) | Self::Timeout
        )
    }
}

impl From<store::Error> for Error {
    fn from(err: store::Error) -> Self {
        match err {
            store::Error::Timeout => Self::Timeout,
            store::Error::Rejected(reason) => Self::CorruptRecord(reason),
            store::Error::TypeMismatch { .. }
            | store::Error::Serialization(_)
            | store::Error::Row(_) => Self::CorruptRecord(err.to_string()),
            store::Error::InvalidName(_) => Self::InvalidArgument(err.to_string()),
            other => Self::BackendUnavailable(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
