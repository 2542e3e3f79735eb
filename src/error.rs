use thiserror::Error;

/// Errors raised by the mailbox adapter, the store, and account setup.
///
/// None of these cross the poller boundary: the processor and poller log
/// them and fold them into outcomes and summaries.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Mailbox API call failed (network, quota, expired token).
    #[error("mail API error: {0}")]
    Mail(String),

    /// Building an authenticated mailbox client failed.
    #[error("authentication failed for account '{account}': {reason}")]
    Auth { account: String, reason: String },

    /// The message came back without a payload to parse.
    #[error("message {0} has no payload")]
    MissingPayload(String),

    /// Another invocation already stored an application for this message.
    #[error("application for message {0} already exists")]
    Duplicate(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A panic in another thread left the connection mutex poisoned.
    #[error("database connection lock poisoned")]
    LockPoisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

impl From<google_gmail1::Error> for IngestError {
    fn from(err: google_gmail1::Error) -> Self {
        IngestError::Mail(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
