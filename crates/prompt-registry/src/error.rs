//! Prompt registry error types.

use thiserror::Error;

/// Result type for prompt registry operations.
pub type PromptResult<T> = Result<T, PromptError>;

/// Error returned by a listener request which rejected a reply.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed reply: {0}")]
pub struct ReplyError(pub String);

/// Errors that can occur while handling prompts.
#[derive(Debug, Error)]
pub enum PromptError {
    /// No prompt with the given ID exists for the user.
    #[error("cannot find prompt with the given ID for the given user")]
    NotFound,

    /// The registry has been shut down.
    #[error("prompts backend has already been closed")]
    Closed,

    /// The user already has the maximum number of outstanding prompts.
    #[error("cannot add new prompts, too many outstanding")]
    TooManyPrompts,

    /// A listener request rejected the computed reply.
    #[error(transparent)]
    MalformedReply(#[from] ReplyError),

    /// The persistent ID storage failed.
    #[error("{context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Outcome was neither "allow" nor "deny".
    #[error("invalid outcome: {0:?}")]
    InvalidOutcome(String),

    /// The interface is not known to the permission vocabulary.
    #[error("unsupported interface: {0}")]
    UnknownInterface(String),

    /// The permission is not available for the interface.
    #[error("unsupported permission for {interface} interface: {permission:?}")]
    UnknownPermission {
        interface: String,
        permission: String,
    },

    /// A rule path pattern could not be compiled.
    #[error("invalid path pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    /// A prompt ID string could not be parsed.
    #[error("invalid prompt ID: {0:?}")]
    InvalidPromptId(String),

    /// The registry was created outside of a tokio runtime.
    #[error("prompt registry requires a tokio runtime for expiration timers")]
    NoRuntime,
}

impl PromptError {
    pub(crate) fn storage(context: impl Into<String>, source: std::io::Error) -> Self {
        PromptError::Storage {
            context: context.into(),
            source,
        }
    }
}
