//! Tool-surface error taxonomy and boundary mapping.

use crate::safety::SafetyError;
use crate::schedule::ScheduleError;
use crate::store::StoreError;

/// Failures surfaced by the seven tool operations. The wire shape is always
/// `{success:false, error:"<one-line message>"}`; store errors are redacted
/// in production.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{0}")]
    InvalidTime(ScheduleError),
    #[error("{0}")]
    InvalidCron(String),
    #[error("webhook URL rejected: {0}")]
    UrlRejected(SafetyError),
    #[error("payload too large: {0} bytes exceeds limit")]
    PayloadTooLarge(usize),
    #[error("payload invalid: {0}")]
    PayloadInvalid(String),
    #[error("too many active tasks for this session (limit {0})")]
    TooManyActive(i64),
    #[error("task not found")]
    NotFound,
    #[error("illegal state transition: {0}")]
    IllegalStateTransition(String),
    #[error("rate limited")]
    RateLimited,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl ToolError {
    /// The one-line human message for the wire. Internal store failures
    /// become a generic message unless `dev_mode` exposes the raw error.
    pub fn wire_message(&self, dev_mode: bool) -> String {
        match self {
            Self::Store(err) => {
                if dev_mode {
                    err.to_string()
                } else {
                    "An error occurred processing your request".to_string()
                }
            }
            other => other.to_string(),
        }
    }

    /// Whether this failure should be logged with full detail server-side.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

impl From<ScheduleError> for ToolError {
    fn from(err: ScheduleError) -> Self {
        match err {
            ScheduleError::InvalidCron(msg) => Self::InvalidCron(msg),
            ScheduleError::Unfeasible(expr) => {
                Self::InvalidCron(format!("'{expr}' never matches within one year"))
            }
            other => Self::InvalidTime(other),
        }
    }
}
