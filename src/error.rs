//! Error taxonomy for sandboxed script execution.

use crate::model::{ExecutionFailure, FailureKind};
use thiserror::Error;

/// Failure raised by the sandbox while compiling or running a
/// script.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SandboxError {
    /// A binding name failed the identifier allowlist.
    #[error("invalid sandbox binding name '{0}'")]
    InvalidBinding(String),

    /// Script text does not parse. Nothing was executed.
    #[error("script compile error: {0}")]
    Compile(String),

    /// Script threw, or the engine aborted it for exceeding a
    /// resource limit.
    #[error("sandbox execution failed: {0}")]
    Runtime(String),

    /// Script did not finish within its budget.
    #[error("script execution timed out after {0} ms")]
    Timeout(u64),

    /// Script was aborted through its cancellation flag.
    #[error("script execution was cancelled")]
    Cancelled,

    /// The worker running the script panicked or was dropped.
    #[error("script worker failed: {0}")]
    Join(String),
}

impl SandboxError {
    /// The bare failure message, without the sandbox prefix.
    ///
    /// For a script that ran `throw "boom"` this is `boom`.
    pub fn message(&self) -> String {
        match self {
            SandboxError::Runtime(msg)
            | SandboxError::Compile(msg)
            | SandboxError::Join(msg) => msg.clone(),
            other => other.to_string(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            SandboxError::Compile(_) | SandboxError::InvalidBinding(_) => {
                FailureKind::Compile
            }
            SandboxError::Runtime(_) => FailureKind::Runtime,
            SandboxError::Timeout(_) | SandboxError::Cancelled => {
                FailureKind::Timeout
            }
            SandboxError::Join(_) => FailureKind::Internal,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SandboxError::Timeout(_))
    }
}

impl From<&SandboxError> for ExecutionFailure {
    fn from(err: &SandboxError) -> Self {
        ExecutionFailure {
            kind: err.kind(),
            message: err.message(),
        }
    }
}
