use std::error::Error;
use std::fmt;

/// The error type shared by every component in this crate.
///
/// Timeouts are deliberately *not* a variant here: a wait that expires
/// without its condition becoming true is an ordinary return value
/// (see [`crate::event::WaitOutcome`] and [`crate::pbqueue::QueueError`]),
/// not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A parameter was null, zero where non-zero was required, or
    /// otherwise out of range. The operation was a no-op.
    InvalidArgument(&'static str),
    /// Allocation or system-primitive creation failed during setup.
    ResourceExhausted(String),
    /// The operation was attempted on a component that is being (or has
    /// been) destroyed. Callers must not retry.
    ShuttingDown,
    /// A contract was violated in a way unrelated to the arguments
    /// themselves, e.g. requesting the secondary acquire on a lock
    /// kind that does not support one, or a hazard-pointer slot index
    /// beyond the per-thread limit.
    ContractViolation(&'static str),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            CoreError::ResourceExhausted(msg) => write!(f, "resource exhausted: {}", msg),
            CoreError::ShuttingDown => write!(f, "operation rejected: component is shutting down"),
            CoreError::ContractViolation(msg) => write!(f, "contract violation: {}", msg),
        }
    }
}

impl Error for CoreError {}

pub type CoreResult<T> = Result<T, CoreError>;
