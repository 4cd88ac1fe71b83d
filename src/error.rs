// Error types for the render graph core
//
// Austin Shafer - 2024

use thiserror::Error;

/// Everything that can go wrong inside the render graph core.
///
/// Variant names intentionally mirror the error kinds a backend like this
/// reports to its caller one-for-one: a caller grepping for
/// `OUT_OF_DESCRIPTORS` in a log should find the variant by the same name
/// here.
#[allow(non_camel_case_types)]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendError {
    /// The device refused to allocate the requested resource. The only
    /// recoverable kind - callers should log and fall back.
    #[error("device refused to create the requested resource")]
    CREATION_FAILED,

    /// A handle was used that is dead or was never alive.
    #[error("handle is invalid or has already been destroyed")]
    INVALID_HANDLE,

    /// The state tracker was asked to transition a resource into a state
    /// incompatible with its kind.
    #[error("requested resource state is incompatible with this resource's kind")]
    STATE_VIOLATION,

    /// A descriptor heap has no room left for the requested allocation.
    #[error("descriptor heap exhausted")]
    OUT_OF_DESCRIPTORS,

    /// The device reported a fault (TDR, page fault, validation abort).
    #[error("device lost")]
    DEVICE_LOST,
}

/// The result type used throughout the render graph core.
pub type Result<T> = std::result::Result<T, BackendError>;
