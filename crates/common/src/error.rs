//! Central error types for the accelerator (thiserror-based).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{BitstreamId, PictureBufferId};

/// Error kinds reported to the client through `NotifyError`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The resource broker denied or under-allocated the hardware unit.
    ResourceUnavailable,
    /// A hardware command was rejected or the component faulted.
    PlatformFailure,
    /// Caller or hardware protocol violation.
    InvalidArgument,
    /// A client bitstream buffer could not be mapped.
    UnreadableInput,
}

/// Fault reported by (or while talking to) an OMX component.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OmxError {
    #[error("component {0} not found")]
    ComponentNotFound(String),

    #[error("command {command} rejected: {reason}")]
    CommandRejected { command: String, reason: String },

    #[error("invalid state for {operation}: {state}")]
    IncorrectState { operation: String, state: String },

    #[error("unknown buffer handle {0}")]
    UnknownBuffer(u64),

    #[error("insufficient resources: {0}")]
    InsufficientResources(String),

    #[error("hardware fault 0x{code:08x}")]
    Hardware { code: u32 },
}

/// Accelerator error. Every variant maps onto one [`ErrorKind`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VdaError {
    #[error("hardware resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("platform failure: {0}")]
    PlatformFailure(String),

    #[error("OMX error: {0}")]
    Omx(#[from] OmxError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unknown picture buffer {0}")]
    UnknownPictureBuffer(PictureBufferId),

    #[error("{id} ({size} bytes) exceeds input buffer capacity of {capacity} bytes")]
    ChunkTooLarge {
        id: BitstreamId,
        size: usize,
        capacity: usize,
    },

    #[error("{id} is unreadable: {reason}")]
    UnreadableInput { id: BitstreamId, reason: String },

    #[error("operation {0} is not valid in the current decoder state")]
    InvalidState(&'static str),
}

impl VdaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ResourceUnavailable(_) => ErrorKind::ResourceUnavailable,
            Self::PlatformFailure(_) | Self::Omx(_) => ErrorKind::PlatformFailure,
            Self::InvalidArgument(_)
            | Self::UnknownPictureBuffer(_)
            | Self::ChunkTooLarge { .. }
            | Self::InvalidState(_) => ErrorKind::InvalidArgument,
            Self::UnreadableInput { .. } => ErrorKind::UnreadableInput,
        }
    }
}

/// Convenience Result type for accelerator operations.
pub type VdaResult<T> = Result<T, VdaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn omx_errors_are_platform_failures() {
        let err: VdaError = OmxError::Hardware { code: 0x8000_1001 }.into();
        assert_eq!(err.kind(), ErrorKind::PlatformFailure);
        assert!(err.to_string().contains("0x80001001"));
    }

    #[test]
    fn kinds_of_client_errors() {
        let too_large = VdaError::ChunkTooLarge {
            id: BitstreamId(3),
            size: 10,
            capacity: 4,
        };
        assert_eq!(too_large.kind(), ErrorKind::InvalidArgument);
        let unreadable = VdaError::UnreadableInput {
            id: BitstreamId(3),
            reason: "gone".into(),
        };
        assert_eq!(unreadable.kind(), ErrorKind::UnreadableInput);
        assert_eq!(
            VdaError::UnknownPictureBuffer(PictureBufferId(9)).kind(),
            ErrorKind::InvalidArgument
        );
    }
}
