//! Graphics error types.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use vista_core::pool::PoolOverflow;

use crate::batch::BatchId;

/// Which bounded pool an index was rejected by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    /// Material properties pool.
    Materials,
    /// Light properties pool.
    Lights,
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Materials => write!(f, "material"),
            Self::Lights => write!(f, "light"),
        }
    }
}

/// Why a batch's GPU submission failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmissionFailure {
    #[error("device lost")]
    DeviceLost,
    #[error("out of GPU memory")]
    OutOfMemory,
    #[error("{0}")]
    Backend(String),
}

impl From<&GraphicsError> for SubmissionFailure {
    fn from(error: &GraphicsError) -> Self {
        match error {
            GraphicsError::DeviceLost => Self::DeviceLost,
            GraphicsError::OutOfMemory => Self::OutOfMemory,
            GraphicsError::Submission { failure, .. } => failure.clone(),
            other => Self::Backend(other.to_string()),
        }
    }
}

/// Errors that can occur in the graphics system.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    #[error("device initialization failed: {0}")]
    DeviceInit(String),
    #[error("{pool} pool overflow: index {index} exceeds capacity {capacity}")]
    PoolOverflow {
        pool: PoolKind,
        index: u32,
        capacity: u32,
    },
    #[error("submission of batch {batch} failed: {failure}")]
    Submission {
        batch: BatchId,
        failure: SubmissionFailure,
    },
    #[error("timed out after {timeout:?} waiting for batch {batch}")]
    RetrievalTimeout { batch: BatchId, timeout: Duration },
    #[error("GPU device lost")]
    DeviceLost,
    #[error("out of GPU memory")]
    OutOfMemory,
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("unknown batch {0}")]
    UnknownBatch(BatchId),
    #[error("resource creation failed: {0}")]
    ResourceCreation(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("internal backend error: {0}")]
    Internal(String),
}

impl GraphicsError {
    /// Attach the pool kind to a bare [`PoolOverflow`].
    pub fn pool_overflow(pool: PoolKind, overflow: PoolOverflow) -> Self {
        Self::PoolOverflow {
            pool,
            index: overflow.index,
            capacity: overflow.capacity,
        }
    }

    /// Wrap this error as the submission failure of `batch`.
    pub fn into_submission(self, batch: BatchId) -> Self {
        match self {
            Self::Submission { .. } => self,
            other => Self::Submission {
                batch,
                failure: SubmissionFailure::from(&other),
            },
        }
    }

    /// Whether this error means the device is gone.
    pub fn is_device_lost(&self) -> bool {
        matches!(
            self,
            Self::DeviceLost
                | Self::Submission {
                    failure: SubmissionFailure::DeviceLost,
                    ..
                }
        )
    }
}
