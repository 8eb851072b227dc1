// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Engine error taxonomy.
//!
//! Seven user-facing categories plus transparent wrappers for collaborator
//! faults. Handlers return `Result<_, EngineError>` and the dispatcher
//! folds failures into a [`DispatchOutcome`] carrying the category and
//! message, so the coordinator sees the same taxonomy on every rank.

use skein_comm::CommError;
use skein_proto::{DispatchOutcome, ErrorCategory, ProtoError};
use skein_store::StoreError;
use thiserror::Error;

/// Failure of one engine operation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed or out-of-domain argument.
    #[error("invalid value: {0}")]
    InvalidValue(String),
    /// Operation not meaningful for the target's kind.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    /// Key not present in the registry.
    #[error("not found: {0}")]
    NotFound(String),
    /// Registry object exists but has another type.
    #[error("invalid cast: {0}")]
    InvalidCast(String),
    /// Unsupported or mismatched column/property type.
    #[error("data type: {0}")]
    DataType(String),
    /// Cross-rank or cross-object consistency violation.
    #[error("illegal state: {0}")]
    IllegalState(String),
    /// Recognized but unsupported operation.
    #[error("unimplemented: {0}")]
    Unimplemented(String),
    /// Envelope violation (missing/mistyped parameter, codec failure).
    #[error(transparent)]
    Proto(#[from] ProtoError),
    /// Collective substrate failure.
    #[error(transparent)]
    Comm(#[from] CommError),
    /// Object store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Taxonomy category reported to the coordinator.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidValue(_) | Self::Proto(_) => ErrorCategory::InvalidValue,
            Self::InvalidOperation(_) => ErrorCategory::InvalidOperation,
            Self::NotFound(_) | Self::Store(StoreError::NotFound(_)) => ErrorCategory::NotFound,
            Self::InvalidCast(_) => ErrorCategory::InvalidCast,
            Self::DataType(_) => ErrorCategory::DataType,
            Self::IllegalState(_) => ErrorCategory::IllegalState,
            Self::Unimplemented(_) => ErrorCategory::Unimplemented,
            Self::Comm(_) | Self::Store(_) => ErrorCategory::Internal,
        }
    }

    /// Fold this failure into the per-rank outcome envelope.
    pub fn into_outcome(self, rank: u32) -> DispatchOutcome {
        DispatchOutcome::Failure {
            rank,
            category: self.category(),
            message: self.to_string(),
        }
    }
}
