//! Typed error taxonomy for the approval engine.
//!
//! Every engine operation returns `EngineError`. The variants map one-to-one
//! onto the failure classes callers are expected to distinguish:
//! - `NotFound` / `InvalidState` / `Forbidden` / `InvalidInput` are business
//!   outcomes of a bad or stale request
//! - `VersionConflict` asks the caller to reload and retry
//! - `Configuration` means the gate setup is broken and must reach an operator
//! - `Storage` wraps failures of the persistence collaborator itself

use thiserror::Error;
use uuid::Uuid;

use crate::gates::GateKey;

/// Errors returned by the approval engine and its collaborators.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Entity {id} not found")]
    EntityNotFound { id: Uuid },

    #[error("Gate {gate} is not part of this entity's pipeline")]
    GateNotFound { gate: GateKey },

    #[error("{what} '{id}' not found")]
    NotFound { what: &'static str, id: String },

    #[error("Version conflict: expected {expected}, stored version is {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Account '{actor}' is not an eligible approver for the current round of {gate}")]
    Forbidden { actor: String, gate: GateKey },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error on {gate}: {message}")]
    Configuration { gate: GateKey, message: String },

    #[error("Storage error: {0}")]
    Storage(#[source] anyhow::Error),
}

impl EngineError {
    /// Wrap any persistence-layer failure that is not a version conflict.
    pub fn storage(err: impl Into<anyhow::Error>) -> Self {
        Self::Storage(err.into())
    }

    /// True for every "missing" variant (entity, gate, workstream, slot).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::EntityNotFound { .. } | Self::GateNotFound { .. } | Self::NotFound { .. }
        )
    }

    /// Only a stale write is worth retrying, and only after reloading.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }

    /// Broken setup rather than a normal business outcome.
    pub fn is_operator_facing(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
