//! Engine error model.

use serde::Serialize;
use thiserror::Error;

/// Result type used across the engine's domain layer.
pub type EngineResult<T> = Result<T, EngineError>;

/// Classification of a policy violation.
///
/// Policy violations are terminal for the attempted operation: callers must
/// not offer a retry, unlike [`EngineError::StateConflict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyViolationKind {
    /// The proposer of a change would also be one of its approvers.
    FourEyes,
    /// A CRITICAL segregation-of-duties conflict blocks the save.
    CriticalSodConflict,
    /// A decision was submitted by someone who is not a designated approver.
    NotDesignatedApprover,
    /// An operation reserved for the original requester was attempted by
    /// someone else.
    NotRequester,
}

impl core::fmt::Display for PolicyViolationKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            PolicyViolationKind::FourEyes => "four-eyes",
            PolicyViolationKind::CriticalSodConflict => "critical-sod-conflict",
            PolicyViolationKind::NotDesignatedApprover => "not-designated-approver",
            PolicyViolationKind::NotRequester => "not-requester",
        };
        f.write_str(s)
    }
}

/// Engine-level error.
///
/// Keep this focused on deterministic failures (validation, policy,
/// invariants, conflicts). Access *denial* is never an error: resolvers
/// return denial as a first-class value so callers cannot swallow it with a
/// catch-all.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A value failed validation (malformed slug, empty rule set, missing
    /// workflow definition). Always surfaced, never silently defaulted.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A governance policy was violated. Terminal for the operation.
    #[error("policy violation ({kind}): {message}")]
    PolicyViolation {
        kind: PolicyViolationKind,
        message: String,
    },

    /// A concurrent modification race was lost (stale version). Callers
    /// should re-fetch current state and retry, not resubmit blindly.
    #[error("state conflict: {0}")]
    StateConflict(String),

    /// A referenced entity does not exist. On authorization paths this must
    /// resolve to deny, never allow.
    #[error("not found")]
    NotFound,

    /// An engine invariant was violated (e.g. illegal state transition).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn policy(kind: PolicyViolationKind, msg: impl Into<String>) -> Self {
        Self::PolicyViolation {
            kind,
            message: msg.into(),
        }
    }

    pub fn state_conflict(msg: impl Into<String>) -> Self {
        Self::StateConflict(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    /// True when the caller may retry after re-fetching state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::StateConflict(_))
    }
}
