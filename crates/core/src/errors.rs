use thiserror::Error;

use crate::domain::chain::ChainState;
use crate::domain::document::DocumentType;
use crate::domain::ids::{ApprovalId, ChainId, LevelId, UserId};
use crate::store::StoreError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid chain transition from {from:?} to {to:?}")]
    InvalidChainTransition { from: ChainState, to: ChainState },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Level configuration faults. Surfaced at validation or resolve time; a
/// fault discovered while opening a level puts the chain into `Blocked`
/// instead, since the chain persists and is inspectable.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigViolation {
    #[error(
        "levels {first} and {second} share level number {level_number} for {document_type:?} with overlapping amount ranges"
    )]
    OverlappingLevels {
        document_type: DocumentType,
        level_number: u32,
        first: LevelId,
        second: LevelId,
    },
    #[error("level {level} requires a quorum count of at least 1")]
    ZeroQuorumCount { level: LevelId },
    #[error("level {level} requires {required} approvals but has only {assigned} active approvers")]
    QuorumExceedsApprovers { level: LevelId, required: u32, assigned: usize },
    #[error("level {level} has no eligible approvers")]
    NoEligibleApprovers { level: LevelId },
    #[error("assignment on level {level} carries a delegation window that ends before it starts")]
    InvalidDelegationWindow { level: LevelId },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DelegationError {
    #[error("delegation window end must be strictly after its start")]
    InvalidWindow,
    #[error("delegation window lies entirely in the past")]
    WindowExpired,
    #[error("delegate {0} is not eligible")]
    DelegateNotEligible(UserId),
    #[error("level {0} does not permit delegation")]
    DelegationNotAllowed(LevelId),
    #[error("an approval spawned by delegation cannot be delegated again")]
    ReDelegation,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Config(#[from] ConfigViolation),
    #[error(transparent)]
    Delegation(#[from] DelegationError),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("approval {0} was already decided")]
    AlreadyDecided(ApprovalId),
    #[error("chain for approval {0} is no longer open at this level")]
    ChainNotOpenAtThisLevel(ApprovalId),
    #[error("user {0} is not the effective approver for this approval")]
    NotAuthorized(UserId),
    #[error("chain {0} is already in a terminal state")]
    ChainTerminal(ChainId),
    #[error("chain {0} was modified concurrently")]
    Conflict(ChainId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::ids::{ApprovalId, UserId};
    use crate::store::StoreError;

    use super::{DelegationError, EngineError};

    #[test]
    fn store_errors_propagate_transparently() {
        let engine: EngineError = StoreError::Backend("disk full".to_string()).into();
        assert_eq!(engine.to_string(), "backend error: disk full");
    }

    #[test]
    fn decision_outcomes_render_the_offending_id() {
        let already = EngineError::AlreadyDecided(ApprovalId("APR-7".to_string()));
        assert_eq!(already.to_string(), "approval APR-7 was already decided");

        let unauthorized = EngineError::NotAuthorized(UserId("u-x".to_string()));
        assert!(unauthorized.to_string().contains("u-x"));
    }

    #[test]
    fn delegation_errors_convert_into_engine_errors() {
        let engine: EngineError = DelegationError::InvalidWindow.into();
        assert!(matches!(engine, EngineError::Delegation(DelegationError::InvalidWindow)));
    }
}
