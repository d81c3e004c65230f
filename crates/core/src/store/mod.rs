use async_trait::async_trait;
use thiserror::Error;

use crate::domain::approval::Approval;
use crate::domain::chain::{ApprovalChain, ChainTransition};
use crate::domain::document::DocumentType;
use crate::domain::ids::{ApprovalId, ChainId, CompanyId, LevelApproverId, LevelId, UserId};
use crate::domain::level::{ApprovalLevel, LevelApprover};

pub mod memory;

pub use memory::{
    InMemoryApprovalStore, InMemoryChainStore, InMemoryLevelStore, InMemoryUserDirectory,
};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("decode error: {0}")]
    Decode(String),
    /// Optimistic-version mismatch on a chain update.
    #[error("stale chain state version")]
    Conflict,
}

#[async_trait]
pub trait LevelStore: Send + Sync {
    async fn levels_for(
        &self,
        company: &CompanyId,
        document_type: DocumentType,
    ) -> Result<Vec<ApprovalLevel>, StoreError>;

    async fn level_by_id(&self, id: &LevelId) -> Result<Option<ApprovalLevel>, StoreError>;

    async fn approvers_for(&self, level_id: &LevelId) -> Result<Vec<LevelApprover>, StoreError>;

    async fn approver_by_id(
        &self,
        id: &LevelApproverId,
    ) -> Result<Option<LevelApprover>, StoreError>;

    async fn save_level(&self, level: ApprovalLevel) -> Result<(), StoreError>;

    async fn save_approver(&self, approver: LevelApprover) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ChainStore: Send + Sync {
    async fn insert_chain(&self, chain: ApprovalChain) -> Result<(), StoreError>;

    async fn chain_by_id(&self, id: &ChainId) -> Result<Option<ApprovalChain>, StoreError>;

    /// Compare-and-swap write: fails with [`StoreError::Conflict`] when the
    /// persisted `state_version` differs from `expected_version`.
    async fn update_chain(
        &self,
        chain: &ApprovalChain,
        expected_version: u32,
    ) -> Result<(), StoreError>;

    async fn append_transition(&self, transition: ChainTransition) -> Result<(), StoreError>;

    async fn transitions_for(&self, chain_id: &ChainId)
        -> Result<Vec<ChainTransition>, StoreError>;
}

#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn insert(&self, approval: Approval) -> Result<(), StoreError>;

    async fn approval_by_id(&self, id: &ApprovalId) -> Result<Option<Approval>, StoreError>;

    async fn update(&self, approval: &Approval) -> Result<(), StoreError>;

    async fn for_chain(&self, chain_id: &ChainId) -> Result<Vec<Approval>, StoreError>;

    async fn pending_for_user(&self, user: &UserId) -> Result<Vec<Approval>, StoreError>;
}

/// Existence/active lookup against the identity collaborator. No further
/// user detail is required by the engine.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn is_active(&self, user: &UserId) -> Result<bool, StoreError>;
}
