use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::approval::Approval;
use crate::domain::chain::{ApprovalChain, ChainTransition};
use crate::domain::document::DocumentType;
use crate::domain::ids::{ApprovalId, ChainId, CompanyId, LevelApproverId, LevelId, UserId};
use crate::domain::level::{ApprovalLevel, LevelApprover};

use super::{ApprovalStore, ChainStore, LevelStore, StoreError, UserDirectory};

#[derive(Default)]
pub struct InMemoryLevelStore {
    levels: RwLock<HashMap<String, ApprovalLevel>>,
    approvers: RwLock<HashMap<String, LevelApprover>>,
}

#[async_trait]
impl LevelStore for InMemoryLevelStore {
    async fn levels_for(
        &self,
        company: &CompanyId,
        document_type: DocumentType,
    ) -> Result<Vec<ApprovalLevel>, StoreError> {
        let levels = self.levels.read().await;
        let mut matched: Vec<ApprovalLevel> = levels
            .values()
            .filter(|level| level.company_id == *company && level.document_type == document_type)
            .cloned()
            .collect();
        matched.sort_by_key(|level| level.level_number);
        Ok(matched)
    }

    async fn level_by_id(&self, id: &LevelId) -> Result<Option<ApprovalLevel>, StoreError> {
        let levels = self.levels.read().await;
        Ok(levels.get(&id.0).cloned())
    }

    async fn approvers_for(&self, level_id: &LevelId) -> Result<Vec<LevelApprover>, StoreError> {
        let approvers = self.approvers.read().await;
        let mut matched: Vec<LevelApprover> = approvers
            .values()
            .filter(|approver| approver.level_id == *level_id)
            .cloned()
            .collect();
        matched.sort_by(|left, right| left.id.0.cmp(&right.id.0));
        Ok(matched)
    }

    async fn approver_by_id(
        &self,
        id: &LevelApproverId,
    ) -> Result<Option<LevelApprover>, StoreError> {
        let approvers = self.approvers.read().await;
        Ok(approvers.get(&id.0).cloned())
    }

    async fn save_level(&self, level: ApprovalLevel) -> Result<(), StoreError> {
        let mut levels = self.levels.write().await;
        levels.insert(level.id.0.clone(), level);
        Ok(())
    }

    async fn save_approver(&self, approver: LevelApprover) -> Result<(), StoreError> {
        let mut approvers = self.approvers.write().await;
        approvers.insert(approver.id.0.clone(), approver);
        Ok(())
    }
}

#[derive(Default)]
struct ChainStoreInner {
    chains: HashMap<String, ApprovalChain>,
    transitions: Vec<ChainTransition>,
}

#[derive(Default)]
pub struct InMemoryChainStore {
    inner: RwLock<ChainStoreInner>,
}

#[async_trait]
impl ChainStore for InMemoryChainStore {
    async fn insert_chain(&self, chain: ApprovalChain) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.chains.insert(chain.id.0.clone(), chain);
        Ok(())
    }

    async fn chain_by_id(&self, id: &ChainId) -> Result<Option<ApprovalChain>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.chains.get(&id.0).cloned())
    }

    async fn update_chain(
        &self,
        chain: &ApprovalChain,
        expected_version: u32,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .chains
            .get_mut(&chain.id.0)
            .ok_or_else(|| StoreError::Backend(format!("chain {} missing", chain.id)))?;

        if stored.state_version != expected_version {
            return Err(StoreError::Conflict);
        }

        *stored = chain.clone();
        Ok(())
    }

    async fn append_transition(&self, transition: ChainTransition) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.transitions.push(transition);
        Ok(())
    }

    async fn transitions_for(
        &self,
        chain_id: &ChainId,
    ) -> Result<Vec<ChainTransition>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .transitions
            .iter()
            .filter(|transition| transition.chain_id == *chain_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryApprovalStore {
    approvals: RwLock<HashMap<String, Approval>>,
}

#[async_trait]
impl ApprovalStore for InMemoryApprovalStore {
    async fn insert(&self, approval: Approval) -> Result<(), StoreError> {
        let mut approvals = self.approvals.write().await;
        approvals.insert(approval.id.0.clone(), approval);
        Ok(())
    }

    async fn approval_by_id(&self, id: &ApprovalId) -> Result<Option<Approval>, StoreError> {
        let approvals = self.approvals.read().await;
        Ok(approvals.get(&id.0).cloned())
    }

    async fn update(&self, approval: &Approval) -> Result<(), StoreError> {
        let mut approvals = self.approvals.write().await;
        approvals.insert(approval.id.0.clone(), approval.clone());
        Ok(())
    }

    async fn for_chain(&self, chain_id: &ChainId) -> Result<Vec<Approval>, StoreError> {
        let approvals = self.approvals.read().await;
        let mut matched: Vec<Approval> = approvals
            .values()
            .filter(|approval| approval.chain_id == *chain_id)
            .cloned()
            .collect();
        matched.sort_by(|left, right| left.id.0.cmp(&right.id.0));
        Ok(matched)
    }

    async fn pending_for_user(&self, user: &UserId) -> Result<Vec<Approval>, StoreError> {
        let approvals = self.approvals.read().await;
        let mut matched: Vec<Approval> = approvals
            .values()
            .filter(|approval| approval.is_pending() && approval.approver == *user)
            .cloned()
            .collect();
        matched.sort_by_key(|approval| approval.requested_at);
        Ok(matched)
    }
}

#[derive(Default)]
pub struct InMemoryUserDirectory {
    active: HashSet<String>,
}

impl InMemoryUserDirectory {
    pub fn with_active_users<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { active: users.into_iter().map(Into::into).collect() }
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn is_active(&self, user: &UserId) -> Result<bool, StoreError> {
        Ok(self.active.contains(&user.0))
    }
}
