use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome};
use crate::domain::approval::{Approval, ApprovalStatus};
use crate::domain::chain::{ApprovalChain, ChainState};
use crate::domain::ids::{ApprovalId, ChainId, UserId};
use crate::domain::level::DelegationWindow;
use crate::errors::{DelegationError, EngineError};
use crate::orchestrator::ChainOrchestrator;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

#[derive(Clone, Debug)]
pub struct DecisionOutcome {
    pub approval_id: ApprovalId,
    pub chain_id: ChainId,
    /// Chain state after quorum re-evaluation.
    pub chain_state: ChainState,
}

/// Applies approver decisions to individual instances and hands the chain
/// back to the orchestrator for quorum evaluation.
///
/// Every mutation happens under the chain's lock, against a fresh read of
/// both the instance and the chain, so two racing decisions serialize and
/// the loser observes the first writer's effects.
pub struct DecisionProcessor {
    engine: Arc<ChainOrchestrator>,
}

impl DecisionProcessor {
    pub fn new(engine: Arc<ChainOrchestrator>) -> Self {
        Self { engine }
    }

    pub async fn decide(
        &self,
        approval_id: &ApprovalId,
        by: &UserId,
        decision: Decision,
        comments: Option<String>,
        correlation_id: &str,
    ) -> Result<DecisionOutcome, EngineError> {
        let snapshot = self.load_instance(approval_id).await?;
        let _guard = self.engine.locks.acquire(&snapshot.chain_id).await;

        // Re-read under the lock; the snapshot only located the chain.
        let mut instance = self.load_instance(approval_id).await?;
        let mut chain = self.load_chain(&instance.chain_id).await?;
        self.guard_open(&instance, &chain)?;
        if *by != instance.approver {
            return Err(EngineError::NotAuthorized(by.clone()));
        }

        let now = Utc::now();
        instance.status = match decision {
            Decision::Approve => ApprovalStatus::Approved,
            Decision::Reject => ApprovalStatus::Rejected,
        };
        instance.decided_at = Some(now);
        instance.comments = comments;
        self.engine.approvals.update(&instance).await?;

        let event_type = match decision {
            Decision::Approve => "decision.approved",
            Decision::Reject => "decision.rejected",
        };
        info!(
            approval_id = %instance.id,
            chain_id = %chain.id,
            decided_by = %by,
            decision = event_type,
            "decision recorded"
        );
        self.engine.audit.emit(
            AuditEvent::new(
                Some(chain.id.clone()),
                correlation_id,
                event_type,
                AuditCategory::Decision,
                by.0.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("level_number", instance.level_number.to_string()),
        );

        self.engine.reevaluate(&mut chain, by, correlation_id).await?;

        Ok(DecisionOutcome {
            approval_id: instance.id,
            chain_id: chain.id.clone(),
            chain_state: chain.state,
        })
    }

    /// Hand one pending instance to another approver for the rest of the
    /// level. The original instance becomes `Delegated` and a fresh pending
    /// instance is issued to the delegate; the level's quorum arithmetic is
    /// unchanged.
    pub async fn delegate(
        &self,
        approval_id: &ApprovalId,
        by: &UserId,
        delegate: UserId,
        window: DelegationWindow,
        reason: impl Into<String>,
        correlation_id: &str,
    ) -> Result<Approval, EngineError> {
        let snapshot = self.load_instance(approval_id).await?;
        let _guard = self.engine.locks.acquire(&snapshot.chain_id).await;

        let mut instance = self.load_instance(approval_id).await?;
        let chain = self.load_chain(&instance.chain_id).await?;
        self.guard_open(&instance, &chain)?;
        if *by != instance.approver {
            return Err(EngineError::NotAuthorized(by.clone()));
        }
        if instance.delegated_from.is_some() {
            return Err(DelegationError::ReDelegation.into());
        }

        let now = Utc::now();
        let level = self
            .engine
            .levels
            .level_by_id(&instance.level_id)
            .await?
            .ok_or_else(|| EngineError::not_found("approval level", instance.level_id.0.clone()))?;
        self.engine.delegation.validate_handoff(&level, by, &delegate, &window, now).await?;

        // A user already holding a pending instance at this level cannot
        // receive a second one.
        let siblings = self.engine.approvals.for_chain(&chain.id).await?;
        if siblings.iter().any(|sibling| {
            sibling.level_id == instance.level_id
                && sibling.is_pending()
                && sibling.approver == delegate
        }) {
            return Err(DelegationError::DelegateNotEligible(delegate).into());
        }

        let replacement = Approval {
            id: ApprovalId(format!("APR-{}", Uuid::new_v4())),
            chain_id: instance.chain_id.clone(),
            level_id: instance.level_id.clone(),
            level_number: instance.level_number,
            approver: delegate.clone(),
            delegated_from: Some(by.clone()),
            status: ApprovalStatus::Pending,
            amount: instance.amount,
            comments: None,
            requested_at: now,
            decided_at: None,
            expires_at: instance.expires_at,
        };
        self.engine.approvals.insert(replacement.clone()).await?;

        instance.status = ApprovalStatus::Delegated;
        instance.decided_at = Some(now);
        instance.comments = Some(reason.into());
        self.engine.approvals.update(&instance).await?;

        info!(
            approval_id = %instance.id,
            chain_id = %chain.id,
            from = %by,
            to = %delegate,
            "approval delegated"
        );
        self.engine.audit.emit(
            AuditEvent::new(
                Some(chain.id.clone()),
                correlation_id,
                "decision.delegated",
                AuditCategory::Delegation,
                by.0.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("delegate", delegate.0.clone())
            .with_metadata("level_number", instance.level_number.to_string()),
        );

        Ok(replacement)
    }

    async fn load_instance(&self, approval_id: &ApprovalId) -> Result<Approval, EngineError> {
        self.engine
            .approvals
            .approval_by_id(approval_id)
            .await?
            .ok_or_else(|| EngineError::not_found("approval", approval_id.0.clone()))
    }

    async fn load_chain(&self, chain_id: &ChainId) -> Result<ApprovalChain, EngineError> {
        self.engine
            .chains
            .chain_by_id(chain_id)
            .await?
            .ok_or_else(|| EngineError::not_found("approval chain", chain_id.0.clone()))
    }

    /// Reject instances that can no longer receive a decision. A decided
    /// instance reports its own fate; a voided one reports that its level
    /// closed around it.
    fn guard_open(&self, instance: &Approval, chain: &ApprovalChain) -> Result<(), EngineError> {
        match instance.status {
            ApprovalStatus::Pending => {}
            ApprovalStatus::Voided => {
                return Err(EngineError::ChainNotOpenAtThisLevel(instance.id.clone()));
            }
            ApprovalStatus::Approved | ApprovalStatus::Rejected | ApprovalStatus::Delegated => {
                return Err(EngineError::AlreadyDecided(instance.id.clone()));
            }
        }

        let open_here = chain
            .state
            .open_level()
            .and_then(|index| chain.level_ids.get(index))
            .is_some_and(|level_id| *level_id == instance.level_id);
        if !open_here {
            return Err(EngineError::ChainNotOpenAtThisLevel(instance.id.clone()));
        }

        Ok(())
    }
}
