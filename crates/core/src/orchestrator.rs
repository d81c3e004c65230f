use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use crate::catalog::LevelCatalog;
use crate::config::EngineSettings;
use crate::delegation::DelegationManager;
use crate::domain::approval::{Approval, ApprovalStatus};
use crate::domain::chain::{ApprovalChain, ChainState, ChainTransition};
use crate::domain::document::DocumentType;
use crate::domain::ids::{ApprovalId, ChainId, CompanyId, DocumentId, LevelId, UserId};
use crate::domain::level::QuorumPolicy;
use crate::errors::{DomainError, EngineError};
use crate::notify::{ChainNotification, NotificationSink};
use crate::resolver::{LevelResolver, Resolution};
use crate::store::{ApprovalStore, ChainStore, LevelStore, StoreError, UserDirectory};

/// Per-chain async mutex registry. Serializes decision application within
/// this process; the `state_version` compare-and-swap in the chain store
/// guards against writers outside it.
#[derive(Clone, Default)]
pub(crate) struct ChainLocks {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl ChainLocks {
    pub(crate) async fn acquire(&self, chain_id: &ChainId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = match self.locks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            locks.entry(chain_id.0.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Drop the registry entry for a chain that can no longer change state.
    /// A late acquirer gets a fresh mutex, re-reads the terminal chain, and
    /// bails before writing; the version check covers the rest.
    fn evict(&self, chain_id: &ChainId) {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.remove(&chain_id.0);
    }

    #[cfg(test)]
    fn tracked_chains(&self) -> usize {
        match self.locks.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct StartChainRequest {
    pub company_id: CompanyId,
    pub document_type: DocumentType,
    pub document_id: DocumentId,
    pub amount: Decimal,
    pub requested_by: UserId,
    pub correlation_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    /// A chain was created and its first level opened (or blocked).
    Started { chain_id: ChainId },
    /// No active level band contains the amount; no chain record exists.
    AutoApproved,
}

/// Read model for one chain: current position plus its full transition
/// history.
#[derive(Clone, Debug)]
pub struct ChainStatus {
    pub chain_id: ChainId,
    pub document_id: DocumentId,
    pub state: ChainState,
    pub current_level: Option<usize>,
    pub level_count: usize,
    pub blocked_reason: Option<String>,
    pub history: Vec<ChainTransition>,
}

/// Work-queue entry for an approver, joined with the owning chain's
/// document context.
#[derive(Clone, Debug)]
pub struct PendingApproval {
    pub approval_id: ApprovalId,
    pub chain_id: ChainId,
    pub company_id: CompanyId,
    pub document_type: DocumentType,
    pub document_id: DocumentId,
    pub level_number: u32,
    pub amount: Decimal,
    pub requested_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Drives chains through their level sequence: creation, level opening,
/// quorum evaluation, and terminal transitions. All writes to a chain happen
/// under its [`ChainLocks`] entry.
pub struct ChainOrchestrator {
    pub(crate) levels: Arc<dyn LevelStore>,
    pub(crate) chains: Arc<dyn ChainStore>,
    pub(crate) approvals: Arc<dyn ApprovalStore>,
    pub(crate) directory: Arc<dyn UserDirectory>,
    pub(crate) delegation: DelegationManager,
    resolver: LevelResolver,
    pub(crate) audit: Arc<dyn AuditSink>,
    pub(crate) notifier: Arc<dyn NotificationSink>,
    settings: EngineSettings,
    pub(crate) locks: ChainLocks,
}

impl ChainOrchestrator {
    pub fn new(
        levels: Arc<dyn LevelStore>,
        chains: Arc<dyn ChainStore>,
        approvals: Arc<dyn ApprovalStore>,
        directory: Arc<dyn UserDirectory>,
        audit: Arc<dyn AuditSink>,
        notifier: Arc<dyn NotificationSink>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            levels,
            chains,
            approvals,
            delegation: DelegationManager::new(directory.clone()),
            directory,
            resolver: LevelResolver,
            audit,
            notifier,
            settings,
            locks: ChainLocks::default(),
        }
    }

    pub fn delegation_manager(&self) -> &DelegationManager {
        &self.delegation
    }

    /// Resolve the level sequence for a document and open the first level.
    ///
    /// When no band matches the amount, no chain record is created and the
    /// caller receives [`StartOutcome::AutoApproved`].
    pub async fn start_chain(
        &self,
        request: StartChainRequest,
    ) -> Result<StartOutcome, EngineError> {
        if !self.directory.is_active(&request.requested_by).await? {
            return Err(EngineError::NotAuthorized(request.requested_by));
        }

        // Roster faults in the resolved levels surface later as `Blocked`
        // chains, never as a start failure; full catalog validation is an
        // administrative concern.
        let catalog = LevelCatalog::load(
            self.levels.as_ref(),
            request.company_id.clone(),
            request.document_type,
        )
        .await?;

        let resolved = self.resolver.resolve(&catalog, request.amount)?;
        let levels = match resolved {
            Resolution::NoApplicableLevel => {
                info!(
                    document_id = %request.document_id,
                    amount = %request.amount,
                    "no approval level applies, document auto-approved"
                );
                self.audit.emit(
                    AuditEvent::new(
                        None,
                        request.correlation_id.clone(),
                        "chain.auto_approved",
                        AuditCategory::Chain,
                        request.requested_by.0.clone(),
                        AuditOutcome::Success,
                    )
                    .with_metadata("document_id", request.document_id.0.clone())
                    .with_metadata("amount", request.amount.to_string()),
                );
                return Ok(StartOutcome::AutoApproved);
            }
            Resolution::Levels(levels) => levels,
        };

        let now = Utc::now();
        let mut chain = ApprovalChain {
            id: ChainId(format!("CH-{}", Uuid::new_v4())),
            company_id: request.company_id,
            document_type: request.document_type,
            document_id: request.document_id,
            amount: request.amount,
            requested_by: request.requested_by.clone(),
            level_ids: levels.iter().map(|level| level.id.clone()).collect(),
            state: ChainState::Created,
            blocked_reason: None,
            state_version: 1,
            created_at: now,
            updated_at: now,
        };
        self.chains.insert_chain(chain.clone()).await?;

        let _guard = self.locks.acquire(&chain.id).await;
        self.open_level(&mut chain, 0, &request.requested_by, &request.correlation_id).await?;

        Ok(StartOutcome::Started { chain_id: chain.id })
    }

    /// Open one level: resolve effective approvers, issue instances, and
    /// commit the state advance. An empty roster blocks the chain instead.
    pub(crate) async fn open_level(
        &self,
        chain: &mut ApprovalChain,
        index: usize,
        actor: &UserId,
        correlation_id: &str,
    ) -> Result<(), EngineError> {
        let now = Utc::now();
        let level_id = chain.level_ids.get(index).cloned().ok_or_else(|| {
            DomainError::InvariantViolation(format!(
                "chain {} has no level at position {index}",
                chain.id
            ))
        })?;
        let level = self
            .levels
            .level_by_id(&level_id)
            .await?
            .ok_or_else(|| EngineError::not_found("approval level", level_id.0.clone()))?;

        let mut effective: Vec<UserId> = Vec::new();
        for assignment in self.levels.approvers_for(&level_id).await? {
            if !assignment.active {
                continue;
            }
            let candidate = DelegationManager::resolve_active_approver(&assignment, now).clone();
            let chosen = if candidate != assignment.user_id
                && !self.directory.is_active(&candidate).await?
            {
                // Delegate left the company mid-window; the assignment
                // falls back to its original holder.
                assignment.user_id.clone()
            } else {
                candidate
            };
            if !self.directory.is_active(&chosen).await? {
                continue;
            }
            if !effective.contains(&chosen) {
                effective.push(chosen);
            }
        }

        let block_reason = if effective.is_empty() {
            Some(format!("no eligible approvers at level {}", level.level_number))
        } else if let QuorumPolicy::RequiredCount(count) = level.quorum {
            if count == 0 || count as usize > effective.len() {
                Some(format!(
                    "quorum of {count} cannot be met by {} eligible approvers at level {}",
                    effective.len(),
                    level.level_number
                ))
            } else {
                None
            }
        } else {
            None
        };

        if let Some(reason) = block_reason {
            warn!(chain_id = %chain.id, level = level.level_number, "blocking chain: {reason}");
            chain.blocked_reason = Some(reason.clone());
            self.commit_transition(chain, ChainState::Blocked, reason.clone(), actor, now)
                .await?;
            self.audit.emit(
                AuditEvent::new(
                    Some(chain.id.clone()),
                    correlation_id,
                    "chain.blocked",
                    AuditCategory::Chain,
                    actor.0.clone(),
                    AuditOutcome::Failed,
                )
                .with_metadata("level_number", level.level_number.to_string())
                .with_metadata("reason", reason.clone()),
            );
            self.notifier.notify(ChainNotification::ChainBlocked {
                chain_id: chain.id.clone(),
                reason,
            });
            return Ok(());
        }

        self.commit_transition(
            chain,
            ChainState::LevelOpen(index),
            format!("level {} opened", level.level_number),
            actor,
            now,
        )
        .await?;

        let expires_at = level
            .response_timeout_hours
            .or(self.settings.default_response_timeout_hours)
            .map(|hours| now + Duration::hours(hours));
        for approver in &effective {
            self.approvals
                .insert(Approval {
                    id: ApprovalId(format!("APR-{}", Uuid::new_v4())),
                    chain_id: chain.id.clone(),
                    level_id: level_id.clone(),
                    level_number: level.level_number,
                    approver: approver.clone(),
                    delegated_from: None,
                    status: ApprovalStatus::Pending,
                    amount: chain.amount,
                    comments: None,
                    requested_at: now,
                    decided_at: None,
                    expires_at,
                })
                .await?;
        }

        info!(
            chain_id = %chain.id,
            level = level.level_number,
            instances = effective.len(),
            "opened approval level"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(chain.id.clone()),
                correlation_id,
                "chain.level_opened",
                AuditCategory::Chain,
                actor.0.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("level_number", level.level_number.to_string())
            .with_metadata("instances", effective.len().to_string()),
        );
        self.notifier.notify(ChainNotification::LevelOpened {
            chain_id: chain.id.clone(),
            level_number: level.level_number,
            approvers: effective,
        });

        Ok(())
    }

    /// Re-read the open level's instances and advance the chain if a verdict
    /// is in: any rejection short-circuits, a satisfied quorum moves on.
    /// Callers must hold the chain lock.
    pub(crate) async fn reevaluate(
        &self,
        chain: &mut ApprovalChain,
        actor: &UserId,
        correlation_id: &str,
    ) -> Result<(), EngineError> {
        let Some(index) = chain.state.open_level() else {
            return Ok(());
        };
        let level_id = chain.level_ids.get(index).cloned().ok_or_else(|| {
            DomainError::InvariantViolation(format!(
                "chain {} has no level at position {index}",
                chain.id
            ))
        })?;
        let now = Utc::now();

        let instances: Vec<Approval> = self
            .approvals
            .for_chain(&chain.id)
            .await?
            .into_iter()
            .filter(|instance| instance.level_id == level_id)
            .collect();

        if let Some(rejection) =
            instances.iter().find(|instance| instance.status == ApprovalStatus::Rejected)
        {
            // Instances are voided only after the state advance commits; a
            // refused commit must leave the level intact.
            self.commit_transition(
                chain,
                ChainState::Rejected,
                format!("rejected by {} at level {}", rejection.approver, rejection.level_number),
                actor,
                now,
            )
            .await?;
            self.void_pending(&instances, now).await?;
            info!(chain_id = %chain.id, rejected_by = %rejection.approver, "chain rejected");
            self.audit.emit(
                AuditEvent::new(
                    Some(chain.id.clone()),
                    correlation_id,
                    "chain.rejected",
                    AuditCategory::Chain,
                    actor.0.clone(),
                    AuditOutcome::Success,
                )
                .with_metadata("level_number", rejection.level_number.to_string()),
            );
            self.notifier.notify(ChainNotification::ChainRejected {
                chain_id: chain.id.clone(),
                rejected_by: rejection.approver.clone(),
            });
            return Ok(());
        }

        let level = self
            .levels
            .level_by_id(&level_id)
            .await?
            .ok_or_else(|| EngineError::not_found("approval level", level_id.0.clone()))?;
        let approved =
            instances.iter().filter(|instance| instance.status == ApprovalStatus::Approved).count();
        let outstanding = instances.iter().filter(|instance| instance.is_pending()).count();

        if !level.quorum.satisfied(approved, outstanding) {
            return Ok(());
        }

        if chain.is_last_level(index) {
            self.commit_transition(
                chain,
                ChainState::Approved,
                format!("quorum satisfied at final level {}", level.level_number),
                actor,
                now,
            )
            .await?;
            // Outstanding decisions at the closed level are moot and must
            // never reach a terminal status later.
            self.void_pending(&instances, now).await?;
            info!(chain_id = %chain.id, "chain fully approved");
            self.audit.emit(
                AuditEvent::new(
                    Some(chain.id.clone()),
                    correlation_id,
                    "chain.approved",
                    AuditCategory::Chain,
                    actor.0.clone(),
                    AuditOutcome::Success,
                ),
            );
            self.notifier
                .notify(ChainNotification::ChainApproved { chain_id: chain.id.clone() });
            return Ok(());
        }

        self.open_level(chain, index + 1, actor, correlation_id).await?;
        self.void_pending(&instances, now).await
    }

    /// Requester-initiated abort. Only the user who started the chain may
    /// cancel it, and only before a terminal state.
    pub async fn cancel_chain(
        &self,
        chain_id: &ChainId,
        by: &UserId,
        correlation_id: &str,
    ) -> Result<ApprovalChain, EngineError> {
        let _guard = self.locks.acquire(chain_id).await;
        let mut chain = self
            .chains
            .chain_by_id(chain_id)
            .await?
            .ok_or_else(|| EngineError::not_found("approval chain", chain_id.0.clone()))?;

        if chain.state.is_terminal() {
            return Err(EngineError::ChainTerminal(chain.id));
        }
        if *by != chain.requested_by {
            return Err(EngineError::NotAuthorized(by.clone()));
        }

        let now = Utc::now();
        let instances = self.approvals.for_chain(chain_id).await?;
        self.commit_transition(
            &mut chain,
            ChainState::Cancelled,
            "cancelled by requester".to_string(),
            by,
            now,
        )
        .await?;
        self.void_pending(&instances, now).await?;

        info!(chain_id = %chain.id, cancelled_by = %by, "chain cancelled");
        self.audit.emit(AuditEvent::new(
            Some(chain.id.clone()),
            correlation_id,
            "chain.cancelled",
            AuditCategory::Chain,
            by.0.clone(),
            AuditOutcome::Success,
        ));
        self.notifier.notify(ChainNotification::ChainCancelled {
            chain_id: chain.id.clone(),
            cancelled_by: by.clone(),
        });

        Ok(chain)
    }

    pub async fn chain_status(&self, chain_id: &ChainId) -> Result<ChainStatus, EngineError> {
        let chain = self
            .chains
            .chain_by_id(chain_id)
            .await?
            .ok_or_else(|| EngineError::not_found("approval chain", chain_id.0.clone()))?;
        let history = self.chains.transitions_for(chain_id).await?;

        Ok(ChainStatus {
            chain_id: chain.id,
            document_id: chain.document_id,
            current_level: chain.state.open_level(),
            level_count: chain.level_ids.len(),
            state: chain.state,
            blocked_reason: chain.blocked_reason,
            history,
        })
    }

    /// All pending instances addressed to a user, joined with document
    /// context, oldest first.
    pub async fn pending_for_user(
        &self,
        user: &UserId,
    ) -> Result<Vec<PendingApproval>, EngineError> {
        let mut entries = Vec::new();
        for instance in self.approvals.pending_for_user(user).await? {
            let chain = self
                .chains
                .chain_by_id(&instance.chain_id)
                .await?
                .ok_or_else(|| {
                    EngineError::not_found("approval chain", instance.chain_id.0.clone())
                })?;
            entries.push(PendingApproval {
                approval_id: instance.id,
                chain_id: chain.id,
                company_id: chain.company_id,
                document_type: chain.document_type,
                document_id: chain.document_id,
                level_number: instance.level_number,
                amount: instance.amount,
                requested_at: instance.requested_at,
                expires_at: instance.expires_at,
            });
        }
        entries.sort_by_key(|entry| entry.requested_at);
        Ok(entries)
    }

    pub(crate) async fn commit_transition(
        &self,
        chain: &mut ApprovalChain,
        next: ChainState,
        reason: String,
        actor: &UserId,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let from = chain.state.clone();
        let expected_version = chain.state_version;
        chain.transition_to(next, now)?;

        self.chains.update_chain(chain, expected_version).await.map_err(|error| match error {
            StoreError::Conflict => EngineError::Conflict(chain.id.clone()),
            other => EngineError::Store(other),
        })?;
        self.chains
            .append_transition(ChainTransition {
                id: Uuid::new_v4().to_string(),
                chain_id: chain.id.clone(),
                from_state: from,
                to_state: chain.state.clone(),
                reason,
                actor: actor.clone(),
                state_version: chain.state_version,
                occurred_at: now,
            })
            .await?;

        if chain.state.is_terminal() {
            self.locks.evict(&chain.id);
        }
        Ok(())
    }

    async fn void_pending(
        &self,
        instances: &[Approval],
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        for instance in instances.iter().filter(|instance| instance.is_pending()) {
            let mut voided = instance.clone();
            voided.status = ApprovalStatus::Voided;
            voided.decided_at = Some(now);
            self.approvals.update(&voided).await?;
        }
        Ok(())
    }
}
