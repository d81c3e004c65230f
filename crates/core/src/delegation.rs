use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::ids::{LevelApproverId, UserId};
use crate::domain::level::{ApprovalLevel, Delegation, DelegationWindow, LevelApprover};
use crate::errors::{DelegationError, EngineError};
use crate::store::{LevelStore, UserDirectory};

/// Validates and applies temporary reassignment of approval authority.
///
/// Delegation is resolved once per approval instance: configured windows are
/// consulted at level-open time via [`DelegationManager::resolve_active_approver`],
/// and the resulting user stays bound to the instance no matter how the
/// window changes afterwards.
pub struct DelegationManager {
    directory: Arc<dyn UserDirectory>,
}

impl DelegationManager {
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self { directory }
    }

    /// The effective approver for an assignment at a given instant.
    pub fn resolve_active_approver(assignment: &LevelApprover, at: DateTime<Utc>) -> &UserId {
        match &assignment.delegation {
            Some(delegation) if delegation.window.contains(at) => &delegation.delegate,
            _ => &assignment.user_id,
        }
    }

    /// Record a delegation window on an assignment. A new window supersedes
    /// an overlapping prior one; approvals already issued to the original
    /// approver remain bound to that approver.
    pub async fn set_delegation(
        &self,
        levels: &dyn LevelStore,
        assignment_id: &LevelApproverId,
        delegate: UserId,
        window: DelegationWindow,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<LevelApprover, EngineError> {
        let mut assignment = levels
            .approver_by_id(assignment_id)
            .await?
            .ok_or_else(|| EngineError::not_found("level approver", assignment_id.0.clone()))?;
        let level = levels
            .level_by_id(&assignment.level_id)
            .await?
            .ok_or_else(|| EngineError::not_found("approval level", assignment.level_id.0.clone()))?;

        self.validate_handoff(&level, &assignment.user_id, &delegate, &window, now).await?;

        assignment.delegation =
            Some(Delegation { delegate, window, reason: reason.into() });
        assignment.updated_at = now;
        levels.save_approver(assignment.clone()).await?;

        Ok(assignment)
    }

    /// Shared eligibility check for configured windows and in-flight
    /// per-approval handoffs.
    pub(crate) async fn validate_handoff(
        &self,
        level: &ApprovalLevel,
        current: &UserId,
        delegate: &UserId,
        window: &DelegationWindow,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        if !level.allow_delegation {
            return Err(DelegationError::DelegationNotAllowed(level.id.clone()).into());
        }
        if !window.is_valid() {
            return Err(DelegationError::InvalidWindow.into());
        }
        if window.to <= now {
            return Err(DelegationError::WindowExpired.into());
        }
        if delegate == current {
            return Err(DelegationError::DelegateNotEligible(delegate.clone()).into());
        }
        if !self.directory.is_active(delegate).await? {
            return Err(DelegationError::DelegateNotEligible(delegate.clone()).into());
        }
        Ok(())
    }
}
