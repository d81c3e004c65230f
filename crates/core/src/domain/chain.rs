use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::document::DocumentType;
use crate::domain::ids::{ChainId, CompanyId, DocumentId, LevelId, UserId};
use crate::errors::DomainError;

/// Chain lifecycle as a tagged-variant machine. Transitions go through
/// [`ApprovalChain::transition_to`]; terminal states admit no exit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "level", rename_all = "snake_case")]
pub enum ChainState {
    Created,
    LevelOpen(usize),
    Approved,
    Rejected,
    Cancelled,
    Blocked,
}

impl ChainState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Cancelled | Self::Blocked)
    }

    pub fn open_level(&self) -> Option<usize> {
        match self {
            Self::LevelOpen(index) => Some(*index),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: &ChainState) -> bool {
        match (self, next) {
            (Self::Created, Self::LevelOpen(0)) => true,
            (Self::Created, Self::Blocked) => true,
            (Self::LevelOpen(current), Self::LevelOpen(opened)) => *opened == current + 1,
            (Self::LevelOpen(_), Self::Approved)
            | (Self::LevelOpen(_), Self::Rejected)
            | (Self::LevelOpen(_), Self::Blocked) => true,
            (state, Self::Cancelled) => !state.is_terminal(),
            _ => false,
        }
    }

    /// Storage encoding: a state kind plus the open level index, if any.
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::LevelOpen(_) => "level_open",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Blocked => "blocked",
        }
    }

    pub fn decode(kind: &str, level: Option<u32>) -> Option<Self> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "created" => Some(Self::Created),
            "level_open" => level.map(|index| Self::LevelOpen(index as usize)),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }
}

/// Aggregate state for one document's approval run.
///
/// `state_version` is the optimistic-concurrency token: every transition
/// bumps it, and stores refuse a write whose expected version is stale.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalChain {
    pub id: ChainId,
    pub company_id: CompanyId,
    pub document_type: DocumentType,
    pub document_id: DocumentId,
    pub amount: Decimal,
    pub requested_by: UserId,
    /// Resolved level ids, ascending by level number. Fixed at start.
    pub level_ids: Vec<LevelId>,
    pub state: ChainState,
    pub blocked_reason: Option<String>,
    pub state_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalChain {
    pub fn is_last_level(&self, index: usize) -> bool {
        index + 1 == self.level_ids.len()
    }

    pub fn transition_to(
        &mut self,
        next: ChainState,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if !self.state.can_transition_to(&next) {
            return Err(DomainError::InvalidChainTransition {
                from: self.state.clone(),
                to: next,
            });
        }

        self.state = next;
        self.state_version += 1;
        self.updated_at = now;
        Ok(())
    }
}

/// Append-only record of a chain state change, retained for audit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTransition {
    pub id: String,
    pub chain_id: ChainId,
    pub from_state: ChainState,
    pub to_state: ChainState,
    pub reason: String,
    pub actor: UserId,
    pub state_version: u32,
    pub occurred_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use crate::domain::document::DocumentType;
    use crate::domain::ids::{ChainId, CompanyId, DocumentId, LevelId, UserId};
    use crate::errors::DomainError;

    use super::{ApprovalChain, ChainState};

    fn chain(state: ChainState) -> ApprovalChain {
        let now = Utc::now();
        ApprovalChain {
            id: ChainId("CH-1".to_string()),
            company_id: CompanyId("co-1".to_string()),
            document_type: DocumentType::PurchaseOrder,
            document_id: DocumentId("PO-1".to_string()),
            amount: Decimal::new(2_500, 0),
            requested_by: UserId("u-owner".to_string()),
            level_ids: vec![LevelId("lv-1".to_string()), LevelId("lv-2".to_string())],
            state,
            blocked_reason: None,
            state_version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn created_chain_opens_only_the_first_level() {
        let mut chain = chain(ChainState::Created);
        chain.transition_to(ChainState::LevelOpen(0), Utc::now()).expect("created -> level 0");
        assert_eq!(chain.state, ChainState::LevelOpen(0));
        assert_eq!(chain.state_version, 2);

        let mut skipping = self::chain(ChainState::Created);
        let error = skipping
            .transition_to(ChainState::LevelOpen(1), Utc::now())
            .expect_err("created cannot skip to level 1");
        assert!(matches!(error, DomainError::InvalidChainTransition { .. }));
    }

    #[test]
    fn levels_advance_one_at_a_time() {
        let mut chain = chain(ChainState::LevelOpen(0));
        chain.transition_to(ChainState::LevelOpen(1), Utc::now()).expect("level 0 -> level 1");

        let error = chain
            .transition_to(ChainState::LevelOpen(3), Utc::now())
            .expect_err("levels cannot be skipped");
        assert!(matches!(error, DomainError::InvalidChainTransition { .. }));
    }

    #[test]
    fn terminal_states_admit_no_transition() {
        for terminal in [
            ChainState::Approved,
            ChainState::Rejected,
            ChainState::Cancelled,
            ChainState::Blocked,
        ] {
            let mut chain = chain(terminal);
            for next in [
                ChainState::LevelOpen(0),
                ChainState::Approved,
                ChainState::Rejected,
                ChainState::Cancelled,
                ChainState::Blocked,
            ] {
                assert!(
                    chain.transition_to(next, Utc::now()).is_err(),
                    "terminal state must absorb"
                );
            }
        }
    }

    #[test]
    fn cancellation_is_reachable_from_any_non_terminal_state() {
        for state in [ChainState::Created, ChainState::LevelOpen(0), ChainState::LevelOpen(4)] {
            let mut chain = chain(state);
            chain.transition_to(ChainState::Cancelled, Utc::now()).expect("cancel non-terminal");
        }
    }

    #[test]
    fn chain_state_round_trips_from_storage_encoding() {
        let cases = [
            (ChainState::Created, None),
            (ChainState::LevelOpen(2), Some(2)),
            (ChainState::Approved, None),
            (ChainState::Rejected, None),
            (ChainState::Cancelled, None),
            (ChainState::Blocked, None),
        ];

        for (state, level) in cases {
            assert_eq!(ChainState::decode(state.kind_str(), level), Some(state));
        }
        assert_eq!(ChainState::decode("level_open", None), None);
    }
}
