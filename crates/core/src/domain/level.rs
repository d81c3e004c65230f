use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::document::DocumentType;
use crate::domain::ids::{CompanyId, LevelApproverId, LevelId, UserId};

/// Half-open amount band `[min, max)`. Either bound may be absent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountRange {
    pub min: Option<Decimal>,
    pub max: Option<Decimal>,
}

impl AmountRange {
    pub fn new(min: Option<Decimal>, max: Option<Decimal>) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, amount: Decimal) -> bool {
        if let Some(min) = self.min {
            if amount < min {
                return false;
            }
        }
        if let Some(max) = self.max {
            if amount >= max {
                return false;
            }
        }
        true
    }

    pub fn overlaps(&self, other: &AmountRange) -> bool {
        let below = match (self.max, other.min) {
            (Some(max), Some(min)) => max <= min,
            _ => false,
        };
        let above = match (self.min, other.max) {
            (Some(min), Some(max)) => max <= min,
            _ => false,
        };
        !(below || above)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "count", rename_all = "snake_case")]
pub enum QuorumPolicy {
    RequireAll,
    RequiredCount(u32),
}

impl QuorumPolicy {
    /// Whether the level's decisions are sufficient to proceed.
    ///
    /// `approved` counts instances in `Approved`; `outstanding` counts
    /// instances still awaiting a decision (delegated originals excluded,
    /// since their replacement instance is counted in its own right).
    pub fn satisfied(&self, approved: usize, outstanding: usize) -> bool {
        match self {
            Self::RequireAll => outstanding == 0 && approved > 0,
            Self::RequiredCount(required) => approved >= *required as usize,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalLevel {
    pub id: LevelId,
    pub company_id: CompanyId,
    pub document_type: DocumentType,
    pub level_number: u32,
    pub range: AmountRange,
    pub quorum: QuorumPolicy,
    pub allow_delegation: bool,
    pub response_timeout_hours: Option<i64>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Delegation validity window `[from, to)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl DelegationWindow {
    pub fn is_valid(&self) -> bool {
        self.to > self.from
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.from && at < self.to
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub delegate: UserId,
    pub window: DelegationWindow,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelApprover {
    pub id: LevelApproverId,
    pub level_id: LevelId,
    pub user_id: UserId,
    pub active: bool,
    pub delegation: Option<Delegation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use super::{AmountRange, DelegationWindow, QuorumPolicy};

    fn dec(value: i64) -> Decimal {
        Decimal::new(value, 0)
    }

    #[test]
    fn range_is_inclusive_below_and_exclusive_above() {
        let range = AmountRange::new(Some(dec(1_000)), Some(dec(5_000)));

        assert!(range.contains(dec(1_000)));
        assert!(range.contains(dec(4_999)));
        assert!(!range.contains(dec(5_000)));
        assert!(!range.contains(dec(999)));
    }

    #[test]
    fn open_bounds_accept_any_amount_on_that_side() {
        let no_floor = AmountRange::new(None, Some(dec(100)));
        let no_ceiling = AmountRange::new(Some(dec(100)), None);

        assert!(no_floor.contains(dec(-50)));
        assert!(!no_floor.contains(dec(100)));
        assert!(no_ceiling.contains(dec(1_000_000)));
        assert!(!no_ceiling.contains(dec(99)));
    }

    #[test]
    fn adjacent_half_open_ranges_do_not_overlap() {
        let lower = AmountRange::new(Some(dec(0)), Some(dec(1_000)));
        let upper = AmountRange::new(Some(dec(1_000)), Some(dec(5_000)));

        assert!(!lower.overlaps(&upper));
        assert!(!upper.overlaps(&lower));
    }

    #[test]
    fn intersecting_ranges_overlap_in_both_directions() {
        let left = AmountRange::new(Some(dec(0)), Some(dec(2_000)));
        let right = AmountRange::new(Some(dec(1_500)), None);

        assert!(left.overlaps(&right));
        assert!(right.overlaps(&left));
    }

    #[test]
    fn require_all_needs_every_outstanding_instance_resolved() {
        assert!(QuorumPolicy::RequireAll.satisfied(3, 0));
        assert!(!QuorumPolicy::RequireAll.satisfied(2, 1));
        assert!(!QuorumPolicy::RequireAll.satisfied(0, 0));
    }

    #[test]
    fn required_count_is_satisfied_at_threshold() {
        assert!(!QuorumPolicy::RequiredCount(2).satisfied(1, 2));
        assert!(QuorumPolicy::RequiredCount(2).satisfied(2, 1));
        assert!(QuorumPolicy::RequiredCount(2).satisfied(3, 0));
    }

    #[test]
    fn delegation_window_is_half_open() {
        let now = Utc::now();
        let window = DelegationWindow { from: now, to: now + Duration::hours(48) };

        assert!(window.is_valid());
        assert!(window.contains(now));
        assert!(!window.contains(now + Duration::hours(48)));
        assert!(!window.contains(now - Duration::seconds(1)));
    }
}
