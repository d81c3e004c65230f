use std::collections::HashMap;

use crate::domain::document::DocumentType;
use crate::domain::ids::{CompanyId, LevelId};
use crate::domain::level::{ApprovalLevel, LevelApprover, QuorumPolicy};
use crate::errors::ConfigViolation;
use crate::store::{LevelStore, StoreError};

/// Validated, per-company/document-type view over configured approval levels
/// and their approver assignments. Pure data plus lookup; decision logic
/// lives in the resolver and orchestrator.
#[derive(Clone, Debug)]
pub struct LevelCatalog {
    company_id: CompanyId,
    document_type: DocumentType,
    levels: Vec<ApprovalLevel>,
    approvers_by_level: HashMap<String, Vec<LevelApprover>>,
}

impl LevelCatalog {
    pub fn from_parts(
        company_id: CompanyId,
        document_type: DocumentType,
        levels: Vec<ApprovalLevel>,
        approvers: Vec<LevelApprover>,
    ) -> Self {
        let mut levels: Vec<ApprovalLevel> = levels
            .into_iter()
            .filter(|level| {
                level.company_id == company_id && level.document_type == document_type
            })
            .collect();
        levels.sort_by_key(|level| level.level_number);

        let mut approvers_by_level: HashMap<String, Vec<LevelApprover>> = HashMap::new();
        for approver in approvers {
            approvers_by_level.entry(approver.level_id.0.clone()).or_default().push(approver);
        }

        Self { company_id, document_type, levels, approvers_by_level }
    }

    pub async fn load(
        store: &dyn LevelStore,
        company_id: CompanyId,
        document_type: DocumentType,
    ) -> Result<Self, StoreError> {
        let levels = store.levels_for(&company_id, document_type).await?;
        let mut approvers = Vec::new();
        for level in &levels {
            approvers.extend(store.approvers_for(&level.id).await?);
        }
        Ok(Self::from_parts(company_id, document_type, levels, approvers))
    }

    pub fn company_id(&self) -> &CompanyId {
        &self.company_id
    }

    pub fn document_type(&self) -> DocumentType {
        self.document_type
    }

    /// Active levels, ascending by level number.
    pub fn active_levels(&self) -> Vec<&ApprovalLevel> {
        self.levels.iter().filter(|level| level.active).collect()
    }

    pub fn level_by_id(&self, id: &LevelId) -> Option<&ApprovalLevel> {
        self.levels.iter().find(|level| level.id == *id)
    }

    /// Active assignments for one level.
    pub fn active_approvers(&self, level_id: &LevelId) -> Vec<&LevelApprover> {
        self.approvers_by_level
            .get(&level_id.0)
            .map(|assignments| {
                assignments.iter().filter(|assignment| assignment.active).collect()
            })
            .unwrap_or_default()
    }

    /// Static configuration checks, independent of any document amount.
    pub fn validate(&self) -> Result<(), ConfigViolation> {
        let active = self.active_levels();

        for (index, level) in active.iter().enumerate() {
            let assignments = self.active_approvers(&level.id);
            if let QuorumPolicy::RequiredCount(count) = level.quorum {
                if count == 0 {
                    return Err(ConfigViolation::ZeroQuorumCount { level: level.id.clone() });
                }
                if count as usize > assignments.len() {
                    return Err(ConfigViolation::QuorumExceedsApprovers {
                        level: level.id.clone(),
                        required: count,
                        assigned: assignments.len(),
                    });
                }
            }
            if assignments.is_empty() {
                return Err(ConfigViolation::NoEligibleApprovers { level: level.id.clone() });
            }

            for assignment in assignments {
                if let Some(delegation) = &assignment.delegation {
                    if !delegation.window.is_valid() {
                        return Err(ConfigViolation::InvalidDelegationWindow {
                            level: level.id.clone(),
                        });
                    }
                }
            }

            for other in active.iter().skip(index + 1) {
                if other.level_number == level.level_number
                    && other.range.overlaps(&level.range)
                {
                    return Err(ConfigViolation::OverlappingLevels {
                        document_type: self.document_type,
                        level_number: level.level_number,
                        first: level.id.clone(),
                        second: other.id.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use crate::domain::document::DocumentType;
    use crate::domain::ids::{CompanyId, LevelApproverId, LevelId, UserId};
    use crate::domain::level::{AmountRange, ApprovalLevel, LevelApprover, QuorumPolicy};
    use crate::errors::ConfigViolation;

    use super::LevelCatalog;

    fn level(id: &str, number: u32, min: i64, max: Option<i64>, quorum: QuorumPolicy) -> ApprovalLevel {
        let now = Utc::now();
        ApprovalLevel {
            id: LevelId(id.to_string()),
            company_id: CompanyId("co-1".to_string()),
            document_type: DocumentType::PurchaseOrder,
            level_number: number,
            range: AmountRange::new(
                Some(Decimal::new(min, 0)),
                max.map(|value| Decimal::new(value, 0)),
            ),
            quorum,
            allow_delegation: true,
            response_timeout_hours: None,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn assignment(id: &str, level_id: &str, user: &str) -> LevelApprover {
        let now = Utc::now();
        LevelApprover {
            id: LevelApproverId(id.to_string()),
            level_id: LevelId(level_id.to_string()),
            user_id: UserId(user.to_string()),
            active: true,
            delegation: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn catalog_filters_to_its_company_and_document_type() {
        let mut foreign = level("lv-x", 1, 0, None, QuorumPolicy::RequireAll);
        foreign.company_id = CompanyId("co-2".to_string());

        let catalog = LevelCatalog::from_parts(
            CompanyId("co-1".to_string()),
            DocumentType::PurchaseOrder,
            vec![level("lv-1", 1, 0, Some(1_000), QuorumPolicy::RequireAll), foreign],
            vec![assignment("la-1", "lv-1", "u-a")],
        );

        let active = catalog.active_levels();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id.0, "lv-1");
    }

    #[test]
    fn validation_accepts_a_partitioned_band_layout() {
        let catalog = LevelCatalog::from_parts(
            CompanyId("co-1".to_string()),
            DocumentType::PurchaseOrder,
            vec![
                level("lv-1", 1, 0, Some(1_000), QuorumPolicy::RequireAll),
                level("lv-1b", 1, 1_000, Some(5_000), QuorumPolicy::RequireAll),
                level("lv-2", 2, 1_000, None, QuorumPolicy::RequiredCount(1)),
            ],
            vec![
                assignment("la-1", "lv-1", "u-a"),
                assignment("la-2", "lv-1b", "u-b"),
                assignment("la-3", "lv-2", "u-c"),
            ],
        );

        catalog.validate().expect("adjacent half-open bands are valid");
    }

    #[test]
    fn validation_rejects_overlapping_bands_at_the_same_level_number() {
        let catalog = LevelCatalog::from_parts(
            CompanyId("co-1".to_string()),
            DocumentType::PurchaseOrder,
            vec![
                level("lv-1", 1, 0, Some(2_000), QuorumPolicy::RequireAll),
                level("lv-1b", 1, 1_500, Some(5_000), QuorumPolicy::RequireAll),
            ],
            vec![assignment("la-1", "lv-1", "u-a"), assignment("la-2", "lv-1b", "u-b")],
        );

        let error = catalog.validate().expect_err("overlap must be rejected");
        assert!(matches!(error, ConfigViolation::OverlappingLevels { level_number: 1, .. }));
    }

    #[test]
    fn validation_rejects_quorum_that_exceeds_assigned_approvers() {
        let catalog = LevelCatalog::from_parts(
            CompanyId("co-1".to_string()),
            DocumentType::PurchaseOrder,
            vec![level("lv-1", 1, 0, None, QuorumPolicy::RequiredCount(3))],
            vec![assignment("la-1", "lv-1", "u-a"), assignment("la-2", "lv-1", "u-b")],
        );

        let error = catalog.validate().expect_err("quorum larger than roster");
        assert!(matches!(
            error,
            ConfigViolation::QuorumExceedsApprovers { required: 3, assigned: 2, .. }
        ));
    }

    #[test]
    fn validation_rejects_zero_quorum_count() {
        let catalog = LevelCatalog::from_parts(
            CompanyId("co-1".to_string()),
            DocumentType::PurchaseOrder,
            vec![level("lv-1", 1, 0, None, QuorumPolicy::RequiredCount(0))],
            vec![],
        );

        let error = catalog.validate().expect_err("zero quorum");
        assert!(matches!(error, ConfigViolation::ZeroQuorumCount { .. }));
    }

    #[test]
    fn validation_rejects_a_level_with_no_active_assignments() {
        let catalog = LevelCatalog::from_parts(
            CompanyId("co-1".to_string()),
            DocumentType::PurchaseOrder,
            vec![level("lv-1", 1, 0, None, QuorumPolicy::RequireAll)],
            vec![],
        );

        let error = catalog.validate().expect_err("empty roster");
        assert!(matches!(error, ConfigViolation::NoEligibleApprovers { .. }));
    }

    #[test]
    fn inactive_assignments_are_invisible_to_lookups() {
        let mut inactive = assignment("la-2", "lv-1", "u-b");
        inactive.active = false;

        let catalog = LevelCatalog::from_parts(
            CompanyId("co-1".to_string()),
            DocumentType::PurchaseOrder,
            vec![level("lv-1", 1, 0, None, QuorumPolicy::RequireAll)],
            vec![assignment("la-1", "lv-1", "u-a"), inactive],
        );

        let approvers = catalog.active_approvers(&LevelId("lv-1".to_string()));
        assert_eq!(approvers.len(), 1);
        assert_eq!(approvers[0].user_id.0, "u-a");
    }
}
