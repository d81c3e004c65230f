use rust_decimal::Decimal;

use crate::catalog::LevelCatalog;
use crate::domain::level::ApprovalLevel;
use crate::errors::ConfigViolation;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// The ordered level sequence the document must pass, ascending by
    /// level number.
    Levels(Vec<ApprovalLevel>),
    /// No active band contains the amount: no control applies and the
    /// caller treats the document as auto-approved.
    NoApplicableLevel,
}

/// Selects the ordered sequence of levels that must approve a document of a
/// given amount.
#[derive(Clone, Copy, Debug, Default)]
pub struct LevelResolver;

impl LevelResolver {
    pub fn resolve(
        &self,
        catalog: &LevelCatalog,
        amount: Decimal,
    ) -> Result<Resolution, ConfigViolation> {
        let mut matched: Vec<&ApprovalLevel> = catalog
            .active_levels()
            .into_iter()
            .filter(|level| level.range.contains(amount))
            .collect();
        matched.sort_by_key(|level| level.level_number);

        // Two active bands at the same position both containing the amount
        // is a configuration error, never tie-broken silently.
        for pair in matched.windows(2) {
            if pair[0].level_number == pair[1].level_number {
                return Err(ConfigViolation::OverlappingLevels {
                    document_type: catalog.document_type(),
                    level_number: pair[0].level_number,
                    first: pair[0].id.clone(),
                    second: pair[1].id.clone(),
                });
            }
        }

        if matched.is_empty() {
            return Ok(Resolution::NoApplicableLevel);
        }

        Ok(Resolution::Levels(matched.into_iter().cloned().collect()))
    }
}
