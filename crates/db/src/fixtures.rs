use signoff_core::StoreError;
use sqlx::Executor;

use crate::repositories::backend;
use crate::DbPool;

/// Deterministic demo policy: company `co-demo` with a three-band purchase
/// order ladder (team lead, managers, executives) and the users backing it.
pub struct DemoPolicy;

impl DemoPolicy {
    pub const COMPANY_ID: &'static str = "co-demo";

    const SQL: &'static str = include_str!("../../../config/fixtures/demo_policy.sql");

    /// Load the fixture set. Safe to call repeatedly.
    pub async fn load(pool: &DbPool) -> Result<(), StoreError> {
        let mut tx = pool.begin().await.map_err(backend)?;
        tx.execute(sqlx::query(Self::SQL)).await.map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use signoff_core::{CompanyId, DocumentType, LevelCatalog, QuorumPolicy};

    use crate::repositories::SqlLevelStore;
    use crate::{connect_with_settings, migrations};

    use super::DemoPolicy;

    #[tokio::test]
    async fn demo_policy_loads_idempotently_and_validates() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");

        DemoPolicy::load(&pool).await.expect("first load");
        DemoPolicy::load(&pool).await.expect("second load");

        let store = SqlLevelStore::new(pool);
        let catalog = LevelCatalog::load(
            &store,
            CompanyId(DemoPolicy::COMPANY_ID.to_string()),
            DocumentType::PurchaseOrder,
        )
        .await
        .expect("load catalog");
        catalog.validate().expect("demo policy is internally consistent");

        let levels = catalog.active_levels();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0].quorum, QuorumPolicy::RequiredCount(1));
        assert_eq!(levels[1].quorum, QuorumPolicy::RequireAll);
        assert_eq!(levels[2].quorum, QuorumPolicy::RequiredCount(2));
        assert!(!levels[2].allow_delegation);

        assert_eq!(catalog.active_approvers(&levels[2].id).len(), 3);
    }
}
