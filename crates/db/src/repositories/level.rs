use async_trait::async_trait;

use signoff_core::{
    AmountRange, ApprovalLevel, CompanyId, Delegation, DelegationWindow, DocumentType,
    LevelApprover, LevelApproverId, LevelId, LevelStore, QuorumPolicy, StoreError, UserId,
};

use super::{backend, parse_amount, parse_timestamp, try_column};
use crate::DbPool;

pub struct SqlLevelStore {
    pool: DbPool,
}

impl SqlLevelStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const LEVEL_COLUMNS: &str = "id, company_id, document_type, level_number, min_amount, max_amount,
     quorum_kind, quorum_count, allow_delegation, response_timeout_hours, active,
     created_at, updated_at";

const APPROVER_COLUMNS: &str = "id, level_id, user_id, active, delegate_user_id,
     delegation_from, delegation_to, delegation_reason, created_at, updated_at";

fn row_to_level(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalLevel, StoreError> {
    let document_type_str: String = try_column(row, "document_type")?;
    let document_type = DocumentType::parse(&document_type_str).ok_or_else(|| {
        StoreError::Decode(format!("unknown document type `{document_type_str}`"))
    })?;

    let quorum_kind: String = try_column(row, "quorum_kind")?;
    let quorum = match quorum_kind.as_str() {
        "require_all" => QuorumPolicy::RequireAll,
        "required_count" => {
            let count: i64 = try_column::<Option<i64>>(row, "quorum_count")?.ok_or_else(|| {
                StoreError::Decode("required_count quorum without a count".to_string())
            })?;
            QuorumPolicy::RequiredCount(count as u32)
        }
        other => return Err(StoreError::Decode(format!("unknown quorum kind `{other}`"))),
    };

    let min_amount: Option<String> = try_column(row, "min_amount")?;
    let max_amount: Option<String> = try_column(row, "max_amount")?;
    let created_at: String = try_column(row, "created_at")?;
    let updated_at: String = try_column(row, "updated_at")?;

    Ok(ApprovalLevel {
        id: LevelId(try_column(row, "id")?),
        company_id: CompanyId(try_column(row, "company_id")?),
        document_type,
        level_number: try_column::<i64>(row, "level_number")? as u32,
        range: AmountRange::new(
            min_amount.as_deref().map(parse_amount).transpose()?,
            max_amount.as_deref().map(parse_amount).transpose()?,
        ),
        quorum,
        allow_delegation: try_column::<i64>(row, "allow_delegation")? != 0,
        response_timeout_hours: try_column(row, "response_timeout_hours")?,
        active: try_column::<i64>(row, "active")? != 0,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn row_to_approver(row: &sqlx::sqlite::SqliteRow) -> Result<LevelApprover, StoreError> {
    let delegate: Option<String> = try_column(row, "delegate_user_id")?;
    let window_from: Option<String> = try_column(row, "delegation_from")?;
    let window_to: Option<String> = try_column(row, "delegation_to")?;
    let delegation_reason: Option<String> = try_column(row, "delegation_reason")?;

    let delegation = match (delegate, window_from, window_to) {
        (Some(delegate), Some(from), Some(to)) => Some(Delegation {
            delegate: UserId(delegate),
            window: DelegationWindow {
                from: parse_timestamp(&from)?,
                to: parse_timestamp(&to)?,
            },
            reason: delegation_reason.unwrap_or_default(),
        }),
        (None, None, None) => None,
        _ => {
            return Err(StoreError::Decode(
                "partial delegation columns on level_approver row".to_string(),
            ));
        }
    };

    let created_at: String = try_column(row, "created_at")?;
    let updated_at: String = try_column(row, "updated_at")?;

    Ok(LevelApprover {
        id: LevelApproverId(try_column(row, "id")?),
        level_id: LevelId(try_column(row, "level_id")?),
        user_id: UserId(try_column(row, "user_id")?),
        active: try_column::<i64>(row, "active")? != 0,
        delegation,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn quorum_columns(quorum: QuorumPolicy) -> (&'static str, Option<i64>) {
    match quorum {
        QuorumPolicy::RequireAll => ("require_all", None),
        QuorumPolicy::RequiredCount(count) => ("required_count", Some(i64::from(count))),
    }
}

#[async_trait]
impl LevelStore for SqlLevelStore {
    async fn levels_for(
        &self,
        company: &CompanyId,
        document_type: DocumentType,
    ) -> Result<Vec<ApprovalLevel>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {LEVEL_COLUMNS} FROM approval_level
             WHERE company_id = ? AND document_type = ?
             ORDER BY level_number ASC"
        ))
        .bind(&company.0)
        .bind(document_type.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(row_to_level).collect()
    }

    async fn level_by_id(&self, id: &LevelId) -> Result<Option<ApprovalLevel>, StoreError> {
        let row = sqlx::query(&format!("SELECT {LEVEL_COLUMNS} FROM approval_level WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        row.as_ref().map(row_to_level).transpose()
    }

    async fn approvers_for(&self, level_id: &LevelId) -> Result<Vec<LevelApprover>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {APPROVER_COLUMNS} FROM level_approver WHERE level_id = ? ORDER BY id ASC"
        ))
        .bind(&level_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(row_to_approver).collect()
    }

    async fn approver_by_id(
        &self,
        id: &LevelApproverId,
    ) -> Result<Option<LevelApprover>, StoreError> {
        let row =
            sqlx::query(&format!("SELECT {APPROVER_COLUMNS} FROM level_approver WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;

        row.as_ref().map(row_to_approver).transpose()
    }

    async fn save_level(&self, level: ApprovalLevel) -> Result<(), StoreError> {
        let (quorum_kind, quorum_count) = quorum_columns(level.quorum);

        sqlx::query(
            "INSERT INTO approval_level (id, company_id, document_type, level_number,
                 min_amount, max_amount, quorum_kind, quorum_count, allow_delegation,
                 response_timeout_hours, active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 company_id = excluded.company_id,
                 document_type = excluded.document_type,
                 level_number = excluded.level_number,
                 min_amount = excluded.min_amount,
                 max_amount = excluded.max_amount,
                 quorum_kind = excluded.quorum_kind,
                 quorum_count = excluded.quorum_count,
                 allow_delegation = excluded.allow_delegation,
                 response_timeout_hours = excluded.response_timeout_hours,
                 active = excluded.active,
                 updated_at = excluded.updated_at",
        )
        .bind(&level.id.0)
        .bind(&level.company_id.0)
        .bind(level.document_type.as_str())
        .bind(i64::from(level.level_number))
        .bind(level.range.min.map(|amount| amount.to_string()))
        .bind(level.range.max.map(|amount| amount.to_string()))
        .bind(quorum_kind)
        .bind(quorum_count)
        .bind(i64::from(level.allow_delegation))
        .bind(level.response_timeout_hours)
        .bind(i64::from(level.active))
        .bind(level.created_at.to_rfc3339())
        .bind(level.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn save_approver(&self, approver: LevelApprover) -> Result<(), StoreError> {
        let delegate = approver.delegation.as_ref().map(|delegation| delegation.delegate.0.clone());
        let window_from =
            approver.delegation.as_ref().map(|delegation| delegation.window.from.to_rfc3339());
        let window_to =
            approver.delegation.as_ref().map(|delegation| delegation.window.to.to_rfc3339());
        let reason = approver.delegation.as_ref().map(|delegation| delegation.reason.clone());

        sqlx::query(
            "INSERT INTO level_approver (id, level_id, user_id, active, delegate_user_id,
                 delegation_from, delegation_to, delegation_reason, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 level_id = excluded.level_id,
                 user_id = excluded.user_id,
                 active = excluded.active,
                 delegate_user_id = excluded.delegate_user_id,
                 delegation_from = excluded.delegation_from,
                 delegation_to = excluded.delegation_to,
                 delegation_reason = excluded.delegation_reason,
                 updated_at = excluded.updated_at",
        )
        .bind(&approver.id.0)
        .bind(&approver.level_id.0)
        .bind(&approver.user_id.0)
        .bind(i64::from(approver.active))
        .bind(delegate)
        .bind(window_from)
        .bind(window_to)
        .bind(reason)
        .bind(approver.created_at.to_rfc3339())
        .bind(approver.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use signoff_core::{
        AmountRange, ApprovalLevel, CompanyId, Delegation, DelegationWindow, DocumentType,
        LevelApprover, LevelApproverId, LevelId, LevelStore, QuorumPolicy, UserId,
    };

    use crate::{connect_with_settings, migrations};

    use super::SqlLevelStore;

    async fn store() -> SqlLevelStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        SqlLevelStore::new(pool)
    }

    fn sample_level() -> ApprovalLevel {
        let now = Utc::now();
        ApprovalLevel {
            id: LevelId("lv-1".to_string()),
            company_id: CompanyId("co-1".to_string()),
            document_type: DocumentType::PurchaseOrder,
            level_number: 1,
            range: AmountRange::new(Some(Decimal::new(1_000, 2)), None),
            quorum: QuorumPolicy::RequiredCount(2),
            allow_delegation: true,
            response_timeout_hours: Some(48),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn levels_round_trip_including_quorum_and_range() {
        let store = store().await;
        store.save_level(sample_level()).await.expect("save");

        let loaded = store
            .levels_for(&CompanyId("co-1".to_string()), DocumentType::PurchaseOrder)
            .await
            .expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].quorum, QuorumPolicy::RequiredCount(2));
        assert_eq!(loaded[0].range.min, Some(Decimal::new(1_000, 2)));
        assert_eq!(loaded[0].range.max, None);
        assert_eq!(loaded[0].response_timeout_hours, Some(48));
    }

    #[tokio::test]
    async fn saving_again_updates_in_place() {
        let store = store().await;
        store.save_level(sample_level()).await.expect("save");

        let mut updated = sample_level();
        updated.active = false;
        updated.quorum = QuorumPolicy::RequireAll;
        store.save_level(updated).await.expect("update");

        let loaded = store
            .level_by_id(&LevelId("lv-1".to_string()))
            .await
            .expect("load")
            .expect("level exists");
        assert!(!loaded.active);
        assert_eq!(loaded.quorum, QuorumPolicy::RequireAll);
    }

    #[tokio::test]
    async fn approver_delegation_columns_round_trip() {
        let store = store().await;
        store.save_level(sample_level()).await.expect("save level");

        let now = Utc::now();
        let approver = LevelApprover {
            id: LevelApproverId("la-1".to_string()),
            level_id: LevelId("lv-1".to_string()),
            user_id: UserId("u-a".to_string()),
            active: true,
            delegation: Some(Delegation {
                delegate: UserId("u-b".to_string()),
                window: DelegationWindow { from: now, to: now + Duration::hours(24) },
                reason: "annual leave".to_string(),
            }),
            created_at: now,
            updated_at: now,
        };
        store.save_approver(approver).await.expect("save approver");

        let loaded = store
            .approvers_for(&LevelId("lv-1".to_string()))
            .await
            .expect("load approvers");
        assert_eq!(loaded.len(), 1);
        let delegation = loaded[0].delegation.as_ref().expect("delegation persisted");
        assert_eq!(delegation.delegate.0, "u-b");
        assert_eq!(delegation.reason, "annual leave");
    }
}
