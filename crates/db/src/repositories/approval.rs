use async_trait::async_trait;

use signoff_core::{
    Approval, ApprovalId, ApprovalStatus, ApprovalStore, ChainId, LevelId, StoreError, UserId,
};

use super::{backend, parse_amount, parse_opt_timestamp, parse_timestamp, try_column};
use crate::DbPool;

pub struct SqlApprovalStore {
    pool: DbPool,
}

impl SqlApprovalStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const INSTANCE_COLUMNS: &str = "id, chain_id, level_id, level_number, approver, delegated_from,
     status, amount, comments, requested_at, decided_at, expires_at";

fn row_to_instance(row: &sqlx::sqlite::SqliteRow) -> Result<Approval, StoreError> {
    let status_str: String = try_column(row, "status")?;
    let status = ApprovalStatus::parse(&status_str)
        .ok_or_else(|| StoreError::Decode(format!("unknown approval status `{status_str}`")))?;

    let amount: String = try_column(row, "amount")?;
    let requested_at: String = try_column(row, "requested_at")?;

    Ok(Approval {
        id: ApprovalId(try_column(row, "id")?),
        chain_id: ChainId(try_column(row, "chain_id")?),
        level_id: LevelId(try_column(row, "level_id")?),
        level_number: try_column::<i64>(row, "level_number")? as u32,
        approver: UserId(try_column(row, "approver")?),
        delegated_from: try_column::<Option<String>>(row, "delegated_from")?.map(UserId),
        status,
        amount: parse_amount(&amount)?,
        comments: try_column(row, "comments")?,
        requested_at: parse_timestamp(&requested_at)?,
        decided_at: parse_opt_timestamp(try_column(row, "decided_at")?)?,
        expires_at: parse_opt_timestamp(try_column(row, "expires_at")?)?,
    })
}

#[async_trait]
impl ApprovalStore for SqlApprovalStore {
    async fn insert(&self, approval: Approval) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO approval_instance (id, chain_id, level_id, level_number, approver,
                 delegated_from, status, amount, comments, requested_at, decided_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&approval.id.0)
        .bind(&approval.chain_id.0)
        .bind(&approval.level_id.0)
        .bind(i64::from(approval.level_number))
        .bind(&approval.approver.0)
        .bind(approval.delegated_from.as_ref().map(|user| user.0.clone()))
        .bind(approval.status.as_str())
        .bind(approval.amount.to_string())
        .bind(&approval.comments)
        .bind(approval.requested_at.to_rfc3339())
        .bind(approval.decided_at.map(|at| at.to_rfc3339()))
        .bind(approval.expires_at.map(|at| at.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn approval_by_id(&self, id: &ApprovalId) -> Result<Option<Approval>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM approval_instance WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.as_ref().map(row_to_instance).transpose()
    }

    async fn update(&self, approval: &Approval) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE approval_instance SET
                 status = ?,
                 comments = ?,
                 decided_at = ?
             WHERE id = ?",
        )
        .bind(approval.status.as_str())
        .bind(&approval.comments)
        .bind(approval.decided_at.map(|at| at.to_rfc3339()))
        .bind(&approval.id.0)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn for_chain(&self, chain_id: &ChainId) -> Result<Vec<Approval>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM approval_instance
             WHERE chain_id = ? ORDER BY requested_at ASC, id ASC"
        ))
        .bind(&chain_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(row_to_instance).collect()
    }

    async fn pending_for_user(&self, user: &UserId) -> Result<Vec<Approval>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM approval_instance
             WHERE approver = ? AND status = 'pending'
             ORDER BY requested_at ASC, id ASC"
        ))
        .bind(&user.0)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(row_to_instance).collect()
    }
}
