use async_trait::async_trait;

use signoff_core::{
    ApprovalChain, ChainId, ChainState, ChainStore, ChainTransition, CompanyId, DocumentId,
    DocumentType, LevelId, StoreError, UserId,
};

use super::{backend, parse_amount, parse_timestamp, try_column};
use crate::DbPool;

pub struct SqlChainStore {
    pool: DbPool,
}

impl SqlChainStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const CHAIN_COLUMNS: &str = "id, company_id, document_type, document_id, amount, requested_by,
     level_ids_json, state_kind, open_level, blocked_reason, state_version,
     created_at, updated_at";

fn encode_state(state: &ChainState) -> (&'static str, Option<i64>) {
    (state.kind_str(), state.open_level().map(|index| index as i64))
}

fn decode_state(kind: &str, level: Option<i64>) -> Result<ChainState, StoreError> {
    ChainState::decode(kind, level.map(|index| index as u32))
        .ok_or_else(|| StoreError::Decode(format!("unknown chain state `{kind}`")))
}

fn row_to_chain(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalChain, StoreError> {
    let document_type_str: String = try_column(row, "document_type")?;
    let document_type = DocumentType::parse(&document_type_str).ok_or_else(|| {
        StoreError::Decode(format!("unknown document type `{document_type_str}`"))
    })?;

    let level_ids_json: String = try_column(row, "level_ids_json")?;
    let level_ids: Vec<LevelId> = serde_json::from_str::<Vec<String>>(&level_ids_json)
        .map_err(|error| StoreError::Decode(format!("invalid level id list: {error}")))?
        .into_iter()
        .map(LevelId)
        .collect();

    let state_kind: String = try_column(row, "state_kind")?;
    let open_level: Option<i64> = try_column(row, "open_level")?;
    let amount: String = try_column(row, "amount")?;
    let created_at: String = try_column(row, "created_at")?;
    let updated_at: String = try_column(row, "updated_at")?;

    Ok(ApprovalChain {
        id: ChainId(try_column(row, "id")?),
        company_id: CompanyId(try_column(row, "company_id")?),
        document_type,
        document_id: DocumentId(try_column(row, "document_id")?),
        amount: parse_amount(&amount)?,
        requested_by: UserId(try_column(row, "requested_by")?),
        level_ids,
        state: decode_state(&state_kind, open_level)?,
        blocked_reason: try_column(row, "blocked_reason")?,
        state_version: try_column::<i64>(row, "state_version")? as u32,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn row_to_transition(row: &sqlx::sqlite::SqliteRow) -> Result<ChainTransition, StoreError> {
    let from_kind: String = try_column(row, "from_kind")?;
    let from_level: Option<i64> = try_column(row, "from_level")?;
    let to_kind: String = try_column(row, "to_kind")?;
    let to_level: Option<i64> = try_column(row, "to_level")?;
    let occurred_at: String = try_column(row, "occurred_at")?;

    Ok(ChainTransition {
        id: try_column(row, "id")?,
        chain_id: ChainId(try_column(row, "chain_id")?),
        from_state: decode_state(&from_kind, from_level)?,
        to_state: decode_state(&to_kind, to_level)?,
        reason: try_column(row, "reason")?,
        actor: UserId(try_column(row, "actor")?),
        state_version: try_column::<i64>(row, "state_version")? as u32,
        occurred_at: parse_timestamp(&occurred_at)?,
    })
}

fn level_ids_json(chain: &ApprovalChain) -> Result<String, StoreError> {
    let ids: Vec<&str> = chain.level_ids.iter().map(|id| id.0.as_str()).collect();
    serde_json::to_string(&ids)
        .map_err(|error| StoreError::Decode(format!("level id list does not encode: {error}")))
}

#[async_trait]
impl ChainStore for SqlChainStore {
    async fn insert_chain(&self, chain: ApprovalChain) -> Result<(), StoreError> {
        let (state_kind, open_level) = encode_state(&chain.state);

        sqlx::query(
            "INSERT INTO approval_chain (id, company_id, document_type, document_id, amount,
                 requested_by, level_ids_json, state_kind, open_level, blocked_reason,
                 state_version, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&chain.id.0)
        .bind(&chain.company_id.0)
        .bind(chain.document_type.as_str())
        .bind(&chain.document_id.0)
        .bind(chain.amount.to_string())
        .bind(&chain.requested_by.0)
        .bind(level_ids_json(&chain)?)
        .bind(state_kind)
        .bind(open_level)
        .bind(&chain.blocked_reason)
        .bind(i64::from(chain.state_version))
        .bind(chain.created_at.to_rfc3339())
        .bind(chain.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn chain_by_id(&self, id: &ChainId) -> Result<Option<ApprovalChain>, StoreError> {
        let row = sqlx::query(&format!("SELECT {CHAIN_COLUMNS} FROM approval_chain WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        row.as_ref().map(row_to_chain).transpose()
    }

    async fn update_chain(
        &self,
        chain: &ApprovalChain,
        expected_version: u32,
    ) -> Result<(), StoreError> {
        let (state_kind, open_level) = encode_state(&chain.state);

        let result = sqlx::query(
            "UPDATE approval_chain SET
                 state_kind = ?,
                 open_level = ?,
                 blocked_reason = ?,
                 state_version = ?,
                 updated_at = ?
             WHERE id = ? AND state_version = ?",
        )
        .bind(state_kind)
        .bind(open_level)
        .bind(&chain.blocked_reason)
        .bind(i64::from(chain.state_version))
        .bind(chain.updated_at.to_rfc3339())
        .bind(&chain.id.0)
        .bind(i64::from(expected_version))
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict);
        }
        Ok(())
    }

    async fn append_transition(&self, transition: ChainTransition) -> Result<(), StoreError> {
        let (from_kind, from_level) = encode_state(&transition.from_state);
        let (to_kind, to_level) = encode_state(&transition.to_state);

        sqlx::query(
            "INSERT INTO chain_transition (id, chain_id, from_kind, from_level, to_kind,
                 to_level, reason, actor, state_version, occurred_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&transition.id)
        .bind(&transition.chain_id.0)
        .bind(from_kind)
        .bind(from_level)
        .bind(to_kind)
        .bind(to_level)
        .bind(&transition.reason)
        .bind(&transition.actor.0)
        .bind(i64::from(transition.state_version))
        .bind(transition.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn transitions_for(
        &self,
        chain_id: &ChainId,
    ) -> Result<Vec<ChainTransition>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, chain_id, from_kind, from_level, to_kind, to_level, reason, actor,
                    state_version, occurred_at
             FROM chain_transition WHERE chain_id = ? ORDER BY state_version ASC",
        )
        .bind(&chain_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(row_to_transition).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use signoff_core::{
        ApprovalChain, ChainId, ChainState, ChainStore, ChainTransition, CompanyId, DocumentId,
        DocumentType, LevelId, StoreError, UserId,
    };

    use crate::{connect_with_settings, migrations};

    use super::SqlChainStore;

    async fn store() -> SqlChainStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        SqlChainStore::new(pool)
    }

    fn sample_chain() -> ApprovalChain {
        let now = Utc::now();
        ApprovalChain {
            id: ChainId("CH-1".to_string()),
            company_id: CompanyId("co-1".to_string()),
            document_type: DocumentType::PurchaseOrder,
            document_id: DocumentId("PO-1".to_string()),
            amount: Decimal::new(250_000, 2),
            requested_by: UserId("u-owner".to_string()),
            level_ids: vec![LevelId("lv-1".to_string()), LevelId("lv-2".to_string())],
            state: ChainState::Created,
            blocked_reason: None,
            state_version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn chain_round_trips_with_state_and_level_sequence() {
        let store = store().await;
        store.insert_chain(sample_chain()).await.expect("insert");

        let mut chain = sample_chain();
        chain.transition_to(ChainState::LevelOpen(0), Utc::now()).expect("open");
        store.update_chain(&chain, 1).await.expect("update");

        let loaded = store
            .chain_by_id(&ChainId("CH-1".to_string()))
            .await
            .expect("load")
            .expect("chain exists");
        assert_eq!(loaded.state, ChainState::LevelOpen(0));
        assert_eq!(loaded.state_version, 2);
        assert_eq!(loaded.level_ids.len(), 2);
        assert_eq!(loaded.amount, Decimal::new(250_000, 2));
    }

    #[tokio::test]
    async fn stale_version_update_is_refused() {
        let store = store().await;
        store.insert_chain(sample_chain()).await.expect("insert");

        let mut winner = sample_chain();
        winner.transition_to(ChainState::LevelOpen(0), Utc::now()).expect("open");
        store.update_chain(&winner, 1).await.expect("winner writes");

        let mut loser = sample_chain();
        loser.transition_to(ChainState::LevelOpen(0), Utc::now()).expect("open");
        let error = store.update_chain(&loser, 1).await.expect_err("stale write");
        assert_eq!(error, StoreError::Conflict);
    }

    #[tokio::test]
    async fn transitions_come_back_in_version_order() {
        let store = store().await;
        store.insert_chain(sample_chain()).await.expect("insert");

        let now = Utc::now();
        for (version, (from, to)) in [
            (ChainState::Created, ChainState::LevelOpen(0)),
            (ChainState::LevelOpen(0), ChainState::Approved),
        ]
        .into_iter()
        .enumerate()
        {
            store
                .append_transition(ChainTransition {
                    id: format!("tr-{version}"),
                    chain_id: ChainId("CH-1".to_string()),
                    from_state: from,
                    to_state: to,
                    reason: "step".to_string(),
                    actor: UserId("u-owner".to_string()),
                    state_version: version as u32 + 2,
                    occurred_at: now,
                })
                .await
                .expect("append");
        }

        let history = store
            .transitions_for(&ChainId("CH-1".to_string()))
            .await
            .expect("load transitions");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].to_state, ChainState::LevelOpen(0));
        assert_eq!(history[1].to_state, ChainState::Approved);
    }
}
