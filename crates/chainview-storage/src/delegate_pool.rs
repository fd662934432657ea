//! Delegate pool appliers and queries.
//!
//! Pools are keyed by `(provider_id, provider_type, pool_id)` and are never
//! physically deleted; a pool leaves the active set by transitioning to
//! `Deleted` status.

use sqlx::Row;

use chainview_core::payload::{DelegatePool, DelegatePoolUpdate, PoolStatus};
use chainview_core::{EventDbError, Pagination, ProviderKind};

use crate::apply::{partial_update, KeyValue};
use crate::store::EventDb;

/// Columns an `update_delegate_pool` event may touch.
const POOL_UPDATE_COLS: &[&str] = &[
    "delegate_id",
    "balance",
    "reward",
    "total_reward",
    "total_penalty",
    "status",
    "round_created",
];

impl EventDb {
    pub(crate) async fn add_delegate_pool(&self, p: &DelegatePool) -> Result<(), EventDbError> {
        sqlx::query(
            "INSERT INTO delegate_pools
             (pool_id, provider_type, provider_id, delegate_id, balance, reward,
              total_reward, total_penalty, status, round_created)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (provider_id, provider_type, pool_id) DO UPDATE SET
               delegate_id   = excluded.delegate_id,
               balance       = excluded.balance,
               reward        = excluded.reward,
               total_reward  = excluded.total_reward,
               total_penalty = excluded.total_penalty,
               status        = excluded.status,
               round_created = excluded.round_created",
        )
        .bind(&p.pool_id)
        .bind(p.provider_type.to_i64())
        .bind(&p.provider_id)
        .bind(&p.delegate_id)
        .bind(p.balance)
        .bind(p.reward)
        .bind(p.total_reward)
        .bind(p.total_penalty)
        .bind(p.status.to_i64())
        .bind(p.round_created)
        .execute(self.pool())
        .await
        .map_err(|e| EventDbError::persistence("add_delegate_pool", e))?;
        Ok(())
    }

    pub(crate) async fn update_delegate_pool(
        &self,
        u: &DelegatePoolUpdate,
    ) -> Result<(), EventDbError> {
        partial_update(
            self,
            "delegate_pools",
            POOL_UPDATE_COLS,
            &u.updates,
            &[
                ("provider_id", KeyValue::Text(u.provider_id.clone())),
                ("provider_type", KeyValue::Int(u.provider_type.to_i64())),
                ("pool_id", KeyValue::Text(u.pool_id.clone())),
            ],
            "update_delegate_pool",
        )
        .await
    }

    /// Credit a reward to one pool: unclaimed and lifetime totals both grow.
    pub(crate) async fn credit_delegate_pool(
        &self,
        provider_id: &str,
        provider_type: ProviderKind,
        pool_id: &str,
        amount: i64,
    ) -> Result<(), EventDbError> {
        sqlx::query(
            "UPDATE delegate_pools
             SET reward = reward + ?, total_reward = total_reward + ?
             WHERE provider_id = ? AND provider_type = ? AND pool_id = ?",
        )
        .bind(amount)
        .bind(amount)
        .bind(provider_id)
        .bind(provider_type.to_i64())
        .bind(pool_id)
        .execute(self.pool())
        .await
        .map_err(|e| EventDbError::persistence("credit_delegate_pool", e))?;
        Ok(())
    }

    /// Apply a penalty to one pool: the stake balance shrinks and the
    /// lifetime penalty total grows.
    pub(crate) async fn penalise_delegate_pool(
        &self,
        provider_id: &str,
        provider_type: ProviderKind,
        pool_id: &str,
        amount: i64,
    ) -> Result<(), EventDbError> {
        sqlx::query(
            "UPDATE delegate_pools
             SET balance = balance - ?, total_penalty = total_penalty + ?
             WHERE provider_id = ? AND provider_type = ? AND pool_id = ?",
        )
        .bind(amount)
        .bind(amount)
        .bind(provider_id)
        .bind(provider_type.to_i64())
        .bind(pool_id)
        .execute(self.pool())
        .await
        .map_err(|e| EventDbError::persistence("penalise_delegate_pool", e))?;
        Ok(())
    }

    /// Non-deleted pools of one provider, ordered by pool ID.
    pub async fn get_delegate_pools(
        &self,
        provider_id: &str,
        provider_type: ProviderKind,
    ) -> Result<Vec<DelegatePool>, EventDbError> {
        let rows = sqlx::query(
            "SELECT * FROM delegate_pools
             WHERE provider_id = ? AND provider_type = ? AND status != ?
             ORDER BY pool_id",
        )
        .bind(provider_id)
        .bind(provider_type.to_i64())
        .bind(PoolStatus::Deleted.to_i64())
        .fetch_all(self.pool())
        .await
        .map_err(|e| EventDbError::persistence("get_delegate_pools", e))?;

        Ok(rows.iter().map(pool_from_row).collect())
    }

    /// One pool by its composite identity. Deleted pools are treated as
    /// absent.
    pub async fn get_delegate_pool(
        &self,
        provider_id: &str,
        provider_type: ProviderKind,
        pool_id: &str,
    ) -> Result<DelegatePool, EventDbError> {
        let row = sqlx::query(
            "SELECT * FROM delegate_pools
             WHERE provider_id = ? AND provider_type = ? AND pool_id = ? AND status != ?",
        )
        .bind(provider_id)
        .bind(provider_type.to_i64())
        .bind(pool_id)
        .bind(PoolStatus::Deleted.to_i64())
        .fetch_optional(self.pool())
        .await
        .map_err(|e| EventDbError::persistence("get_delegate_pool", e))?
        .ok_or_else(|| EventDbError::NotFound {
            entity: "delegate_pool",
            key: format!("{provider_type}/{provider_id}/{pool_id}"),
        })?;

        Ok(pool_from_row(&row))
    }

    /// All pools of one provider type owned by one delegate, across
    /// providers, paginated by the stable insertion ID.
    pub async fn get_user_delegate_pools(
        &self,
        delegate_id: &str,
        provider_type: ProviderKind,
        pagination: Pagination,
    ) -> Result<Vec<DelegatePool>, EventDbError> {
        let p = pagination.normalized();
        let sql = format!(
            "SELECT * FROM delegate_pools
             WHERE delegate_id = ? AND provider_type = ? AND status != ?
             ORDER BY id {dir} LIMIT ? OFFSET ?",
            dir = p.direction(),
        );
        let rows = sqlx::query(&sql)
            .bind(delegate_id)
            .bind(provider_type.to_i64())
            .bind(PoolStatus::Deleted.to_i64())
            .bind(p.limit)
            .bind(p.offset)
            .fetch_all(self.pool())
            .await
            .map_err(|e| EventDbError::persistence("get_user_delegate_pools", e))?;

        Ok(rows.iter().map(pool_from_row).collect())
    }

    /// Sum of balances the delegate has locked in active and pending pools.
    pub async fn get_user_total_locked(&self, delegate_id: &str) -> Result<i64, EventDbError> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(balance), 0) AS total
             FROM delegate_pools
             WHERE delegate_id = ? AND status IN (?, ?)",
        )
        .bind(delegate_id)
        .bind(PoolStatus::Active.to_i64())
        .bind(PoolStatus::Pending.to_i64())
        .fetch_one(self.pool())
        .await
        .map_err(|e| EventDbError::persistence("get_user_total_locked", e))?;
        Ok(row.get("total"))
    }
}

fn pool_from_row(row: &sqlx::sqlite::SqliteRow) -> DelegatePool {
    DelegatePool {
        pool_id: row.get("pool_id"),
        provider_type: ProviderKind::from_i64(row.get("provider_type"))
            .unwrap_or_default(),
        provider_id: row.get("provider_id"),
        delegate_id: row.get("delegate_id"),
        balance: row.get("balance"),
        reward: row.get("reward"),
        total_reward: row.get("total_reward"),
        total_penalty: row.get("total_penalty"),
        status: PoolStatus::from_i64(row.get("status")),
        round_created: row.get("round_created"),
    }
}
