//! Provider appliers and queries — blobbers plus the four node kinds.
//!
//! All writes are native upserts keyed on the provider ID; `bucket_id` is
//! recomputed from the ID on every upsert so the assignment survives
//! overwrites.

use sqlx::Row;

use chainview_core::payload::{Blobber, ProviderNode, ProviderUpdate, StakePoolReward};
use chainview_core::snapshot::{Economics, ProviderState};
use chainview_core::{bucket_id, EventDbError, ProviderKind, ProviderStatus};

use crate::apply::{partial_update, KeyValue};
use crate::store::{entity_table, EventDb};

/// Columns an `update_blobber` event may touch.
const BLOBBER_UPDATE_COLS: &[&str] = &[
    "base_url",
    "status",
    "fee",
    "total_stake",
    "total_rewards",
    "total_mint",
    "total_burn",
    "service_charge",
    "capacity",
    "allocated",
    "read_price",
    "write_price",
    "saved_data",
];

impl EventDb {
    // ─── Blobbers ─────────────────────────────────────────────────────────────

    pub(crate) async fn add_or_overwrite_blobber(&self, b: &Blobber) -> Result<(), EventDbError> {
        let p = &b.provider;
        let bucket = bucket_id(&p.id, self.settings().aggregate_period);
        sqlx::query(
            "INSERT INTO blobbers
             (id, bucket_id, status, fee, total_stake, total_rewards, total_mint,
              total_burn, service_charge, base_url, capacity, allocated,
              read_price, write_price, saved_data)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
               bucket_id      = excluded.bucket_id,
               status         = excluded.status,
               fee            = excluded.fee,
               total_stake    = excluded.total_stake,
               total_rewards  = excluded.total_rewards,
               total_mint     = excluded.total_mint,
               total_burn     = excluded.total_burn,
               service_charge = excluded.service_charge,
               base_url       = excluded.base_url,
               capacity       = excluded.capacity,
               allocated      = excluded.allocated,
               read_price     = excluded.read_price,
               write_price    = excluded.write_price,
               saved_data     = excluded.saved_data",
        )
        .bind(&p.id)
        .bind(bucket)
        .bind(p.status.to_i64())
        .bind(p.fee)
        .bind(p.total_stake)
        .bind(p.total_rewards)
        .bind(p.total_mint)
        .bind(p.total_burn)
        .bind(p.service_charge)
        .bind(&b.base_url)
        .bind(b.capacity)
        .bind(b.allocated)
        .bind(b.read_price)
        .bind(b.write_price)
        .bind(b.saved_data)
        .execute(self.pool())
        .await
        .map_err(|e| EventDbError::persistence("add_or_overwrite_blobber", e))?;
        Ok(())
    }

    pub(crate) async fn update_blobber(&self, u: &ProviderUpdate) -> Result<(), EventDbError> {
        partial_update(
            self,
            "blobbers",
            BLOBBER_UPDATE_COLS,
            &u.updates,
            &[("id", KeyValue::Text(u.id.clone()))],
            "update_blobber",
        )
        .await
    }

    /// Deletion is a status transition; the row and its history stay.
    pub(crate) async fn delete_blobber(&self, id: &str) -> Result<(), EventDbError> {
        sqlx::query("UPDATE blobbers SET status = ? WHERE id = ?")
            .bind(ProviderStatus::Deleted.to_i64())
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(|e| EventDbError::persistence("delete_blobber", e))?;
        Ok(())
    }

    pub async fn get_blobber(&self, id: &str) -> Result<Blobber, EventDbError> {
        let row = sqlx::query("SELECT * FROM blobbers WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| EventDbError::persistence("get_blobber", e))?
            .ok_or_else(|| EventDbError::NotFound {
                entity: "blobber",
                key: id.to_string(),
            })?;

        Ok(Blobber {
            provider: base_from_row(&row),
            base_url: row.get("base_url"),
            capacity: row.get("capacity"),
            allocated: row.get("allocated"),
            read_price: row.get("read_price"),
            write_price: row.get("write_price"),
            saved_data: row.get("saved_data"),
        })
    }

    // ─── Node providers (validator / miner / sharder / authorizer) ────────────

    pub(crate) async fn add_or_overwrite_node(
        &self,
        kind: ProviderKind,
        node: &ProviderNode,
    ) -> Result<(), EventDbError> {
        let p = &node.provider;
        let bucket = bucket_id(&p.id, self.settings().aggregate_period);
        let sql = format!(
            "INSERT INTO {table}
             (id, bucket_id, status, fee, total_stake, total_rewards, total_mint,
              total_burn, service_charge, base_url)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
               bucket_id      = excluded.bucket_id,
               status         = excluded.status,
               fee            = excluded.fee,
               total_stake    = excluded.total_stake,
               total_rewards  = excluded.total_rewards,
               total_mint     = excluded.total_mint,
               total_burn     = excluded.total_burn,
               service_charge = excluded.service_charge,
               base_url       = excluded.base_url",
            table = entity_table(kind),
        );
        sqlx::query(&sql)
            .bind(&p.id)
            .bind(bucket)
            .bind(p.status.to_i64())
            .bind(p.fee)
            .bind(p.total_stake)
            .bind(p.total_rewards)
            .bind(p.total_mint)
            .bind(p.total_burn)
            .bind(p.service_charge)
            .bind(&node.base_url)
            .execute(self.pool())
            .await
            .map_err(|e| EventDbError::persistence("add_or_overwrite_node", e))?;
        Ok(())
    }

    pub async fn get_node(
        &self,
        kind: ProviderKind,
        id: &str,
    ) -> Result<ProviderNode, EventDbError> {
        let sql = format!(
            "SELECT * FROM {table} WHERE id = ?",
            table = entity_table(kind)
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| EventDbError::persistence("get_node", e))?
            .ok_or_else(|| EventDbError::NotFound {
                entity: kind.as_str(),
                key: id.to_string(),
            })?;

        Ok(ProviderNode {
            provider: base_from_row(&row),
            base_url: row.get("base_url"),
        })
    }

    // ─── Stake pool rewards (provider part) ───────────────────────────────────

    /// Credit a reward distribution: the provider's `total_rewards` grows by
    /// the provider share, and each named delegate pool is credited or
    /// penalised. Pool identities that do not exist are ignored.
    pub(crate) async fn apply_stake_pool_reward(
        &self,
        r: &StakePoolReward,
    ) -> Result<(), EventDbError> {
        if r.reward != 0 {
            let sql = format!(
                "UPDATE {table} SET total_rewards = total_rewards + ? WHERE id = ?",
                table = entity_table(r.provider_type),
            );
            sqlx::query(&sql)
                .bind(r.reward)
                .bind(&r.provider_id)
                .execute(self.pool())
                .await
                .map_err(|e| EventDbError::persistence("apply_stake_pool_reward", e))?;
        }

        for (pool_id, amount) in &r.delegate_rewards {
            self.credit_delegate_pool(&r.provider_id, r.provider_type, pool_id, *amount)
                .await?;
        }
        for (pool_id, amount) in &r.delegate_penalties {
            self.penalise_delegate_pool(&r.provider_id, r.provider_type, pool_id, *amount)
                .await?;
        }
        Ok(())
    }

    // ─── Aggregation support ──────────────────────────────────────────────────

    /// IDs of the providers in `bucket`, sorted, captured once per cycle so
    /// paging sees a stable population.
    pub(crate) async fn provider_ids_in_bucket(
        &self,
        kind: ProviderKind,
        bucket: i64,
    ) -> Result<Vec<String>, EventDbError> {
        let sql = format!(
            "SELECT id FROM {table} WHERE bucket_id = ? ORDER BY id",
            table = entity_table(kind),
        );
        let rows = sqlx::query(&sql)
            .bind(bucket)
            .fetch_all(self.pool())
            .await
            .map_err(|e| EventDbError::persistence("provider_ids_in_bucket", e))?;
        Ok(rows.into_iter().map(|r| r.get("id")).collect())
    }
}

pub(crate) fn base_from_row(row: &sqlx::sqlite::SqliteRow) -> chainview_core::payload::ProviderBase {
    chainview_core::payload::ProviderBase {
        id: row.get("id"),
        status: ProviderStatus::from_i64(row.get("status")),
        fee: row.get("fee"),
        total_stake: row.get("total_stake"),
        total_rewards: row.get("total_rewards"),
        total_mint: row.get("total_mint"),
        total_burn: row.get("total_burn"),
        service_charge: row.get("service_charge"),
    }
}

/// Read a provider entity row into the differ's input shape.
pub(crate) fn state_from_row(kind: ProviderKind, row: &sqlx::sqlite::SqliteRow) -> ProviderState {
    ProviderState {
        id: row.get("id"),
        kind,
        bucket_id: row.get("bucket_id"),
        status: ProviderStatus::from_i64(row.get("status")),
        econ: Economics {
            fee: row.get("fee"),
            total_stake: row.get("total_stake"),
            total_rewards: row.get("total_rewards"),
            total_mint: row.get("total_mint"),
            total_burn: row.get("total_burn"),
            service_charge: row.get("service_charge"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainview_core::payload::ProviderBase;
    use chainview_core::DbSettings;
    use serde_json::{json, Map};

    async fn db() -> EventDb {
        EventDb::in_memory(DbSettings::default()).await.unwrap()
    }

    fn blobber(id: &str, stake: i64) -> Blobber {
        Blobber {
            provider: ProviderBase {
                id: id.into(),
                total_stake: stake,
                ..Default::default()
            },
            base_url: format!("https://{id}.example"),
            capacity: 4096,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn blobber_upsert_overwrites_in_place() {
        let db = db().await;
        db.add_or_overwrite_blobber(&blobber("b1", 100)).await.unwrap();
        db.add_or_overwrite_blobber(&blobber("b1", 250)).await.unwrap();

        let got = db.get_blobber("b1").await.unwrap();
        assert_eq!(got.provider.total_stake, 250);
        assert_eq!(got.capacity, 4096);

        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM blobbers")
            .fetch_one(db.pool())
            .await
            .unwrap();
        let count: i64 = row.get("cnt");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn bucket_assignment_survives_overwrite() {
        let db = db().await;
        db.add_or_overwrite_blobber(&blobber("b1", 100)).await.unwrap();
        let row = sqlx::query("SELECT bucket_id FROM blobbers WHERE id = 'b1'")
            .fetch_one(db.pool())
            .await
            .unwrap();
        let first: i64 = row.get("bucket_id");

        db.add_or_overwrite_blobber(&blobber("b1", 999)).await.unwrap();
        let row = sqlx::query("SELECT bucket_id FROM blobbers WHERE id = 'b1'")
            .fetch_one(db.pool())
            .await
            .unwrap();
        let second: i64 = row.get("bucket_id");
        assert_eq!(first, second);
        assert_eq!(
            first,
            bucket_id("b1", db.settings().aggregate_period)
        );
    }

    #[tokio::test]
    async fn partial_update_touches_only_named_columns() {
        let db = db().await;
        db.add_or_overwrite_blobber(&blobber("b1", 100)).await.unwrap();

        let mut updates = Map::new();
        updates.insert("capacity".into(), json!(8192));
        updates.insert("service_charge".into(), json!(0.15));
        db.update_blobber(&ProviderUpdate {
            id: "b1".into(),
            updates,
        })
        .await
        .unwrap();

        let got = db.get_blobber("b1").await.unwrap();
        assert_eq!(got.capacity, 8192);
        assert!((got.provider.service_charge - 0.15).abs() < f64::EPSILON);
        // untouched columns retain prior values
        assert_eq!(got.provider.total_stake, 100);
        assert_eq!(got.base_url, "https://b1.example");
    }

    #[tokio::test]
    async fn unknown_update_column_is_malformed() {
        let db = db().await;
        db.add_or_overwrite_blobber(&blobber("b1", 100)).await.unwrap();

        let mut updates = Map::new();
        updates.insert("no_such_column".into(), json!(1));
        let err = db
            .update_blobber(&ProviderUpdate {
                id: "b1".into(),
                updates,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EventDbError::MalformedPayload { .. }));
        assert!(err.is_contained());
    }

    #[tokio::test]
    async fn delete_blobber_transitions_status_and_keeps_row() {
        let db = db().await;
        db.add_or_overwrite_blobber(&blobber("b1", 100)).await.unwrap();
        db.delete_blobber("b1").await.unwrap();

        let got = db.get_blobber("b1").await.unwrap();
        assert_eq!(got.provider.status, ProviderStatus::Deleted);
        assert_eq!(got.provider.total_stake, 100);
    }

    #[tokio::test]
    async fn node_upsert_roundtrips_each_kind() {
        let db = db().await;
        for kind in [
            ProviderKind::Validator,
            ProviderKind::Miner,
            ProviderKind::Sharder,
            ProviderKind::Authorizer,
        ] {
            let node = ProviderNode {
                provider: ProviderBase {
                    id: format!("{kind}-1"),
                    total_stake: 77,
                    ..Default::default()
                },
                base_url: "https://node.example".into(),
            };
            db.add_or_overwrite_node(kind, &node).await.unwrap();
            let got = db.get_node(kind, &node.provider.id).await.unwrap();
            assert_eq!(got.provider.total_stake, 77);
            assert_eq!(got.base_url, "https://node.example");
        }
    }

    #[tokio::test]
    async fn missing_provider_is_not_found() {
        let db = db().await;
        let err = db.get_blobber("ghost").await.unwrap_err();
        assert!(matches!(
            err,
            EventDbError::NotFound {
                entity: "blobber",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn stake_pool_reward_credits_provider_total() {
        let db = db().await;
        db.add_or_overwrite_node(
            ProviderKind::Miner,
            &ProviderNode {
                provider: ProviderBase {
                    id: "m1".into(),
                    total_rewards: 10,
                    ..Default::default()
                },
                ..Default::default()
            },
        )
        .await
        .unwrap();

        db.apply_stake_pool_reward(&StakePoolReward {
            provider_id: "m1".into(),
            provider_type: ProviderKind::Miner,
            reward: 15,
            ..Default::default()
        })
        .await
        .unwrap();

        let got = db.get_node(ProviderKind::Miner, "m1").await.unwrap();
        assert_eq!(got.provider.total_rewards, 25);
    }

    #[tokio::test]
    async fn bucket_ids_are_captured_sorted() {
        let db = db().await;
        let period = db.settings().aggregate_period;
        for id in ["b3", "b1", "b2"] {
            db.add_or_overwrite_blobber(&blobber(id, 1)).await.unwrap();
        }
        for bucket in 0..period {
            let ids = db
                .provider_ids_in_bucket(ProviderKind::Blobber, bucket)
                .await
                .unwrap();
            let mut sorted = ids.clone();
            sorted.sort();
            assert_eq!(ids, sorted);
        }
    }
}
