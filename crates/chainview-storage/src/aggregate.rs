//! Round-driven aggregation.
//!
//! Each finalized round recomputes one bucket of providers per kind:
//! the bucket's membership is captured once, then processed in pages.
//! Every page runs in its own transaction — current rows are diffed
//! against their previous snapshots, aggregate rows appended, snapshots
//! replaced, and the folded delta added to the global snapshot singleton.
//! A page that commits stays committed even if a later page fails; a
//! retry of the same round is a no-op for already-committed pages.

use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::{debug, error, info};

use chainview_core::snapshot::{
    diff_provider, Economics, GlobalDelta, GlobalSnapshot, ProviderAggregate, ProviderSnapshot,
    ProviderState,
};
use chainview_core::{EventDbError, Pagination, ProviderKind, ProviderStatus};

use crate::providers::state_from_row;
use crate::store::{aggregate_table, entity_table, snapshot_table, EventDb};

impl EventDb {
    /// Run the aggregation cycle for one finalized round.
    ///
    /// Picks bucket `round % aggregate_period` for every provider kind and
    /// recomputes each member's aggregate, snapshot, and global-delta
    /// contribution. Returns the global snapshot as of cycle completion.
    pub async fn update_aggregates(&self, round: i64) -> Result<GlobalSnapshot, EventDbError> {
        let period = self.settings().aggregate_period.max(1);
        let bucket = round % period;

        for kind in ProviderKind::ALL {
            self.update_provider_aggregates(kind, round, bucket).await?;
        }

        sqlx::query("UPDATE global_snapshot SET round = ? WHERE id = 1")
            .bind(round)
            .execute(self.pool())
            .await
            .map_err(|e| EventDbError::persistence("update_aggregates", e))?;

        let gs = self.global_snapshot().await?;
        info!(
            round,
            bucket,
            total_staked = gs.total_staked,
            "aggregation cycle complete"
        );
        Ok(gs)
    }

    async fn update_provider_aggregates(
        &self,
        kind: ProviderKind,
        round: i64,
        bucket: i64,
    ) -> Result<(), EventDbError> {
        // Membership captured once so later upserts cannot shift the pages.
        let ids = self.provider_ids_in_bucket(kind, bucket).await?;
        if ids.is_empty() {
            return Ok(());
        }
        debug!(kind = %kind, round, bucket, providers = ids.len(), "processing bucket");

        let page_size = self.page_limit() as usize;
        for (page_no, page) in ids.chunks(page_size).enumerate() {
            if let Err(err) = self.process_page(kind, round, page).await {
                error!(kind = %kind, round, bucket, page = page_no, %err, "page aborted");
                return Err(err);
            }
        }
        Ok(())
    }

    /// Diff and rewrite one page of providers atomically.
    async fn process_page(
        &self,
        kind: ProviderKind,
        round: i64,
        ids: &[String],
    ) -> Result<(), EventDbError> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| EventDbError::persistence("process_page", e))?;

        // Current rows, in the same stable order as the captured IDs.
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT * FROM {table} WHERE id IN (",
            table = entity_table(kind)
        ));
        let mut sep = qb.separated(", ");
        for id in ids {
            sep.push_bind(id.clone());
        }
        qb.push(") ORDER BY id");
        let current: Vec<ProviderState> = qb
            .build()
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| EventDbError::persistence("process_page", e))?
            .iter()
            .map(|row| state_from_row(kind, row))
            .collect();

        // Previous snapshots for the page, then clear them for replacement.
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT * FROM {table} WHERE provider_id IN (",
            table = snapshot_table(kind)
        ));
        let mut sep = qb.separated(", ");
        for id in ids {
            sep.push_bind(id.clone());
        }
        qb.push(")");
        let old_rows = qb
            .build()
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| EventDbError::persistence("process_page", e))?;
        let old: std::collections::HashMap<String, ProviderSnapshot> = old_rows
            .iter()
            .map(|row| {
                let snap = snapshot_from_row(kind, row);
                (snap.provider_id.clone(), snap)
            })
            .collect();

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "DELETE FROM {table} WHERE provider_id IN (",
            table = snapshot_table(kind)
        ));
        let mut sep = qb.separated(", ");
        for id in ids {
            sep.push_bind(id.clone());
        }
        qb.push(")");
        qb.build()
            .execute(&mut *tx)
            .await
            .map_err(|e| EventDbError::persistence("process_page", e))?;

        let mut page_delta = GlobalDelta::default();
        for state in &current {
            let diff = diff_provider(round, state, old.get(&state.id));
            page_delta.merge(&diff.delta);

            if let Some(aggregate) = &diff.aggregate {
                insert_aggregate(&mut tx, kind, aggregate).await?;
            }
            insert_snapshot(&mut tx, kind, &ProviderSnapshot::of(round, state)).await?;
        }

        if !page_delta.is_zero() {
            let mut query = sqlx::query(
                "UPDATE global_snapshot SET
                   total_staked     = total_staked + ?,
                   total_rewards    = total_rewards + ?,
                   total_mint       = total_mint + ?,
                   total_burn       = total_burn + ?,
                   blobber_count    = blobber_count + ?,
                   validator_count  = validator_count + ?,
                   miner_count      = miner_count + ?,
                   sharder_count    = sharder_count + ?,
                   authorizer_count = authorizer_count + ?
                 WHERE id = 1",
            )
            .bind(page_delta.total_staked)
            .bind(page_delta.total_rewards)
            .bind(page_delta.total_mint)
            .bind(page_delta.total_burn);
            for k in ProviderKind::ALL {
                query = query.bind(page_delta.count(k));
            }
            query
                .execute(&mut *tx)
                .await
                .map_err(|e| EventDbError::persistence("process_page", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| EventDbError::persistence("process_page", e))?;

        if self.settings().debug {
            info!(
                kind = %kind,
                round,
                providers = current.len(),
                staked = page_delta.total_staked,
                "page committed"
            );
        }
        Ok(())
    }

    // ─── Readers ──────────────────────────────────────────────────────────────

    /// The global snapshot singleton.
    pub async fn global_snapshot(&self) -> Result<GlobalSnapshot, EventDbError> {
        let row = sqlx::query("SELECT * FROM global_snapshot WHERE id = 1")
            .fetch_one(self.pool())
            .await
            .map_err(|e| EventDbError::persistence("global_snapshot", e))?;

        Ok(GlobalSnapshot {
            round: row.get("round"),
            total_staked: row.get("total_staked"),
            total_rewards: row.get("total_rewards"),
            total_mint: row.get("total_mint"),
            total_burn: row.get("total_burn"),
            blobber_count: row.get("blobber_count"),
            validator_count: row.get("validator_count"),
            miner_count: row.get("miner_count"),
            sharder_count: row.get("sharder_count"),
            authorizer_count: row.get("authorizer_count"),
        })
    }

    /// A provider's current snapshot, if it has been through a cycle.
    pub async fn get_provider_snapshot(
        &self,
        kind: ProviderKind,
        provider_id: &str,
    ) -> Result<ProviderSnapshot, EventDbError> {
        let sql = format!(
            "SELECT * FROM {table} WHERE provider_id = ?",
            table = snapshot_table(kind)
        );
        let row = sqlx::query(&sql)
            .bind(provider_id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| EventDbError::persistence("get_provider_snapshot", e))?
            .ok_or_else(|| EventDbError::NotFound {
                entity: "provider_snapshot",
                key: provider_id.to_string(),
            })?;
        Ok(snapshot_from_row(kind, &row))
    }

    /// A provider's aggregate time series, paginated, ordered by round.
    pub async fn get_provider_aggregates(
        &self,
        kind: ProviderKind,
        provider_id: &str,
        pagination: Pagination,
    ) -> Result<Vec<ProviderAggregate>, EventDbError> {
        let p = pagination.normalized();
        let sql = format!(
            "SELECT * FROM {table} WHERE provider_id = ?
             ORDER BY round {dir} LIMIT ? OFFSET ?",
            table = aggregate_table(kind),
            dir = p.direction(),
        );
        let rows = sqlx::query(&sql)
            .bind(provider_id)
            .bind(p.limit)
            .bind(p.offset)
            .fetch_all(self.pool())
            .await
            .map_err(|e| EventDbError::persistence("get_provider_aggregates", e))?;

        Ok(rows
            .iter()
            .map(|row| ProviderAggregate {
                provider_id: row.get("provider_id"),
                kind,
                round: row.get("round"),
                bucket_id: row.get("bucket_id"),
                econ: econ_from_row(row),
            })
            .collect())
    }
}

async fn insert_aggregate(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    kind: ProviderKind,
    a: &ProviderAggregate,
) -> Result<(), EventDbError> {
    let sql = format!(
        "INSERT INTO {table}
         (provider_id, round, bucket_id, fee, total_stake, total_rewards,
          total_mint, total_burn, service_charge)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT (provider_id, round) DO UPDATE SET
           bucket_id      = excluded.bucket_id,
           fee            = excluded.fee,
           total_stake    = excluded.total_stake,
           total_rewards  = excluded.total_rewards,
           total_mint     = excluded.total_mint,
           total_burn     = excluded.total_burn,
           service_charge = excluded.service_charge",
        table = aggregate_table(kind),
    );
    sqlx::query(&sql)
        .bind(&a.provider_id)
        .bind(a.round)
        .bind(a.bucket_id)
        .bind(a.econ.fee)
        .bind(a.econ.total_stake)
        .bind(a.econ.total_rewards)
        .bind(a.econ.total_mint)
        .bind(a.econ.total_burn)
        .bind(a.econ.service_charge)
        .execute(&mut **tx)
        .await
        .map_err(|e| EventDbError::persistence("insert_aggregate", e))?;
    Ok(())
}

async fn insert_snapshot(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    kind: ProviderKind,
    s: &ProviderSnapshot,
) -> Result<(), EventDbError> {
    let sql = format!(
        "INSERT INTO {table}
         (provider_id, round, bucket_id, status, fee, total_stake, total_rewards,
          total_mint, total_burn, service_charge)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        table = snapshot_table(kind),
    );
    sqlx::query(&sql)
        .bind(&s.provider_id)
        .bind(s.round)
        .bind(s.bucket_id)
        .bind(s.status.to_i64())
        .bind(s.econ.fee)
        .bind(s.econ.total_stake)
        .bind(s.econ.total_rewards)
        .bind(s.econ.total_mint)
        .bind(s.econ.total_burn)
        .bind(s.econ.service_charge)
        .execute(&mut **tx)
        .await
        .map_err(|e| EventDbError::persistence("insert_snapshot", e))?;
    Ok(())
}

fn econ_from_row(row: &sqlx::sqlite::SqliteRow) -> Economics {
    Economics {
        fee: row.get("fee"),
        total_stake: row.get("total_stake"),
        total_rewards: row.get("total_rewards"),
        total_mint: row.get("total_mint"),
        total_burn: row.get("total_burn"),
        service_charge: row.get("service_charge"),
    }
}

fn snapshot_from_row(kind: ProviderKind, row: &sqlx::sqlite::SqliteRow) -> ProviderSnapshot {
    ProviderSnapshot {
        provider_id: row.get("provider_id"),
        kind,
        round: row.get("round"),
        bucket_id: row.get("bucket_id"),
        status: ProviderStatus::from_i64(row.get("status")),
        econ: econ_from_row(row),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainview_core::payload::{Blobber, ProviderBase, ProviderNode, ProviderUpdate};
    use chainview_core::DbSettings;
    use serde_json::{json, Map};

    /// Period 1 puts every provider in bucket 0, so every round processes
    /// the full population.
    fn everyone_settings() -> DbSettings {
        DbSettings {
            aggregate_period: 1,
            ..Default::default()
        }
    }

    async fn db(settings: DbSettings) -> EventDb {
        EventDb::in_memory(settings).await.unwrap()
    }

    fn blobber(id: &str, stake: i64, rewards: i64) -> Blobber {
        Blobber {
            provider: ProviderBase {
                id: id.into(),
                total_stake: stake,
                total_rewards: rewards,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn first_cycle_counts_and_diffs_from_zero() {
        let db = db(everyone_settings()).await;
        db.add_or_overwrite_blobber(&blobber("b1", 1000, 50)).await.unwrap();
        db.add_or_overwrite_blobber(&blobber("b2", 600, 0)).await.unwrap();

        let gs = db.update_aggregates(1).await.unwrap();
        assert_eq!(gs.round, 1);
        assert_eq!(gs.blobber_count, 2);
        assert_eq!(gs.total_staked, 1600);
        assert_eq!(gs.total_rewards, 50);

        // mid-point against the zero baseline
        let aggs = db
            .get_provider_aggregates(ProviderKind::Blobber, "b1", Pagination::default())
            .await
            .unwrap();
        assert_eq!(aggs.len(), 1);
        assert_eq!(aggs[0].econ.total_stake, 500);

        let snap = db
            .get_provider_snapshot(ProviderKind::Blobber, "b1")
            .await
            .unwrap();
        assert_eq!(snap.round, 1);
        assert_eq!(snap.econ.total_stake, 1000);
    }

    #[tokio::test]
    async fn second_cycle_emits_midpoints_and_replaces_snapshots() {
        let db = db(everyone_settings()).await;
        db.add_or_overwrite_blobber(&blobber("b1", 1000, 0)).await.unwrap();
        db.update_aggregates(1).await.unwrap();

        db.add_or_overwrite_blobber(&blobber("b1", 1400, 100)).await.unwrap();
        let gs = db.update_aggregates(2).await.unwrap();
        assert_eq!(gs.total_staked, 1400);
        assert_eq!(gs.total_rewards, 100);
        assert_eq!(gs.blobber_count, 1);

        let aggs = db
            .get_provider_aggregates(ProviderKind::Blobber, "b1", Pagination::default())
            .await
            .unwrap();
        assert_eq!(aggs.len(), 2);
        assert_eq!(aggs[1].round, 2);
        assert_eq!(aggs[1].econ.total_stake, 1200); // (1000 + 1400) / 2

        // exactly one snapshot row per provider, at the latest round
        let snap = db
            .get_provider_snapshot(ProviderKind::Blobber, "b1")
            .await
            .unwrap();
        assert_eq!(snap.round, 2);
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM blobber_snapshots")
            .fetch_one(db.pool())
            .await
            .unwrap();
        let count: i64 = row.get("cnt");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn rerunning_a_round_changes_nothing() {
        let db = db(everyone_settings()).await;
        db.add_or_overwrite_blobber(&blobber("b1", 1000, 50)).await.unwrap();

        let first = db.update_aggregates(1).await.unwrap();
        let second = db.update_aggregates(1).await.unwrap();
        assert_eq!(first, second);

        let aggs = db
            .get_provider_aggregates(ProviderKind::Blobber, "b1", Pagination::default())
            .await
            .unwrap();
        assert_eq!(aggs.len(), 1);
    }

    #[tokio::test]
    async fn offline_transition_removes_contribution_and_count() {
        let db = db(everyone_settings()).await;
        db.add_or_overwrite_blobber(&blobber("b1", 1000, 50)).await.unwrap();
        db.add_or_overwrite_blobber(&blobber("b2", 300, 0)).await.unwrap();
        db.update_aggregates(1).await.unwrap();

        let mut updates = Map::new();
        updates.insert("status".into(), json!(ProviderStatus::Inactive.to_i64()));
        db.update_blobber(&ProviderUpdate {
            id: "b1".into(),
            updates,
        })
        .await
        .unwrap();

        let gs = db.update_aggregates(2).await.unwrap();
        assert_eq!(gs.blobber_count, 1);
        assert_eq!(gs.total_staked, 300);
        assert_eq!(gs.total_rewards, 0);

        // no aggregate row for the offline round
        let aggs = db
            .get_provider_aggregates(ProviderKind::Blobber, "b1", Pagination::default())
            .await
            .unwrap();
        assert_eq!(aggs.len(), 1);
        assert_eq!(aggs[0].round, 1);

        // and the next round does not double-decrement
        let gs = db.update_aggregates(3).await.unwrap();
        assert_eq!(gs.blobber_count, 1);
        assert_eq!(gs.total_staked, 300);
    }

    #[tokio::test]
    async fn totals_equal_sum_of_online_snapshots() {
        let db = db(everyone_settings()).await;
        for (id, stake) in [("b1", 100), ("b2", 250), ("b3", 75)] {
            db.add_or_overwrite_blobber(&blobber(id, stake, 0)).await.unwrap();
        }
        db.add_or_overwrite_node(
            ProviderKind::Miner,
            &ProviderNode {
                provider: ProviderBase {
                    id: "m1".into(),
                    total_stake: 500,
                    ..Default::default()
                },
                ..Default::default()
            },
        )
        .await
        .unwrap();
        db.update_aggregates(1).await.unwrap();

        db.add_or_overwrite_blobber(&blobber("b2", 400, 0)).await.unwrap();
        let gs = db.update_aggregates(2).await.unwrap();

        let mut snapshot_sum = 0;
        for (kind, id) in [
            (ProviderKind::Blobber, "b1"),
            (ProviderKind::Blobber, "b2"),
            (ProviderKind::Blobber, "b3"),
            (ProviderKind::Miner, "m1"),
        ] {
            snapshot_sum += db
                .get_provider_snapshot(kind, id)
                .await
                .unwrap()
                .econ
                .total_stake;
        }
        assert_eq!(gs.total_staked, snapshot_sum);
        assert_eq!(gs.blobber_count, 3);
        assert_eq!(gs.miner_count, 1);
    }

    #[tokio::test]
    async fn population_larger_than_a_page_is_fully_processed() {
        let settings = DbSettings {
            aggregate_period: 1,
            page_limit: 2,
            ..Default::default()
        };
        let db = db(settings).await;
        for i in 0..7 {
            db.add_or_overwrite_blobber(&blobber(&format!("b{i}"), 10, 0))
                .await
                .unwrap();
        }

        let gs = db.update_aggregates(1).await.unwrap();
        assert_eq!(gs.blobber_count, 7);
        assert_eq!(gs.total_staked, 70);

        for i in 0..7 {
            let snap = db
                .get_provider_snapshot(ProviderKind::Blobber, &format!("b{i}"))
                .await
                .unwrap();
            assert_eq!(snap.round, 1);
        }
    }

    #[tokio::test]
    async fn only_the_rounds_bucket_is_recomputed() {
        let settings = DbSettings {
            aggregate_period: 10,
            ..Default::default()
        };
        let db = db(settings).await;
        for i in 0..20 {
            db.add_or_overwrite_blobber(&blobber(&format!("b{i}"), 10, 0))
                .await
                .unwrap();
        }

        let gs = db.update_aggregates(3).await.unwrap();
        // only bucket 3's members were counted in
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM blobbers WHERE bucket_id = 3")
            .fetch_one(db.pool())
            .await
            .unwrap();
        let in_bucket: i64 = row.get("cnt");
        assert_eq!(gs.blobber_count, in_bucket);
        assert_eq!(gs.total_staked, in_bucket * 10);

        // a full period sweeps everyone in
        for round in 0..10 {
            db.update_aggregates(round).await.unwrap();
        }
        let gs = db.global_snapshot().await.unwrap();
        assert_eq!(gs.blobber_count, 20);
        assert_eq!(gs.total_staked, 200);
    }
}
