//! Chain-entity appliers and queries: transactions, blocks, write markers,
//! and curators.

use sqlx::Row;

use chainview_core::payload::{Block, Curator, Transaction, WriteMarker};
use chainview_core::{EventDbError, Pagination};

use crate::store::EventDb;

impl EventDb {
    // ─── Transactions ─────────────────────────────────────────────────────────

    pub(crate) async fn add_transaction(&self, t: &Transaction) -> Result<(), EventDbError> {
        sqlx::query(
            "INSERT INTO transactions
             (hash, block_hash, round, client_id, to_client_id, value, fee)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (hash) DO UPDATE SET
               block_hash   = excluded.block_hash,
               round        = excluded.round,
               client_id    = excluded.client_id,
               to_client_id = excluded.to_client_id,
               value        = excluded.value,
               fee          = excluded.fee",
        )
        .bind(&t.hash)
        .bind(&t.block_hash)
        .bind(t.round)
        .bind(&t.client_id)
        .bind(&t.to_client_id)
        .bind(t.value)
        .bind(t.fee)
        .execute(self.pool())
        .await
        .map_err(|e| EventDbError::persistence("add_transaction", e))?;
        Ok(())
    }

    pub async fn get_transaction_by_hash(&self, hash: &str) -> Result<Transaction, EventDbError> {
        let row = sqlx::query("SELECT * FROM transactions WHERE hash = ?")
            .bind(hash)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| EventDbError::persistence("get_transaction_by_hash", e))?
            .ok_or_else(|| EventDbError::NotFound {
                entity: "transaction",
                key: hash.to_string(),
            })?;

        Ok(Transaction {
            hash: row.get("hash"),
            block_hash: row.get("block_hash"),
            round: row.get("round"),
            client_id: row.get("client_id"),
            to_client_id: row.get("to_client_id"),
            value: row.get("value"),
            fee: row.get("fee"),
        })
    }

    // ─── Blocks ───────────────────────────────────────────────────────────────

    pub(crate) async fn add_block(&self, b: &Block) -> Result<(), EventDbError> {
        sqlx::query(
            "INSERT INTO blocks (hash, round, prev_hash, miner_id, num_txns, timestamp)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (hash) DO UPDATE SET
               round     = excluded.round,
               prev_hash = excluded.prev_hash,
               miner_id  = excluded.miner_id,
               num_txns  = excluded.num_txns,
               timestamp = excluded.timestamp",
        )
        .bind(&b.hash)
        .bind(b.round)
        .bind(&b.prev_hash)
        .bind(&b.miner_id)
        .bind(b.num_txns)
        .bind(b.timestamp)
        .execute(self.pool())
        .await
        .map_err(|e| EventDbError::persistence("add_block", e))?;
        Ok(())
    }

    pub async fn get_block_by_hash(&self, hash: &str) -> Result<Block, EventDbError> {
        let row = sqlx::query("SELECT * FROM blocks WHERE hash = ?")
            .bind(hash)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| EventDbError::persistence("get_block_by_hash", e))?
            .ok_or_else(|| EventDbError::NotFound {
                entity: "block",
                key: hash.to_string(),
            })?;
        Ok(block_from_row(&row))
    }

    /// Blocks in the round range `[start, end]`, ordered by round. Rounds
    /// with no stored block are simply absent from the result.
    pub async fn get_blocks_by_block_numbers(
        &self,
        start: i64,
        end: i64,
        pagination: Pagination,
    ) -> Result<Vec<Block>, EventDbError> {
        let p = pagination.normalized();
        let sql = format!(
            "SELECT * FROM blocks WHERE round >= ? AND round <= ?
             ORDER BY round {dir} LIMIT ? OFFSET ?",
            dir = p.direction(),
        );
        let rows = sqlx::query(&sql)
            .bind(start)
            .bind(end)
            .bind(p.limit)
            .bind(p.offset)
            .fetch_all(self.pool())
            .await
            .map_err(|e| EventDbError::persistence("get_blocks_by_block_numbers", e))?;
        Ok(rows.iter().map(block_from_row).collect())
    }

    // ─── Write markers ────────────────────────────────────────────────────────

    pub(crate) async fn add_or_overwrite_write_marker(
        &self,
        w: &WriteMarker,
    ) -> Result<(), EventDbError> {
        sqlx::query(
            "INSERT INTO write_markers
             (transaction_id, allocation_id, blobber_id, client_id, size, block_number)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (transaction_id) DO UPDATE SET
               allocation_id = excluded.allocation_id,
               blobber_id    = excluded.blobber_id,
               client_id     = excluded.client_id,
               size          = excluded.size,
               block_number  = excluded.block_number",
        )
        .bind(&w.transaction_id)
        .bind(&w.allocation_id)
        .bind(&w.blobber_id)
        .bind(&w.client_id)
        .bind(w.size)
        .bind(w.block_number)
        .execute(self.pool())
        .await
        .map_err(|e| EventDbError::persistence("add_or_overwrite_write_marker", e))?;
        Ok(())
    }

    pub async fn get_write_marker(
        &self,
        transaction_id: &str,
    ) -> Result<WriteMarker, EventDbError> {
        let row = sqlx::query("SELECT * FROM write_markers WHERE transaction_id = ?")
            .bind(transaction_id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| EventDbError::persistence("get_write_marker", e))?
            .ok_or_else(|| EventDbError::NotFound {
                entity: "write_marker",
                key: transaction_id.to_string(),
            })?;

        Ok(WriteMarker {
            allocation_id: row.get("allocation_id"),
            blobber_id: row.get("blobber_id"),
            client_id: row.get("client_id"),
            size: row.get("size"),
            transaction_id: row.get("transaction_id"),
            block_number: row.get("block_number"),
        })
    }

    // ─── Curators ─────────────────────────────────────────────────────────────

    pub(crate) async fn add_curator(&self, c: &Curator) -> Result<(), EventDbError> {
        sqlx::query(
            "INSERT OR IGNORE INTO curators (curator_id, allocation_id) VALUES (?, ?)",
        )
        .bind(&c.curator_id)
        .bind(&c.allocation_id)
        .execute(self.pool())
        .await
        .map_err(|e| EventDbError::persistence("add_curator", e))?;
        Ok(())
    }

    pub(crate) async fn remove_curator(&self, c: &Curator) -> Result<(), EventDbError> {
        sqlx::query("DELETE FROM curators WHERE curator_id = ? AND allocation_id = ?")
            .bind(&c.curator_id)
            .bind(&c.allocation_id)
            .execute(self.pool())
            .await
            .map_err(|e| EventDbError::persistence("remove_curator", e))?;
        Ok(())
    }

    /// Curator IDs attached to an allocation, sorted.
    pub async fn get_allocation_curators(
        &self,
        allocation_id: &str,
    ) -> Result<Vec<String>, EventDbError> {
        let rows = sqlx::query(
            "SELECT curator_id FROM curators WHERE allocation_id = ? ORDER BY curator_id",
        )
        .bind(allocation_id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| EventDbError::persistence("get_allocation_curators", e))?;
        Ok(rows.into_iter().map(|r| r.get("curator_id")).collect())
    }
}

fn block_from_row(row: &sqlx::sqlite::SqliteRow) -> Block {
    Block {
        hash: row.get("hash"),
        round: row.get("round"),
        prev_hash: row.get("prev_hash"),
        miner_id: row.get("miner_id"),
        num_txns: row.get("num_txns"),
        timestamp: row.get("timestamp"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainview_core::DbSettings;

    async fn db() -> EventDb {
        EventDb::in_memory(DbSettings::default()).await.unwrap()
    }

    #[tokio::test]
    async fn transaction_upsert_and_lookup() {
        let db = db().await;
        let tx = Transaction {
            hash: "t1".into(),
            block_hash: "h1".into(),
            round: 3,
            value: 500,
            ..Default::default()
        };
        db.add_transaction(&tx).await.unwrap();
        // re-applying the same event is a no-op overwrite
        db.add_transaction(&tx).await.unwrap();

        let got = db.get_transaction_by_hash("t1").await.unwrap();
        assert_eq!(got, tx);

        let err = db.get_transaction_by_hash("missing").await.unwrap_err();
        assert!(matches!(err, EventDbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn blocks_by_rounds_skips_missing_and_sorts() {
        let db = db().await;
        for (hash, round) in [("h3", 3), ("h1", 1), ("h2", 2)] {
            db.add_block(&Block {
                hash: hash.into(),
                round,
                ..Default::default()
            })
            .await
            .unwrap();
        }

        let blocks = db
            .get_blocks_by_block_numbers(2, 99, Pagination::default())
            .await
            .unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].round, 2);
        assert_eq!(blocks[1].round, 3);

        let newest_first = db
            .get_blocks_by_block_numbers(1, 3, Pagination::default().descending())
            .await
            .unwrap();
        assert_eq!(newest_first[0].round, 3);

        assert!(db
            .get_blocks_by_block_numbers(50, 60, Pagination::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn write_marker_keys_on_transaction() {
        let db = db().await;
        let w = WriteMarker {
            allocation_id: "a1".into(),
            blobber_id: "b1".into(),
            size: 2048,
            transaction_id: "tx9".into(),
            block_number: 12,
            ..Default::default()
        };
        db.add_or_overwrite_write_marker(&w).await.unwrap();

        let got = db.get_write_marker("tx9").await.unwrap();
        assert_eq!(got.size, 2048);
        assert_eq!(got.block_number, 12);
    }

    #[tokio::test]
    async fn curator_membership_is_idempotent() {
        let db = db().await;
        let c = Curator {
            curator_id: "c1".into(),
            allocation_id: "a1".into(),
        };
        db.add_curator(&c).await.unwrap();
        db.add_curator(&c).await.unwrap();
        db.add_curator(&Curator {
            curator_id: "c0".into(),
            allocation_id: "a1".into(),
        })
        .await
        .unwrap();

        assert_eq!(
            db.get_allocation_curators("a1").await.unwrap(),
            vec!["c0".to_string(), "c1".to_string()]
        );

        db.remove_curator(&c).await.unwrap();
        assert_eq!(
            db.get_allocation_curators("a1").await.unwrap(),
            vec!["c0".to_string()]
        );
        // removing a non-member is harmless
        db.remove_curator(&c).await.unwrap();
    }
}
