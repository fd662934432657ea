//! Allocation blobber term appliers and queries.
//!
//! Term events arrive as batches; each element upserts on its natural key
//! `(allocation_id, blobber_id)`.

use sqlx::Row;

use chainview_core::payload::AllocationBlobberTerm;
use chainview_core::{EventDbError, Pagination};

use crate::store::EventDb;

impl EventDb {
    pub(crate) async fn add_or_overwrite_allocation_blobber_terms(
        &self,
        terms: &[AllocationBlobberTerm],
    ) -> Result<(), EventDbError> {
        for t in terms {
            sqlx::query(
                "INSERT INTO allocation_blobber_terms
                 (allocation_id, blobber_id, read_price, write_price, min_lock_demand)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT (allocation_id, blobber_id) DO UPDATE SET
                   read_price      = excluded.read_price,
                   write_price     = excluded.write_price,
                   min_lock_demand = excluded.min_lock_demand",
            )
            .bind(&t.allocation_id)
            .bind(&t.blobber_id)
            .bind(t.read_price)
            .bind(t.write_price)
            .bind(t.min_lock_demand)
            .execute(self.pool())
            .await
            .map_err(|e| {
                EventDbError::persistence("add_or_overwrite_allocation_blobber_terms", e)
            })?;
        }
        Ok(())
    }

    /// Batch update. Same write path as the overwrite: terms carry their
    /// full value set, so an update is an upsert on the natural key.
    pub(crate) async fn update_allocation_blobber_terms(
        &self,
        terms: &[AllocationBlobberTerm],
    ) -> Result<(), EventDbError> {
        self.add_or_overwrite_allocation_blobber_terms(terms).await
    }

    /// Terms of one allocation, paginated by the stable insertion ID.
    pub async fn get_allocation_blobber_terms(
        &self,
        allocation_id: &str,
        pagination: Pagination,
    ) -> Result<Vec<AllocationBlobberTerm>, EventDbError> {
        let p = pagination.normalized();
        let sql = format!(
            "SELECT * FROM allocation_blobber_terms
             WHERE allocation_id = ?
             ORDER BY id {dir} LIMIT ? OFFSET ?",
            dir = p.direction(),
        );
        let rows = sqlx::query(&sql)
            .bind(allocation_id)
            .bind(p.limit)
            .bind(p.offset)
            .fetch_all(self.pool())
            .await
            .map_err(|e| EventDbError::persistence("get_allocation_blobber_terms", e))?;

        Ok(rows.iter().map(term_from_row).collect())
    }

    pub async fn get_allocation_blobber_term(
        &self,
        allocation_id: &str,
        blobber_id: &str,
    ) -> Result<AllocationBlobberTerm, EventDbError> {
        let row = sqlx::query(
            "SELECT * FROM allocation_blobber_terms
             WHERE allocation_id = ? AND blobber_id = ?",
        )
        .bind(allocation_id)
        .bind(blobber_id)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| EventDbError::persistence("get_allocation_blobber_term", e))?
        .ok_or_else(|| EventDbError::NotFound {
            entity: "allocation_blobber_term",
            key: format!("{allocation_id}/{blobber_id}"),
        })?;

        Ok(term_from_row(&row))
    }
}

fn term_from_row(row: &sqlx::sqlite::SqliteRow) -> AllocationBlobberTerm {
    AllocationBlobberTerm {
        allocation_id: row.get("allocation_id"),
        blobber_id: row.get("blobber_id"),
        read_price: row.get("read_price"),
        write_price: row.get("write_price"),
        min_lock_demand: row.get("min_lock_demand"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainview_core::DbSettings;

    async fn db() -> EventDb {
        EventDb::in_memory(DbSettings::default()).await.unwrap()
    }

    fn term(
        allocation_id: &str,
        blobber_id: &str,
        read_price: i64,
        write_price: i64,
        min_lock_demand: f64,
    ) -> AllocationBlobberTerm {
        AllocationBlobberTerm {
            allocation_id: allocation_id.into(),
            blobber_id: blobber_id.into(),
            read_price,
            write_price,
            min_lock_demand,
        }
    }

    #[tokio::test]
    async fn batch_upsert_keys_on_allocation_and_blobber() {
        let db = db().await;
        db.add_or_overwrite_allocation_blobber_terms(&[
            term("a1", "b1", 29, 31, 37.0),
            term("a1", "b2", 59, 61, 57.0),
        ])
        .await
        .unwrap();

        // overwrite one pair, leave the other untouched
        db.add_or_overwrite_allocation_blobber_terms(&[term("a1", "b1", 41, 43, 47.0)])
            .await
            .unwrap();

        let t1 = db.get_allocation_blobber_term("a1", "b1").await.unwrap();
        assert_eq!(t1.read_price, 41);
        assert_eq!(t1.write_price, 43);
        assert!((t1.min_lock_demand - 47.0).abs() < f64::EPSILON);

        let t2 = db.get_allocation_blobber_term("a1", "b2").await.unwrap();
        assert_eq!(t2.read_price, 59);

        let all = db
            .get_allocation_blobber_terms("a1", Pagination::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn update_batch_replaces_values() {
        let db = db().await;
        db.add_or_overwrite_allocation_blobber_terms(&[term("a1", "b1", 29, 31, 37.0)])
            .await
            .unwrap();
        db.update_allocation_blobber_terms(&[term("a1", "b1", 61, 63, 67.0)])
            .await
            .unwrap();

        let t = db.get_allocation_blobber_term("a1", "b1").await.unwrap();
        assert_eq!(t.read_price, 61);
        assert_eq!(t.write_price, 63);
        assert!((t.min_lock_demand - 67.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn terms_paginate_per_allocation() {
        let db = db().await;
        let batch: Vec<AllocationBlobberTerm> = (0..5)
            .map(|i| term("a1", &format!("b{i}"), i, i * 2, 0.0))
            .collect();
        db.add_or_overwrite_allocation_blobber_terms(&batch)
            .await
            .unwrap();
        db.add_or_overwrite_allocation_blobber_terms(&[term("a2", "b9", 1, 1, 1.0)])
            .await
            .unwrap();

        let page = db
            .get_allocation_blobber_terms("a1", Pagination::new(2, 2))
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].blobber_id, "b2");
        assert_eq!(page[1].blobber_id, "b3");

        let missing = db
            .get_allocation_blobber_term("a1", "ghost")
            .await
            .unwrap_err();
        assert!(matches!(missing, EventDbError::NotFound { .. }));
    }
}
