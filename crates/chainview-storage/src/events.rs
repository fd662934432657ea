//! Event ingress and event queries.
//!
//! `add_events` is the per-block entry point: dedupe against the durable
//! event log, persist the raw survivors, decode once, fold same-key events,
//! then dispatch each to its applier. Faults local to one event are logged
//! and reported, never aborting the batch.

use std::collections::HashSet;

use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::{debug, warn};

use chainview_core::event::{decode, dedupe, Event, EventKey, EventType};
use chainview_core::{merge, EventDbError, Pagination};

use crate::store::EventDb;

/// Outcome of one ingest batch. `skipped` holds the contained per-event
/// faults (malformed payloads, unrecognised tags).
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub applied: usize,
    pub duplicates: usize,
    pub skipped: Vec<EventDbError>,
}

/// Search criteria for [`EventDb::find_events`]. At least one field must be
/// set; an empty search is rejected rather than scanned.
#[derive(Debug, Clone, Default)]
pub struct EventSearch {
    pub block_number: Option<i64>,
    pub tx_hash: Option<String>,
    pub event_type: Option<EventType>,
    pub tag: Option<String>,
}

impl EventSearch {
    fn is_empty(&self) -> bool {
        self.block_number.is_none()
            && self.tx_hash.is_none()
            && self.event_type.is_none()
            && self.tag.is_none()
    }
}

impl EventDb {
    /// Ingest the events of one finalized block (or a redelivery of it).
    ///
    /// Idempotent: feeding the same batch twice leaves every table in the
    /// same state as feeding it once. Store-level failures propagate;
    /// per-event decode faults are contained in the returned report.
    pub async fn add_events(&self, events: Vec<Event>) -> Result<ApplyReport, EventDbError> {
        let mut report = ApplyReport::default();
        if events.is_empty() {
            return Ok(report);
        }

        let mut blocks: Vec<i64> = events.iter().map(|e| e.block_number).collect();
        blocks.sort_unstable();
        blocks.dedup();

        let stored = self.stored_event_keys(&blocks).await?;
        let candidates = events.len();
        let fresh = dedupe(&stored, events);
        report.duplicates = candidates - fresh.len();
        if fresh.is_empty() {
            debug!(duplicates = report.duplicates, "batch fully duplicate");
            return Ok(report);
        }

        self.insert_events(&fresh).await?;

        // Decode once at the boundary; contained faults drop the event.
        let mut decoded = Vec::with_capacity(fresh.len());
        for event in &fresh {
            if event.event_type != EventType::Stats {
                continue;
            }
            match decode(event) {
                Ok(d) => decoded.push(d),
                Err(err) if err.is_contained() => {
                    warn!(
                        tag = %event.tag,
                        block = event.block_number,
                        index = %event.index,
                        %err,
                        "event could not be processed"
                    );
                    report.skipped.push(err);
                }
                Err(err) => return Err(err),
            }
        }

        for event in merge(decoded) {
            match self.apply(&event).await {
                Ok(()) => report.applied += 1,
                Err(err) if err.is_contained() => {
                    warn!(tag = %event.tag, %err, "applier rejected event");
                    report.skipped.push(err);
                }
                Err(err) => return Err(err),
            }
        }

        debug!(
            applied = report.applied,
            duplicates = report.duplicates,
            skipped = report.skipped.len(),
            "batch ingested"
        );
        Ok(report)
    }

    /// Keys already durably stored for the given blocks.
    async fn stored_event_keys(
        &self,
        block_numbers: &[i64],
    ) -> Result<HashSet<EventKey>, EventDbError> {
        if block_numbers.is_empty() {
            return Ok(HashSet::new());
        }

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT block_number, tx_hash, tag, idx FROM events WHERE block_number IN (");
        let mut sep = qb.separated(", ");
        for block in block_numbers {
            sep.push_bind(block);
        }
        qb.push(")");

        let rows = qb
            .build()
            .fetch_all(self.pool())
            .await
            .map_err(|e| EventDbError::persistence("stored_event_keys", e))?;

        Ok(rows
            .into_iter()
            .map(|r| EventKey {
                block_number: r.get("block_number"),
                tx_hash: r.get("tx_hash"),
                tag: r.get("tag"),
                index: r.get("idx"),
            })
            .collect())
    }

    async fn insert_events(&self, events: &[Event]) -> Result<(), EventDbError> {
        let created_at = chrono::Utc::now().timestamp_millis();
        for event in events {
            let data = serde_json::to_string(&event.data)
                .map_err(|e| EventDbError::persistence("insert_events", e))?;

            // OR IGNORE: the unique key backstops the in-memory dedup.
            sqlx::query(
                "INSERT OR IGNORE INTO events
                 (block_number, tx_hash, type, tag, idx, data, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(event.block_number)
            .bind(&event.tx_hash)
            .bind(event.event_type.to_i64())
            .bind(&event.tag)
            .bind(&event.index)
            .bind(&data)
            .bind(created_at)
            .execute(self.pool())
            .await
            .map_err(|e| EventDbError::persistence("insert_events", e))?;
        }
        Ok(())
    }

    /// Search stored events. Requires at least one criterion; ordered by
    /// `(block_number, id)` so repeated identical queries page stably.
    pub async fn find_events(
        &self,
        search: EventSearch,
        pagination: Pagination,
    ) -> Result<Vec<Event>, EventDbError> {
        if search.is_empty() {
            return Err(EventDbError::NoSearchCriteria);
        }
        let p = pagination.normalized();

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT block_number, tx_hash, type, tag, idx, data FROM events WHERE 1=1",
        );
        if let Some(block) = search.block_number {
            qb.push(" AND block_number = ").push_bind(block);
        }
        if let Some(tx_hash) = &search.tx_hash {
            qb.push(" AND tx_hash = ").push_bind(tx_hash.clone());
        }
        if let Some(event_type) = search.event_type {
            qb.push(" AND type = ").push_bind(event_type.to_i64());
        }
        if let Some(tag) = &search.tag {
            qb.push(" AND tag = ").push_bind(tag.clone());
        }
        qb.push(format!(
            " ORDER BY block_number {dir}, id {dir} LIMIT ",
            dir = p.direction()
        ));
        qb.push_bind(p.limit);
        qb.push(" OFFSET ").push_bind(p.offset);

        let rows = qb
            .build()
            .fetch_all(self.pool())
            .await
            .map_err(|e| EventDbError::persistence("find_events", e))?;

        rows.into_iter().map(event_from_row).collect()
    }

    /// All events of one block, in emission order.
    pub async fn get_events(&self, block_number: i64) -> Result<Vec<Event>, EventDbError> {
        let rows = sqlx::query(
            "SELECT block_number, tx_hash, type, tag, idx, data
             FROM events WHERE block_number = ? ORDER BY id",
        )
        .bind(block_number)
        .fetch_all(self.pool())
        .await
        .map_err(|e| EventDbError::persistence("get_events", e))?;

        rows.into_iter().map(event_from_row).collect()
    }

    /// Total number of stored events.
    pub async fn event_count(&self) -> Result<i64, EventDbError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM events")
            .fetch_one(self.pool())
            .await
            .map_err(|e| EventDbError::persistence("event_count", e))?;
        Ok(row.get("cnt"))
    }
}

fn event_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Event, EventDbError> {
    let data: String = row.get("data");
    let data = serde_json::from_str(&data)
        .map_err(|e| EventDbError::persistence("event_from_row", e))?;
    Ok(Event {
        block_number: row.get("block_number"),
        tx_hash: row.get("tx_hash"),
        event_type: EventType::from_i64(row.get("type")),
        tag: row.get("tag"),
        index: row.get("idx"),
        data,
    })
}
