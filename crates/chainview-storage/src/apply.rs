//! Event dispatch — routes each decoded event to its applier.
//!
//! Also home to the partial-update builder the `update_*` appliers share:
//! a whitelist-checked `UPDATE ... SET` assembled from a JSON field map.

use serde_json::Value;
use sqlx::{QueryBuilder, Sqlite};
use tracing::debug;

use chainview_core::event::{DecodedEvent, EventPayload};
use chainview_core::EventDbError;

use crate::store::EventDb;

impl EventDb {
    /// Apply one decoded event to its entity table.
    pub(crate) async fn apply(&self, event: &DecodedEvent) -> Result<(), EventDbError> {
        debug!(tag = %event.tag, index = %event.index, "apply");
        match &event.payload {
            EventPayload::Blobber(b) => self.add_or_overwrite_blobber(b).await,
            EventPayload::BlobberUpdate(u) => self.update_blobber(u).await,
            EventPayload::BlobberDelete(id) => self.delete_blobber(id).await,
            EventPayload::Validator(n) => {
                self.add_or_overwrite_node(chainview_core::ProviderKind::Validator, n)
                    .await
            }
            EventPayload::Miner(n) => {
                self.add_or_overwrite_node(chainview_core::ProviderKind::Miner, n)
                    .await
            }
            EventPayload::Sharder(n) => {
                self.add_or_overwrite_node(chainview_core::ProviderKind::Sharder, n)
                    .await
            }
            EventPayload::Authorizer(n) => {
                self.add_or_overwrite_node(chainview_core::ProviderKind::Authorizer, n)
                    .await
            }
            EventPayload::Transaction(t) => self.add_transaction(t).await,
            EventPayload::Block(b) => self.add_block(b).await,
            EventPayload::WriteMarker(w) => {
                let mut marker = w.clone();
                marker.transaction_id = event.tx_hash.clone();
                marker.block_number = event.block_number;
                self.add_or_overwrite_write_marker(&marker).await
            }
            EventPayload::CuratorAdd(c) => self.add_curator(c).await,
            EventPayload::CuratorRemove(c) => self.remove_curator(c).await,
            EventPayload::DelegatePool(p) => self.add_delegate_pool(p).await,
            EventPayload::DelegatePoolUpdate(u) => self.update_delegate_pool(u).await,
            EventPayload::StakePoolReward(r) => self.apply_stake_pool_reward(r).await,
            EventPayload::AllocationBlobberTerms(terms) => {
                self.add_or_overwrite_allocation_blobber_terms(terms).await
            }
            EventPayload::AllocationBlobberTermsUpdate(terms) => {
                self.update_allocation_blobber_terms(terms).await
            }
        }
    }
}

// ─── Partial updates ──────────────────────────────────────────────────────────

/// A WHERE-clause key component for [`partial_update`].
pub(crate) enum KeyValue {
    Text(String),
    Int(i64),
}

/// Build and run `UPDATE {table} SET c1 = ?, ... WHERE {key clause}` from a
/// JSON field map. Columns outside `allowed` and values that are neither
/// scalar nor string are rejected as malformed before anything executes.
pub(crate) async fn partial_update(
    db: &EventDb,
    table: &str,
    allowed: &[&str],
    updates: &serde_json::Map<String, Value>,
    key: &[(&str, KeyValue)],
    tag: &str,
) -> Result<(), EventDbError> {
    if updates.is_empty() {
        return Ok(());
    }
    for (column, value) in updates {
        if !allowed.contains(&column.as_str()) {
            return Err(EventDbError::MalformedPayload {
                tag: tag.to_string(),
                reason: format!("unknown column {column:?}"),
            });
        }
        if !matches!(
            value,
            Value::String(_) | Value::Number(_) | Value::Bool(_)
        ) {
            return Err(EventDbError::MalformedPayload {
                tag: tag.to_string(),
                reason: format!("column {column:?} has non-scalar value"),
            });
        }
    }

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!("UPDATE {table} SET "));
    let mut sep = qb.separated(", ");
    for (column, value) in updates {
        sep.push(format!("{column} = "));
        match value {
            Value::String(s) => sep.push_bind_unseparated(s.clone()),
            Value::Bool(b) => sep.push_bind_unseparated(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    sep.push_bind_unseparated(i)
                } else {
                    sep.push_bind_unseparated(n.as_f64().unwrap_or_default())
                }
            }
            _ => unreachable!("validated above"),
        };
    }
    qb.push(" WHERE ");
    for (i, (column, value)) in key.iter().enumerate() {
        if i > 0 {
            qb.push(" AND ");
        }
        qb.push(format!("{column} = "));
        match value {
            KeyValue::Text(s) => qb.push_bind(s.clone()),
            KeyValue::Int(v) => qb.push_bind(*v),
        };
    }

    qb.build()
        .execute(db.pool())
        .await
        .map_err(|e| EventDbError::persistence("partial_update", e))?;
    Ok(())
}
