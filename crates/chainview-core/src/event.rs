//! Wire event model and the decode boundary.
//!
//! Events arrive as raw `{block_number, tx_hash, type, tag, index, data}`
//! records from the block-finalization pipeline. [`decode`] turns a raw
//! event into a [`DecodedEvent`] carrying a strongly-typed [`EventPayload`]
//! variant; from that point on no code looks at raw JSON again.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EventDbError;
use crate::payload::{
    AllocationBlobberTerm, Blobber, Block, Curator, DelegatePool, DelegatePoolUpdate,
    ProviderNode, ProviderUpdate, StakePoolReward, Transaction, WriteMarker,
};

// ─── EventType ────────────────────────────────────────────────────────────────

/// Coarse event classification. Only `Stats` events mutate entity tables;
/// the rest are stored for audit and otherwise ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    #[default]
    None,
    Error,
    Stats,
}

impl EventType {
    pub fn to_i64(self) -> i64 {
        match self {
            Self::None => 0,
            Self::Error => 1,
            Self::Stats => 2,
        }
    }

    pub fn from_i64(v: i64) -> Self {
        match v {
            1 => Self::Error,
            2 => Self::Stats,
            _ => Self::None,
        }
    }
}

// ─── EventTag ─────────────────────────────────────────────────────────────────

/// The closed, versioned tag enumeration. Each tag names the payload
/// schema its event's `data` must decode against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTag {
    AddOrOverwriteBlobber,
    UpdateBlobber,
    DeleteBlobber,
    AddOrOverwriteValidator,
    AddOrOverwriteMiner,
    AddOrOverwriteSharder,
    AddOrOverwriteAuthorizer,
    AddTransaction,
    AddBlock,
    AddOrOverwriteWriteMarker,
    AddCurator,
    RemoveCurator,
    AddDelegatePool,
    UpdateDelegatePool,
    StakePoolReward,
    AddOrOverwriteAllocationBlobberTerm,
    UpdateAllocationBlobberTerm,
}

impl EventTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddOrOverwriteBlobber => "add_or_overwrite_blobber",
            Self::UpdateBlobber => "update_blobber",
            Self::DeleteBlobber => "delete_blobber",
            Self::AddOrOverwriteValidator => "add_or_overwrite_validator",
            Self::AddOrOverwriteMiner => "add_or_overwrite_miner",
            Self::AddOrOverwriteSharder => "add_or_overwrite_sharder",
            Self::AddOrOverwriteAuthorizer => "add_or_overwrite_authorizer",
            Self::AddTransaction => "add_transaction",
            Self::AddBlock => "add_block",
            Self::AddOrOverwriteWriteMarker => "add_or_overwrite_write_marker",
            Self::AddCurator => "add_curator",
            Self::RemoveCurator => "remove_curator",
            Self::AddDelegatePool => "add_delegate_pool",
            Self::UpdateDelegatePool => "update_delegate_pool",
            Self::StakePoolReward => "stake_pool_reward",
            Self::AddOrOverwriteAllocationBlobberTerm => {
                "add_or_overwrite_allocation_blobber_term"
            }
            Self::UpdateAllocationBlobberTerm => "update_allocation_blobber_term",
        }
    }

    /// Parse a wire tag name. Unknown names are a contained error.
    pub fn parse(name: &str) -> Result<Self, EventDbError> {
        match name {
            "add_or_overwrite_blobber" => Ok(Self::AddOrOverwriteBlobber),
            "update_blobber" => Ok(Self::UpdateBlobber),
            "delete_blobber" => Ok(Self::DeleteBlobber),
            "add_or_overwrite_validator" => Ok(Self::AddOrOverwriteValidator),
            "add_or_overwrite_miner" => Ok(Self::AddOrOverwriteMiner),
            "add_or_overwrite_sharder" => Ok(Self::AddOrOverwriteSharder),
            "add_or_overwrite_authorizer" => Ok(Self::AddOrOverwriteAuthorizer),
            "add_transaction" => Ok(Self::AddTransaction),
            "add_block" => Ok(Self::AddBlock),
            "add_or_overwrite_write_marker" => Ok(Self::AddOrOverwriteWriteMarker),
            "add_curator" => Ok(Self::AddCurator),
            "remove_curator" => Ok(Self::RemoveCurator),
            "add_delegate_pool" => Ok(Self::AddDelegatePool),
            "update_delegate_pool" => Ok(Self::UpdateDelegatePool),
            "stake_pool_reward" => Ok(Self::StakePoolReward),
            "add_or_overwrite_allocation_blobber_term" => {
                Ok(Self::AddOrOverwriteAllocationBlobberTerm)
            }
            "update_allocation_blobber_term" => Ok(Self::UpdateAllocationBlobberTerm),
            other => Err(EventDbError::UnrecognisedTag(other.to_string())),
        }
    }
}

impl std::fmt::Display for EventTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ─── Event ────────────────────────────────────────────────────────────────────

/// An immutable raw event as emitted per finalized block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub block_number: i64,
    /// May be empty for block-level events.
    #[serde(default)]
    pub tx_hash: String,
    #[serde(default, rename = "type")]
    pub event_type: EventType,
    /// Wire tag name; parsed against [`EventTag`] at the decode boundary.
    pub tag: String,
    /// Secondary key; the dedup and merge key within a block.
    #[serde(default)]
    pub index: String,
    /// Opaque payload, schema determined by `tag`.
    #[serde(default)]
    pub data: Value,
}

impl Event {
    /// Convenience constructor for `Stats` events.
    pub fn stats(
        block_number: i64,
        tx_hash: impl Into<String>,
        tag: EventTag,
        index: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            block_number,
            tx_hash: tx_hash.into(),
            event_type: EventType::Stats,
            tag: tag.as_str().to_string(),
            index: index.into(),
            data,
        }
    }

    /// The identity used for duplicate elimination.
    pub fn key(&self) -> EventKey {
        EventKey {
            block_number: self.block_number,
            tx_hash: self.tx_hash.clone(),
            tag: self.tag.clone(),
            index: self.index.clone(),
        }
    }
}

/// `(block_number, tx_hash, tag, index)` — an event's durable identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub block_number: i64,
    pub tx_hash: String,
    pub tag: String,
    pub index: String,
}

// ─── Deduplicator ─────────────────────────────────────────────────────────────

/// Remove candidates already durably stored, preserving the order of the
/// survivors. Pure; safe on empty or fully-duplicate input.
pub fn dedupe(stored: &HashSet<EventKey>, candidates: Vec<Event>) -> Vec<Event> {
    let mut seen = stored.clone();
    candidates
        .into_iter()
        .filter(|e| seen.insert(e.key()))
        .collect()
}

// ─── Decode boundary ──────────────────────────────────────────────────────────

/// One variant per tag, each carrying its strongly-typed payload.
#[derive(Debug, Clone)]
pub enum EventPayload {
    Blobber(Blobber),
    BlobberUpdate(ProviderUpdate),
    BlobberDelete(String),
    Validator(ProviderNode),
    Miner(ProviderNode),
    Sharder(ProviderNode),
    Authorizer(ProviderNode),
    Transaction(Transaction),
    Block(Block),
    WriteMarker(WriteMarker),
    CuratorAdd(Curator),
    CuratorRemove(Curator),
    DelegatePool(DelegatePool),
    DelegatePoolUpdate(DelegatePoolUpdate),
    StakePoolReward(StakePoolReward),
    AllocationBlobberTerms(Vec<AllocationBlobberTerm>),
    AllocationBlobberTermsUpdate(Vec<AllocationBlobberTerm>),
}

/// A raw event after the one-shot decode: tag parsed, payload typed.
#[derive(Debug, Clone)]
pub struct DecodedEvent {
    pub block_number: i64,
    pub tx_hash: String,
    pub tag: EventTag,
    pub index: String,
    pub payload: EventPayload,
}

/// Decode a raw event into its typed form.
///
/// Unknown tags yield [`EventDbError::UnrecognisedTag`]; a payload that
/// does not match its tag's schema yields [`EventDbError::MalformedPayload`].
/// Both are contained: the event is dropped, never retried automatically.
pub fn decode(event: &Event) -> Result<DecodedEvent, EventDbError> {
    let tag = EventTag::parse(&event.tag)?;
    let payload = decode_payload(tag, &event.data).map_err(|e| {
        EventDbError::MalformedPayload {
            tag: event.tag.clone(),
            reason: e.to_string(),
        }
    })?;
    Ok(DecodedEvent {
        block_number: event.block_number,
        tx_hash: event.tx_hash.clone(),
        tag,
        index: event.index.clone(),
        payload,
    })
}

fn decode_payload(tag: EventTag, data: &Value) -> Result<EventPayload, serde_json::Error> {
    let d = data.clone();
    Ok(match tag {
        EventTag::AddOrOverwriteBlobber => EventPayload::Blobber(serde_json::from_value(d)?),
        EventTag::UpdateBlobber => EventPayload::BlobberUpdate(serde_json::from_value(d)?),
        EventTag::DeleteBlobber => EventPayload::BlobberDelete(serde_json::from_value(d)?),
        EventTag::AddOrOverwriteValidator => {
            EventPayload::Validator(serde_json::from_value(d)?)
        }
        EventTag::AddOrOverwriteMiner => EventPayload::Miner(serde_json::from_value(d)?),
        EventTag::AddOrOverwriteSharder => EventPayload::Sharder(serde_json::from_value(d)?),
        EventTag::AddOrOverwriteAuthorizer => {
            EventPayload::Authorizer(serde_json::from_value(d)?)
        }
        EventTag::AddTransaction => EventPayload::Transaction(serde_json::from_value(d)?),
        EventTag::AddBlock => EventPayload::Block(serde_json::from_value(d)?),
        EventTag::AddOrOverwriteWriteMarker => {
            EventPayload::WriteMarker(serde_json::from_value(d)?)
        }
        EventTag::AddCurator => EventPayload::CuratorAdd(serde_json::from_value(d)?),
        EventTag::RemoveCurator => EventPayload::CuratorRemove(serde_json::from_value(d)?),
        EventTag::AddDelegatePool => EventPayload::DelegatePool(serde_json::from_value(d)?),
        EventTag::UpdateDelegatePool => {
            EventPayload::DelegatePoolUpdate(serde_json::from_value(d)?)
        }
        EventTag::StakePoolReward => EventPayload::StakePoolReward(serde_json::from_value(d)?),
        EventTag::AddOrOverwriteAllocationBlobberTerm => {
            EventPayload::AllocationBlobberTerms(serde_json::from_value(d)?)
        }
        EventTag::UpdateAllocationBlobberTerm => {
            EventPayload::AllocationBlobberTermsUpdate(serde_json::from_value(d)?)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(tag: &str, index: &str, data: Value) -> Event {
        Event {
            block_number: 10,
            tx_hash: "0xabc".into(),
            event_type: EventType::Stats,
            tag: tag.into(),
            index: index.into(),
            data,
        }
    }

    #[test]
    fn tag_name_roundtrip() {
        for tag in [
            EventTag::AddOrOverwriteBlobber,
            EventTag::UpdateDelegatePool,
            EventTag::StakePoolReward,
            EventTag::AddOrOverwriteAllocationBlobberTerm,
        ] {
            assert_eq!(EventTag::parse(tag.as_str()).unwrap(), tag);
        }
    }

    #[test]
    fn unknown_tag_is_contained() {
        let err = decode(&raw("no_such_tag", "x", json!({}))).unwrap_err();
        assert!(matches!(err, EventDbError::UnrecognisedTag(_)));
        assert!(err.is_contained());
    }

    #[test]
    fn malformed_payload_is_contained() {
        // add_transaction requires a `hash` field
        let err = decode(&raw("add_transaction", "t", json!({"round": 3}))).unwrap_err();
        assert!(matches!(err, EventDbError::MalformedPayload { .. }));
        assert!(err.is_contained());
    }

    #[test]
    fn decode_routes_by_tag() {
        let ev = raw(
            "add_or_overwrite_blobber",
            "b1",
            json!({"id": "b1", "total_stake": 42}),
        );
        let decoded = decode(&ev).unwrap();
        match decoded.payload {
            EventPayload::Blobber(b) => assert_eq!(b.provider.total_stake, 42),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn dedupe_drops_stored_and_repeated_keys() {
        let a = raw("add_block", "", json!({"hash": "h1"}));
        let b = raw("add_transaction", "t1", json!({"hash": "t1"}));
        let stored: HashSet<EventKey> = [a.key()].into_iter().collect();

        let out = dedupe(&stored, vec![a.clone(), b.clone(), b.clone()]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].key(), b.key());
    }

    #[test]
    fn dedupe_empty_and_fully_duplicate() {
        let stored = HashSet::new();
        assert!(dedupe(&stored, vec![]).is_empty());

        let a = raw("add_block", "", json!({"hash": "h1"}));
        let stored: HashSet<EventKey> = [a.key()].into_iter().collect();
        assert!(dedupe(&stored, vec![a.clone(), a]).is_empty());
    }
}
