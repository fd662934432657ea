//! Intra-batch merger.
//!
//! A single block can emit many partial updates to the same logical record
//! (repeated stake-pool top-ups, overwrites of the same provider). Folding
//! events that share `(tag, index)` before persistence bounds write
//! amplification to one row per natural key per block.

use std::collections::HashMap;

use crate::event::{DecodedEvent, EventPayload, EventTag};

/// How events sharing a `(tag, index)` key combine within one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Only the last event for a key survives.
    Overwrite,
    /// Numeric payload fields are summed across events for a key.
    Accumulate,
}

impl EventTag {
    pub fn merge_policy(&self) -> MergePolicy {
        match self {
            Self::StakePoolReward => MergePolicy::Accumulate,
            _ => MergePolicy::Overwrite,
        }
    }
}

/// Fold a decoded batch by `(tag, index)`.
///
/// First-occurrence order is preserved so the merged batch is deterministic
/// for a given input sequence.
pub fn merge(events: Vec<DecodedEvent>) -> Vec<DecodedEvent> {
    let mut order: Vec<(EventTag, String)> = Vec::new();
    let mut folded: HashMap<(EventTag, String), DecodedEvent> = HashMap::new();

    for event in events {
        let key = (event.tag, event.index.clone());
        match folded.entry(key.clone()) {
            std::collections::hash_map::Entry::Vacant(slot) => {
                order.push(key);
                slot.insert(event);
            }
            std::collections::hash_map::Entry::Occupied(mut slot) => {
                match event.tag.merge_policy() {
                    MergePolicy::Overwrite => {
                        slot.insert(event);
                    }
                    MergePolicy::Accumulate => accumulate(slot.get_mut(), &event),
                }
            }
        }
    }

    order
        .into_iter()
        .map(|key| folded.remove(&key).expect("key recorded on first insert"))
        .collect()
}

fn accumulate(into: &mut DecodedEvent, event: &DecodedEvent) {
    match (&mut into.payload, &event.payload) {
        (EventPayload::StakePoolReward(acc), EventPayload::StakePoolReward(next)) => {
            acc.accumulate(next);
        }
        // No other payload accumulates; keep the later event.
        _ => into.payload = event.payload.clone(),
    }
}
