//! Typed payload schemas — one per event tag.
//!
//! Wire payloads are JSON; each struct here is the schema a tag's `data`
//! field must decode against. Decoding happens exactly once, at the ingest
//! boundary (see [`crate::event::decode`]).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::provider::{ProviderKind, ProviderStatus};

// ─── Providers ────────────────────────────────────────────────────────────────

/// Economic fields every provider kind carries. These are the fields the
/// snapshot differ compares round over round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderBase {
    pub id: String,
    #[serde(default)]
    pub status: ProviderStatus,
    #[serde(default)]
    pub fee: i64,
    #[serde(default)]
    pub total_stake: i64,
    #[serde(default)]
    pub total_rewards: i64,
    #[serde(default)]
    pub total_mint: i64,
    #[serde(default)]
    pub total_burn: i64,
    #[serde(default)]
    pub service_charge: f64,
}

/// Storage provider. Carries capacity/pricing fields on top of the base.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Blobber {
    #[serde(flatten)]
    pub provider: ProviderBase,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub capacity: i64,
    #[serde(default)]
    pub allocated: i64,
    #[serde(default)]
    pub read_price: i64,
    #[serde(default)]
    pub write_price: i64,
    #[serde(default)]
    pub saved_data: i64,
}

/// Validator, miner, sharder, and authorizer payloads share one shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderNode {
    #[serde(flatten)]
    pub provider: ProviderBase,
    #[serde(default)]
    pub base_url: String,
}

/// Field-level update to a provider row, keyed by provider ID.
/// `updates` maps column name to new value; unknown columns are rejected
/// by the applier as malformed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderUpdate {
    pub id: String,
    pub updates: serde_json::Map<String, Value>,
}

// ─── Chain entities ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: String,
    #[serde(default)]
    pub block_hash: String,
    #[serde(default)]
    pub round: i64,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub to_client_id: String,
    #[serde(default)]
    pub value: i64,
    #[serde(default)]
    pub fee: i64,
}

/// Block-level event payload. Has no per-tx key; keys on block identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub hash: String,
    #[serde(default)]
    pub round: i64,
    #[serde(default)]
    pub prev_hash: String,
    #[serde(default)]
    pub miner_id: String,
    #[serde(default)]
    pub num_txns: i64,
    #[serde(default)]
    pub timestamp: i64,
}

/// `transaction_id` and `block_number` are stamped from the enclosing
/// event by the applier, not carried on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteMarker {
    pub allocation_id: String,
    pub blobber_id: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub transaction_id: String,
    #[serde(default)]
    pub block_number: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Curator {
    pub curator_id: String,
    pub allocation_id: String,
}

// ─── Delegate pools ───────────────────────────────────────────────────────────

/// Status of a delegate pool. Pools transition to `Deleted` rather than
/// being removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    #[default]
    Active,
    Pending,
    Deleted,
}

impl PoolStatus {
    pub fn to_i64(self) -> i64 {
        match self {
            Self::Active => 0,
            Self::Pending => 1,
            Self::Deleted => 2,
        }
    }

    pub fn from_i64(v: i64) -> Self {
        match v {
            1 => Self::Pending,
            2 => Self::Deleted,
            _ => Self::Active,
        }
    }
}

/// Sub-entity owned by a provider, uniquely identified by
/// `(provider_type, provider_id, pool_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegatePool {
    pub pool_id: String,
    pub provider_type: ProviderKind,
    pub provider_id: String,
    #[serde(default)]
    pub delegate_id: String,
    #[serde(default)]
    pub balance: i64,
    /// Unclaimed reward.
    #[serde(default)]
    pub reward: i64,
    /// Total reward ever paid to the pool.
    #[serde(default)]
    pub total_reward: i64,
    #[serde(default)]
    pub total_penalty: i64,
    #[serde(default)]
    pub status: PoolStatus,
    #[serde(default)]
    pub round_created: i64,
}

/// Field-level update to a delegate pool, keyed by its composite identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegatePoolUpdate {
    pub pool_id: String,
    pub provider_type: ProviderKind,
    pub provider_id: String,
    pub updates: serde_json::Map<String, Value>,
}

/// Reward distribution for one provider and its delegate pools.
///
/// Uses `BTreeMap` so merged/accumulated payloads iterate in a stable
/// order regardless of arrival order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StakePoolReward {
    pub provider_id: String,
    pub provider_type: ProviderKind,
    #[serde(default)]
    pub reward: i64,
    #[serde(default)]
    pub delegate_rewards: BTreeMap<String, i64>,
    #[serde(default)]
    pub delegate_penalties: BTreeMap<String, i64>,
}

impl StakePoolReward {
    /// Fold another reward event for the same provider into this one.
    pub fn accumulate(&mut self, other: &StakePoolReward) {
        self.reward += other.reward;
        for (pool, amount) in &other.delegate_rewards {
            *self.delegate_rewards.entry(pool.clone()).or_insert(0) += amount;
        }
        for (pool, amount) in &other.delegate_penalties {
            *self.delegate_penalties.entry(pool.clone()).or_insert(0) += amount;
        }
    }
}

// ─── Allocation blobber terms ─────────────────────────────────────────────────

/// Pricing terms between an allocation and one of its blobbers.
/// Natural key: `(allocation_id, blobber_id)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllocationBlobberTerm {
    pub allocation_id: String,
    pub blobber_id: String,
    #[serde(default)]
    pub read_price: i64,
    #[serde(default)]
    pub write_price: i64,
    #[serde(default)]
    pub min_lock_demand: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blobber_decodes_with_defaults() {
        let b: Blobber = serde_json::from_value(serde_json::json!({
            "id": "b1",
            "total_stake": 500,
            "capacity": 1024
        }))
        .unwrap();
        assert_eq!(b.provider.id, "b1");
        assert_eq!(b.provider.total_stake, 500);
        assert_eq!(b.provider.status, ProviderStatus::Active);
        assert_eq!(b.capacity, 1024);
        assert_eq!(b.read_price, 0);
    }

    #[test]
    fn stake_pool_reward_accumulates() {
        let mut a = StakePoolReward {
            provider_id: "m1".into(),
            provider_type: ProviderKind::Miner,
            reward: 10,
            delegate_rewards: BTreeMap::from([("p1".into(), 5)]),
            ..Default::default()
        };
        let b = StakePoolReward {
            provider_id: "m1".into(),
            provider_type: ProviderKind::Miner,
            reward: 7,
            delegate_rewards: BTreeMap::from([("p1".into(), 3), ("p2".into(), 2)]),
            delegate_penalties: BTreeMap::from([("p1".into(), 1)]),
        };
        a.accumulate(&b);
        assert_eq!(a.reward, 17);
        assert_eq!(a.delegate_rewards["p1"], 8);
        assert_eq!(a.delegate_rewards["p2"], 2);
        assert_eq!(a.delegate_penalties["p1"], 1);
    }
}
