//! Provider model — the staked network participants the aggregation engine
//! tracks: blobbers, validators, miners, sharders, and authorizers.

use serde::{Deserialize, Serialize};

// ─── ProviderKind ─────────────────────────────────────────────────────────────

/// The provider roles known to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Blobber,
    Validator,
    Miner,
    Sharder,
    Authorizer,
}

impl ProviderKind {
    /// Every kind, in the fixed order aggregation cycles visit them.
    pub const ALL: [ProviderKind; 5] = [
        Self::Blobber,
        Self::Validator,
        Self::Miner,
        Self::Sharder,
        Self::Authorizer,
    ];

    pub fn to_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        Self::ALL.get(usize::try_from(v).ok()?).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blobber => "blobber",
            Self::Validator => "validator",
            Self::Miner => "miner",
            Self::Sharder => "sharder",
            Self::Authorizer => "authorizer",
        }
    }
}

impl Default for ProviderKind {
    fn default() -> Self {
        Self::Blobber
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ─── ProviderStatus ───────────────────────────────────────────────────────────

/// Lifecycle status of a provider row. Providers are never physically
/// deleted on the processing path; deletion is a status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    #[default]
    Active,
    Pending,
    /// Offline, killed, or shut down.
    Inactive,
    Deleted,
}

impl ProviderStatus {
    /// Providers in these states no longer contribute to global totals.
    pub fn is_offline(&self) -> bool {
        matches!(self, Self::Inactive | Self::Deleted)
    }

    pub fn to_i64(self) -> i64 {
        match self {
            Self::Active => 0,
            Self::Pending => 1,
            Self::Inactive => 2,
            Self::Deleted => 3,
        }
    }

    pub fn from_i64(v: i64) -> Self {
        match v {
            1 => Self::Pending,
            2 => Self::Inactive,
            3 => Self::Deleted,
            _ => Self::Active,
        }
    }
}

// ─── Bucket assignment ────────────────────────────────────────────────────────

/// Assign a provider to its aggregation bucket.
///
/// Derived only from the provider ID so the assignment is stable across
/// rounds; only providers whose bucket equals `round % aggregate_period`
/// are recomputed in a given round.
pub fn bucket_id(provider_id: &str, aggregate_period: i64) -> i64 {
    debug_assert!(aggregate_period > 0);
    (fnv1a64(provider_id.as_bytes()) % aggregate_period.max(1) as u64) as i64
}

/// 64-bit FNV-1a. Deterministic across platforms and process restarts,
/// which is all the bucket assignment needs.
fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_is_stable_and_bounded() {
        let period = 10;
        let a = bucket_id("provider-a", period);
        assert_eq!(a, bucket_id("provider-a", period));
        assert!((0..period).contains(&a));

        // Different ids spread across buckets (not all identical).
        let buckets: std::collections::HashSet<i64> = (0..100)
            .map(|i| bucket_id(&format!("provider-{i}"), period))
            .collect();
        assert!(buckets.len() > 1);
    }

    #[test]
    fn status_roundtrip() {
        for s in [
            ProviderStatus::Active,
            ProviderStatus::Pending,
            ProviderStatus::Inactive,
            ProviderStatus::Deleted,
        ] {
            assert_eq!(ProviderStatus::from_i64(s.to_i64()), s);
        }
        assert!(ProviderStatus::Inactive.is_offline());
        assert!(ProviderStatus::Deleted.is_offline());
        assert!(!ProviderStatus::Active.is_offline());
        assert!(!ProviderStatus::Pending.is_offline());
    }
}
