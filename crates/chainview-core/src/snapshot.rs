//! Snapshot differ and global totals.
//!
//! Once per round, a bounded slice of providers is recomputed: each
//! provider's current row is compared against its previous-round snapshot,
//! producing an append-only aggregate row (mid-point smoothed) and a signed
//! delta folded into the global snapshot singleton.

use serde::{Deserialize, Serialize};

use crate::provider::{ProviderKind, ProviderStatus};

// ─── Economic fields ──────────────────────────────────────────────────────────

/// The per-provider economic fields the differ compares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Economics {
    pub fee: i64,
    pub total_stake: i64,
    pub total_rewards: i64,
    pub total_mint: i64,
    pub total_burn: i64,
    pub service_charge: f64,
}

impl Economics {
    /// Mid-point of two observations. Intentional smoothing: consecutive
    /// rounds without an aggregation event would otherwise chart as a step
    /// function.
    pub fn midpoint(old: &Economics, current: &Economics) -> Economics {
        Economics {
            fee: (old.fee + current.fee) / 2,
            total_stake: (old.total_stake + current.total_stake) / 2,
            total_rewards: (old.total_rewards + current.total_rewards) / 2,
            total_mint: (old.total_mint + current.total_mint) / 2,
            total_burn: (old.total_burn + current.total_burn) / 2,
            service_charge: (old.service_charge + current.service_charge) / 2.0,
        }
    }
}

// ─── Rows ─────────────────────────────────────────────────────────────────────

/// A provider's current state as read from its entity table.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderState {
    pub id: String,
    pub kind: ProviderKind,
    pub bucket_id: i64,
    pub status: ProviderStatus,
    pub econ: Economics,
}

/// The provider's state as of its most recently processed round — the
/// "old" side of the next diff. Exactly one row per provider at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSnapshot {
    pub provider_id: String,
    pub kind: ProviderKind,
    pub round: i64,
    pub bucket_id: i64,
    pub status: ProviderStatus,
    pub econ: Economics,
}

impl ProviderSnapshot {
    /// The replacement snapshot written after a provider is diffed.
    pub fn of(round: i64, current: &ProviderState) -> Self {
        Self {
            provider_id: current.id.clone(),
            kind: current.kind,
            round,
            bucket_id: current.bucket_id,
            status: current.status,
            econ: current.econ,
        }
    }
}

/// One aggregate row per `(provider, round)` — an append-only time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderAggregate {
    pub provider_id: String,
    pub kind: ProviderKind,
    pub round: i64,
    pub bucket_id: i64,
    pub econ: Economics,
}

// ─── Global snapshot ──────────────────────────────────────────────────────────

/// Singleton row of system-wide totals, mutated only by accumulated deltas.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalSnapshot {
    pub round: i64,
    pub total_staked: i64,
    pub total_rewards: i64,
    pub total_mint: i64,
    pub total_burn: i64,
    pub blobber_count: i64,
    pub validator_count: i64,
    pub miner_count: i64,
    pub sharder_count: i64,
    pub authorizer_count: i64,
}

impl GlobalSnapshot {
    pub fn apply(&mut self, delta: &GlobalDelta) {
        self.total_staked += delta.total_staked;
        self.total_rewards += delta.total_rewards;
        self.total_mint += delta.total_mint;
        self.total_burn += delta.total_burn;
        self.blobber_count += delta.count(ProviderKind::Blobber);
        self.validator_count += delta.count(ProviderKind::Validator);
        self.miner_count += delta.count(ProviderKind::Miner);
        self.sharder_count += delta.count(ProviderKind::Sharder);
        self.authorizer_count += delta.count(ProviderKind::Authorizer);
    }

    pub fn provider_count(&self, kind: ProviderKind) -> i64 {
        match kind {
            ProviderKind::Blobber => self.blobber_count,
            ProviderKind::Validator => self.validator_count,
            ProviderKind::Miner => self.miner_count,
            ProviderKind::Sharder => self.sharder_count,
            ProviderKind::Authorizer => self.authorizer_count,
        }
    }
}

/// Signed change to the global snapshot. Per-provider deltas within a page
/// are folded into one of these and applied to the singleton once per page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalDelta {
    pub total_staked: i64,
    pub total_rewards: i64,
    pub total_mint: i64,
    pub total_burn: i64,
    counts: [i64; 5],
}

impl GlobalDelta {
    pub fn count(&self, kind: ProviderKind) -> i64 {
        self.counts[kind as usize]
    }

    pub fn count_mut(&mut self, kind: ProviderKind) -> &mut i64 {
        &mut self.counts[kind as usize]
    }

    pub fn merge(&mut self, other: &GlobalDelta) {
        self.total_staked += other.total_staked;
        self.total_rewards += other.total_rewards;
        self.total_mint += other.total_mint;
        self.total_burn += other.total_burn;
        for (mine, theirs) in self.counts.iter_mut().zip(other.counts) {
            *mine += theirs;
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == GlobalDelta::default()
    }
}

// ─── Differ ───────────────────────────────────────────────────────────────────

/// Result of diffing one provider against its previous snapshot.
#[derive(Debug, Clone)]
pub struct ProviderDiff {
    /// `None` when the provider went offline this cycle — an offline entity
    /// does not produce a misleading synthetic mid-point.
    pub aggregate: Option<ProviderAggregate>,
    pub delta: GlobalDelta,
}

/// Compare a provider's current state against its previous-round snapshot.
///
/// A provider never seen before counts into the delta and diffs against a
/// zero-valued baseline. A provider that turned offline since its snapshot
/// yields a decrement-only delta (its last-known stake and rewards leave
/// the global totals) and no aggregate row. Otherwise the aggregate is the
/// field-wise mid-point and the delta is `current - old` per summed metric.
pub fn diff_provider(
    round: i64,
    current: &ProviderState,
    old: Option<&ProviderSnapshot>,
) -> ProviderDiff {
    let mut delta = GlobalDelta::default();

    let baseline: Economics;
    let old_offline: bool;
    match old {
        Some(snap) => {
            baseline = snap.econ;
            old_offline = snap.status.is_offline();
        }
        None => {
            *delta.count_mut(current.kind) += 1;
            baseline = Economics::default();
            old_offline = false;
        }
    }

    if current.status.is_offline() && !old_offline {
        *delta.count_mut(current.kind) -= 1;
        delta.total_rewards -= baseline.total_rewards;
        delta.total_staked -= baseline.total_stake;
        return ProviderDiff {
            aggregate: None,
            delta,
        };
    }

    delta.total_staked += current.econ.total_stake - baseline.total_stake;
    delta.total_rewards += current.econ.total_rewards - baseline.total_rewards;
    delta.total_mint += current.econ.total_mint - baseline.total_mint;
    delta.total_burn += current.econ.total_burn - baseline.total_burn;

    let aggregate = ProviderAggregate {
        provider_id: current.id.clone(),
        kind: current.kind,
        round,
        bucket_id: current.bucket_id,
        econ: Economics::midpoint(&baseline, &current.econ),
    };

    ProviderDiff {
        aggregate: Some(aggregate),
        delta,
    }
}
