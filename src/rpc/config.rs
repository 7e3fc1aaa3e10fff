//! Engine configuration.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Identifier bit width used when none is configured.
pub const DEFAULT_BITS: u8 = 24;
/// Average interval between two stabilization rounds, in milliseconds.
/// Actual firings are jittered over `[0.5, 1.5]` of the period to avoid
/// synchronized storms.
pub const DEFAULT_STABILIZE_PERIOD: u64 = 30_000;
/// Finger refresh runs at a coarser period than stabilization since each
/// firing costs a full lookup.
pub const DEFAULT_FIX_FINGERS_PERIOD: u64 = 45_000;
/// Default per-request timeout before a retry, in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT: u64 = 500;

/// Distribution the per-message delivery delay is drawn from, in
/// milliseconds. Samples never round below 1ms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LatencyModel {
    Constant(u64),
    Uniform { min: u64, max: u64 },
    Exponential { mean: u64 },
}

impl LatencyModel {
    pub fn sample<R: Rng>(&self, rng: &mut R) -> u64 {
        let ms = match self {
            LatencyModel::Constant(ms) => *ms,
            LatencyModel::Uniform { min, max } => {
                if max <= min {
                    *min
                } else {
                    rng.gen_range(*min..=*max)
                }
            }
            LatencyModel::Exponential { mean } => {
                let mut u: f64 = rng.gen();
                while u == 0.0 {
                    u = rng.gen();
                }
                (-(*mean as f64) * u.ln()).round() as u64
            }
        };

        ms.max(1)
    }
}

/// How the retry deadline grows across attempts at the same peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backoff {
    /// Every attempt waits the base timeout.
    Fixed,
    /// Attempt `k` waits `base << k`.
    Exponential,
}

impl Backoff {
    pub fn delay(&self, base: u64, attempt: u8) -> u64 {
        match self {
            Backoff::Fixed => base,
            Backoff::Exponential => base.saturating_mul(1u64 << u32::from(attempt).min(16)),
        }
    }
}

/// How a lookup crosses the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutingMode {
    /// The origin drives the walk, asking each hop for a closer node and
    /// detecting hop failures itself.
    Iterative,
    /// Hops forward the request among themselves; the terminal node replies
    /// straight to the origin through the continuation chain.
    Recursive,
}

/// Which neighbor-selection strategy the lookup engine consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NeighborSelection {
    /// Full finger-table scan, coarsest level first.
    FingerTable,
    /// Successor pointer only; correct but linear in ring size.
    SuccessorOnly,
}

/// Everything tunable about the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Identifier bit width `m`; the ring has `2^m` points.
    ///
    /// Defaults to [DEFAULT_BITS].
    pub bits: u8,
    /// Average stabilization interval in milliseconds; each firing is
    /// jittered over `[0.5, 1.5]` of this.
    ///
    /// Defaults to [DEFAULT_STABILIZE_PERIOD].
    pub stabilize_period: u64,
    /// Average finger-refresh interval in milliseconds, jittered the same
    /// way; one finger is re-resolved per firing.
    ///
    /// Defaults to [DEFAULT_FIX_FINGERS_PERIOD].
    pub fix_fingers_period: u64,
    /// How many finger levels one stabilization round verifies, starting at
    /// the successor level.
    pub stabilize_window: u8,
    /// Per-request deadline in milliseconds before a retry (or, after the
    /// last retry, failure cleanup).
    ///
    /// Defaults to [DEFAULT_REQUEST_TIMEOUT].
    pub request_timeout: u64,
    /// Retries before a silent peer is declared failed.
    pub request_retries: u8,
    /// Deadline growth across retries.
    pub retry_backoff: Backoff,
    /// Message delivery delay distribution.
    pub latency: LatencyModel,
    /// Lookup traversal mode.
    pub routing: RoutingMode,
    /// Neighbor-selection strategy.
    pub strategy: NeighborSelection,
    /// Upper bound on lookup hops before the walk is declared stuck.
    pub hop_limit: u16,
    /// Grace period in milliseconds between announcing a leave and
    /// completing it, leaving room for in-flight requests to drain.
    pub leave_grace: u64,
    /// Seed for the engine RNG; fixing it makes whole runs reproducible.
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bits: DEFAULT_BITS,
            stabilize_period: DEFAULT_STABILIZE_PERIOD,
            fix_fingers_period: DEFAULT_FIX_FINGERS_PERIOD,
            stabilize_window: 4,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            request_retries: 3,
            retry_backoff: Backoff::Exponential,
            latency: LatencyModel::Exponential { mean: 50 },
            routing: RoutingMode::Iterative,
            strategy: NeighborSelection::FingerTable,
            hop_limit: 64,
            leave_grace: DEFAULT_REQUEST_TIMEOUT,
            seed: None,
        }
    }
}
