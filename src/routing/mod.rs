//! Executor routing.
//!
//! A router picks which candidate(s) execute one firing of a job. Stateless
//! routers (`ALL`, `FIRST`, `LAST`, `RANDOM`, `CONSISTENT_HASH`) are pure
//! functions of their inputs; stateful routers (`LFU`, `LRU`, `ROUND`) keep
//! per-job bookkeeping in a [`JobStateTable`] that is wiped once per reset
//! window.

mod basic;
mod hash;
mod lfu;
mod lru;
mod round;
mod table;

pub use basic::{BroadcastRouter, FirstRouter, LastRouter, RandomRouter};
pub use hash::{ConsistentHashRouter, VIRTUAL_NODE_COUNT, hash_key};
pub use lfu::LfuRouter;
pub use lru::LruRouter;
pub use round::RoundRobinRouter;
pub use table::{DEFAULT_RESET_INTERVAL, JobStateTable};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::core::types::{CandidateList, TriggerContext};

/// Strategy key selecting a router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RouteStrategy {
    /// Every candidate executes (broadcast).
    #[serde(rename = "ALL")]
    All,
    /// First candidate.
    #[serde(rename = "FIRST")]
    #[default]
    First,
    /// Last candidate.
    #[serde(rename = "LAST")]
    Last,
    /// Per-job round robin.
    #[serde(rename = "ROUND")]
    Round,
    /// Uniformly random candidate.
    #[serde(rename = "RANDOM")]
    Random,
    /// Stable candidate per job on a hash ring.
    #[serde(rename = "CONSISTENT_HASH")]
    ConsistentHash,
    /// Least frequently used candidate per job.
    #[serde(rename = "LFU")]
    LeastFrequentlyUsed,
    /// Least recently used candidate per job.
    #[serde(rename = "LRU")]
    LeastRecentlyUsed,
}

impl RouteStrategy {
    /// All strategies, in declaration order.
    pub const ALL: [RouteStrategy; 8] = [
        RouteStrategy::All,
        RouteStrategy::First,
        RouteStrategy::Last,
        RouteStrategy::Round,
        RouteStrategy::Random,
        RouteStrategy::ConsistentHash,
        RouteStrategy::LeastFrequentlyUsed,
        RouteStrategy::LeastRecentlyUsed,
    ];

    /// Upper-case key of this strategy.
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteStrategy::All => "ALL",
            RouteStrategy::First => "FIRST",
            RouteStrategy::Last => "LAST",
            RouteStrategy::Round => "ROUND",
            RouteStrategy::Random => "RANDOM",
            RouteStrategy::ConsistentHash => "CONSISTENT_HASH",
            RouteStrategy::LeastFrequentlyUsed => "LFU",
            RouteStrategy::LeastRecentlyUsed => "LRU",
        }
    }

    /// Whether the router keeps per-job state.
    pub fn is_stateful(&self) -> bool {
        matches!(
            self,
            RouteStrategy::Round
                | RouteStrategy::LeastFrequentlyUsed
                | RouteStrategy::LeastRecentlyUsed
        )
    }
}

impl fmt::Display for RouteStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RouteStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_uppercase();
        RouteStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == key)
            .ok_or_else(|| format!("unknown route strategy: {}", s))
    }
}

/// Picks the candidate(s) that execute one firing.
///
/// Implementations must treat `candidates` as read-only and must not leak
/// state between different job ids.
pub trait ExecutorRouter: Send + Sync {
    /// The strategy this router implements.
    fn strategy(&self) -> RouteStrategy;

    /// Select candidate(s) for the firing described by `ctx`.
    fn route(&self, ctx: &TriggerContext, candidates: &CandidateList) -> CandidateList;
}

/// Options shared by the stateful routers.
#[derive(Debug, Clone)]
pub struct RoutingOptions {
    /// Strategy used when a job does not name one.
    pub default_strategy: RouteStrategy,
    /// Fixed window after which all per-job state is discarded.
    pub state_reset_interval: Duration,
    /// Upper bound on jobs tracked per stateful router (`None` = unbounded).
    pub max_tracked_jobs: Option<usize>,
}

impl Default for RoutingOptions {
    fn default() -> Self {
        Self {
            default_strategy: RouteStrategy::default(),
            state_reset_interval: DEFAULT_RESET_INTERVAL,
            max_tracked_jobs: None,
        }
    }
}

/// One router per strategy, sharing state across calls.
pub struct RouterSet {
    default_strategy: RouteStrategy,
    broadcast: BroadcastRouter,
    first: FirstRouter,
    last: LastRouter,
    random: RandomRouter,
    consistent_hash: ConsistentHashRouter,
    round: RoundRobinRouter,
    lfu: LfuRouter,
    lru: LruRouter,
}

impl RouterSet {
    /// Create the router set.
    pub fn new(options: RoutingOptions) -> Self {
        let interval = options.state_reset_interval;
        let capacity = options.max_tracked_jobs;
        Self {
            default_strategy: options.default_strategy,
            broadcast: BroadcastRouter,
            first: FirstRouter,
            last: LastRouter,
            random: RandomRouter,
            consistent_hash: ConsistentHashRouter,
            round: RoundRobinRouter::new(interval, capacity),
            lfu: LfuRouter::new(interval, capacity),
            lru: LruRouter::new(interval, capacity),
        }
    }

    /// Strategy used when a job does not name one.
    pub fn default_strategy(&self) -> RouteStrategy {
        self.default_strategy
    }

    /// The router for `strategy`.
    pub fn router(&self, strategy: RouteStrategy) -> &dyn ExecutorRouter {
        match strategy {
            RouteStrategy::All => &self.broadcast,
            RouteStrategy::First => &self.first,
            RouteStrategy::Last => &self.last,
            RouteStrategy::Round => &self.round,
            RouteStrategy::Random => &self.random,
            RouteStrategy::ConsistentHash => &self.consistent_hash,
            RouteStrategy::LeastFrequentlyUsed => &self.lfu,
            RouteStrategy::LeastRecentlyUsed => &self.lru,
        }
    }

    /// Route with `strategy`, falling back to the default strategy.
    pub fn select(
        &self,
        strategy: Option<RouteStrategy>,
        ctx: &TriggerContext,
        candidates: &CandidateList,
    ) -> CandidateList {
        let strategy = strategy.unwrap_or(self.default_strategy);
        let chosen = self.router(strategy).route(ctx, candidates);
        tracing::debug!(
            job_id = %ctx.job_id,
            strategy = %strategy,
            candidates = candidates.len(),
            chosen = chosen.len(),
            "Routed trigger"
        );
        chosen
    }
}

impl Default for RouterSet {
    fn default() -> Self {
        Self::new(RoutingOptions::default())
    }
}
