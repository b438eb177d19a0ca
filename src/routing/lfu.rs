//! Least-frequently-used router.

use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use super::table::JobStateTable;
use super::{ExecutorRouter, RouteStrategy};
use crate::core::types::{CandidateList, TriggerContext};

/// Counters above this value are re-seeded.
const COUNT_RESEED_THRESHOLD: u32 = 1_000_000;

/// Picks the candidate with the lowest use count for the job.
///
/// New candidates start from a random count in `[0, n)` so that a fleet of
/// fresh jobs does not stampede the first candidate. Ties resolve to the
/// earliest candidate in input order.
pub struct LfuRouter {
    table: JobStateTable<HashMap<String, u32>>,
}

impl LfuRouter {
    /// Create a router with the given reset window and optional job capacity.
    pub fn new(reset_interval: Duration, capacity: Option<usize>) -> Self {
        Self {
            table: JobStateTable::new(reset_interval, capacity),
        }
    }

    /// Number of jobs with tracked counts.
    pub fn tracked_jobs(&self) -> usize {
        self.table.len()
    }
}

impl ExecutorRouter for LfuRouter {
    fn strategy(&self) -> RouteStrategy {
        RouteStrategy::LeastFrequentlyUsed
    }

    fn route(&self, ctx: &TriggerContext, candidates: &CandidateList) -> CandidateList {
        let keys: Vec<String> = candidates.iter().map(|c| c.key()).collect();
        let bound = u32::try_from(keys.len()).unwrap_or(u32::MAX);

        let index = self.table.with_state(ctx.job_id, HashMap::new, |counts| {
            let live: HashSet<&String> = keys.iter().collect();
            counts.retain(|key, _| live.contains(key));

            let mut rng = rand::rng();
            for key in &keys {
                let count = counts
                    .entry(key.clone())
                    .or_insert_with(|| rng.random_range(0..bound));
                if *count > COUNT_RESEED_THRESHOLD {
                    *count = rng.random_range(0..bound);
                }
            }

            let count_of = |key: &String| counts.get(key).copied().unwrap_or(0);
            let mut best = 0;
            for (i, key) in keys.iter().enumerate().skip(1) {
                if count_of(key) < count_of(&keys[best]) {
                    best = i;
                }
            }

            if let Some(count) = counts.get_mut(&keys[best]) {
                *count += 1;
            }
            best
        });

        let chosen = candidates.get(index).unwrap_or(candidates.first());
        CandidateList::single(chosen.clone())
    }
}
