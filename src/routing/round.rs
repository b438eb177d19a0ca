//! Per-job round-robin router.

use rand::Rng;
use std::time::Duration;

use super::table::JobStateTable;
use super::{ExecutorRouter, RouteStrategy};
use crate::core::types::{CandidateList, TriggerContext};

const SEED_BOUND: u64 = 100;
const COUNTER_RESEED_THRESHOLD: u64 = 1_000_000;

/// Rotates through the candidates, one step per firing of the job.
///
/// Each job starts at a random offset so that jobs created together do not
/// all hit the same candidate first.
pub struct RoundRobinRouter {
    table: JobStateTable<u64>,
}

impl RoundRobinRouter {
    /// Create a router with the given reset window and optional job capacity.
    pub fn new(reset_interval: Duration, capacity: Option<usize>) -> Self {
        Self {
            table: JobStateTable::new(reset_interval, capacity),
        }
    }
}

impl ExecutorRouter for RoundRobinRouter {
    fn strategy(&self) -> RouteStrategy {
        RouteStrategy::Round
    }

    fn route(&self, ctx: &TriggerContext, candidates: &CandidateList) -> CandidateList {
        let n = candidates.len() as u64;
        let index = self.table.with_state(
            ctx.job_id,
            || rand::rng().random_range(0..SEED_BOUND),
            |counter| {
                let index = *counter % n;
                *counter = if *counter > COUNTER_RESEED_THRESHOLD {
                    rand::rng().random_range(0..SEED_BOUND)
                } else {
                    *counter + 1
                };
                index
            },
        );

        let chosen = usize::try_from(index)
            .ok()
            .and_then(|i| candidates.get(i))
            .unwrap_or(candidates.first());
        CandidateList::single(chosen.clone())
    }
}
