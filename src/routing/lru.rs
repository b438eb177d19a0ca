//! Least-recently-used router.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use super::table::JobStateTable;
use super::{ExecutorRouter, RouteStrategy};
use crate::core::types::{CandidateList, TriggerContext};

/// Picks the candidate that was used longest ago for the job.
///
/// The per-job state is the candidate keys in access order: unseen
/// candidates join at the back, vanished ones are dropped, and the front
/// entry is chosen and moved to the back.
pub struct LruRouter {
    table: JobStateTable<VecDeque<String>>,
}

impl LruRouter {
    /// Create a router with the given reset window and optional job capacity.
    pub fn new(reset_interval: Duration, capacity: Option<usize>) -> Self {
        Self {
            table: JobStateTable::new(reset_interval, capacity),
        }
    }

    /// Number of jobs with tracked access order.
    pub fn tracked_jobs(&self) -> usize {
        self.table.len()
    }
}

impl ExecutorRouter for LruRouter {
    fn strategy(&self) -> RouteStrategy {
        RouteStrategy::LeastRecentlyUsed
    }

    fn route(&self, ctx: &TriggerContext, candidates: &CandidateList) -> CandidateList {
        let keys: Vec<String> = candidates.iter().map(|c| c.key()).collect();

        let eldest = self.table.with_state(ctx.job_id, VecDeque::new, |order| {
            for key in &keys {
                if !order.contains(key) {
                    order.push_back(key.clone());
                }
            }
            let live: HashSet<&String> = keys.iter().collect();
            order.retain(|key| live.contains(key));

            let eldest = order.pop_front()?;
            order.push_back(eldest.clone());
            Some(eldest)
        });

        let chosen = eldest
            .and_then(|key| candidates.iter().find(|c| c.key() == key))
            .unwrap_or(candidates.first());
        CandidateList::single(chosen.clone())
    }
}
