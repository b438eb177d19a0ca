//! Stateless routers: broadcast, first, last and random.

use rand::Rng;

use super::{ExecutorRouter, RouteStrategy};
use crate::core::types::{CandidateList, TriggerContext};

/// Every candidate executes, in input order.
#[derive(Debug, Default, Clone, Copy)]
pub struct BroadcastRouter;

impl ExecutorRouter for BroadcastRouter {
    fn strategy(&self) -> RouteStrategy {
        RouteStrategy::All
    }

    fn route(&self, _ctx: &TriggerContext, candidates: &CandidateList) -> CandidateList {
        candidates.clone()
    }
}

/// Always the first candidate.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstRouter;

impl ExecutorRouter for FirstRouter {
    fn strategy(&self) -> RouteStrategy {
        RouteStrategy::First
    }

    fn route(&self, _ctx: &TriggerContext, candidates: &CandidateList) -> CandidateList {
        CandidateList::single(candidates.first().clone())
    }
}

/// Always the last candidate.
#[derive(Debug, Default, Clone, Copy)]
pub struct LastRouter;

impl ExecutorRouter for LastRouter {
    fn strategy(&self) -> RouteStrategy {
        RouteStrategy::Last
    }

    fn route(&self, _ctx: &TriggerContext, candidates: &CandidateList) -> CandidateList {
        CandidateList::single(candidates.last().clone())
    }
}

/// One candidate drawn uniformly from the thread-local CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomRouter;

impl ExecutorRouter for RandomRouter {
    fn strategy(&self) -> RouteStrategy {
        RouteStrategy::Random
    }

    fn route(&self, _ctx: &TriggerContext, candidates: &CandidateList) -> CandidateList {
        let index = rand::rng().random_range(0..candidates.len());
        let chosen = candidates.get(index).unwrap_or(candidates.first());
        CandidateList::single(chosen.clone())
    }
}
