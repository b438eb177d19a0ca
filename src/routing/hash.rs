//! Consistent-hash router.
//!
//! Each candidate contributes `VIRTUAL_NODE_COUNT` points to a 32-bit hash
//! ring. A job maps to the first point at or after its own hash, wrapping
//! around to the smallest point.

use md5::{Digest, Md5};
use std::collections::BTreeMap;

use super::{ExecutorRouter, RouteStrategy};
use crate::core::types::{CandidateList, ExecutorCandidate, TriggerContext};

/// Virtual nodes per candidate.
pub const VIRTUAL_NODE_COUNT: usize = 100;

/// MD5 of `key`, truncated to 32 bits (bytes 0..4, little-endian).
pub fn hash_key(key: &str) -> u32 {
    let digest = Md5::digest(key.as_bytes());
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Stable candidate per job id.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsistentHashRouter;

impl ConsistentHashRouter {
    fn build_ring(candidates: &CandidateList) -> BTreeMap<u32, &ExecutorCandidate> {
        let mut ring = BTreeMap::new();
        for candidate in candidates {
            let key = candidate.key();
            for i in 0..VIRTUAL_NODE_COUNT {
                ring.insert(hash_key(&format!("SHARD-{}-NODE-{}", key, i)), candidate);
            }
        }
        ring
    }
}

impl ExecutorRouter for ConsistentHashRouter {
    fn strategy(&self) -> RouteStrategy {
        RouteStrategy::ConsistentHash
    }

    fn route(&self, ctx: &TriggerContext, candidates: &CandidateList) -> CandidateList {
        let ring = Self::build_ring(candidates);
        let job_hash = hash_key(&ctx.job_id.to_string());

        let chosen = ring
            .range(job_hash..)
            .next()
            .or_else(|| ring.iter().next())
            .map(|(_, candidate)| *candidate)
            .unwrap_or(candidates.first());

        CandidateList::single(chosen.clone())
    }
}
