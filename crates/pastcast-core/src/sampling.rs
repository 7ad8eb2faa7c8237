//! Quota-balanced, seed-reproducible sampling across sources.
//!
//! Every source gets its own ChaCha8 stream derived from the run seed and the
//! source name, so adding or removing one source never changes what another
//! source contributes. Samples are prefixes of a single per-source
//! permutation, which makes a larger quota a superset of a smaller one.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};

use crate::model::{HorizonGroup, Problem};

/// Seed for one source's stream: the first 8 bytes of
/// SHA-256(seed as little-endian bytes ‖ source name).
pub fn source_seed(seed: u64, source: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_le_bytes());
    hasher.update(source.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Shuffle `pool` with the stream belonging to `source`. The pool is sorted
/// by problem id first so the result depends only on its contents.
pub fn permute(mut pool: Vec<Problem>, seed: u64, source: &str) -> Vec<Problem> {
    pool.sort_by(|a, b| a.problem_id.cmp(&b.problem_id));
    let mut rng = ChaCha8Rng::seed_from_u64(source_seed(seed, source));
    pool.shuffle(&mut rng);
    pool
}

/// Reorder a permuted pool so that horizon groups alternate.
///
/// Relative order within a group is kept; groups are visited round-robin in
/// horizon order, so any prefix is as horizon-balanced as the pool allows.
pub fn interleave_by_horizon(pool: Vec<Problem>) -> Vec<Problem> {
    let total = pool.len();
    let mut groups: BTreeMap<HorizonGroup, std::collections::VecDeque<Problem>> = BTreeMap::new();
    for problem in pool {
        groups
            .entry(problem.metadata.horizon)
            .or_default()
            .push_back(problem);
    }

    let mut out = Vec::with_capacity(total);
    while out.len() < total {
        for queue in groups.values_mut() {
            if let Some(problem) = queue.pop_front() {
                out.push(problem);
            }
        }
    }
    out
}

/// Split `max_quest` across sources given each source's inventory.
///
/// Sources start with an equal share (remainder to the first names). A
/// source that cannot fill its share gives the shortfall back, and the
/// shortfall is spread over sources with spare inventory proportionally to
/// that spare. The total allocated is `min(max_quest, total inventory)` and
/// no source is ever allocated more than it holds.
pub fn allocate_quotas(
    inventory: &BTreeMap<String, usize>,
    max_quest: usize,
) -> BTreeMap<String, usize> {
    let n = inventory.len();
    if n == 0 {
        return BTreeMap::new();
    }

    let base = max_quest / n;
    let remainder = max_quest % n;

    let mut allocation: BTreeMap<String, usize> = BTreeMap::new();
    let mut shortfall = 0usize;
    for (i, (source, &available)) in inventory.iter().enumerate() {
        let quota = base + usize::from(i < remainder);
        let take = quota.min(available);
        if take < quota {
            tracing::debug!(%source, quota, available, "source short of quota");
        }
        shortfall += quota - take;
        allocation.insert(source.clone(), take);
    }

    while shortfall > 0 {
        let spare: Vec<(&String, usize)> = inventory
            .iter()
            .map(|(source, &available)| (source, available - allocation[source]))
            .filter(|(_, spare)| *spare > 0)
            .collect();
        let total_spare: usize = spare.iter().map(|(_, s)| s).sum();
        if total_spare == 0 {
            break;
        }

        let mut extra: Vec<usize> = spare
            .iter()
            .map(|(_, s)| {
                let share = (shortfall as u128 * *s as u128 / total_spare as u128) as usize;
                share.min(*s)
            })
            .collect();
        let mut remaining = shortfall - extra.iter().sum::<usize>();
        for (i, (_, s)) in spare.iter().enumerate() {
            if remaining == 0 {
                break;
            }
            if extra[i] < *s {
                extra[i] += 1;
                remaining -= 1;
            }
        }

        let given = shortfall - remaining;
        if given == 0 {
            break;
        }
        for ((source, _), add) in spare.iter().zip(&extra) {
            if let Some(slot) = allocation.get_mut(*source) {
                *slot += add;
            }
        }
        tracing::debug!(redistributed = given, left = remaining, "reallocated shortfall");
        shortfall = remaining;
    }

    allocation
}

/// Draw a quota-balanced sample from per-source pools.
///
/// `interleave(source)` selects which pools get horizon-interleaved after
/// permutation. The output is ordered by source name, then by draw order.
pub fn quota_sample(
    pools: BTreeMap<String, Vec<Problem>>,
    max_quest: usize,
    seed: u64,
    interleave: impl Fn(&str) -> bool,
) -> Vec<Problem> {
    let inventory: BTreeMap<String, usize> = pools
        .iter()
        .map(|(source, pool)| (source.clone(), pool.len()))
        .collect();
    let allocation = allocate_quotas(&inventory, max_quest);

    let mut sample = Vec::with_capacity(allocation.values().sum());
    for (source, pool) in pools {
        let take = allocation.get(&source).copied().unwrap_or(0);
        let mut ordered = permute(pool, seed, &source);
        if interleave(&source) {
            ordered = interleave_by_horizon(ordered);
        }
        tracing::debug!(%source, take, available = ordered.len(), "sampled source");
        sample.extend(ordered.into_iter().take(take));
    }
    sample
}
