//! Built-in loader strategies.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::error::{PastcastError, Result};
use crate::loader::{normalize_all, LoadParams};
use crate::model::{HorizonGroup, Problem, ProblemSet, SourceKind};
use crate::registry::LoaderRegistry;
use crate::sampling::quota_sample;
use crate::traits::LoadContext;

pub const LOAD_ALL: &str = "load_all";
pub const LOAD_RANDOM: &str = "load_random";
pub const LOAD_BY_SOURCE: &str = "load_by_source";
pub const EXTENSIVE: &str = "extensive";
pub const STRATIFIED: &str = "stratified";

/// Register every built-in strategy under its canonical name.
pub fn register_builtin(registry: &LoaderRegistry) -> Result<()> {
    registry.register(LOAD_ALL, Arc::new(load_all))?;
    registry.register(LOAD_RANDOM, Arc::new(load_random))?;
    registry.register(LOAD_BY_SOURCE, Arc::new(load_by_source))?;
    registry.register(EXTENSIVE, Arc::new(extensive))?;
    registry.register(STRATIFIED, Arc::new(stratified))?;
    Ok(())
}

fn into_set(problems: impl IntoIterator<Item = Problem>) -> ProblemSet {
    problems
        .into_iter()
        .map(|p| (p.problem_id.clone(), p))
        .collect()
}

fn explicit_sources(ctx: &LoadContext<'_>, params: &LoadParams) -> Result<Option<BTreeSet<String>>> {
    match &params.sources {
        Some(_) => Ok(Some(
            params.selected_sources(ctx.catalog)?.into_iter().collect(),
        )),
        None => Ok(None),
    }
}

fn keep(
    problem: &Problem,
    sources: Option<&BTreeSet<String>>,
    horizons: Option<&BTreeSet<HorizonGroup>>,
) -> bool {
    sources.map_or(true, |s| s.contains(problem.source()))
        && horizons.map_or(true, |h| h.contains(&problem.metadata.horizon))
}

/// Every normalized problem, optionally narrowed by `sources` / `horizons`.
pub fn load_all(ctx: &LoadContext<'_>, params: &LoadParams) -> Result<ProblemSet> {
    let sources = explicit_sources(ctx, params)?;
    let horizons = params.horizon_filter()?;
    Ok(into_set(
        normalize_all(ctx.raw, params)
            .into_iter()
            .filter(|p| keep(p, sources.as_ref(), horizons.as_ref())),
    ))
}

/// A seeded uniform sample of `count` problems (default `max_quest`).
pub fn load_random(ctx: &LoadContext<'_>, params: &LoadParams) -> Result<ProblemSet> {
    let count = params.count.unwrap_or(params.max_quest);
    if count == 0 {
        return Err(PastcastError::Validation("count must be positive".into()));
    }
    let sources = explicit_sources(ctx, params)?;
    let horizons = params.horizon_filter()?;

    let mut pool: Vec<Problem> = normalize_all(ctx.raw, params)
        .into_iter()
        .filter(|p| keep(p, sources.as_ref(), horizons.as_ref()))
        .collect();
    pool.sort_by(|a, b| a.problem_id.cmp(&b.problem_id));
    let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
    pool.shuffle(&mut rng);
    pool.truncate(count);
    Ok(into_set(pool))
}

/// Every problem from the single source named by `params.source`.
pub fn load_by_source(ctx: &LoadContext<'_>, params: &LoadParams) -> Result<ProblemSet> {
    let source = params
        .source
        .as_deref()
        .ok_or_else(|| PastcastError::Validation("load_by_source requires `source`".into()))?;
    ctx.catalog.validate(&[source.to_string()])?;
    let horizons = params.horizon_filter()?;

    let problems = into_set(
        normalize_all(ctx.raw, params)
            .into_iter()
            .filter(|p| p.source() == source)
            .filter(|p| horizons.as_ref().map_or(true, |h| h.contains(&p.metadata.horizon))),
    );
    if problems.is_empty() {
        tracing::warn!(source, "no problems found for source");
    }
    Ok(problems)
}

/// Candidate pools for the sampling strategies: one (possibly empty) pool
/// per selected source, after the horizon filter.
fn candidate_pools(ctx: &LoadContext<'_>, params: &LoadParams) -> Result<BTreeMap<String, Vec<Problem>>> {
    if params.max_quest == 0 {
        return Err(PastcastError::Validation("max_quest must be positive".into()));
    }
    let sources = params.selected_sources(ctx.catalog)?;
    let horizons = params.horizon_filter()?;

    let mut pools: BTreeMap<String, Vec<Problem>> =
        sources.into_iter().map(|s| (s, Vec::new())).collect();
    for problem in normalize_all(ctx.raw, params) {
        if !horizons
            .as_ref()
            .map_or(true, |h| h.contains(&problem.metadata.horizon))
        {
            continue;
        }
        if let Some(pool) = pools.get_mut(problem.source()) {
            pool.push(problem);
        }
    }
    Ok(pools)
}

fn sample(
    ctx: &LoadContext<'_>,
    params: &LoadParams,
    interleave: impl Fn(&str) -> bool,
) -> Result<ProblemSet> {
    let pools = candidate_pools(ctx, params)?;
    let available: usize = pools.values().map(Vec::len).sum();
    let sampled = quota_sample(pools, params.max_quest, params.seed, interleave);
    if sampled.len() < params.max_quest {
        tracing::warn!(
            requested = params.max_quest,
            available,
            returned = sampled.len(),
            "fewer problems available than requested"
        );
    }
    Ok(into_set(sampled))
}

/// Quota-balanced sample of `max_quest` problems across sources.
pub fn extensive(ctx: &LoadContext<'_>, params: &LoadParams) -> Result<ProblemSet> {
    sample(ctx, params, |_| false)
}

/// Like [`extensive`], with market-source draws interleaved by horizon so
/// short and long questions are both represented.
pub fn stratified(ctx: &LoadContext<'_>, params: &LoadParams) -> Result<ProblemSet> {
    let catalog = ctx.catalog;
    sample(ctx, params, |source| {
        catalog.kind(source) == Some(SourceKind::Market)
    })
}
