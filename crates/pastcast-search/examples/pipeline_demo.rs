//! Runs a small pastcasting session end to end.
//!
//! Reads `pastcast.toml` (or defaults), loads the configured database or a
//! built-in sample, installs the search tools, and runs two sessions with
//! different seeds side by side. A naive agent searches once per problem and
//! submits 0.5 everywhere.
//!
//! ```text
//! RUST_LOG=pastcast=debug cargo run -p pastcast-search --example pipeline_demo
//! ```

use std::sync::Arc;

use anyhow::Context;
use pastcast_core::database::{RawDatabase, RawRecord};
use pastcast_core::{EnvironmentManager, ProblemLoader, Registries};
use pastcast_search::{install, load_config, MOCK_GOOGLE};

fn sample_database() -> RawDatabase {
    let rows = [
        ("fred", "Will the Fed cut rates in March 2024?", "2024-01-15", "2024-03-20", 0.0),
        ("acled", "Will ACLED record more than 100 events in region X?", "2024-02-01", "2024-02-05", 1.0),
        ("polymarket", "Will Bitcoin exceed $100,000 by end of 2024?", "2024-01-01", "2024-12-31", 0.0),
        ("metaculus", "Will a new element be synthesized in 2024?", "2024-01-01", "2024-12-31", 0.0),
        ("wikipedia", "Will the article be edited more than 50 times?", "2024-03-01", "2024-03-31", 1.0),
    ];
    let records = rows
        .iter()
        .enumerate()
        .filter_map(|(i, (source, question, start, end, outcome))| {
            match serde_json::json!({
                "id": format!("demo{i}"),
                "source": source,
                "question": question,
                "start_date": start,
                "end_date": end,
                "resolved_to": outcome,
            }) {
                serde_json::Value::Object(map) => Some(RawRecord(map)),
                _ => None,
            }
        })
        .collect();
    RawDatabase::new(records)
}

async fn run_session(
    db: Arc<RawDatabase>,
    config: &pastcast_search::PastcastConfig,
    seed: u64,
) -> anyhow::Result<pastcast_core::BenchmarkReport> {
    let mut env_config = config.environment.clone();
    env_config.params.seed = seed;

    let loader = ProblemLoader::new(db).with_catalog(config.sources.clone());
    let mut env = EnvironmentManager::new(loader, Registries::global(), env_config)?;
    tracing::info!(seed, problems = env.len(), "session started");

    for (id, view) in env.get_problems() {
        let evidence = env.search(MOCK_GOOGLE, &id, &view.question).await?;
        tracing::debug!(%id, %evidence, "search result");
        env.submit_prediction(&id, 0.5)?;
    }

    Ok(env.report(None)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pastcast=info".parse()?),
        )
        .init();

    let config = load_config()?;
    install(&config.search)?;

    let db = match &config.database {
        Some(path) => RawDatabase::from_path(path)
            .with_context(|| format!("loading database {}", path.display()))?,
        None => sample_database(),
    };
    let db = Arc::new(db);

    let sessions = [42u64, 7].map(|seed| run_session(Arc::clone(&db), &config, seed));
    for report in futures::future::join_all(sessions).await {
        let report = report?;
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}
