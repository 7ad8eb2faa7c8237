//! pastcast-core: problem loading, sampling, evaluation sessions, and scoring.
//!
//! This crate defines the problem model, the name-keyed registries for loader
//! strategies, search tools and metrics, the quota-balanced sampler, and the
//! [`EnvironmentManager`] that keeps ground truth away from the agent while
//! a session runs.

pub mod database;
pub mod environment;
pub mod error;
pub mod loader;
pub mod metrics;
pub mod model;
pub mod registry;
pub mod report;
pub mod sampling;
pub mod strategies;
pub mod traits;

pub use database::RawDatabase;
pub use environment::{EnvironmentConfig, EnvironmentManager};
pub use error::{PastcastError, Result};
pub use loader::{LoadParams, ProblemLoader};
pub use model::{
    EvalStrategy, HorizonGroup, Problem, ProblemSet, ProblemView, SourceCatalog, Submission,
};
pub use registry::Registries;
pub use report::BenchmarkReport;
pub use traits::{LoaderStrategy, Metric, SearchTool};
