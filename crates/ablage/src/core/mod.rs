//! Processing core.
//!
//! - [`config`]: pipeline configuration and file loading
//! - [`pipeline`]: the per-document stage loop shared by every strategy
//! - [`orchestrator`]: the `apply_processing` entry point and its execution strategies
//! - [`pool`]: bounded worker pool behind the pooled strategy
//! - [`guard`]: optional per-document in-flight markers

pub mod config;
pub mod guard;
pub mod orchestrator;
pub mod pipeline;
pub mod pool;

pub use config::PipelineConfig;
pub use orchestrator::{ExecutionStrategy, Orchestrator, Submission};
pub use pipeline::Pipeline;
