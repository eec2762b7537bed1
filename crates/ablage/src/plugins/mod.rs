//! Plugin system for document processing stages.
//!
//! - [`Plugin`] - base trait with identity and lifecycle hooks
//! - [`Stage`] - one processing step run against a document
//! - [`registry::StageRegistry`] - resolves configured stage identifiers into
//!   live, initialized stages once per process
//!
//! Stages are stored as `Arc<dyn Stage>` and shared by every run, so they
//! must be `Send + Sync`. Expensive clients (HTTP, OCR) are built in the
//! stage's constructor and reused for the life of the process.

pub mod registry;
mod stage;
mod traits;

pub use registry::{StageFactory, StageRegistry, StageSet};
pub use stage::{Stage, StageContext, StageOutcome, ensure_backend_supported};
pub use traits::Plugin;
