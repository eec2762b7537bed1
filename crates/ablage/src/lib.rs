//! Ablage - document processing pipeline for a multi-tenant document store.
//!
//! After a document is uploaded (or an administrator asks for a reprocess),
//! it runs through an ordered, pluggable chain of stages: text extraction,
//! cloud OCR, language detection, search vectorization and thumbnail
//! rendering. Each stage is isolated from the others; one failing stage is
//! logged and the rest still run.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use ablage::core::config::PipelineConfig;
//! use ablage::core::orchestrator::Orchestrator;
//! use ablage::core::pipeline::Pipeline;
//! use ablage::plugins::StageRegistry;
//! use ablage::storage::{MemoryBlobStore, MemoryDocumentStore};
//! use ablage::types::{BlobRef, Document};
//! use std::sync::Arc;
//!
//! # fn main() -> ablage::Result<()> {
//! let documents = Arc::new(MemoryDocumentStore::new());
//! let blobs = Arc::new(MemoryBlobStore::new());
//! blobs.put(&BlobRef::new("hello.txt"), "Bonjour le monde");
//! let id = documents.insert(Document::new("hello", "text/plain", BlobRef::new("hello.txt")));
//!
//! let pipeline = Pipeline::initialize(
//!     PipelineConfig::default(),
//!     &StageRegistry::with_builtins(),
//!     documents.clone(),
//!     blobs,
//! )?;
//! let submission = Orchestrator::inline(pipeline).apply_processing_sync(id, false)?;
//! println!("{:?}", submission);
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Plugins** (`plugins`): the [`plugins::Stage`] contract and the registry
//!   that resolves configured stage keys once per process
//! - **Core** (`core`): configuration, the per-document stage loop, the
//!   inline and pooled execution strategies
//! - **Stages** (`stages`): the built-in stage implementations
//! - **Storage** (`storage`): document record and blob store collaborators

#![deny(unsafe_code)]

pub mod core;
pub mod error;
pub mod plugins;
pub mod stages;
pub mod storage;
pub mod types;

pub use error::{AblageError, Result};
pub use types::*;

pub use core::config::PipelineConfig;
pub use core::orchestrator::{ExecutionStrategy, Orchestrator, ProcessingHandle, Submission};
pub use core::pipeline::Pipeline;
