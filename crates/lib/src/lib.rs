//! # docflow
//!
//! A multimodal document ingestion pipeline: PDFs are decomposed page by
//! page into text, embedded images and embedded tables with large language
//! models, the resulting artifacts are persisted to structured folders and
//! mirrored into blob storage, and the atomic units are indexed into a
//! hybrid (keyword + vector + semantic) search index.
//!
//! The crate is organized around the pipeline's collaborators:
//! [`registry`] resolves model descriptors into live clients, [`gateway`]
//! provides uniform chat/structured-chat/embedding calls, [`storage`] wraps
//! the blob service, [`content`] holds the persisted document tree,
//! [`analyzer`] turns pages into raw material, [`pipeline`] orchestrates the
//! resumable per-page state machine, [`search`] projects and retrieves
//! search units, and [`jobs`] plus [`queue`] tie everything to the
//! queue-driven worker.

pub mod analyzer;
pub mod config;
pub mod constants;
pub mod content;
pub mod docdb;
pub mod errors;
pub mod gateway;
pub mod jobs;
pub mod pipeline;
pub mod prompts;
pub mod queue;
pub mod registry;
pub mod search;
pub mod storage;

pub use config::{CustomProcessingStep, PipelineConfiguration};
pub use content::{DataUnit, DocumentContent, PDFMetadata, PipelineState};
pub use errors::{JobError, PipelineError};
pub use gateway::{LlmGateway, StructuredSchema};
pub use jobs::DocumentIngestionJob;
pub use pipeline::PdfIngestionPipeline;
pub use registry::{ModelDescriptor, ModelRegistry};
pub use search::{SearchIndexClient, SearchParams, SearchUnit};
pub use storage::BlobStore;
