//! Error types for the document processing pipeline and its collaborators.
//!
//! Each subsystem owns a small `thiserror` enum; higher layers convert with
//! `#[from]` so that causes survive as source chains rather than strings.

use thiserror::Error;

use crate::content::state::PipelineStage;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing configuration value: {0}")]
    Missing(String),
    #[error("invalid configuration value for '{name}': {reason}")]
    Invalid { name: String, reason: String },
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by the model registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("unknown model: {provider}/{model_name}")]
    UnknownModel {
        provider: String,
        model_name: String,
    },
    #[error("missing credentials for model '{0}': resolved endpoint or key is empty")]
    MissingCredentials(String),
    #[error("failed to construct a client for model '{model}': {reason}")]
    Client { model: String, reason: String },
}

/// Errors raised by the LLM gateway.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(reqwest::Error),
    #[error("request to the model endpoint failed: {0}")]
    Request(reqwest::Error),
    #[error("failed to deserialize the model response: {0}")]
    Deserialization(String),
    #[error("model endpoint returned an error: {0}")]
    Api(String),
    #[error("structured output did not conform to schema '{schema}': {reason}")]
    SchemaViolation { schema: String, reason: String },
    #[error("model descriptor has no bound client; resolve it through the registry first")]
    Unbound,
    #[error("failed to read image '{path}': {source}")]
    Image {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to re-encode image '{0}' as JPEG")]
    ImageEncode(String),
}

/// Errors raised by the blob store adapter.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("blob or container not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("storage service returned {status}: {message}")]
    Service { status: u16, message: String },
    #[error("invalid blob URL: {0}")]
    InvalidUrl(String),
    #[error("SAS generation requires an account key credential")]
    MissingAccountKey,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised while persisting or reloading data-model nodes.
#[derive(Error, Debug)]
pub enum ContentError {
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("JSON (de)serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors raised by the page analyzer and the PDF rasterizer.
#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("failed to open PDF '{path}': {reason}")]
    Pdf { path: String, reason: String },
    #[error("page {0} is out of range")]
    PageOutOfRange(u32),
    #[error("failed to render page {page}: {reason}")]
    Render { page: u32, reason: String },
    #[error("unexpected analysis payload: {0}")]
    Payload(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised by the pipeline orchestrator.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("input document error: {0}")]
    Input(String),
    #[error("page {page} failed in the {stage} stage: {source}")]
    PageFailure {
        page: u32,
        stage: PipelineStage,
        #[source]
        source: Box<PipelineError>,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("JSON (de)serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised by the search index client and schema builder.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("search service request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("search service returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("failed to deserialize the search response: {0}")]
    Deserialization(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("vector dimension mismatch: index has {existing}, embedding model produces {configured}")]
    DimensionMismatch { existing: usize, configured: usize },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{failed} of {total} documents failed to index; first failure: {first_error}")]
    PartialBatch {
        failed: usize,
        total: usize,
        first_error: String,
    },
}

/// Errors raised by the document-database manifest store.
#[derive(Error, Debug)]
pub enum DocDbError {
    #[error("document database request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("document database returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("failed to serialize the manifest: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by the queue consumer.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("broker request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("broker returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("malformed broker message: {0}")]
    Malformed(String),
}

/// Errors raised by the document ingestion job.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("pipeline failed: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("artifact upload failed: {0}")]
    Storage(#[from] StorageError),
    #[error("indexing failed: {0}")]
    Indexing(#[from] SearchError),
    #[error("manifest write failed: {0}")]
    Manifest(#[from] DocDbError),
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}
