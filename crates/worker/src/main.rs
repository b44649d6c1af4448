//! Queue-driven document processing worker.
//!
//! Receives one batch of blob-created events from the broker, downloads the
//! configuration JSON each event points at, and runs the ingestion job for
//! it. Every received message is completed whether or not its job succeeded
//! (at-most-once delivery); failures are logged.
//!
//! The worker processes a single batch and exits. Wrap it in a supervisor
//! (systemd, a container restart policy) for continuous draining.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use docflow::constants::{
    DEFAULT_OUTPUT_CONTAINER, DEFAULT_SEARCH_INDEX, DEFAULT_UPLOAD_JSON_CONTAINER,
    MANIFEST_CATEGORY_VALUE,
};
use docflow::docdb::CosmosManifestStore;
use docflow::queue::{BlobCreatedEvent, ReceivedMessage, ServiceBusReceiver};
use docflow::registry::ModelRegistry;
use docflow::{
    BlobStore, DocumentIngestionJob, ModelDescriptor, PipelineConfiguration, SearchIndexClient,
};

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn required_env(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("{name} is not set"))
}

/// Everything the worker reads from the environment at startup.
struct WorkerSettings {
    upload_json_container: String,
    output_container: String,
    service_bus_namespace: String,
    service_bus_queue: String,
    service_bus_key_name: String,
    service_bus_key: String,
    search_endpoint: String,
    search_api_key: String,
    search_index: String,
    embedding_model: String,
    cosmos: Option<CosmosSettings>,
    max_message_count: usize,
    max_wait_secs: u64,
}

struct CosmosSettings {
    uri: String,
    key: String,
    database: String,
    container: String,
}

impl WorkerSettings {
    fn from_env() -> Result<Self> {
        let search_service = required_env("AZURE_AI_SEARCH_SERVICE_NAME")?;
        let search_endpoint = if search_service.starts_with("https://") {
            search_service
        } else {
            format!("https://{search_service}.search.windows.net")
        };

        let cosmos = match (std::env::var("COSMOS_URI"), std::env::var("COSMOS_KEY")) {
            (Ok(uri), Ok(key)) => Some(CosmosSettings {
                uri,
                key,
                database: env_or("COSMOS_DB_NAME", "documents"),
                container: env_or("COSMOS_CONTAINER_NAME", "manifests"),
            }),
            _ => None,
        };

        Ok(Self {
            upload_json_container: env_or(
                "AZURE_STORAGE_UPLOAD_JSON_CONTAINER_NAME",
                DEFAULT_UPLOAD_JSON_CONTAINER,
            ),
            output_container: env_or(
                "AZURE_STORAGE_OUTPUT_CONTAINER_NAME",
                DEFAULT_OUTPUT_CONTAINER,
            ),
            service_bus_namespace: required_env("SERVICE_BUS_NAME")?,
            service_bus_queue: env_or("SERVICE_BUS_QUEUE_NAME", "document-processing-queue"),
            service_bus_key_name: env_or("SERVICE_BUS_KEY_NAME", "RootManageSharedAccessKey"),
            service_bus_key: required_env("SERVICE_BUS_KEY")?,
            search_endpoint,
            search_api_key: required_env("AZURE_AI_SEARCH_API_KEY")?,
            search_index: env_or("AZURE_AI_SEARCH_INDEX_NAME", DEFAULT_SEARCH_INDEX),
            embedding_model: env_or("EMBEDDING_MODEL_NAME", "text-embedding-3-large"),
            cosmos,
            max_message_count: env_or("MAX_MESSAGE_COUNT", "20").parse().unwrap_or(20),
            max_wait_secs: env_or("MAX_WAIT_TIME", "5").parse().unwrap_or(5),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = WorkerSettings::from_env()?;
    let registry = ModelRegistry::from_env();

    let processed = run_once(&settings, &registry).await?;
    info!(processed, "worker batch complete");
    Ok(())
}

/// Receives one batch and processes every message in it.
async fn run_once(settings: &WorkerSettings, registry: &ModelRegistry) -> Result<usize> {
    let receiver = ServiceBusReceiver::new(
        &settings.service_bus_namespace,
        &settings.service_bus_queue,
        &settings.service_bus_key_name,
        &settings.service_bus_key,
    );

    let messages = receiver
        .receive_batch(settings.max_message_count, settings.max_wait_secs)
        .await?;
    info!(count = messages.len(), "received messages");

    let mut processed = 0;
    for message in &messages {
        match handle_message(settings, registry, message).await {
            Ok(document_id) => {
                processed += 1;
                info!(%document_id, "document processing job succeeded");
            }
            Err(e) => error!("document processing job failed: {e:#}"),
        }
        // At-most-once: the message leaves the queue regardless of outcome.
        if let Err(e) = receiver.complete(message).await {
            error!("failed to complete message: {e}");
        }
    }
    Ok(processed)
}

async fn handle_message(
    settings: &WorkerSettings,
    registry: &ModelRegistry,
    message: &ReceivedMessage,
) -> Result<String> {
    let event = BlobCreatedEvent::parse(&message.body)?;
    let blob_name = event.blob_name()?;
    info!(%blob_name, "handling blob-created event");

    let blob = BlobStore::from_env()?;
    let work_dir = std::env::current_dir()?;
    let config_path = work_dir.join(&blob_name);
    blob.download_blob(&settings.upload_json_container, &blob_name, &config_path)
        .await?;

    let mut config = PipelineConfiguration::from_json_file(&config_path)?;
    localize_pdf(&blob, &mut config, &work_dir).await?;

    let mut embedding = ModelDescriptor::embedding(&settings.embedding_model);
    registry
        .resolve(&mut embedding)
        .context("failed to resolve the embedding model")?;
    let search = SearchIndexClient::new(
        &settings.search_endpoint,
        &settings.search_api_key,
        &settings.search_index,
        embedding,
    );

    let mut job = DocumentIngestionJob::new(config, blob, search);
    if let Some(cosmos) = &settings.cosmos {
        job = job.with_manifest(Box::new(CosmosManifestStore::new(
            &cosmos.uri,
            &cosmos.key,
            &cosmos.database,
            &cosmos.container,
            MANIFEST_CATEGORY_VALUE,
        )));
    }

    let document = job
        .execute(registry, Some(&settings.output_container))
        .await?;
    Ok(document.metadata.document_id)
}

/// Replaces a blob-URL `pdf_path` with a local download.
async fn localize_pdf(
    blob: &BlobStore,
    config: &mut PipelineConfiguration,
    work_dir: &Path,
) -> Result<()> {
    if config.pdf_path.starts_with("http://") || config.pdf_path.starts_with("https://") {
        let local = blob.download_blob_url(&config.pdf_path, work_dir).await?;
        info!(local = %local.display(), "downloaded source document");
        config.pdf_path = local.to_string_lossy().into_owned();
    }
    Ok(())
}
