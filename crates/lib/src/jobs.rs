//! # Document Ingestion Job
//!
//! Composes the full per-document flow: process the PDF, mirror the
//! artifacts into blob storage, ensure the search index, upload the search
//! units, and record the manifest in the document database.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::analyzer::{PdfRasterizer, PdfiumRasterizer};
use crate::config::PipelineConfiguration;
use crate::constants::{MANIFEST_CATEGORY_KEY, MANIFEST_CATEGORY_VALUE};
use crate::content::DocumentContent;
use crate::docdb::ManifestStore;
use crate::errors::JobError;
use crate::pipeline::PdfIngestionPipeline;
use crate::registry::ModelRegistry;
use crate::search::{document_to_search_units, SearchIndexClient};
use crate::storage::BlobStore;

/// One document's end-to-end ingestion.
pub struct DocumentIngestionJob {
    config: PipelineConfiguration,
    blob: BlobStore,
    search: SearchIndexClient,
    manifest: Option<Box<dyn ManifestStore>>,
    rasterizer: Arc<dyn PdfRasterizer>,
    include_post_processing_units: bool,
}

impl DocumentIngestionJob {
    pub fn new(config: PipelineConfiguration, blob: BlobStore, search: SearchIndexClient) -> Self {
        Self {
            config,
            blob,
            search,
            manifest: None,
            rasterizer: Arc::new(PdfiumRasterizer::new()),
            include_post_processing_units: false,
        }
    }

    /// Records the final manifest in the given document store.
    pub fn with_manifest(mut self, manifest: Box<dyn ManifestStore>) -> Self {
        self.manifest = Some(manifest);
        self
    }

    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn PdfRasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    /// Also index the condensed text, table of contents and full text as
    /// synthetic units.
    pub fn include_post_processing_units(mut self, include: bool) -> Self {
        self.include_post_processing_units = include;
        self
    }

    /// Runs the job. Indexing is attempted exactly once; upstream retries
    /// live inside the gateway and service clients.
    pub async fn execute(
        &self,
        registry: &ModelRegistry,
        output_container: Option<&str>,
    ) -> Result<DocumentContent, JobError> {
        info!(pdf_path = %self.config.pdf_path, "starting document ingestion job");

        let mut pipeline = PdfIngestionPipeline::with_rasterizer(
            self.config.clone(),
            registry,
            self.rasterizer.clone(),
        )?;
        let mut document = pipeline.process_pdf().await?;

        info!(document_id = %document.metadata.document_id, "uploading document artifacts");
        document.upload_to_blob(&self.blob, output_container).await?;

        info!("indexing search units");
        self.search.create_or_update_index().await?;
        let units = document_to_search_units(&document, self.include_post_processing_units);
        let result = self.search.upload_units(units).await?;
        if result.is_partial() {
            warn!(
                failed = result.failed.len(),
                total = result.total(),
                "some search units failed to index"
            );
        }

        match &self.manifest {
            Some(store) => {
                let mut manifest = serde_json::to_value(&document)?;
                manifest["id"] = json!(document.metadata.document_id);
                manifest[MANIFEST_CATEGORY_KEY] = json!(MANIFEST_CATEGORY_VALUE);
                store.upsert(&manifest).await?;
            }
            None => warn!("no manifest store configured, skipping manifest record"),
        }

        info!(document_id = %document.metadata.document_id, "ingestion job complete");
        Ok(document)
    }
}
