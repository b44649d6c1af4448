//! # Document Data Model
//!
//! The typed tree produced by the ingestion pipeline. Ownership is strictly
//! hierarchical: [`DocumentContent`] owns its metadata, pages and
//! post-processing content; every node can persist itself to a structured
//! folder, reload from it, and mirror itself into blob storage. After an
//! upload a node carries both its local path and its cloud URI.

pub mod data_unit;
pub mod document;
pub mod page;
pub mod state;

pub use data_unit::DataUnit;
pub use document::{document_id_for, DocumentContent, PDFMetadata, PostProcessingContent};
pub use page::{
    load_page_custom_steps, load_page_images, load_page_tables, ExtractedImage, ExtractedTable,
    ExtractedText, PageContent,
};
pub use state::{PipelineStage, PipelineState};

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::ContentError;

/// Serializes a node to pretty-printed JSON, creating parent directories.
pub fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<(), ContentError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Loads a node from a JSON file.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, ContentError> {
    if !path.is_file() {
        return Err(ContentError::FileNotFound(path.display().to_string()));
    }
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}
