//! # Search Units & Hybrid Retrieval
//!
//! Flattens the document tree into atomic, embeddable search units and
//! provides the hybrid (keyword + vector + semantic) retrieval client.

pub mod client;
pub mod schema;

pub use client::{IndexBatchResult, SearchHit, SearchIndexClient};

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::content::{DocumentContent, PDFMetadata};
use crate::gateway::StructuredSchema;

/// What a search unit was projected from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitType {
    Text,
    Image,
    Table,
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Image => write!(f, "image"),
            Self::Table => write!(f, "table"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Semantic,
    Keyword,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Hybrid,
    Wide,
}

/// Knobs for one retrieval request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchParams {
    pub search_mode: SearchMode,
    /// Comma-separated vector field names for the vector arm.
    pub vector_fields: String,
    /// Optional `unit_type eq '...'` filter.
    pub unit_type: Option<UnitType>,
    pub top: usize,
    /// How many expanded terms / related areas a wide search keeps.
    pub top_wide_search: usize,
    pub exhaustive: bool,
    /// Ignored by wide search, which always runs both passes.
    pub query_type: QueryType,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            search_mode: SearchMode::Hybrid,
            vector_fields: "text_vector".to_string(),
            unit_type: None,
            top: 3,
            top_wide_search: 3,
            exhaustive: false,
            query_type: QueryType::Semantic,
        }
    }
}

/// LLM output of the query-expansion step of a wide search.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchExpansion {
    pub expanded_terms: Vec<String>,
    pub related_areas: Vec<String>,
}

pub fn search_expansion_schema() -> StructuredSchema {
    StructuredSchema::new(
        "search_expansion",
        json!({
            "type": "object",
            "properties": {
                "expanded_terms": {"type": "array", "items": {"type": "string"}},
                "related_areas": {"type": "array", "items": {"type": "string"}},
            },
            "required": ["expanded_terms", "related_areas"],
            "additionalProperties": false,
        }),
    )
}

/// One indexable record flattened from the document tree.
///
/// `page_number` is negative for synthetic post-processing units: -1 for the
/// condensed text, -2 for the table of contents, -3 for the full text.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SearchUnit {
    /// Index key; generated (UUIDv4) at upload time when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_id: Option<String>,
    pub metadata: PDFMetadata,
    pub page_number: i64,
    pub page_image_path: String,
    pub unit_type: UnitType,
    #[serde(default)]
    pub text_file_cloud_storage_path: Option<String>,
    #[serde(default)]
    pub page_image_cloud_storage_path: Option<String>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_vector: Option<Vec<f32>>,
}

/// Flattens a document into search units, page by page: the page text unit
/// first, then one unit per image, then one per table. Empty texts
/// contribute nothing. With `include_post_processing`, synthetic units for
/// the condensed text, table of contents and full text are appended using
/// reserved negative page numbers.
pub fn document_to_search_units(
    document: &DocumentContent,
    include_post_processing: bool,
) -> Vec<SearchUnit> {
    let mut units = Vec::new();
    let metadata = &document.metadata;

    for page in &document.pages {
        let page_image_cloud = page.page_image_cloud_storage_path.clone();

        if let Some(unit) = &page.text.text {
            if !unit.text.is_empty() {
                units.push(SearchUnit {
                    index_id: None,
                    metadata: metadata.clone(),
                    page_number: page.page_number as i64,
                    page_image_path: page.page_image_path.clone(),
                    unit_type: UnitType::Text,
                    text_file_cloud_storage_path: unit.text_file_cloud_storage_path.clone(),
                    page_image_cloud_storage_path: page_image_cloud.clone(),
                    text: unit.text.clone(),
                    text_vector: None,
                });
            }
        }

        for image in &page.images {
            if let Some(unit) = &image.text {
                if !unit.text.is_empty() {
                    units.push(SearchUnit {
                        index_id: None,
                        metadata: metadata.clone(),
                        page_number: page.page_number as i64,
                        page_image_path: page.page_image_path.clone(),
                        unit_type: UnitType::Image,
                        text_file_cloud_storage_path: unit.text_file_cloud_storage_path.clone(),
                        page_image_cloud_storage_path: page_image_cloud.clone(),
                        text: unit.text.clone(),
                        text_vector: None,
                    });
                }
            }
        }

        for table in &page.tables {
            if let Some(unit) = &table.text {
                if !unit.text.is_empty() {
                    units.push(SearchUnit {
                        index_id: None,
                        metadata: metadata.clone(),
                        page_number: page.page_number as i64,
                        page_image_path: page.page_image_path.clone(),
                        unit_type: UnitType::Table,
                        text_file_cloud_storage_path: unit.text_file_cloud_storage_path.clone(),
                        page_image_cloud_storage_path: page_image_cloud.clone(),
                        text: unit.text.clone(),
                        text_vector: None,
                    });
                }
            }
        }
    }

    if include_post_processing {
        if let Some(post) = &document.post_processing_content {
            let synthetic = [
                (-1_i64, post.condensed_text.as_ref()),
                (-2, post.table_of_contents.as_ref()),
                (-3, post.full_text.as_ref()),
            ];
            for (page_number, unit) in synthetic {
                let Some(unit) = unit else { continue };
                if unit.text.is_empty() {
                    continue;
                }
                units.push(SearchUnit {
                    index_id: None,
                    metadata: metadata.clone(),
                    page_number,
                    page_image_path: String::new(),
                    unit_type: UnitType::Text,
                    text_file_cloud_storage_path: unit.text_file_cloud_storage_path.clone(),
                    page_image_cloud_storage_path: None,
                    text: unit.text.clone(),
                    text_vector: None,
                });
            }
        }
    }

    units
}
