//! # Index Schema Builder
//!
//! Derives a dynamic search-index schema from a declarative field table.
//! The rules mirror the service's constraints: strings are searchable and
//! sortable (unless multi-valued), scalars are filterable and facetable,
//! vector fields bind to the HNSW profile and can never sort, and complex
//! fields recurse with sorting disabled inside collections.

use serde_json::{json, Value};

use crate::constants::{
    SEMANTIC_CONFIG_NAME, VECTOR_ALGORITHM_NAME, VECTORIZER_NAME, VECTOR_PROFILE_NAME,
};
use crate::errors::{ConfigError, SearchError};
use crate::registry::ModelDescriptor;

/// The shape of one schema field.
#[derive(Clone, Debug)]
pub enum FieldKind {
    String,
    Int64,
    Double,
    Boolean,
    DateTime,
    /// `list<float>` with the embedding dimension, bound to the vector
    /// profile.
    Vector,
    /// `list<scalar>`.
    Collection(Box<FieldKind>),
    /// Nested record.
    Complex(Vec<FieldSpec>),
    /// `list<record>`.
    ComplexCollection(Vec<FieldSpec>),
}

#[derive(Clone, Debug)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

/// Declarative schema of the document metadata record.
pub fn pdf_metadata_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::new("document_id", FieldKind::String),
        FieldSpec::new("document_path", FieldKind::String),
        FieldSpec::new("filename", FieldKind::String),
        FieldSpec::new("total_pages", FieldKind::Int64),
        FieldSpec::new("processed_pages", FieldKind::Int64),
        FieldSpec::new("output_directory", FieldKind::String),
        FieldSpec::new("cloud_storage_path", FieldKind::String),
    ]
}

/// Declarative schema of a search unit.
pub fn search_unit_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::new("metadata", FieldKind::Complex(pdf_metadata_fields())),
        FieldSpec::new("page_number", FieldKind::Int64),
        FieldSpec::new("page_image_path", FieldKind::String),
        FieldSpec::new("unit_type", FieldKind::String),
        FieldSpec::new("text_file_cloud_storage_path", FieldKind::String),
        FieldSpec::new("page_image_cloud_storage_path", FieldKind::String),
        FieldSpec::new("text", FieldKind::String),
        FieldSpec::new("text_vector", FieldKind::Vector),
    ]
}

fn scalar_edm_type(kind: &FieldKind) -> &'static str {
    match kind {
        FieldKind::String => "Edm.String",
        FieldKind::Int64 => "Edm.Int64",
        FieldKind::Double => "Edm.Double",
        FieldKind::Boolean => "Edm.Boolean",
        FieldKind::DateTime => "Edm.DateTimeOffset",
        _ => "Edm.String",
    }
}

fn build_field(
    spec: &FieldSpec,
    is_in_collection: bool,
    key_field: Option<&str>,
    embedding_dimensions: usize,
) -> Value {
    let is_key = key_field == Some(spec.name);
    match &spec.kind {
        FieldKind::Vector => json!({
            "name": spec.name,
            "type": "Collection(Edm.Single)",
            "searchable": true,
            "filterable": false,
            "facetable": false,
            "sortable": false,
            "key": is_key,
            "dimensions": embedding_dimensions,
            "vectorSearchProfile": VECTOR_PROFILE_NAME,
        }),
        FieldKind::String => json!({
            "name": spec.name,
            "type": "Edm.String",
            "searchable": true,
            "filterable": true,
            "facetable": false,
            "sortable": !is_in_collection,
            "key": is_key,
        }),
        FieldKind::Int64 | FieldKind::Double | FieldKind::Boolean | FieldKind::DateTime => json!({
            "name": spec.name,
            "type": scalar_edm_type(&spec.kind),
            "filterable": true,
            "facetable": true,
            "sortable": !is_in_collection,
            "key": is_key,
        }),
        FieldKind::Collection(inner) => {
            // Multi-valued fields can never sort.
            match inner.as_ref() {
                FieldKind::String => json!({
                    "name": spec.name,
                    "type": "Collection(Edm.String)",
                    "searchable": true,
                    "filterable": true,
                    "facetable": false,
                    "sortable": false,
                    "key": is_key,
                }),
                other => json!({
                    "name": spec.name,
                    "type": format!("Collection({})", scalar_edm_type(other)),
                    "filterable": true,
                    "facetable": true,
                    "sortable": false,
                    "key": is_key,
                }),
            }
        }
        FieldKind::Complex(subfields) => json!({
            "name": spec.name,
            "type": "Edm.ComplexType",
            "fields": subfields
                .iter()
                .map(|f| build_field(f, is_in_collection, None, embedding_dimensions))
                .collect::<Vec<_>>(),
        }),
        FieldKind::ComplexCollection(subfields) => json!({
            "name": spec.name,
            "type": "Collection(Edm.ComplexType)",
            "fields": subfields
                .iter()
                .map(|f| build_field(f, true, None, embedding_dimensions))
                .collect::<Vec<_>>(),
        }),
    }
}

fn vector_search_config(embedding: &ModelDescriptor) -> Value {
    let deployment = if embedding.deployment.is_empty() {
        embedding.model_name.clone()
    } else {
        embedding.deployment.clone()
    };
    json!({
        "algorithms": [{"name": VECTOR_ALGORITHM_NAME, "kind": "hnsw"}],
        "profiles": [{
            "name": VECTOR_PROFILE_NAME,
            "algorithm": VECTOR_ALGORITHM_NAME,
            "vectorizer": VECTORIZER_NAME,
        }],
        "vectorizers": [{
            "vectorizerName": VECTORIZER_NAME,
            "kind": "azureOpenAI",
            "azureOpenAIParameters": {
                "resourceUri": embedding.endpoint,
                "deploymentId": deployment,
                "modelName": embedding.model_name,
                "apiKey": embedding.key,
            }
        }]
    })
}

fn semantic_search_config() -> Value {
    json!({
        "configurations": [{
            "name": SEMANTIC_CONFIG_NAME,
            "prioritizedFields": {
                "titleField": {"fieldName": "text"},
                "prioritizedContentFields": [{"fieldName": "text"}],
                "prioritizedKeywordsFields": [],
            }
        }]
    })
}

/// Builds the complete index definition.
///
/// When `key_field_name` matches a top-level field it becomes the key;
/// otherwise a new string key field with that name (default `index_id`) is
/// prepended.
pub fn build_index_schema(
    index_name: &str,
    fields: &[FieldSpec],
    key_field_name: Option<&str>,
    embedding: &ModelDescriptor,
) -> Result<Value, SearchError> {
    let dimensions = embedding.dimensions.ok_or_else(|| {
        SearchError::Config(ConfigError::Missing(format!(
            "embedding dimensions for model '{}'",
            embedding.model_name
        )))
    })?;

    let key_name = key_field_name.unwrap_or("index_id");
    let key_exists = fields.iter().any(|f| f.name == key_name);

    let mut built: Vec<Value> = Vec::with_capacity(fields.len() + 1);
    if !key_exists {
        built.push(json!({
            "name": key_name,
            "type": "Edm.String",
            "key": true,
            "searchable": false,
            "filterable": false,
            "facetable": false,
            "sortable": false,
        }));
    }
    let key_marker = if key_exists { Some(key_name) } else { None };
    built.extend(
        fields
            .iter()
            .map(|f| build_field(f, false, key_marker, dimensions)),
    );

    Ok(json!({
        "name": index_name,
        "fields": built,
        "vectorSearch": vector_search_config(embedding),
        "semantic": semantic_search_config(),
    }))
}
