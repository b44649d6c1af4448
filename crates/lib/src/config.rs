//! # Pipeline Configuration
//!
//! The recipe for one document run. The configuration is a persisted
//! contract: saved JSON never contains live client handles (they are
//! `#[serde(skip)]` on the descriptors) and loading rebinds them through the
//! model registry.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::content::save_json;
use crate::errors::ConfigError;
use crate::gateway::StructuredSchema;
use crate::registry::{family_for_model_name, ModelDescriptor};

fn default_true() -> bool {
    true
}

/// A user-declared processing step applied per page or per document.
///
/// When `data_model` is present the step runs as a structured chat and its
/// output is persisted as compact JSON; otherwise the raw completion text is
/// kept. The step's model defaults to the configured multimodal descriptor.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CustomProcessingStep {
    pub name: String,
    pub prompt: String,
    #[serde(default)]
    pub data_model: Option<StructuredSchema>,
    #[serde(default)]
    pub model: Option<ModelDescriptor>,
}

impl CustomProcessingStep {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
            data_model: None,
            model: None,
        }
    }

    pub fn with_schema(mut self, schema: StructuredSchema) -> Self {
        self.data_model = Some(schema);
        self
    }

    pub fn with_model(mut self, model: ModelDescriptor) -> Self {
        self.model = Some(model);
        self
    }
}

/// Configuration for one pipeline run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfiguration {
    /// Local path or blob URL of the source PDF.
    pub pdf_path: String,
    /// Output directory; derived from the document id when absent.
    #[serde(default)]
    pub output_directory: Option<String>,
    #[serde(default = "default_true")]
    pub resume_processing_if_interrupted: bool,
    #[serde(default)]
    pub multimodal_model: ModelDescriptor,
    #[serde(default = "default_text_model")]
    pub text_model: ModelDescriptor,
    #[serde(default = "default_true")]
    pub process_pages_as_jpg: bool,
    #[serde(default = "default_true")]
    pub process_text: bool,
    #[serde(default = "default_true")]
    pub process_images: bool,
    #[serde(default = "default_true")]
    pub process_tables: bool,
    #[serde(default)]
    pub custom_page_processing_steps: Vec<CustomProcessingStep>,
    #[serde(default = "default_true")]
    pub save_text_files: bool,
    #[serde(default)]
    pub generate_condensed_text: bool,
    #[serde(default)]
    pub generate_table_of_contents: bool,
    /// Ordered target language codes for full-text translation.
    #[serde(default)]
    pub translate_full_text: Vec<String>,
    /// Ordered target language codes for condensed-text translation.
    #[serde(default)]
    pub translate_condensed_text: Vec<String>,
    #[serde(default)]
    pub custom_document_processing_steps: Vec<CustomProcessingStep>,
}

fn default_text_model() -> ModelDescriptor {
    ModelDescriptor::text("gpt-4o")
}

impl PipelineConfiguration {
    pub fn new(pdf_path: impl Into<String>) -> Self {
        Self {
            pdf_path: pdf_path.into(),
            output_directory: None,
            resume_processing_if_interrupted: true,
            multimodal_model: ModelDescriptor::default(),
            text_model: default_text_model(),
            process_pages_as_jpg: true,
            process_text: true,
            process_images: true,
            process_tables: true,
            custom_page_processing_steps: Vec::new(),
            save_text_files: true,
            generate_condensed_text: false,
            generate_table_of_contents: false,
            translate_full_text: Vec::new(),
            translate_condensed_text: Vec::new(),
            custom_document_processing_steps: Vec::new(),
        }
    }

    /// Saves the configuration as JSON. Client handles are never serialized.
    pub fn save_to_json(&self, path: &Path) -> Result<(), ConfigError> {
        save_json(self, path).map_err(|e| match e {
            crate::errors::ContentError::Json(e) => ConfigError::Json(e),
            crate::errors::ContentError::Io(e) => ConfigError::Io(e),
            other => ConfigError::Invalid {
                name: "configuration".to_string(),
                reason: other.to_string(),
            },
        })
    }

    /// Loads a configuration JSON file. A top-level `configuration` wrapper
    /// object, as produced by some upload tooling, is unwrapped transparently.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&text)?;
        let config_value = value.get("configuration").unwrap_or(&value);
        Self::from_json_value(config_value)
    }

    /// Reconstructs a configuration from its JSON form.
    ///
    /// Typed sub-records come back without clients; per-step descriptors are
    /// classified multimodal versus text by model name so a bare
    /// `{"model_name": "o1-mini"}` dispatches without images.
    pub fn from_json_value(value: &Value) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_value(value.clone())?;
        if config.pdf_path.is_empty() {
            return Err(ConfigError::Missing("pdf_path".to_string()));
        }
        for step in config
            .custom_page_processing_steps
            .iter_mut()
            .chain(config.custom_document_processing_steps.iter_mut())
        {
            if let Some(model) = step.model.as_mut() {
                model.family = family_for_model_name(&model.model_name);
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ModelFamily;

    #[test]
    fn configuration_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = PipelineConfiguration::new("docs/report.pdf");
        config.generate_condensed_text = true;
        config.translate_full_text = vec!["fr".to_string(), "de".to_string()];
        config.custom_document_processing_steps = vec![CustomProcessingStep::new(
            "entities",
            "Extract all named entities.",
        )];
        config.save_to_json(&path).unwrap();

        let loaded = PipelineConfiguration::from_json_file(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(!loaded.multimodal_model.is_bound());
    }

    #[test]
    fn saved_configuration_contains_no_client_field() {
        let config = PipelineConfiguration::new("a.pdf");
        let value = serde_json::to_value(&config).unwrap();
        assert!(value["multimodal_model"].get("client").is_none());
        assert!(value["text_model"].get("client").is_none());
    }

    #[test]
    fn step_models_are_classified_by_name() {
        let value = serde_json::json!({
            "pdf_path": "a.pdf",
            "custom_page_processing_steps": [
                {"name": "vision", "prompt": "p", "model": {"model_name": "gpt-4o"}},
                {"name": "plain", "prompt": "p", "model": {"model_name": "o1-mini"}}
            ]
        });
        let config = PipelineConfiguration::from_json_value(&value).unwrap();
        assert_eq!(
            config.custom_page_processing_steps[0].model.as_ref().unwrap().family,
            ModelFamily::ChatMultimodal
        );
        assert_eq!(
            config.custom_page_processing_steps[1].model.as_ref().unwrap().family,
            ModelFamily::ChatText
        );
    }

    #[test]
    fn missing_pdf_path_is_rejected() {
        let value = serde_json::json!({ "pdf_path": "" });
        assert!(matches!(
            PipelineConfiguration::from_json_value(&value),
            Err(ConfigError::Missing(_))
        ));
    }
}
