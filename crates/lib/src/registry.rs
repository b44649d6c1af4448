//! # Model Registry
//!
//! Enumerates the chat and embedding back-ends available to the process and
//! resolves [`ModelDescriptor`]s into live clients. Resolution is idempotent:
//! a descriptor that already carries a bound client is returned unchanged.
//!
//! Endpoint, key and deployment names are read from the process environment
//! once, at registry construction. Descriptors loaded from configuration may
//! also carry explicit credentials, which take precedence over the registry.

use std::collections::HashMap;
use std::env;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{GatewayError, RegistryError};
use crate::gateway::{LlmGateway, OpenAiChatClient};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    Azure,
    OpenAi,
}

impl Default for ModelProvider {
    fn default() -> Self {
        Self::Azure
    }
}

impl fmt::Display for ModelProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Azure => write!(f, "azure"),
            Self::OpenAi => write!(f, "openai"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    ChatMultimodal,
    ChatText,
    Embedding,
}

impl Default for ModelFamily {
    fn default() -> Self {
        Self::ChatMultimodal
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

fn default_api_version() -> String {
    "2024-12-01-preview".to_string()
}

/// Embedding output width for the known embedding models.
pub fn dimensions_for_model(model_name: &str) -> Option<usize> {
    match model_name {
        "text-embedding-ada-002" | "text-embedding-3-small" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        _ => None,
    }
}

/// Multimodal-capable chat models; everything else chat-shaped is text-only.
pub fn family_for_model_name(model_name: &str) -> ModelFamily {
    if model_name.starts_with("text-embedding") {
        ModelFamily::Embedding
    } else if matches!(model_name, "gpt-4o" | "gpt-45" | "o1") {
        ModelFamily::ChatMultimodal
    } else {
        ModelFamily::ChatText
    }
}

/// Identifies one back-end model and, once resolved, carries its live client.
///
/// The client handle is never serialized; a freshly constructed or freshly
/// deserialized descriptor is unbound until it passes through
/// [`ModelRegistry::resolve`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelDescriptor {
    #[serde(default)]
    pub provider: ModelProvider,
    #[serde(default)]
    pub family: ModelFamily,
    pub model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub key: String,
    /// Provider-side deployment name; defaults to `model_name` when empty.
    #[serde(default)]
    pub deployment: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
    #[serde(skip)]
    pub client: Option<Box<dyn LlmGateway>>,
}

impl PartialEq for ModelDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.provider == other.provider
            && self.family == other.family
            && self.model_name == other.model_name
            && self.reasoning_effort == other.reasoning_effort
            && self.endpoint == other.endpoint
            && self.key == other.key
            && self.deployment == other.deployment
            && self.api_version == other.api_version
            && self.dimensions == other.dimensions
    }
}

impl ModelDescriptor {
    fn new(family: ModelFamily, model_name: &str) -> Self {
        Self {
            provider: ModelProvider::Azure,
            family,
            model_name: model_name.to_string(),
            reasoning_effort: Some(ReasoningEffort::Medium),
            endpoint: String::new(),
            key: String::new(),
            deployment: String::new(),
            api_version: default_api_version(),
            dimensions: dimensions_for_model(model_name),
            client: None,
        }
    }

    pub fn multimodal(model_name: &str) -> Self {
        Self::new(ModelFamily::ChatMultimodal, model_name)
    }

    pub fn text(model_name: &str) -> Self {
        Self::new(ModelFamily::ChatText, model_name)
    }

    pub fn embedding(model_name: &str) -> Self {
        let mut descriptor = Self::new(ModelFamily::Embedding, model_name);
        descriptor.reasoning_effort = None;
        descriptor
    }

    /// Binds a live client. Used by the registry and by tests that inject
    /// mock gateways.
    pub fn bind(&mut self, client: Box<dyn LlmGateway>) {
        self.client = Some(client);
    }

    pub fn is_bound(&self) -> bool {
        self.client.is_some()
    }

    /// The bound gateway, or [`GatewayError::Unbound`] when `resolve` has not
    /// run yet.
    pub fn client(&self) -> Result<&dyn LlmGateway, GatewayError> {
        self.client
            .as_deref()
            .ok_or(GatewayError::Unbound)
    }
}

impl Default for ModelDescriptor {
    fn default() -> Self {
        Self::multimodal("gpt-4o")
    }
}

/// The resolved connection details for one registered model.
#[derive(Clone, Debug, Default)]
pub struct ResolvedEndpoint {
    pub endpoint: String,
    pub key: String,
    pub deployment: String,
    pub api_version: String,
    pub dimensions: Option<usize>,
}

/// Ensures a bare Azure resource name becomes a full endpoint URL.
fn azure_endpoint(resource: &str) -> String {
    if resource.contains("https://") {
        resource.to_string()
    } else {
        format!("https://{resource}.openai.azure.com")
    }
}

fn env_or_default(name: &str) -> String {
    env::var(name).unwrap_or_default()
}

/// Environment-variable suffix for each known model name.
fn env_suffix(model_name: &str) -> Option<&'static str> {
    match model_name {
        "gpt-4o" => Some("4O"),
        "o1" => Some("O1"),
        "o1-mini" => Some("O1_MINI"),
        "o3-mini" => Some("O3_MINI"),
        "text-embedding-ada-002" => Some("EMBEDDING_ADA"),
        "text-embedding-3-small" => Some("EMBEDDING_SMALL"),
        "text-embedding-3-large" => Some("EMBEDDING_LARGE"),
        _ => None,
    }
}

const KNOWN_MODELS: &[&str] = &[
    "gpt-4o",
    "o1",
    "o1-mini",
    "o3-mini",
    "text-embedding-ada-002",
    "text-embedding-3-small",
    "text-embedding-3-large",
];

/// Process-wide table of registered back-ends.
#[derive(Clone, Debug, Default)]
pub struct ModelRegistry {
    entries: HashMap<(ModelProvider, String), ResolvedEndpoint>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the registry from the process environment.
    ///
    /// Azure models register when their `AZURE_OPENAI_RESOURCE_*` or
    /// `AZURE_OPENAI_KEY_*` variable is set; OpenAI models register when
    /// `OPENAI_API_KEY` is set.
    pub fn from_env() -> Self {
        let mut registry = Self::new();
        let azure_api_version = env::var("AZURE_OPENAI_API_VERSION")
            .unwrap_or_else(|_| default_api_version());

        for model_name in KNOWN_MODELS {
            let Some(suffix) = env_suffix(model_name) else {
                continue;
            };
            let resource = env_or_default(&format!("AZURE_OPENAI_RESOURCE_{suffix}"));
            let key = env_or_default(&format!("AZURE_OPENAI_KEY_{suffix}"));
            if resource.is_empty() && key.is_empty() {
                continue;
            }
            let deployment = env_or_default(&format!("AZURE_OPENAI_MODEL_{suffix}"));
            registry.insert(
                ModelProvider::Azure,
                model_name,
                ResolvedEndpoint {
                    endpoint: azure_endpoint(&resource),
                    key,
                    deployment,
                    api_version: azure_api_version.clone(),
                    dimensions: dimensions_for_model(model_name),
                },
            );
        }

        let openai_key = env_or_default("OPENAI_API_KEY");
        if !openai_key.is_empty() {
            for model_name in KNOWN_MODELS {
                let deployment = env_suffix(model_name)
                    .map(|suffix| env_or_default(&format!("OPENAI_MODEL_{suffix}")))
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(|| model_name.to_string());
                registry.insert(
                    ModelProvider::OpenAi,
                    model_name,
                    ResolvedEndpoint {
                        endpoint: "https://api.openai.com/v1".to_string(),
                        key: openai_key.clone(),
                        deployment,
                        api_version: String::new(),
                        dimensions: dimensions_for_model(model_name),
                    },
                );
            }
        }

        registry
    }

    pub fn insert(
        &mut self,
        provider: ModelProvider,
        model_name: &str,
        endpoint: ResolvedEndpoint,
    ) {
        self.entries
            .insert((provider, model_name.to_string()), endpoint);
    }

    /// Binds a live client onto the descriptor.
    ///
    /// Already-bound descriptors are left untouched. Descriptors carrying
    /// their own endpoint and key bypass the registry lookup.
    pub fn resolve(&self, descriptor: &mut ModelDescriptor) -> Result<(), RegistryError> {
        if descriptor.is_bound() {
            return Ok(());
        }

        if descriptor.endpoint.is_empty() || descriptor.key.is_empty() {
            let entry = self
                .entries
                .get(&(descriptor.provider, descriptor.model_name.clone()))
                .ok_or_else(|| RegistryError::UnknownModel {
                    provider: descriptor.provider.to_string(),
                    model_name: descriptor.model_name.clone(),
                })?;
            descriptor.endpoint = entry.endpoint.clone();
            descriptor.key = entry.key.clone();
            if descriptor.deployment.is_empty() {
                descriptor.deployment = entry.deployment.clone();
            }
            if !entry.api_version.is_empty() {
                descriptor.api_version = entry.api_version.clone();
            }
            if descriptor.dimensions.is_none() {
                descriptor.dimensions = entry.dimensions;
            }
        }

        if descriptor.endpoint.is_empty() && descriptor.provider == ModelProvider::OpenAi {
            descriptor.endpoint = "https://api.openai.com/v1".to_string();
        }
        if descriptor.endpoint.is_empty() || descriptor.key.is_empty() {
            return Err(RegistryError::MissingCredentials(
                descriptor.model_name.clone(),
            ));
        }
        if descriptor.deployment.is_empty() {
            descriptor.deployment = descriptor.model_name.clone();
        }

        let client = OpenAiChatClient::new(
            descriptor.provider,
            descriptor.endpoint.clone(),
            descriptor.key.clone(),
            descriptor.deployment.clone(),
            descriptor.model_name.clone(),
            descriptor.api_version.clone(),
            descriptor.reasoning_effort.map(|e| e.as_str().to_string()),
        )
        .map_err(|e| RegistryError::Client {
            model: descriptor.model_name.clone(),
            reason: e.to_string(),
        })?;
        descriptor.bind(Box::new(client));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_entry() -> ResolvedEndpoint {
        ResolvedEndpoint {
            endpoint: "https://unit.openai.azure.com".to_string(),
            key: "secret".to_string(),
            deployment: "gpt-4o-2".to_string(),
            api_version: "2024-12-01-preview".to_string(),
            dimensions: None,
        }
    }

    #[test]
    fn resolve_binds_a_client_once() {
        let mut registry = ModelRegistry::new();
        registry.insert(ModelProvider::Azure, "gpt-4o", test_entry());

        let mut descriptor = ModelDescriptor::multimodal("gpt-4o");
        registry.resolve(&mut descriptor).unwrap();
        assert!(descriptor.is_bound());
        assert_eq!(descriptor.deployment, "gpt-4o-2");

        // Resolving again must not rebuild or reconfigure anything.
        descriptor.endpoint = "https://should-not-change".to_string();
        registry.resolve(&mut descriptor).unwrap();
        assert_eq!(descriptor.endpoint, "https://should-not-change");
    }

    #[test]
    fn resolve_fails_for_unregistered_models() {
        let registry = ModelRegistry::new();
        let mut descriptor = ModelDescriptor::text("o1-mini");
        let err = registry.resolve(&mut descriptor).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownModel { .. }));
    }

    #[test]
    fn resolve_fails_without_credentials() {
        let mut registry = ModelRegistry::new();
        registry.insert(
            ModelProvider::Azure,
            "gpt-4o",
            ResolvedEndpoint {
                endpoint: "https://unit.openai.azure.com".to_string(),
                key: String::new(),
                ..Default::default()
            },
        );
        let mut descriptor = ModelDescriptor::multimodal("gpt-4o");
        let err = registry.resolve(&mut descriptor).unwrap_err();
        assert!(matches!(err, RegistryError::MissingCredentials(_)));
    }

    #[test]
    fn descriptor_credentials_bypass_the_registry() {
        let registry = ModelRegistry::new();
        let mut descriptor = ModelDescriptor::text("gpt-4o");
        descriptor.endpoint = "https://direct.openai.azure.com".to_string();
        descriptor.key = "inline".to_string();
        registry.resolve(&mut descriptor).unwrap();
        assert!(descriptor.is_bound());
        assert_eq!(descriptor.deployment, "gpt-4o");
    }

    #[test]
    fn embedding_dimensions_follow_the_model() {
        assert_eq!(dimensions_for_model("text-embedding-3-small"), Some(1536));
        assert_eq!(dimensions_for_model("text-embedding-3-large"), Some(3072));
        assert_eq!(dimensions_for_model("gpt-4o"), None);
        let descriptor = ModelDescriptor::embedding("text-embedding-3-large");
        assert_eq!(descriptor.dimensions, Some(3072));
    }

    #[test]
    fn families_are_inferred_from_model_names() {
        assert_eq!(family_for_model_name("gpt-4o"), ModelFamily::ChatMultimodal);
        assert_eq!(family_for_model_name("o1"), ModelFamily::ChatMultimodal);
        assert_eq!(family_for_model_name("o1-mini"), ModelFamily::ChatText);
        assert_eq!(
            family_for_model_name("text-embedding-3-small"),
            ModelFamily::Embedding
        );
    }

    #[test]
    fn descriptors_serialize_without_client_handles() {
        let mut descriptor = ModelDescriptor::multimodal("gpt-4o");
        descriptor.key = "k".to_string();
        let json = serde_json::to_value(&descriptor).unwrap();
        assert!(json.get("client").is_none());
        let back: ModelDescriptor = serde_json::from_value(json).unwrap();
        assert!(!back.is_bound());
        assert_eq!(back, descriptor);
    }
}
