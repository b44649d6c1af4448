//! # LLM Gateway
//!
//! Uniform access to chat, structured-chat and embedding back-ends over the
//! OpenAI-compatible REST surface. Both the `azure` and `openai` providers
//! speak the same wire shape; only the URL layout and the auth header differ.
//!
//! The gateway never caches responses. Transport failures and retryable
//! status codes (429, 5xx) are retried with exponential backoff inside a
//! bounded total budget; everything else surfaces immediately.

pub mod images;

use std::fmt::Debug;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dyn_clone::DynClone;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::constants::{LLM_REQUEST_TIMEOUT_SECS, LLM_RETRY_BUDGET_SECS};
use crate::errors::GatewayError;
use crate::registry::ModelProvider;

/// A JSON Schema document paired with a name, describing the expected shape
/// of a structured-chat response.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StructuredSchema {
    pub name: String,
    pub schema: Value,
}

impl StructuredSchema {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }

    /// Top-level keys the schema marks as required, if any.
    fn required_keys(&self) -> Vec<&str> {
        self.schema
            .get("required")
            .and_then(Value::as_array)
            .map(|keys| keys.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// A uniform interface over LLM and embedding back-ends.
///
/// `images` entries may be local file paths or URLs; local PNG files are
/// re-encoded to JPEG and inlined as base64 data URLs before transmission.
#[async_trait]
pub trait LlmGateway: Send + Sync + Debug + DynClone {
    /// Free-form chat completion.
    async fn chat(
        &self,
        prompt: &str,
        images: &[String],
        temperature: Option<f32>,
    ) -> Result<String, GatewayError>;

    /// Chat completion constrained to a JSON schema.
    async fn chat_structured(
        &self,
        prompt: &str,
        images: &[String],
        schema: &StructuredSchema,
    ) -> Result<Value, GatewayError>;

    /// Dense vector embedding of a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, GatewayError>;
}

dyn_clone::clone_trait_object!(LlmGateway);

// --- OpenAI-compatible request and response structures ---

#[derive(Serialize, Debug)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Serialize, Debug)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Serialize, Debug)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize, Debug)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize, Debug)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize, Debug)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Serialize, Debug)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
}

#[derive(Deserialize, Debug)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize, Debug)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

// --- Gateway implementation ---

/// Reasoning-family models accept `reasoning_effort` and reject `temperature`.
fn is_reasoning_model(model_name: &str) -> bool {
    matches!(model_name, "o1" | "o1-mini" | "o3-mini")
}

/// `o1-mini` is the one reasoning model that does not take an effort knob.
fn accepts_reasoning_effort(model_name: &str) -> bool {
    is_reasoning_model(model_name) && model_name != "o1-mini"
}

/// A chat/embedding client bound to one resolved model deployment.
#[derive(Clone, Debug)]
pub struct OpenAiChatClient {
    http: reqwest::Client,
    provider: ModelProvider,
    endpoint: String,
    key: String,
    deployment: String,
    model_name: String,
    api_version: String,
    reasoning_effort: Option<String>,
}

struct RequestFailure {
    error: GatewayError,
    retryable: bool,
}

impl OpenAiChatClient {
    pub fn new(
        provider: ModelProvider,
        endpoint: impl Into<String>,
        key: impl Into<String>,
        deployment: impl Into<String>,
        model_name: impl Into<String>,
        api_version: impl Into<String>,
        reasoning_effort: Option<String>,
    ) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(LLM_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(GatewayError::ClientBuild)?;
        Ok(Self {
            http,
            provider,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            key: key.into(),
            deployment: deployment.into(),
            model_name: model_name.into(),
            api_version: api_version.into(),
            reasoning_effort,
        })
    }

    fn chat_url(&self) -> String {
        match self.provider {
            ModelProvider::Azure => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.endpoint, self.deployment, self.api_version
            ),
            ModelProvider::OpenAi => format!("{}/chat/completions", self.endpoint),
        }
    }

    fn embeddings_url(&self) -> String {
        match self.provider {
            ModelProvider::Azure => format!(
                "{}/openai/deployments/{}/embeddings?api-version={}",
                self.endpoint, self.deployment, self.api_version
            ),
            ModelProvider::OpenAi => format!("{}/embeddings", self.endpoint),
        }
    }

    fn chat_request(
        &self,
        system_prompt: &str,
        prompt: &str,
        image_inputs: &[String],
        temperature: Option<f32>,
        response_format: Option<Value>,
    ) -> Result<Value, GatewayError> {
        let mut parts = vec![ContentPart::Text {
            text: prompt.to_string(),
        }];
        for image in image_inputs {
            parts.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: images::inline_image(image)?,
                },
            });
        }

        let reasoning = is_reasoning_model(&self.model_name);
        let request = ChatCompletionRequest {
            model: &self.deployment,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: MessageContent::Text(system_prompt.to_string()),
                },
                ChatMessage {
                    role: "user",
                    content: MessageContent::Parts(parts),
                },
            ],
            temperature: if reasoning { None } else { temperature },
            reasoning_effort: if accepts_reasoning_effort(&self.model_name) {
                self.reasoning_effort.as_deref()
            } else {
                None
            },
            response_format,
        };
        serde_json::to_value(&request)
            .map_err(|e| GatewayError::Deserialization(e.to_string()))
    }

    async fn post_once(&self, url: &str, body: &Value) -> Result<Value, RequestFailure> {
        let request = match self.provider {
            ModelProvider::Azure => self.http.post(url).header("api-key", &self.key),
            ModelProvider::OpenAi => self.http.post(url).bearer_auth(&self.key),
        };

        let response = request.json(body).send().await.map_err(|e| RequestFailure {
            error: GatewayError::Request(e),
            retryable: true,
        })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            let retryable = status.as_u16() == 429 || status.is_server_error();
            return Err(RequestFailure {
                error: GatewayError::Api(format!("{status}: {text}")),
                retryable,
            });
        }

        serde_json::from_str(&text).map_err(|e| RequestFailure {
            error: GatewayError::Deserialization(format!("{e}. Body: {text}")),
            retryable: false,
        })
    }

    /// Posts `body`, retrying transport failures and 429/5xx responses with
    /// exponential backoff until the total retry budget is spent.
    async fn post_with_retry(&self, url: &str, body: &Value) -> Result<Value, GatewayError> {
        let started = Instant::now();
        let budget = Duration::from_secs(LLM_RETRY_BUDGET_SECS);
        let mut delay = Duration::from_secs(1);

        loop {
            match self.post_once(url, body).await {
                Ok(value) => return Ok(value),
                Err(failure) => {
                    if !failure.retryable || started.elapsed() + delay >= budget {
                        return Err(failure.error);
                    }
                    warn!(
                        model = %self.model_name,
                        delay_secs = delay.as_secs(),
                        "retrying model call after failure: {}",
                        failure.error
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(30));
                }
            }
        }
    }

    fn extract_content(value: Value) -> Result<String, GatewayError> {
        let response: ChatCompletionResponse = serde_json::from_value(value)
            .map_err(|e| GatewayError::Deserialization(e.to_string()))?;
        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

/// Strips a single surrounding Markdown code fence, with or without a
/// language tag, from a model response.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.split_once('\n').map(|(_, body)| body) else {
        return trimmed;
    };
    body.strip_suffix("```").map(str::trim).unwrap_or(trimmed)
}

fn parse_structured(content: &str, schema: &StructuredSchema) -> Result<Value, String> {
    let value: Value = serde_json::from_str(strip_code_fence(content))
        .map_err(|e| format!("response is not valid JSON: {e}"))?;
    for key in schema.required_keys() {
        if value.get(key).is_none() {
            return Err(format!("missing required key '{key}'"));
        }
    }
    Ok(value)
}

#[async_trait]
impl LlmGateway for OpenAiChatClient {
    async fn chat(
        &self,
        prompt: &str,
        image_inputs: &[String],
        temperature: Option<f32>,
    ) -> Result<String, GatewayError> {
        let body = self.chat_request(
            "You are a helpful assistant that processes text and images.",
            prompt,
            image_inputs,
            temperature,
            None,
        )?;
        debug!(model = %self.model_name, images = image_inputs.len(), "dispatching chat request");
        let value = self.post_with_retry(&self.chat_url(), &body).await?;
        Self::extract_content(value)
    }

    async fn chat_structured(
        &self,
        prompt: &str,
        image_inputs: &[String],
        schema: &StructuredSchema,
    ) -> Result<Value, GatewayError> {
        let response_format = serde_json::json!({
            "type": "json_schema",
            "json_schema": {
                "name": schema.name,
                "strict": true,
                "schema": schema.schema,
            }
        });
        let body = self.chat_request(
            "You are a helpful assistant that processes text and images to generate structured outputs.",
            prompt,
            image_inputs,
            None,
            Some(response_format),
        )?;

        // One retry on a malformed payload before declaring a schema violation.
        let mut last_reason = String::new();
        for attempt in 0..2 {
            let value = self.post_with_retry(&self.chat_url(), &body).await?;
            let content = Self::extract_content(value)?;
            match parse_structured(&content, schema) {
                Ok(parsed) => return Ok(parsed),
                Err(reason) => {
                    warn!(
                        schema = %schema.name,
                        attempt,
                        "structured response rejected: {reason}"
                    );
                    last_reason = reason;
                }
            }
        }
        Err(GatewayError::SchemaViolation {
            schema: schema.name.clone(),
            reason: last_reason,
        })
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, GatewayError> {
        let request = EmbeddingRequest {
            model: &self.deployment,
            input: [text],
        };
        let body = serde_json::to_value(&request)
            .map_err(|e| GatewayError::Deserialization(e.to_string()))?;
        let value = self.post_with_retry(&self.embeddings_url(), &body).await?;
        let response: EmbeddingResponse = serde_json::from_value(value)
            .map_err(|e| GatewayError::Deserialization(e.to_string()))?;
        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| GatewayError::Api("embeddings response contained no vectors".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_code_fence_removes_markdown_wrapper() {
        let fenced = "```markdown\n# Contents\n- Intro\n```";
        assert_eq!(strip_code_fence(fenced), "# Contents\n- Intro");
        let plain = "# Contents\n- Intro";
        assert_eq!(strip_code_fence(plain), plain);
        let bare = "```\n{\"a\":1}\n```";
        assert_eq!(strip_code_fence(bare), "{\"a\":1}");
    }

    #[test]
    fn parse_structured_enforces_required_keys() {
        let schema = StructuredSchema::new(
            "expansion",
            serde_json::json!({
                "type": "object",
                "required": ["expanded_terms", "related_areas"],
            }),
        );
        let ok = r#"{"expanded_terms": [], "related_areas": []}"#;
        assert!(parse_structured(ok, &schema).is_ok());
        let missing = r#"{"expanded_terms": []}"#;
        assert!(parse_structured(missing, &schema).is_err());
        assert!(parse_structured("not json", &schema).is_err());
    }

    #[test]
    fn reasoning_models_are_classified() {
        assert!(is_reasoning_model("o1"));
        assert!(is_reasoning_model("o1-mini"));
        assert!(!is_reasoning_model("gpt-4o"));
        assert!(accepts_reasoning_effort("o1"));
        assert!(!accepts_reasoning_effort("o1-mini"));
    }
}
