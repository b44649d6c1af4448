//! Shared test doubles for the docflow workspace: a programmable mock LLM
//! gateway, a synthetic PDF rasterizer, and a temp-directory test setup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use docflow::analyzer::{PageImageFormat, PdfRasterizer};
use docflow::errors::{AnalyzerError, GatewayError};
use docflow::gateway::{LlmGateway, StructuredSchema};

// --- Test Setup ---

/// Creates an isolated working area with a dummy source PDF for each test.
pub struct TestSetup {
    pub dir: tempfile::TempDir,
    pub pdf_path: PathBuf,
    pub output_dir: PathBuf,
}

impl TestSetup {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let pdf_path = dir.path().join("source.pdf");
        std::fs::write(&pdf_path, b"%PDF-1.4 synthetic test document")?;
        let output_dir = dir.path().join("output");
        Ok(Self {
            dir,
            pdf_path,
            output_dir,
        })
    }
}

// --- Mock LLM Gateway ---

#[derive(Clone, Debug)]
enum CannedResponse {
    Text(String),
    Structured(Value),
}

/// A programmable [`LlmGateway`].
///
/// Responses are keyed by a unique substring of the prompt; calls are
/// recorded for assertion. Embeddings are deterministic fixed-width vectors.
#[derive(Clone, Debug, Default)]
pub struct MockGateway {
    responses: Arc<Mutex<HashMap<String, CannedResponse>>>,
    calls: Arc<Mutex<Vec<String>>>,
    embed_dimensions: usize,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            embed_dimensions: 1536,
        }
    }

    pub fn with_embed_dimensions(mut self, dimensions: usize) -> Self {
        self.embed_dimensions = dimensions;
        self
    }

    /// Pre-programs a chat response for prompts containing `key`.
    pub fn add_response(&self, key: &str, response: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(key.to_string(), CannedResponse::Text(response.to_string()));
    }

    /// Pre-programs a structured response for prompts containing `key`.
    pub fn add_structured(&self, key: &str, response: Value) {
        self.responses
            .lock()
            .unwrap()
            .insert(key.to_string(), CannedResponse::Structured(response));
    }

    /// Every prompt the gateway has seen, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn lookup(&self, prompt: &str) -> Option<CannedResponse> {
        let responses = self.responses.lock().unwrap();
        responses
            .iter()
            .find(|(key, _)| prompt.contains(key.as_str()))
            .map(|(_, response)| response.clone())
    }

    fn record(&self, prompt: &str) {
        self.calls.lock().unwrap().push(prompt.to_string());
    }
}

#[async_trait]
impl LlmGateway for MockGateway {
    async fn chat(
        &self,
        prompt: &str,
        _images: &[String],
        _temperature: Option<f32>,
    ) -> Result<String, GatewayError> {
        self.record(prompt);
        match self.lookup(prompt) {
            Some(CannedResponse::Text(text)) => Ok(text),
            Some(CannedResponse::Structured(value)) => Ok(value.to_string()),
            None => Err(GatewayError::Api(format!(
                "MockGateway: no response programmed for prompt: '{}'",
                prompt.chars().take(120).collect::<String>()
            ))),
        }
    }

    async fn chat_structured(
        &self,
        prompt: &str,
        _images: &[String],
        schema: &StructuredSchema,
    ) -> Result<Value, GatewayError> {
        self.record(prompt);
        match self.lookup(prompt) {
            Some(CannedResponse::Structured(value)) => Ok(value),
            Some(CannedResponse::Text(text)) => {
                serde_json::from_str(&text).map_err(|e| GatewayError::SchemaViolation {
                    schema: schema.name.clone(),
                    reason: e.to_string(),
                })
            }
            None => Err(GatewayError::Api(format!(
                "MockGateway: no structured response programmed for schema '{}'",
                schema.name
            ))),
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, GatewayError> {
        // Deterministic but text-dependent, so distinct inputs embed apart.
        let seed = (text.len() % 97) as f32 / 97.0;
        Ok((0..self.embed_dimensions)
            .map(|i| seed + i as f32 * 1e-6)
            .collect())
    }
}

// --- Synthetic Rasterizer ---

/// A [`PdfRasterizer`] that fabricates pages instead of reading a real PDF,
/// so pipeline tests run without a system pdfium library.
#[derive(Clone, Debug)]
pub struct SyntheticRasterizer {
    pages: u32,
    page_texts: HashMap<u32, String>,
}

impl SyntheticRasterizer {
    pub fn new(pages: u32) -> Self {
        Self {
            pages,
            page_texts: HashMap::new(),
        }
    }

    /// Overrides the raw text of one page.
    pub fn with_page_text(mut self, page_number: u32, text: &str) -> Self {
        self.page_texts.insert(page_number, text.to_string());
        self
    }

    fn check_range(&self, page_number: u32) -> Result<(), AnalyzerError> {
        if page_number == 0 || page_number > self.pages {
            return Err(AnalyzerError::PageOutOfRange(page_number));
        }
        Ok(())
    }
}

impl PdfRasterizer for SyntheticRasterizer {
    fn page_count(&self, _pdf: &Path) -> Result<u32, AnalyzerError> {
        Ok(self.pages)
    }

    fn extract_page_text(&self, _pdf: &Path, page_number: u32) -> Result<String, AnalyzerError> {
        self.check_range(page_number)?;
        Ok(self
            .page_texts
            .get(&page_number)
            .cloned()
            .unwrap_or_else(|| format!("Raw text of page {page_number}.")))
    }

    fn render_page(
        &self,
        _pdf: &Path,
        page_number: u32,
        output: &Path,
        format: PageImageFormat,
        _dpi: u32,
    ) -> Result<(), AnalyzerError> {
        self.check_range(page_number)?;
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let image = image::RgbImage::from_pixel(8, 8, image::Rgb([255, 255, 255]));
        let image_format = match format {
            PageImageFormat::Png => image::ImageFormat::Png,
            PageImageFormat::Jpg => image::ImageFormat::Jpeg,
        };
        image
            .save_with_format(output, image_format)
            .map_err(|e| AnalyzerError::Render {
                page: page_number,
                reason: e.to_string(),
            })
    }
}
