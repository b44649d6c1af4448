//! # Page Analyzer
//!
//! Turns one PDF page into raw material for the pipeline: a 300 DPI raster
//! image, the page's raw text, and LLM-derived descriptions of the page's
//! text, embedded visuals and embedded tables.
//!
//! Rasterization sits behind [`PdfRasterizer`] so alternative engines (or
//! test doubles) can be swapped in without touching the pipeline.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::constants::DEFAULT_TEMPERATURE;
use crate::errors::AnalyzerError;
use crate::gateway::{LlmGateway, StructuredSchema};
use crate::prompts::ingestion::{
    IMAGE_DESCRIPTION_PROMPT, PROCESS_EXTRACTED_TEXT_PROMPT, TABLE_DESCRIPTION_PROMPT,
};

/// Raster output format for page images.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageImageFormat {
    Png,
    Jpg,
}

impl PageImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpg => "jpg",
        }
    }
}

/// PDF access used by the pipeline: page counting, raw text extraction and
/// page rasterization. Page numbers are 1-based.
pub trait PdfRasterizer: Send + Sync {
    fn page_count(&self, pdf: &Path) -> Result<u32, AnalyzerError>;

    fn extract_page_text(&self, pdf: &Path, page_number: u32) -> Result<String, AnalyzerError>;

    fn render_page(
        &self,
        pdf: &Path,
        page_number: u32,
        output: &Path,
        format: PageImageFormat,
        dpi: u32,
    ) -> Result<(), AnalyzerError>;
}

/// Production rasterizer backed by the pdfium library.
#[derive(Clone, Copy, Debug, Default)]
pub struct PdfiumRasterizer;

impl PdfiumRasterizer {
    pub fn new() -> Self {
        Self
    }
}

fn bind_pdfium(pdf: &Path) -> Result<pdfium_render::prelude::Pdfium, AnalyzerError> {
    use pdfium_render::prelude::Pdfium;

    let bindings = Pdfium::bind_to_system_library().map_err(|e| AnalyzerError::Pdf {
        path: pdf.display().to_string(),
        reason: format!("failed to bind pdfium: {e}"),
    })?;
    Ok(Pdfium::new(bindings))
}

fn load_document<'a>(
    pdfium: &'a pdfium_render::prelude::Pdfium,
    pdf: &Path,
) -> Result<pdfium_render::prelude::PdfDocument<'a>, AnalyzerError> {
    pdfium
        .load_pdf_from_file(pdf, None)
        .map_err(|e| AnalyzerError::Pdf {
            path: pdf.display().to_string(),
            reason: e.to_string(),
        })
}

impl PdfRasterizer for PdfiumRasterizer {
    fn page_count(&self, pdf: &Path) -> Result<u32, AnalyzerError> {
        let pdfium = bind_pdfium(pdf)?;
        let document = load_document(&pdfium, pdf)?;
        Ok(document.pages().len() as u32)
    }

    fn extract_page_text(&self, pdf: &Path, page_number: u32) -> Result<String, AnalyzerError> {
        let pdfium = bind_pdfium(pdf)?;
        let document = load_document(&pdfium, pdf)?;
        let pages = document.pages();
        let index = page_index(pages.len() as u32, page_number)?;
        let page = pages
            .get(index)
            .map_err(|_| AnalyzerError::PageOutOfRange(page_number))?;
        let text = page
            .text()
            .map_err(|e| AnalyzerError::Pdf {
                path: pdf.display().to_string(),
                reason: e.to_string(),
            })?
            .all();
        Ok(text)
    }

    fn render_page(
        &self,
        pdf: &Path,
        page_number: u32,
        output: &Path,
        format: PageImageFormat,
        dpi: u32,
    ) -> Result<(), AnalyzerError> {
        use pdfium_render::prelude::PdfRenderConfig;

        let pdfium = bind_pdfium(pdf)?;
        let document = load_document(&pdfium, pdf)?;
        let pages = document.pages();
        let index = page_index(pages.len() as u32, page_number)?;
        let page = pages
            .get(index)
            .map_err(|_| AnalyzerError::PageOutOfRange(page_number))?;

        // Page dimensions are in points (1/72 inch).
        let width_px = (page.width().value * dpi as f32 / 72.0).round() as i32;
        let config = PdfRenderConfig::new().set_target_width(width_px);
        let bitmap = page
            .render_with_config(&config)
            .map_err(|e| AnalyzerError::Render {
                page: page_number,
                reason: e.to_string(),
            })?;
        let image = bitmap.as_image();

        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let result = match format {
            PageImageFormat::Png => image.save_with_format(output, image::ImageFormat::Png),
            PageImageFormat::Jpg => image
                .to_rgb8()
                .save_with_format(output, image::ImageFormat::Jpeg),
        };
        result.map_err(|e| AnalyzerError::Render {
            page: page_number,
            reason: e.to_string(),
        })
    }
}

fn page_index(total: u32, page_number: u32) -> Result<u16, AnalyzerError> {
    if page_number == 0 || page_number > total {
        return Err(AnalyzerError::PageOutOfRange(page_number));
    }
    Ok((page_number - 1) as u16)
}

// --- Structured analysis payloads ---

/// The visual categories the image analysis prompt may assign.
pub const VISUAL_TYPES: &[&str] = &[
    "graph",
    "photo",
    "infographic",
    "generic",
    "hardware layout",
    "installation diagram",
    "signal flow",
    "network topology",
    "tool usage",
    "warning sign",
    "safety icon",
    "device front/back panel",
    "UI screen",
    "photo reference",
];

/// One embedded visual, as described by the multimodal model.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DetectedVisual {
    pub visual_description: String,
    pub contextual_relevance: String,
    pub analysis: String,
    pub visual_type: String,
}

impl DetectedVisual {
    /// The text stored in the visual's `DataUnit`.
    pub fn description(&self) -> String {
        format!(
            "{}\n\n{}\n\n{}",
            self.visual_description, self.contextual_relevance, self.analysis
        )
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DetectedVisuals {
    #[serde(default)]
    pub detected_visuals: Vec<DetectedVisual>,
}

/// One embedded table, re-rendered as Markdown by the multimodal model.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DetectedTable {
    pub markdown: String,
    pub contextual_relevance: String,
    pub analysis: String,
}

impl DetectedTable {
    /// The table's summary: context plus analysis.
    pub fn summary(&self) -> String {
        format!("{}\n\n{}", self.contextual_relevance, self.analysis)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DetectedTables {
    #[serde(default)]
    pub detected_tables_detailed_markdown: Vec<DetectedTable>,
}

pub fn detected_visuals_schema() -> StructuredSchema {
    StructuredSchema::new(
        "detected_visuals",
        json!({
            "type": "object",
            "properties": {
                "detected_visuals": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "visual_description": {"type": "string"},
                            "contextual_relevance": {"type": "string"},
                            "analysis": {"type": "string"},
                            "visual_type": {"type": "string", "enum": VISUAL_TYPES},
                        },
                        "required": [
                            "visual_description",
                            "contextual_relevance",
                            "analysis",
                            "visual_type"
                        ],
                        "additionalProperties": false,
                    }
                }
            },
            "required": ["detected_visuals"],
            "additionalProperties": false,
        }),
    )
}

pub fn detected_tables_schema() -> StructuredSchema {
    StructuredSchema::new(
        "detected_tables",
        json!({
            "type": "object",
            "properties": {
                "detected_tables_detailed_markdown": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "markdown": {"type": "string"},
                            "contextual_relevance": {"type": "string"},
                            "analysis": {"type": "string"},
                        },
                        "required": ["markdown", "contextual_relevance", "analysis"],
                        "additionalProperties": false,
                    }
                }
            },
            "required": ["detected_tables_detailed_markdown"],
            "additionalProperties": false,
        }),
    )
}

// --- LLM analysis passes ---

/// Cleans raw page text with the multimodal model, using the page image as
/// ground truth for reading order.
pub async fn process_text(
    gateway: &dyn LlmGateway,
    raw_text: &str,
    page_image_path: Option<&str>,
) -> Result<String, AnalyzerError> {
    let prompt = PROCESS_EXTRACTED_TEXT_PROMPT.replace("{text}", raw_text);
    let images: Vec<String> = page_image_path.map(|p| vec![p.to_string()]).unwrap_or_default();
    Ok(gateway
        .chat(&prompt, &images, Some(DEFAULT_TEMPERATURE))
        .await?)
}

/// Detects and describes embedded visuals on a page image.
pub async fn analyze_images(
    gateway: &dyn LlmGateway,
    page_image_path: &str,
) -> Result<Vec<DetectedVisual>, AnalyzerError> {
    let images = [page_image_path.to_string()];
    let value = gateway
        .chat_structured(IMAGE_DESCRIPTION_PROMPT, &images, &detected_visuals_schema())
        .await?;
    let parsed: DetectedVisuals =
        serde_json::from_value(value).map_err(|e| AnalyzerError::Payload(e.to_string()))?;
    debug!(count = parsed.detected_visuals.len(), "image analysis complete");
    Ok(parsed.detected_visuals)
}

/// Detects embedded tables on a page image and re-renders them as Markdown.
pub async fn analyze_tables(
    gateway: &dyn LlmGateway,
    page_image_path: &str,
) -> Result<Vec<DetectedTable>, AnalyzerError> {
    let images = [page_image_path.to_string()];
    let value = gateway
        .chat_structured(TABLE_DESCRIPTION_PROMPT, &images, &detected_tables_schema())
        .await?;
    let parsed: DetectedTables =
        serde_json::from_value(value).map_err(|e| AnalyzerError::Payload(e.to_string()))?;
    debug!(
        count = parsed.detected_tables_detailed_markdown.len(),
        "table analysis complete"
    );
    Ok(parsed.detected_tables_detailed_markdown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_indexing_is_one_based_and_bounded() {
        assert_eq!(page_index(3, 1).unwrap(), 0);
        assert_eq!(page_index(3, 3).unwrap(), 2);
        assert!(matches!(page_index(3, 0), Err(AnalyzerError::PageOutOfRange(0))));
        assert!(matches!(page_index(3, 4), Err(AnalyzerError::PageOutOfRange(4))));
    }

    #[test]
    fn detected_payloads_deserialize_from_model_output() {
        let value = json!({
            "detected_visuals": [{
                "visual_description": "A bar chart of revenue.",
                "contextual_relevance": "Supports the quarterly summary.",
                "analysis": "Q4 is the strongest quarter.",
                "visual_type": "graph"
            }]
        });
        let visuals: DetectedVisuals = serde_json::from_value(value).unwrap();
        assert_eq!(visuals.detected_visuals.len(), 1);
        assert_eq!(
            visuals.detected_visuals[0].description(),
            "A bar chart of revenue.\n\nSupports the quarterly summary.\n\nQ4 is the strongest quarter."
        );

        let empty: DetectedTables = serde_json::from_value(json!({})).unwrap();
        assert!(empty.detected_tables_detailed_markdown.is_empty());
    }

    #[test]
    fn schemas_require_their_collection_key() {
        let visuals = detected_visuals_schema();
        assert_eq!(visuals.name, "detected_visuals");
        assert_eq!(
            visuals.schema["required"][0].as_str(),
            Some("detected_visuals")
        );
        let tables = detected_tables_schema();
        assert_eq!(
            tables.schema["required"][0].as_str(),
            Some("detected_tables_detailed_markdown")
        );
    }
}
