//! # Pipeline Orchestrator
//!
//! Drives one document through page-by-page extraction and document-level
//! post-processing, persisting a resume token after every completed stage.
//!
//! Pages run in strictly ascending order; within a page the stage order is
//! fixed: text, images, tables, custom steps, combine. A stage failure aborts
//! the run without recording the failed stage, so a later run resumes exactly
//! there. Post-processing failures are localized: a missing translation or
//! custom artifact never aborts the document.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::analyzer::{
    self, PageImageFormat, PdfRasterizer, PdfiumRasterizer,
};
use crate::config::{CustomProcessingStep, PipelineConfiguration};
use crate::constants::{DEFAULT_TEMPERATURE, PAGE_RENDER_DPI};
use crate::content::{
    document_id_for, load_page_custom_steps, load_page_images, load_page_tables, DataUnit,
    DocumentContent, ExtractedImage, ExtractedTable, ExtractedText, PDFMetadata, PageContent,
    PipelineStage, PipelineState, PostProcessingContent,
};
use crate::errors::PipelineError;
use crate::gateway::strip_code_fence;
use crate::prompts::ingestion::{
    CUSTOM_DOCUMENT_PROCESSING_PROMPT, CUSTOM_PAGE_PROCESSING_PROMPT,
    DOCUMENT_CONDENSATION_PROMPT, TABLE_OF_CONTENTS_PROMPT, TRANSLATE_TEXT_PROMPT,
};
use crate::registry::{ModelFamily, ModelRegistry};

fn page_failure(
    page: u32,
    stage: PipelineStage,
    source: impl Into<PipelineError>,
) -> PipelineError {
    PipelineError::PageFailure {
        page,
        stage,
        source: Box::new(source.into()),
    }
}

/// Resumable, page-by-page PDF ingestion.
pub struct PdfIngestionPipeline {
    config: PipelineConfiguration,
    metadata: PDFMetadata,
    output_dir: PathBuf,
    pdf_path: PathBuf,
    state_path: PathBuf,
    rasterizer: Arc<dyn PdfRasterizer>,
}

impl std::fmt::Debug for PdfIngestionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfIngestionPipeline")
            .field("config", &self.config)
            .field("metadata", &self.metadata)
            .field("output_dir", &self.output_dir)
            .field("pdf_path", &self.pdf_path)
            .field("state_path", &self.state_path)
            .finish_non_exhaustive()
    }
}

impl PdfIngestionPipeline {
    /// Builds a pipeline with the production pdfium rasterizer.
    pub fn new(
        config: PipelineConfiguration,
        registry: &ModelRegistry,
    ) -> Result<Self, PipelineError> {
        Self::with_rasterizer(config, registry, Arc::new(PdfiumRasterizer::new()))
    }

    /// Builds a pipeline with a caller-provided rasterizer.
    ///
    /// Validates the source PDF, prepares the output directory (copying the
    /// source document into it), and resolves every model descriptor in the
    /// configuration through the registry.
    pub fn with_rasterizer(
        mut config: PipelineConfiguration,
        registry: &ModelRegistry,
        rasterizer: Arc<dyn PdfRasterizer>,
    ) -> Result<Self, PipelineError> {
        let pdf_path = PathBuf::from(&config.pdf_path);
        if !pdf_path.is_file() {
            return Err(PipelineError::Input(format!(
                "PDF file not found: {}",
                pdf_path.display()
            )));
        }

        registry.resolve(&mut config.multimodal_model)?;
        registry.resolve(&mut config.text_model)?;
        for step in config
            .custom_page_processing_steps
            .iter_mut()
            .chain(config.custom_document_processing_steps.iter_mut())
        {
            if let Some(model) = step.model.as_mut() {
                registry.resolve(model)?;
            }
        }

        let document_id = document_id_for(&config.pdf_path);
        let output_dir = config
            .output_directory
            .clone()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("processed").join(&document_id));
        std::fs::create_dir_all(&output_dir)?;

        let filename = pdf_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| PipelineError::Input(format!("not a file: {}", pdf_path.display())))?;
        let local_copy = output_dir.join(&filename);
        if local_copy != pdf_path {
            std::fs::copy(&pdf_path, &local_copy)?;
        }

        let total_pages = rasterizer.page_count(&pdf_path)?;
        let metadata = PDFMetadata {
            document_id,
            document_path: local_copy.to_string_lossy().into_owned(),
            filename,
            total_pages,
            processed_pages: 0,
            output_directory: output_dir.to_string_lossy().into_owned(),
            cloud_storage_path: None,
        };
        let state_path = output_dir.join("pipeline_state.json");

        Ok(Self {
            config,
            metadata,
            output_dir,
            pdf_path,
            state_path,
            rasterizer,
        })
    }

    pub fn metadata(&self) -> &PDFMetadata {
        &self.metadata
    }

    pub fn output_directory(&self) -> &Path {
        &self.output_dir
    }

    /// Processes every page and runs post-processing, returning the complete
    /// document tree. Safe to call again after an interruption.
    #[instrument(skip(self), fields(document_id = %self.metadata.document_id))]
    pub async fn process_pdf(&mut self) -> Result<DocumentContent, PipelineError> {
        if !self.config.resume_processing_if_interrupted {
            PipelineState::reset(&self.state_path)?;
        }
        let mut state = PipelineState::load_or_default(&self.state_path);

        let mut pages = Vec::with_capacity(self.metadata.total_pages as usize);
        for page_number in 1..=self.metadata.total_pages {
            info!(
                page_number,
                total_pages = self.metadata.total_pages,
                "processing page"
            );
            let page = self.process_page(page_number, &mut state).await?;
            pages.push(page);
            self.metadata.processed_pages = pages.len() as u32;
        }

        let full_text = pages
            .iter()
            .filter_map(|p| p.page_text.as_ref())
            .map(|u| u.text.clone())
            .collect::<Vec<_>>()
            .join("\n");

        let mut document = DocumentContent {
            metadata: self.metadata.clone(),
            pages,
            full_text: Some(full_text),
            post_processing_content: None,
        };

        self.apply_post_processing(&mut document, &mut state).await?;
        document.save_to_directory(&self.output_dir)?;
        info!(document_id = %self.metadata.document_id, "document processing complete");
        Ok(document)
    }

    // --- Per-page stages ---

    async fn process_page(
        &self,
        page_number: u32,
        state: &mut PipelineState,
    ) -> Result<PageContent, PipelineError> {
        let page_dir = self
            .output_dir
            .join("pages")
            .join(format!("page_{page_number}"));
        std::fs::create_dir_all(&page_dir)?;

        let format = if self.config.process_pages_as_jpg {
            PageImageFormat::Jpg
        } else {
            PageImageFormat::Png
        };
        let image_path = page_dir.join(format!("page_{page_number}.{}", format.extension()));
        if !image_path.is_file() {
            self.rasterizer
                .render_page(
                    &self.pdf_path,
                    page_number,
                    &image_path,
                    format,
                    PAGE_RENDER_DPI,
                )
                .map_err(|e| page_failure(page_number, PipelineStage::Text, e))?;
        }
        let image_path = image_path.to_string_lossy().into_owned();

        let text = self
            .text_stage(page_number, &page_dir, &image_path, state)
            .await?;
        let images = self.images_stage(page_number, &image_path, state).await?;
        let tables = self.tables_stage(page_number, &image_path, state).await?;
        let custom_steps = self
            .custom_page_stage(page_number, &page_dir, &text, &image_path, state)
            .await?;

        let mut page = PageContent {
            page_number,
            text,
            page_image_path: image_path.clone(),
            images,
            tables,
            page_text: None,
            page_image_cloud_storage_path: None,
            custom_page_processing_steps: custom_steps,
        };

        let mut twin = DataUnit::new(page.combine_content()).with_page_image(image_path.as_str());
        twin.save_to_file(&page_dir, Some(&format!("page_{page_number}_twin.txt")))?;
        page.page_text = Some(twin);
        Ok(page)
    }

    async fn text_stage(
        &self,
        page_number: u32,
        page_dir: &Path,
        image_path: &str,
        state: &mut PipelineState,
    ) -> Result<ExtractedText, PipelineError> {
        if state.is_done(PipelineStage::Text, page_number) {
            let text_file = page_dir.join(format!("page_{page_number}.txt"));
            if text_file.is_file() {
                return Ok(ExtractedText::load_from_file(
                    &text_file,
                    page_number,
                    Some(image_path),
                )
                .map_err(|e| page_failure(page_number, PipelineStage::Text, e))?);
            }
            return Ok(ExtractedText::new(page_number, DataUnit::new("")));
        }

        let raw_text = self
            .rasterizer
            .extract_page_text(&self.pdf_path, page_number)
            .map_err(|e| page_failure(page_number, PipelineStage::Text, e))?;

        let processed = if self.config.process_text {
            let gateway = self
                .config
                .multimodal_model
                .client()
                .map_err(|e| page_failure(page_number, PipelineStage::Text, e))?;
            analyzer::process_text(gateway, &raw_text, Some(image_path))
                .await
                .map_err(|e| page_failure(page_number, PipelineStage::Text, e))?
        } else {
            raw_text
        };

        let mut extracted = ExtractedText::new(
            page_number,
            DataUnit::new(processed).with_page_image(image_path),
        );
        extracted
            .save_to_directory(&self.output_dir)
            .map_err(|e| page_failure(page_number, PipelineStage::Text, e))?;

        state.mark_done(PipelineStage::Text, page_number);
        state.save(&self.state_path)?;
        Ok(extracted)
    }

    async fn images_stage(
        &self,
        page_number: u32,
        image_path: &str,
        state: &mut PipelineState,
    ) -> Result<Vec<ExtractedImage>, PipelineError> {
        if !self.config.process_images {
            return Ok(Vec::new());
        }
        if state.is_done(PipelineStage::Images, page_number) {
            return Ok(load_page_images(&self.output_dir, page_number, image_path)
                .map_err(|e| page_failure(page_number, PipelineStage::Images, e))?);
        }

        let gateway = self
            .config
            .multimodal_model
            .client()
            .map_err(|e| page_failure(page_number, PipelineStage::Images, e))?;
        let detected = analyzer::analyze_images(gateway, image_path)
            .await
            .map_err(|e| page_failure(page_number, PipelineStage::Images, e))?;

        let mut images = Vec::with_capacity(detected.len());
        for (i, visual) in detected.into_iter().enumerate() {
            // Visual types become filename segments; keep them path-safe.
            let image_type = visual.visual_type.replace('/', "-");
            let mut image = ExtractedImage {
                page_number,
                image_path: image_path.to_string(),
                image_type,
                text: Some(DataUnit::new(visual.description()).with_page_image(image_path)),
            };
            image
                .save_to_directory(&self.output_dir, i)
                .map_err(|e| page_failure(page_number, PipelineStage::Images, e))?;
            images.push(image);
        }

        state.mark_done(PipelineStage::Images, page_number);
        state.save(&self.state_path)?;
        Ok(images)
    }

    async fn tables_stage(
        &self,
        page_number: u32,
        image_path: &str,
        state: &mut PipelineState,
    ) -> Result<Vec<ExtractedTable>, PipelineError> {
        if !self.config.process_tables {
            return Ok(Vec::new());
        }
        if state.is_done(PipelineStage::Tables, page_number) {
            return Ok(load_page_tables(&self.output_dir, page_number, image_path)
                .map_err(|e| page_failure(page_number, PipelineStage::Tables, e))?);
        }

        let gateway = self
            .config
            .multimodal_model
            .client()
            .map_err(|e| page_failure(page_number, PipelineStage::Tables, e))?;
        let detected = analyzer::analyze_tables(gateway, image_path)
            .await
            .map_err(|e| page_failure(page_number, PipelineStage::Tables, e))?;

        let mut tables = Vec::with_capacity(detected.len());
        for (i, table) in detected.into_iter().enumerate() {
            let mut extracted = ExtractedTable {
                page_number,
                summary: Some(table.summary()),
                text: Some(DataUnit::new(table.markdown).with_page_image(image_path)),
            };
            extracted
                .save_to_directory(&self.output_dir, i)
                .map_err(|e| page_failure(page_number, PipelineStage::Tables, e))?;
            tables.push(extracted);
        }

        state.mark_done(PipelineStage::Tables, page_number);
        state.save(&self.state_path)?;
        Ok(tables)
    }

    async fn custom_page_stage(
        &self,
        page_number: u32,
        page_dir: &Path,
        text: &ExtractedText,
        image_path: &str,
        state: &mut PipelineState,
    ) -> Result<Vec<DataUnit>, PipelineError> {
        if self.config.custom_page_processing_steps.is_empty() {
            return Ok(Vec::new());
        }
        if state.is_done(PipelineStage::CustomPage, page_number) {
            return Ok(
                load_page_custom_steps(&self.output_dir, page_number, image_path)
                    .map_err(|e| page_failure(page_number, PipelineStage::CustomPage, e))?,
            );
        }

        let page_text = text
            .text
            .as_ref()
            .map(|u| u.text.clone())
            .unwrap_or_default();
        let custom_dir = page_dir.join("custom_processing");

        let mut outputs = Vec::new();
        for step in &self.config.custom_page_processing_steps {
            let prompt = CUSTOM_PAGE_PROCESSING_PROMPT
                .replace("{custom_instructions}", &step.prompt)
                .replace("{page_text}", &page_text);
            let images = [image_path.to_string()];
            let mut unit = self
                .run_custom_step(step, &prompt, &images)
                .await
                .map_err(|e| page_failure(page_number, PipelineStage::CustomPage, e))?;
            unit.page_image_path = Some(image_path.to_string());
            let extension = if step.data_model.is_some() { "json" } else { "txt" };
            let filename = format!("page_step_{}.{extension}", step.name);
            unit.save_to_file(&custom_dir, Some(&filename))
                .map_err(|e| page_failure(page_number, PipelineStage::CustomPage, e))?;
            outputs.push(unit);
        }

        state.mark_done(PipelineStage::CustomPage, page_number);
        state.save(&self.state_path)?;
        Ok(outputs)
    }

    /// Runs one custom step. The step's descriptor defaults to the configured
    /// multimodal model; text-only descriptors get no image attachments.
    /// Structured steps serialize their result as compact JSON.
    async fn run_custom_step(
        &self,
        step: &CustomProcessingStep,
        prompt: &str,
        images: &[String],
    ) -> Result<DataUnit, PipelineError> {
        let descriptor = step.model.as_ref().unwrap_or(&self.config.multimodal_model);
        let gateway = descriptor.client()?;
        let no_images: [String; 0] = [];
        let images: &[String] = if descriptor.family == ModelFamily::ChatText {
            &no_images
        } else {
            images
        };

        let text = match &step.data_model {
            Some(schema) => {
                let value = gateway.chat_structured(prompt, images, schema).await?;
                serde_json::to_string(&value)?
            }
            None => gateway.chat(prompt, images, Some(DEFAULT_TEMPERATURE)).await?,
        };
        Ok(DataUnit::new(text))
    }

    // --- Post-processing ---

    async fn apply_post_processing(
        &self,
        document: &mut DocumentContent,
        state: &mut PipelineState,
    ) -> Result<(), PipelineError> {
        if state.post_processing_done {
            info!("post-processing already complete, reloading artifacts");
            document.post_processing_content =
                Some(PostProcessingContent::load_from_directory(&self.output_dir)?);
            return Ok(());
        }

        let full_text = document.full_text.clone().unwrap_or_default();
        let text_gateway = self.config.text_model.client()?;
        let mut post = PostProcessingContent::default();

        if self.config.save_text_files {
            let mut unit = DataUnit::new(full_text.clone());
            unit.save_to_file(&self.output_dir, Some("text_twin.md"))?;
            post.full_text = Some(unit);
        }

        if self.config.generate_condensed_text {
            let prompt = DOCUMENT_CONDENSATION_PROMPT.replace("{document}", &full_text);
            match text_gateway.chat(&prompt, &[], Some(DEFAULT_TEMPERATURE)).await {
                Ok(condensed) => {
                    let mut unit = DataUnit::new(condensed);
                    unit.save_to_file(&self.output_dir, Some("condensed_text.md"))?;
                    post.condensed_text = Some(unit);
                }
                Err(e) => warn!("condensed text generation failed: {e}"),
            }
        }

        if self.config.generate_table_of_contents {
            let prompt = TABLE_OF_CONTENTS_PROMPT.replace("{document}", &full_text);
            match text_gateway.chat(&prompt, &[], Some(DEFAULT_TEMPERATURE)).await {
                Ok(toc) => {
                    let mut unit = DataUnit::new(strip_code_fence(&toc).to_string());
                    unit.save_to_file(&self.output_dir, Some("table_of_contents.md"))?;
                    post.table_of_contents = Some(unit);
                }
                Err(e) => warn!("table of contents generation failed: {e}"),
            }
        }

        let custom_dir = self.output_dir.join("custom_processing");
        for step in &self.config.custom_document_processing_steps {
            let prompt = CUSTOM_DOCUMENT_PROCESSING_PROMPT
                .replace("{custom_instructions}", &step.prompt)
                .replace("{document_text}", &full_text);
            match self.run_custom_step(step, &prompt, &[]).await {
                Ok(mut unit) => {
                    let extension = if step.data_model.is_some() { "json" } else { "txt" };
                    let filename = format!("document_step_{}.{extension}", step.name);
                    unit.save_to_file(&custom_dir, Some(&filename))?;
                    post.custom_document_processing_steps.push(unit);
                }
                Err(e) => warn!(step = %step.name, "custom document step failed: {e}"),
            }
        }

        let translations_dir = self.output_dir.join("translations");
        let mut translated_full = Vec::new();
        for language in &self.config.translate_full_text {
            match self.translate(text_gateway, &full_text, language).await {
                Ok(mut unit) => {
                    let filename = format!("full_text_{language}.txt");
                    unit.save_to_file(&translations_dir, Some(&filename))?;
                    translated_full.push(unit);
                }
                Err(e) => warn!(%language, "full text translation failed: {e}"),
            }
        }
        if !translated_full.is_empty() {
            post.translated_full_texts = Some(translated_full);
        }

        let mut translated_condensed = Vec::new();
        if !self.config.translate_condensed_text.is_empty() {
            match post.condensed_text.as_ref() {
                Some(condensed) => {
                    for language in &self.config.translate_condensed_text {
                        match self.translate(text_gateway, &condensed.text, language).await {
                            Ok(mut unit) => {
                                let filename = format!("condensed_text_{language}.txt");
                                unit.save_to_file(&translations_dir, Some(&filename))?;
                                translated_condensed.push(unit);
                            }
                            Err(e) => warn!(%language, "condensed text translation failed: {e}"),
                        }
                    }
                }
                None => warn!("condensed text translations requested but no condensed text exists"),
            }
        }
        if !translated_condensed.is_empty() {
            post.translated_condensed_texts = Some(translated_condensed);
        }

        state.post_processing_done = true;
        state.save(&self.state_path)?;
        document.post_processing_content = Some(post);
        Ok(())
    }

    async fn translate(
        &self,
        gateway: &dyn crate::gateway::LlmGateway,
        text: &str,
        language: &str,
    ) -> Result<DataUnit, PipelineError> {
        let prompt = TRANSLATE_TEXT_PROMPT
            .replace("{target_language}", language)
            .replace("{text}", text);
        let translated = gateway.chat(&prompt, &[], Some(DEFAULT_TEMPERATURE)).await?;
        Ok(DataUnit::new(translated).with_language(language))
    }
}
