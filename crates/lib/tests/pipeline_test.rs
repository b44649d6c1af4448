//! End-to-end pipeline tests driven by a mock gateway and a synthetic
//! rasterizer, so nothing touches the network or a system pdfium.

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;

use docflow::content::{PipelineState, PostProcessingContent};
use docflow::errors::PipelineError;
use docflow::gateway::StructuredSchema;
use docflow::registry::ModelRegistry;
use docflow::{CustomProcessingStep, PdfIngestionPipeline, PipelineConfiguration};
use docflow_test_utils::{MockGateway, SyntheticRasterizer, TestSetup};

fn base_config(setup: &TestSetup, gateway: &MockGateway) -> PipelineConfiguration {
    let mut config = PipelineConfiguration::new(setup.pdf_path.to_string_lossy().into_owned());
    config.output_directory = Some(setup.output_dir.to_string_lossy().into_owned());
    config.multimodal_model.bind(Box::new(gateway.clone()));
    config.text_model.bind(Box::new(gateway.clone()));
    config
}

/// Programs the canned analysis responses shared by most tests.
fn program_page_analysis(gateway: &MockGateway, pages: u32) {
    for page in 1..=pages {
        gateway.add_response(
            &format!("Raw text of page {page}."),
            &format!("Clean text of page {page}."),
        );
    }
    gateway.add_structured(
        "identify every embedded visual element",
        json!({
            "detected_visuals": [{
                "visual_description": "A bar chart of quarterly revenue.",
                "contextual_relevance": "Supports the financial summary.",
                "analysis": "Revenue grows every quarter.",
                "visual_type": "graph"
            }]
        }),
    );
    gateway.add_structured(
        "identify every table on the page",
        json!({
            "detected_tables_detailed_markdown": [{
                "markdown": "| Quarter | Revenue |\n|---|---|\n| Q1 | 10 |",
                "contextual_relevance": "Breaks down revenue by quarter.",
                "analysis": "Q1 leads."
            }]
        }),
    );
}

#[tokio::test]
async fn two_page_brochure_produces_the_expected_artifacts() -> Result<()> {
    let setup = TestSetup::new()?;
    let gateway = MockGateway::new();
    program_page_analysis(&gateway, 2);

    let config = base_config(&setup, &gateway);
    let registry = ModelRegistry::new();
    let mut pipeline = PdfIngestionPipeline::with_rasterizer(
        config,
        &registry,
        Arc::new(SyntheticRasterizer::new(2)),
    )?;
    let document = pipeline.process_pdf().await?;

    // Page structure and ordering.
    assert_eq!(document.pages.len(), 2);
    assert_eq!(document.metadata.total_pages, 2);
    assert_eq!(document.metadata.processed_pages, 2);
    for (i, page) in document.pages.iter().enumerate() {
        assert_eq!(page.page_number, i as u32 + 1);
        assert_eq!(page.images.len(), 1);
        assert_eq!(page.tables.len(), 1);
    }

    // Filesystem layout.
    let out = &setup.output_dir;
    assert!(out.join("pipeline_state.json").is_file());
    assert!(out.join("text_twin.md").is_file());
    assert!(out.join("document_content.json").is_file());
    assert!(out.join("metadata.json").is_file());
    assert!(out.join("source.pdf").is_file());
    for page in 1..=2 {
        let page_dir = out.join(format!("pages/page_{page}"));
        assert!(page_dir.join(format!("page_{page}.jpg")).is_file());
        assert!(page_dir.join(format!("page_{page}.txt")).is_file());
        assert!(page_dir.join(format!("page_{page}_twin.txt")).is_file());
        assert!(page_dir
            .join(format!("images/page_{page}_graph_1.txt"))
            .is_file());
        assert!(page_dir
            .join(format!("tables/page_{page}_table_1.txt"))
            .is_file());
    }

    // Full text is the ordered join of the combined page texts.
    let expected_full_text = format!(
        "{}\n{}",
        document.pages[0].page_text.as_ref().unwrap().text,
        document.pages[1].page_text.as_ref().unwrap().text
    );
    assert_eq!(document.full_text.as_deref(), Some(expected_full_text.as_str()));
    assert!(document.full_text.as_ref().unwrap().contains("Clean text of page 1."));

    // State records every stage and the terminal flag.
    let state = PipelineState::load_or_default(&out.join("pipeline_state.json"));
    assert_eq!(state.text_extracted_pages, vec![1, 2]);
    assert_eq!(state.images_extracted_pages, vec![1, 2]);
    assert_eq!(state.tables_extracted_pages, vec![1, 2]);
    assert!(state.post_processing_done);
    Ok(())
}

#[tokio::test]
async fn interrupted_runs_resume_without_repeating_work() -> Result<()> {
    let setup = TestSetup::new()?;
    let gateway = MockGateway::new();
    // Pages 4 and 5 have no programmed text cleanup yet, so the first run
    // dies at page 4's text stage.
    program_page_analysis(&gateway, 3);

    let rasterizer = Arc::new(SyntheticRasterizer::new(5));
    let registry = ModelRegistry::new();

    let config = base_config(&setup, &gateway);
    let mut pipeline =
        PdfIngestionPipeline::with_rasterizer(config, &registry, rasterizer.clone())?;
    let err = pipeline.process_pdf().await.unwrap_err();
    match err {
        PipelineError::PageFailure { page, stage, .. } => {
            assert_eq!(page, 4);
            assert_eq!(stage.to_string(), "text");
        }
        other => panic!("expected a page failure, got: {other}"),
    }

    let state_path = setup.output_dir.join("pipeline_state.json");
    let state = PipelineState::load_or_default(&state_path);
    assert_eq!(state.text_extracted_pages, vec![1, 2, 3]);
    assert!(!state.post_processing_done);

    // Second run: pages 4 and 5 become processable; 1-3 reload from disk.
    gateway.add_response("Raw text of page 4.", "Clean text of page 4.");
    gateway.add_response("Raw text of page 5.", "Clean text of page 5.");

    let config = base_config(&setup, &gateway);
    let mut pipeline =
        PdfIngestionPipeline::with_rasterizer(config, &registry, rasterizer.clone())?;
    let document = pipeline.process_pdf().await?;
    assert_eq!(document.pages.len(), 5);

    // Each page's text was cleaned exactly once across both runs.
    for page in 1..=5 {
        let needle = format!("Raw text of page {page}.");
        let count = gateway
            .calls()
            .iter()
            .filter(|prompt| prompt.contains(&needle))
            .count();
        assert_eq!(count, 1, "page {page} text was cleaned {count} times");
    }

    // A third run re-reads everything from disk and reproduces the same
    // document JSON byte for byte.
    let json_path = setup.output_dir.join("document_content.json");
    let first_bytes = std::fs::read(&json_path)?;
    let calls_before = gateway.call_count();

    let config = base_config(&setup, &gateway);
    let mut pipeline = PdfIngestionPipeline::with_rasterizer(config, &registry, rasterizer)?;
    pipeline.process_pdf().await?;
    assert_eq!(gateway.call_count(), calls_before, "resume must not re-call the model");
    assert_eq!(std::fs::read(&json_path)?, first_bytes);
    Ok(())
}

#[tokio::test]
async fn translations_are_written_with_language_codes() -> Result<()> {
    let setup = TestSetup::new()?;
    let gateway = MockGateway::new();
    program_page_analysis(&gateway, 1);
    gateway.add_response("into fr", "Texte en français.");
    gateway.add_response("into de", "Deutscher Text.");

    let mut config = base_config(&setup, &gateway);
    config.translate_full_text = vec!["fr".to_string(), "de".to_string()];

    let registry = ModelRegistry::new();
    let mut pipeline = PdfIngestionPipeline::with_rasterizer(
        config,
        &registry,
        Arc::new(SyntheticRasterizer::new(1)),
    )?;
    let document = pipeline.process_pdf().await?;

    assert!(setup.output_dir.join("translations/full_text_fr.txt").is_file());
    assert!(setup.output_dir.join("translations/full_text_de.txt").is_file());

    let translations = document
        .post_processing_content
        .as_ref()
        .unwrap()
        .translated_full_texts
        .as_ref()
        .unwrap();
    assert_eq!(translations.len(), 2);
    assert_eq!(translations[0].language, "fr");
    assert_eq!(translations[0].text, "Texte en français.");
    assert_eq!(translations[1].language, "de");
    Ok(())
}

#[tokio::test]
async fn condensed_text_and_toc_are_generated_and_fences_stripped() -> Result<()> {
    let setup = TestSetup::new()?;
    let gateway = MockGateway::new();
    program_page_analysis(&gateway, 1);
    gateway.add_response("Condense the following document", "A condensed summary.");
    gateway.add_response(
        "hierarchical table of contents",
        "```markdown\n- Introduction (Page 1)\n```",
    );

    let mut config = base_config(&setup, &gateway);
    config.generate_condensed_text = true;
    config.generate_table_of_contents = true;

    let registry = ModelRegistry::new();
    let mut pipeline = PdfIngestionPipeline::with_rasterizer(
        config,
        &registry,
        Arc::new(SyntheticRasterizer::new(1)),
    )?;
    let document = pipeline.process_pdf().await?;

    let condensed = std::fs::read_to_string(setup.output_dir.join("condensed_text.md"))?;
    assert_eq!(condensed, "A condensed summary.");

    let toc = std::fs::read_to_string(setup.output_dir.join("table_of_contents.md"))?;
    assert_eq!(toc, "- Introduction (Page 1)");

    let post = document.post_processing_content.as_ref().unwrap();
    assert_eq!(post.condensed_text.as_ref().unwrap().text, "A condensed summary.");
    assert_eq!(post.table_of_contents.as_ref().unwrap().text, "- Introduction (Page 1)");
    Ok(())
}

#[tokio::test]
async fn structured_custom_document_steps_write_json_artifacts() -> Result<()> {
    let setup = TestSetup::new()?;
    let gateway = MockGateway::new();
    program_page_analysis(&gateway, 1);
    gateway.add_structured(
        "Extract entities",
        json!({"entities": ["Contoso", "Fabrikam"]}),
    );

    let entities_schema = StructuredSchema::new(
        "entities",
        json!({
            "type": "object",
            "properties": {"entities": {"type": "array", "items": {"type": "string"}}},
            "required": ["entities"],
        }),
    );

    let mut config = base_config(&setup, &gateway);
    config.custom_document_processing_steps =
        vec![CustomProcessingStep::new("entities", "Extract entities").with_schema(entities_schema)];

    let registry = ModelRegistry::new();
    let mut pipeline = PdfIngestionPipeline::with_rasterizer(
        config,
        &registry,
        Arc::new(SyntheticRasterizer::new(1)),
    )?;
    let document = pipeline.process_pdf().await?;

    let artifact = setup
        .output_dir
        .join("custom_processing/document_step_entities.json");
    assert!(artifact.is_file());
    let parsed: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&artifact)?)?;
    assert_eq!(parsed, json!({"entities": ["Contoso", "Fabrikam"]}));

    let steps = &document
        .post_processing_content
        .as_ref()
        .unwrap()
        .custom_document_processing_steps;
    assert_eq!(steps.len(), 1);
    Ok(())
}

#[tokio::test]
async fn custom_page_steps_write_per_page_artifacts() -> Result<()> {
    let setup = TestSetup::new()?;
    let gateway = MockGateway::new();
    program_page_analysis(&gateway, 1);
    gateway.add_response("Summarize this page in one line", "One line summary.");

    let mut config = base_config(&setup, &gateway);
    config.custom_page_processing_steps = vec![CustomProcessingStep::new(
        "oneliner",
        "Summarize this page in one line",
    )];

    let registry = ModelRegistry::new();
    let mut pipeline = PdfIngestionPipeline::with_rasterizer(
        config,
        &registry,
        Arc::new(SyntheticRasterizer::new(1)),
    )?;
    let document = pipeline.process_pdf().await?;

    let artifact = setup
        .output_dir
        .join("pages/page_1/custom_processing/page_step_oneliner.txt");
    assert!(artifact.is_file());
    assert_eq!(std::fs::read_to_string(&artifact)?, "One line summary.");
    assert_eq!(document.pages[0].custom_page_processing_steps.len(), 1);

    let state = PipelineState::load_or_default(&setup.output_dir.join("pipeline_state.json"));
    assert_eq!(state.custom_page_processing, vec![1]);
    Ok(())
}

#[tokio::test]
async fn failed_post_processing_steps_are_localized() -> Result<()> {
    let setup = TestSetup::new()?;
    let gateway = MockGateway::new();
    program_page_analysis(&gateway, 1);
    // Condensation succeeds, the translation has no programmed response.
    gateway.add_response("Condense the following document", "A condensed summary.");

    let mut config = base_config(&setup, &gateway);
    config.generate_condensed_text = true;
    config.translate_full_text = vec!["fr".to_string()];

    let registry = ModelRegistry::new();
    let mut pipeline = PdfIngestionPipeline::with_rasterizer(
        config,
        &registry,
        Arc::new(SyntheticRasterizer::new(1)),
    )?;
    let document = pipeline.process_pdf().await?;

    let post = document.post_processing_content.as_ref().unwrap();
    assert!(post.condensed_text.is_some());
    assert!(post.translated_full_texts.is_none());
    assert!(!setup.output_dir.join("translations/full_text_fr.txt").exists());

    // The run still reached the terminal state.
    let state = PipelineState::load_or_default(&setup.output_dir.join("pipeline_state.json"));
    assert!(state.post_processing_done);
    Ok(())
}

#[tokio::test]
async fn zero_page_documents_produce_an_empty_tree() -> Result<()> {
    let setup = TestSetup::new()?;
    let gateway = MockGateway::new();

    let config = base_config(&setup, &gateway);
    let registry = ModelRegistry::new();
    let mut pipeline = PdfIngestionPipeline::with_rasterizer(
        config,
        &registry,
        Arc::new(SyntheticRasterizer::new(0)),
    )?;
    let document = pipeline.process_pdf().await?;

    assert!(document.pages.is_empty());
    assert_eq!(document.full_text.as_deref(), Some(""));
    assert!(setup.output_dir.join("document_content.json").is_file());

    let post = PostProcessingContent::load_from_directory(&setup.output_dir)?;
    assert!(post.condensed_text.is_none());
    assert!(post.table_of_contents.is_none());
    Ok(())
}

#[tokio::test]
async fn disabled_resume_reprocesses_from_scratch() -> Result<()> {
    let setup = TestSetup::new()?;
    let gateway = MockGateway::new();
    program_page_analysis(&gateway, 1);

    let registry = ModelRegistry::new();
    let rasterizer = Arc::new(SyntheticRasterizer::new(1));

    let config = base_config(&setup, &gateway);
    let mut pipeline =
        PdfIngestionPipeline::with_rasterizer(config, &registry, rasterizer.clone())?;
    pipeline.process_pdf().await?;
    let calls_after_first = gateway.call_count();

    let mut config = base_config(&setup, &gateway);
    config.resume_processing_if_interrupted = false;
    let mut pipeline = PdfIngestionPipeline::with_rasterizer(config, &registry, rasterizer)?;
    pipeline.process_pdf().await?;
    assert!(
        gateway.call_count() > calls_after_first,
        "disabling resume must re-run the model stages"
    );
    Ok(())
}

#[tokio::test]
async fn missing_pdfs_fail_fast() {
    let gateway = MockGateway::new();
    let mut config = PipelineConfiguration::new("/nonexistent/missing.pdf");
    config.multimodal_model.bind(Box::new(gateway.clone()));
    config.text_model.bind(Box::new(gateway));
    let registry = ModelRegistry::new();
    let err = PdfIngestionPipeline::with_rasterizer(
        config,
        &registry,
        Arc::new(SyntheticRasterizer::new(1)),
    )
    .unwrap_err();
    assert!(matches!(err, PipelineError::Input(_)));
}
