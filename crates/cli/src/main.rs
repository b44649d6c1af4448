//! Operator CLI: upload a document with its processing configuration
//! (triggering the queue-driven worker), run the pipeline locally, or query
//! the search index.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use docflow::constants::{
    DEFAULT_OUTPUT_CONTAINER, DEFAULT_SEARCH_INDEX, DEFAULT_UPLOAD_DOCUMENT_CONTAINER,
    DEFAULT_UPLOAD_JSON_CONTAINER,
};
use docflow::registry::ModelRegistry;
use docflow::search::{SearchHit, UnitType};
use docflow::{
    BlobStore, DocumentIngestionJob, ModelDescriptor, PdfIngestionPipeline,
    PipelineConfiguration, SearchIndexClient, SearchParams,
};

#[derive(Parser)]
#[command(name = "docflow", about = "Multimodal document processing pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload a document and publish its processing configuration to the
    /// watched container, triggering the worker.
    IngestConfig {
        /// Local document to upload.
        file_path: PathBuf,
        /// Name for the configuration blob (defaults to `<stem>_config.json`).
        #[arg(long)]
        name: Option<String>,
        #[arg(long, env = "AZURE_STORAGE_UPLOAD_DOCUMENT_CONTAINER_NAME", default_value = DEFAULT_UPLOAD_DOCUMENT_CONTAINER)]
        document_container: String,
        #[arg(long, env = "AZURE_STORAGE_UPLOAD_JSON_CONTAINER_NAME", default_value = DEFAULT_UPLOAD_JSON_CONTAINER)]
        json_container: String,
    },
    /// Process a local PDF end to end.
    Process {
        pdf: PathBuf,
        /// Output directory (defaults to `processed/<document_id>`).
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        condense: bool,
        #[arg(long)]
        toc: bool,
        /// Target language codes for full-text translation; repeatable.
        #[arg(long)]
        translate: Vec<String>,
        /// Also upload artifacts and index search units.
        #[arg(long)]
        index: bool,
        /// Ignore any saved pipeline state and start fresh.
        #[arg(long)]
        no_resume: bool,
    },
    /// Query the search index.
    Search {
        query: String,
        /// Expand the query with the text model and union the results.
        #[arg(long)]
        wide: bool,
        #[arg(long, default_value_t = 3)]
        top: usize,
        /// Restrict to one unit type: text, image or table.
        #[arg(long)]
        unit_type: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::IngestConfig {
            file_path,
            name,
            document_container,
            json_container,
        } => ingest_config(&file_path, name, &document_container, &json_container).await,
        Command::Process {
            pdf,
            output,
            condense,
            toc,
            translate,
            index,
            no_resume,
        } => process(pdf, output, condense, toc, translate, index, no_resume).await,
        Command::Search {
            query,
            wide,
            top,
            unit_type,
        } => search(&query, wide, top, unit_type).await,
    }
}

async fn ingest_config(
    file_path: &Path,
    name: Option<String>,
    document_container: &str,
    json_container: &str,
) -> Result<()> {
    if !file_path.is_file() {
        bail!("document not found: {}", file_path.display());
    }
    let filename = file_path
        .file_name()
        .context("not a file")?
        .to_string_lossy()
        .into_owned();

    let blob = BlobStore::from_env()?;
    blob.create_container(document_container).await?;
    let document_url = blob
        .upload_blob(document_container, &filename, file_path)
        .await?;
    println!("Document uploaded to: {document_url}");

    let mut config = PipelineConfiguration::new(&document_url);
    config.generate_condensed_text = true;
    config.generate_table_of_contents = true;

    let stem = file_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let mut config_name = name.unwrap_or_else(|| format!("{stem}_config.json"));
    if !config_name.ends_with(".json") {
        config_name.push_str(".json");
    }

    let local_json = std::env::current_dir()?.join(&config_name);
    config.save_to_json(&local_json)?;

    blob.create_container(json_container).await?;
    let json_url = blob
        .upload_blob(json_container, &config_name, &local_json)
        .await?;
    println!("Configuration uploaded to: {json_url}");
    Ok(())
}

async fn process(
    pdf: PathBuf,
    output: Option<PathBuf>,
    condense: bool,
    toc: bool,
    translate: Vec<String>,
    index: bool,
    no_resume: bool,
) -> Result<()> {
    let mut config = PipelineConfiguration::new(pdf.to_string_lossy().into_owned());
    config.output_directory = output.map(|p| p.to_string_lossy().into_owned());
    config.generate_condensed_text = condense;
    config.generate_table_of_contents = toc;
    config.translate_full_text = translate;
    config.resume_processing_if_interrupted = !no_resume;

    let registry = ModelRegistry::from_env();

    if index {
        let blob = BlobStore::from_env()?;
        let search = search_client(&registry)?;
        let job = DocumentIngestionJob::new(config, blob, search);
        let document = job.execute(&registry, Some(DEFAULT_OUTPUT_CONTAINER)).await?;
        println!(
            "Processed and indexed {} ({} pages) into {}",
            document.metadata.filename,
            document.metadata.total_pages,
            document.metadata.output_directory
        );
    } else {
        let mut pipeline = PdfIngestionPipeline::new(config, &registry)?;
        let document = pipeline.process_pdf().await?;
        println!(
            "Processed {} ({} pages) into {}",
            document.metadata.filename,
            document.metadata.total_pages,
            document.metadata.output_directory
        );
    }
    Ok(())
}

async fn search(query: &str, wide: bool, top: usize, unit_type: Option<String>) -> Result<()> {
    let registry = ModelRegistry::from_env();
    let client = search_client(&registry)?;

    let mut params = SearchParams::default();
    params.top = top;
    params.unit_type = match unit_type.as_deref() {
        None => None,
        Some("text") => Some(UnitType::Text),
        Some("image") => Some(UnitType::Image),
        Some("table") => Some(UnitType::Table),
        Some(other) => bail!("unknown unit type: {other}"),
    };

    let hits = if wide {
        let mut text_model = ModelDescriptor::text("gpt-4o");
        registry.resolve(&mut text_model)?;
        client.wide_search(query, &params, text_model.client()?).await?
    } else {
        client.hybrid_search(query, &params).await?
    };

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, hit) in hits.iter().enumerate() {
        println!("{}", format_hit(hit, i + 1));
    }
    Ok(())
}

fn search_client(registry: &ModelRegistry) -> Result<SearchIndexClient> {
    let service = std::env::var("AZURE_AI_SEARCH_SERVICE_NAME")
        .context("AZURE_AI_SEARCH_SERVICE_NAME is not set")?;
    let endpoint = if service.starts_with("https://") {
        service
    } else {
        format!("https://{service}.search.windows.net")
    };
    let api_key = std::env::var("AZURE_AI_SEARCH_API_KEY")
        .context("AZURE_AI_SEARCH_API_KEY is not set")?;
    let index_name = std::env::var("AZURE_AI_SEARCH_INDEX_NAME")
        .unwrap_or_else(|_| DEFAULT_SEARCH_INDEX.to_string());

    let model_name = std::env::var("EMBEDDING_MODEL_NAME")
        .unwrap_or_else(|_| "text-embedding-3-large".to_string());
    let mut embedding = ModelDescriptor::embedding(&model_name);
    registry.resolve(&mut embedding)?;

    Ok(SearchIndexClient::new(endpoint, api_key, index_name, embedding))
}

fn format_hit(hit: &SearchHit, reference: usize) -> String {
    let unit = &hit.unit;
    [
        "SearchUnit Information".to_string(),
        "----------------------".to_string(),
        format!("Reference ID:      {reference}"),
        format!("Score:             {:.4}", hit.score),
        format!("Filename:          {}", unit.metadata.filename),
        format!("Total Pages:       {}", unit.metadata.total_pages),
        format!("Page Number:       {}", unit.page_number),
        format!("Unit Type:         {}", unit.unit_type),
        String::new(),
        "Extracted Text".to_string(),
        "--------------".to_string(),
        if unit.text.is_empty() {
            "(no text)".to_string()
        } else {
            unit.text.clone()
        },
        String::new(),
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_arguments_parse() {
        let cli = Cli::try_parse_from([
            "docflow", "process", "report.pdf", "--condense", "--translate", "fr", "--translate",
            "de",
        ])
        .unwrap();
        match cli.command {
            Command::Process {
                pdf,
                condense,
                translate,
                index,
                ..
            } => {
                assert_eq!(pdf, PathBuf::from("report.pdf"));
                assert!(condense);
                assert_eq!(translate, vec!["fr", "de"]);
                assert!(!index);
            }
            _ => panic!("expected the process command"),
        }
    }

    #[test]
    fn search_defaults_to_three_results() {
        let cli = Cli::try_parse_from(["docflow", "search", "revenue growth"]).unwrap();
        match cli.command {
            Command::Search { query, top, wide, .. } => {
                assert_eq!(query, "revenue growth");
                assert_eq!(top, 3);
                assert!(!wide);
            }
            _ => panic!("expected the search command"),
        }
    }

    #[test]
    fn ingest_config_container_defaults_apply() {
        let cli = Cli::try_parse_from(["docflow", "ingest-config", "report.pdf"]).unwrap();
        match cli.command {
            Command::IngestConfig {
                document_container,
                json_container,
                ..
            } => {
                assert_eq!(document_container, DEFAULT_UPLOAD_DOCUMENT_CONTAINER);
                assert_eq!(json_container, DEFAULT_UPLOAD_JSON_CONTAINER);
            }
            _ => panic!("expected the ingest-config command"),
        }
    }
}
