//! Document-level nodes: metadata, post-processing artifacts, and the root
//! of the content tree.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::errors::{ContentError, StorageError};
use crate::storage::BlobStore;

use super::data_unit::DataUnit;
use super::page::PageContent;
use super::{load_json, save_json};

/// Deterministic document identifier: the sanitized filename stem joined
/// with a UUIDv5 of the source path (DNS namespace).
pub fn document_id_for(source_path: &str) -> String {
    let stem = Path::new(source_path)
        .file_stem()
        .map(|s| s.to_string_lossy().replace(' ', "_"))
        .unwrap_or_else(|| "document".to_string());
    let uuid = Uuid::new_v5(&Uuid::NAMESPACE_DNS, source_path.as_bytes());
    format!("{stem}_{uuid}")
}

/// Metadata about the document being processed.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PDFMetadata {
    pub document_id: String,
    pub document_path: String,
    pub filename: String,
    pub total_pages: u32,
    #[serde(default)]
    pub processed_pages: u32,
    pub output_directory: String,
    #[serde(default)]
    pub cloud_storage_path: Option<String>,
}

impl PDFMetadata {
    pub fn save_to_json(&self, path: &Path) -> Result<(), ContentError> {
        save_json(self, path)
    }

    pub fn load_from_json(path: &Path) -> Result<Self, ContentError> {
        load_json(path)
    }

    /// Uploads the original PDF under `{document_id}/{filename}` and records
    /// its cloud URI.
    pub async fn upload_pdf_to_blob(
        &mut self,
        store: &BlobStore,
        container_name: &str,
    ) -> Result<(), StorageError> {
        let pdf_path = PathBuf::from(&self.document_path);
        if !pdf_path.is_file() {
            return Ok(());
        }
        let blob_name = format!("{}/{}", self.document_id, self.filename);
        let cloud_uri = store.upload_blob(container_name, &blob_name, &pdf_path).await?;
        self.cloud_storage_path = Some(cloud_uri);
        Ok(())
    }
}

/// Document-level artifacts written to the root of the output directory.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PostProcessingContent {
    #[serde(default)]
    pub condensed_text: Option<DataUnit>,
    #[serde(default)]
    pub table_of_contents: Option<DataUnit>,
    #[serde(default)]
    pub full_text: Option<DataUnit>,
    #[serde(default)]
    pub translated_full_texts: Option<Vec<DataUnit>>,
    #[serde(default)]
    pub translated_condensed_texts: Option<Vec<DataUnit>>,
    #[serde(default)]
    pub custom_document_processing_steps: Vec<DataUnit>,
    #[serde(default)]
    pub document_json: Option<DataUnit>,
}

impl PostProcessingContent {
    /// Saves every artifact into `directory`. The document JSON itself is
    /// owned by [`DocumentContent::save_to_directory`], which writes it last
    /// so the serialized tree reflects all paths.
    pub fn save_to_directory(&mut self, directory: &Path) -> Result<(), ContentError> {
        std::fs::create_dir_all(directory)?;

        if let Some(unit) = self.condensed_text.as_mut() {
            unit.save_to_file(directory, Some("condensed_text.md"))?;
        }
        if let Some(unit) = self.table_of_contents.as_mut() {
            unit.save_to_file(directory, Some("table_of_contents.md"))?;
        }
        if let Some(unit) = self.full_text.as_mut() {
            unit.save_to_file(directory, Some("text_twin.md"))?;
        }

        let translations_dir = directory.join("translations");
        if let Some(units) = self.translated_full_texts.as_mut() {
            for unit in units {
                let filename = format!("full_text_{}.txt", unit.language);
                unit.save_to_file(&translations_dir, Some(&filename))?;
            }
        }
        if let Some(units) = self.translated_condensed_texts.as_mut() {
            for unit in units {
                let filename = format!("condensed_text_{}.txt", unit.language);
                unit.save_to_file(&translations_dir, Some(&filename))?;
            }
        }

        if !self.custom_document_processing_steps.is_empty() {
            let custom_dir = directory.join("custom_processing");
            for (i, step) in self.custom_document_processing_steps.iter_mut().enumerate() {
                let filename = step
                    .text_file_path
                    .as_ref()
                    .and_then(|p| Path::new(p).file_name())
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| format!("document_step_{}.txt", i + 1));
                step.save_to_file(&custom_dir, Some(&filename))?;
            }
        }
        Ok(())
    }

    /// Rebuilds post-processing content from the artifact files.
    pub fn load_from_directory(directory: &Path) -> Result<Self, ContentError> {
        let mut content = Self::default();

        let condensed = directory.join("condensed_text.md");
        if condensed.is_file() {
            content.condensed_text = Some(DataUnit::load_from_file(&condensed, None)?);
        }
        let toc = directory.join("table_of_contents.md");
        if toc.is_file() {
            content.table_of_contents = Some(DataUnit::load_from_file(&toc, None)?);
        }
        let full_text = directory.join("text_twin.md");
        if full_text.is_file() {
            content.full_text = Some(DataUnit::load_from_file(&full_text, None)?);
        }
        let doc_json = directory.join("document_content.json");
        if doc_json.is_file() {
            content.document_json = Some(DataUnit {
                text: String::new(),
                text_file_path: Some(doc_json.to_string_lossy().into_owned()),
                ..DataUnit::default()
            });
        }

        let translations_dir = directory.join("translations");
        if translations_dir.is_dir() {
            let pattern =
                Regex::new(r"^(full_text|condensed_text)_(\w+)\.txt$").expect("static regex");
            let mut full = Vec::new();
            let mut condensed = Vec::new();
            let mut files: Vec<PathBuf> = std::fs::read_dir(&translations_dir)?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_file())
                .collect();
            files.sort();
            for file in files {
                let name = file.file_name().unwrap_or_default().to_string_lossy().into_owned();
                if let Some(caps) = pattern.captures(&name) {
                    let unit =
                        DataUnit::load_from_file(&file, None)?.with_language(caps[2].to_string());
                    match &caps[1] {
                        "full_text" => full.push(unit),
                        _ => condensed.push(unit),
                    }
                }
            }
            if !full.is_empty() {
                content.translated_full_texts = Some(full);
            }
            if !condensed.is_empty() {
                content.translated_condensed_texts = Some(condensed);
            }
        }

        let custom_dir = directory.join("custom_processing");
        if custom_dir.is_dir() {
            let mut files: Vec<PathBuf> = std::fs::read_dir(&custom_dir)?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_file())
                .collect();
            files.sort();
            for file in files {
                let name = file.file_name().unwrap_or_default().to_string_lossy().into_owned();
                if name.starts_with("document_step_") {
                    content
                        .custom_document_processing_steps
                        .push(DataUnit::load_from_file(&file, None)?);
                }
            }
        }

        Ok(content)
    }

    pub async fn upload_to_blob(
        &mut self,
        store: &BlobStore,
        container_name: &str,
        blob_prefix: Option<&str>,
    ) -> Result<(), StorageError> {
        if let Some(unit) = self.condensed_text.as_mut() {
            unit.upload_to_blob(store, container_name, blob_prefix).await?;
        }
        if let Some(unit) = self.table_of_contents.as_mut() {
            unit.upload_to_blob(store, container_name, blob_prefix).await?;
        }
        if let Some(unit) = self.full_text.as_mut() {
            unit.upload_to_blob(store, container_name, blob_prefix).await?;
        }
        if let Some(unit) = self.document_json.as_mut() {
            unit.upload_to_blob(store, container_name, blob_prefix).await?;
        }

        let translations_prefix = match blob_prefix {
            Some(prefix) => format!("{prefix}/translations"),
            None => "translations".to_string(),
        };
        if let Some(units) = self.translated_full_texts.as_mut() {
            for unit in units {
                unit.upload_to_blob(store, container_name, Some(&translations_prefix))
                    .await?;
            }
        }
        if let Some(units) = self.translated_condensed_texts.as_mut() {
            for unit in units {
                unit.upload_to_blob(store, container_name, Some(&translations_prefix))
                    .await?;
            }
        }

        let custom_prefix = match blob_prefix {
            Some(prefix) => format!("{prefix}/custom_processing"),
            None => "custom_processing".to_string(),
        };
        for step in &mut self.custom_document_processing_steps {
            step.upload_to_blob(store, container_name, Some(&custom_prefix))
                .await?;
        }
        Ok(())
    }

    pub async fn download_from_blob(
        &mut self,
        store: &BlobStore,
        local_dir: &Path,
    ) -> Result<(), StorageError> {
        if let Some(unit) = self.condensed_text.as_mut() {
            unit.download_from_blob(store, local_dir).await?;
        }
        if let Some(unit) = self.table_of_contents.as_mut() {
            unit.download_from_blob(store, local_dir).await?;
        }
        if let Some(unit) = self.full_text.as_mut() {
            unit.download_from_blob(store, local_dir).await?;
        }
        if let Some(unit) = self.document_json.as_mut() {
            unit.download_from_blob(store, local_dir).await?;
        }

        let translations_dir = local_dir.join("translations");
        if let Some(units) = self.translated_full_texts.as_mut() {
            for unit in units {
                unit.download_from_blob(store, &translations_dir).await?;
            }
        }
        if let Some(units) = self.translated_condensed_texts.as_mut() {
            for unit in units {
                unit.download_from_blob(store, &translations_dir).await?;
            }
        }
        let custom_dir = local_dir.join("custom_processing");
        for step in &mut self.custom_document_processing_steps {
            step.download_from_blob(store, &custom_dir).await?;
        }
        Ok(())
    }
}

/// The fully processed document: the root of the content tree.
///
/// `full_text` is the ordered newline-join of each page's combined text.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DocumentContent {
    pub metadata: PDFMetadata,
    pub pages: Vec<PageContent>,
    #[serde(default)]
    pub full_text: Option<String>,
    #[serde(default)]
    pub post_processing_content: Option<PostProcessingContent>,
}

impl DocumentContent {
    /// Saves the whole tree under `directory` and returns the path of the
    /// document JSON, which is written last so it reflects every recorded
    /// file path.
    pub fn save_to_directory(&mut self, directory: &Path) -> Result<PathBuf, ContentError> {
        std::fs::create_dir_all(directory)?;

        self.metadata.save_to_json(&directory.join("metadata.json"))?;

        for page in &mut self.pages {
            page.save_to_directory(directory)?;
        }

        if let Some(full_text) = self.full_text.clone() {
            let full_text_path = directory.join("text_twin.md");
            std::fs::write(&full_text_path, &full_text)?;
            let post = self.post_processing_content.get_or_insert_with(Default::default);
            if post.full_text.is_none() {
                post.full_text = Some(DataUnit {
                    text: full_text,
                    text_file_path: Some(full_text_path.to_string_lossy().into_owned()),
                    ..DataUnit::default()
                });
            }
        }

        if let Some(post) = self.post_processing_content.as_mut() {
            post.save_to_directory(directory)?;
        }

        let doc_json_path = directory.join("document_content.json");
        let post = self.post_processing_content.get_or_insert_with(Default::default);
        post.document_json = Some(DataUnit {
            text: String::new(),
            text_file_path: Some(doc_json_path.to_string_lossy().into_owned()),
            ..DataUnit::default()
        });
        save_json(self, &doc_json_path)?;
        Ok(doc_json_path)
    }

    pub fn save_to_json(&self, path: &Path) -> Result<(), ContentError> {
        save_json(self, path)
    }

    pub fn load_from_json(path: &Path) -> Result<Self, ContentError> {
        load_json(path)
    }

    /// Loads a document from its output directory, preferring the document
    /// JSON and falling back to reconstruction from the folder structure.
    pub fn load_from_directory(directory: &Path) -> Result<Self, ContentError> {
        let doc_json_path = directory.join("document_content.json");
        if doc_json_path.is_file() {
            return Self::load_from_json(&doc_json_path);
        }

        let metadata_path = directory.join("metadata.json");
        let mut metadata = if metadata_path.is_file() {
            PDFMetadata::load_from_json(&metadata_path)?
        } else {
            let name = directory
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "document".to_string());
            PDFMetadata {
                document_id: name.clone(),
                document_path: directory.join(format!("{name}.pdf")).to_string_lossy().into_owned(),
                filename: format!("{name}.pdf"),
                total_pages: 0,
                processed_pages: 0,
                output_directory: directory.to_string_lossy().into_owned(),
                cloud_storage_path: None,
            }
        };

        let mut pages = Vec::new();
        let pages_dir = directory.join("pages");
        if pages_dir.is_dir() {
            let mut page_numbers: Vec<u32> = std::fs::read_dir(&pages_dir)?
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_dir())
                .filter_map(|e| {
                    e.file_name()
                        .to_string_lossy()
                        .strip_prefix("page_")
                        .and_then(|n| n.parse().ok())
                })
                .collect();
            page_numbers.sort_unstable();
            for page_number in page_numbers {
                match PageContent::load_from_directory(directory, page_number) {
                    Ok(page) => pages.push(page),
                    Err(e) => warn!(page_number, "skipping unreadable page: {e}"),
                }
            }
        }

        if !pages.is_empty() && metadata.total_pages == 0 {
            metadata.total_pages = pages.len() as u32;
            metadata.processed_pages = pages.len() as u32;
        }

        let full_text_path = directory.join("text_twin.md");
        let full_text = if full_text_path.is_file() {
            Some(std::fs::read_to_string(&full_text_path)?)
        } else {
            None
        };

        Ok(Self {
            metadata,
            pages,
            full_text,
            post_processing_content: Some(PostProcessingContent::load_from_directory(directory)?),
        })
    }

    /// Mirrors the whole document into blob storage. The container defaults
    /// to the document id; blobs are prefixed with the document id so that
    /// multiple documents can share an output container.
    pub async fn upload_to_blob(
        &mut self,
        store: &BlobStore,
        container_name: Option<&str>,
    ) -> Result<(), StorageError> {
        let container = container_name
            .map(str::to_string)
            .unwrap_or_else(|| self.metadata.document_id.clone());
        let safe_container = store.create_container(&container).await?;
        let blob_prefix = self.metadata.document_id.clone();

        self.metadata
            .upload_pdf_to_blob(store, &safe_container)
            .await?;

        for page in &mut self.pages {
            page.upload_to_blob(store, &safe_container, Some(&blob_prefix))
                .await?;
        }

        if let Some(post) = self.post_processing_content.as_mut() {
            post.upload_to_blob(store, &safe_container, Some(&blob_prefix))
                .await?;
        }

        // The document JSON goes up last; refresh it on disk first so the
        // uploaded copy records the cloud URIs assigned above.
        let doc_json_path = PathBuf::from(&self.metadata.output_directory)
            .join("document_content.json");
        save_json(self, &doc_json_path).map_err(|e| match e {
            ContentError::Storage(e) => e,
            other => StorageError::Service {
                status: 0,
                message: other.to_string(),
            },
        })?;
        let blob_name = format!("{blob_prefix}/document_content.json");
        let cloud_uri = store
            .upload_blob(&safe_container, &blob_name, &doc_json_path)
            .await?;
        let post = self.post_processing_content.get_or_insert_with(Default::default);
        let doc_json = post.document_json.get_or_insert_with(|| DataUnit {
            text: String::new(),
            text_file_path: Some(doc_json_path.to_string_lossy().into_owned()),
            ..DataUnit::default()
        });
        doc_json.text_file_cloud_storage_path = Some(cloud_uri);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::page::ExtractedText;

    fn sample_document(dir: &Path) -> DocumentContent {
        let image_path = dir.join("pages/page_1/page_1.png");
        std::fs::create_dir_all(image_path.parent().unwrap()).unwrap();
        std::fs::write(&image_path, b"png").unwrap();

        let page = PageContent {
            page_number: 1,
            text: ExtractedText::new(1, DataUnit::new("Page one text.")),
            page_image_path: image_path.to_string_lossy().into_owned(),
            images: Vec::new(),
            tables: Vec::new(),
            page_text: Some(DataUnit::new("##### --- Page 1 ---\n\nPage one text.")),
            page_image_cloud_storage_path: None,
            custom_page_processing_steps: Vec::new(),
        };
        DocumentContent {
            metadata: PDFMetadata {
                document_id: document_id_for("brochure.pdf"),
                document_path: dir.join("brochure.pdf").to_string_lossy().into_owned(),
                filename: "brochure.pdf".to_string(),
                total_pages: 1,
                processed_pages: 1,
                output_directory: dir.to_string_lossy().into_owned(),
                cloud_storage_path: None,
            },
            pages: vec![page],
            full_text: Some("##### --- Page 1 ---\n\nPage one text.".to_string()),
            post_processing_content: None,
        }
    }

    #[test]
    fn document_ids_are_deterministic() {
        let a = document_id_for("reports/annual report.pdf");
        let b = document_id_for("reports/annual report.pdf");
        let c = document_id_for("reports/other.pdf");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("annual_report_"));
    }

    #[test]
    fn document_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let doc = sample_document(dir.path());
        let json_path = dir.path().join("document_content.json");
        doc.save_to_json(&json_path).unwrap();
        let loaded = DocumentContent::load_from_json(&json_path).unwrap();
        assert_eq!(loaded, doc);
    }

    #[test]
    fn save_to_directory_writes_the_expected_layout() {
        let dir = tempfile::tempdir().unwrap();
        let mut doc = sample_document(dir.path());
        let json_path = doc.save_to_directory(dir.path()).unwrap();

        assert!(json_path.is_file());
        assert!(dir.path().join("metadata.json").is_file());
        assert!(dir.path().join("text_twin.md").is_file());
        assert!(dir.path().join("pages/page_1/page_1.txt").is_file());
        assert!(dir.path().join("pages/page_1/page_1_twin.txt").is_file());

        let loaded = DocumentContent::load_from_json(&json_path).unwrap();
        assert_eq!(loaded.metadata, doc.metadata);
        assert_eq!(loaded.full_text, doc.full_text);
    }

    #[test]
    fn directory_reconstruction_recovers_pages_and_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let mut doc = sample_document(dir.path());
        let json_path = doc.save_to_directory(dir.path()).unwrap();
        std::fs::remove_file(&json_path).unwrap();

        let loaded = DocumentContent::load_from_directory(dir.path()).unwrap();
        assert_eq!(loaded.pages.len(), 1);
        assert_eq!(loaded.full_text, doc.full_text);
        assert_eq!(
            loaded.pages[0].text.text.as_ref().unwrap().text,
            "Page one text."
        );
    }

    #[test]
    fn translations_round_trip_with_language_codes() {
        let dir = tempfile::tempdir().unwrap();
        let mut content = PostProcessingContent {
            translated_full_texts: Some(vec![
                DataUnit::new("Bonjour").with_language("fr"),
                DataUnit::new("Hallo").with_language("de"),
            ]),
            ..Default::default()
        };
        content.save_to_directory(dir.path()).unwrap();
        assert!(dir.path().join("translations/full_text_fr.txt").is_file());
        assert!(dir.path().join("translations/full_text_de.txt").is_file());

        let loaded = PostProcessingContent::load_from_directory(dir.path()).unwrap();
        let translations = loaded.translated_full_texts.unwrap();
        assert_eq!(translations.len(), 2);
        let langs: Vec<&str> = translations.iter().map(|u| u.language.as_str()).collect();
        assert!(langs.contains(&"fr") && langs.contains(&"de"));
    }
}
