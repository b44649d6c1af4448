//! Per-page nodes: extracted text, embedded images, embedded tables, and the
//! aggregated page content.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{ContentError, StorageError};
use crate::storage::BlobStore;

use super::data_unit::DataUnit;

/// Text content of one page. Saved as `pages/page_{N}/page_{N}.txt`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExtractedText {
    pub page_number: u32,
    #[serde(default)]
    pub text: Option<DataUnit>,
}

impl ExtractedText {
    pub fn new(page_number: u32, text: DataUnit) -> Self {
        Self {
            page_number,
            text: Some(text),
        }
    }

    pub fn save_to_directory(&mut self, directory: &Path) -> Result<Option<PathBuf>, ContentError> {
        let Some(unit) = self.text.as_mut() else {
            return Ok(None);
        };
        let page_dir = page_dir(directory, self.page_number);
        let filename = format!("page_{}.txt", self.page_number);
        Ok(Some(unit.save_to_file(&page_dir, Some(&filename))?))
    }

    pub fn load_from_file(
        file_path: &Path,
        page_number: u32,
        page_image_path: Option<&str>,
    ) -> Result<Self, ContentError> {
        let unit = DataUnit::load_from_file(file_path, page_image_path)?;
        Ok(Self::new(page_number, unit))
    }

    pub async fn upload_to_blob(
        &mut self,
        store: &BlobStore,
        container_name: &str,
        blob_prefix: Option<&str>,
    ) -> Result<(), StorageError> {
        if let Some(unit) = self.text.as_mut() {
            let prefix = page_blob_prefix(blob_prefix, self.page_number);
            unit.upload_to_blob(store, container_name, Some(&prefix)).await?;
        }
        Ok(())
    }

    pub async fn download_from_blob(
        &mut self,
        store: &BlobStore,
        local_dir: &Path,
    ) -> Result<(), StorageError> {
        if let Some(unit) = self.text.as_mut() {
            let page_dir = page_dir(local_dir, self.page_number);
            unit.download_from_blob(store, &page_dir).await?;
        }
        Ok(())
    }
}

/// An embedded visual detected on a page. `image_path` points at the page
/// image containing it (a value duplication, not a shared reference).
/// Saved as `pages/page_{N}/images/page_{N}_{image_type}_{i+1}.txt`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExtractedImage {
    pub page_number: u32,
    pub image_path: String,
    pub image_type: String,
    #[serde(default)]
    pub text: Option<DataUnit>,
}

impl ExtractedImage {
    pub fn save_to_directory(
        &mut self,
        directory: &Path,
        index: usize,
    ) -> Result<Option<PathBuf>, ContentError> {
        let Some(unit) = self.text.as_mut() else {
            return Ok(None);
        };
        let images_dir = page_dir(directory, self.page_number).join("images");
        let filename = format!(
            "page_{}_{}_{}.txt",
            self.page_number,
            self.image_type,
            index + 1
        );
        Ok(Some(unit.save_to_file(&images_dir, Some(&filename))?))
    }

    pub fn load_from_file(
        file_path: &Path,
        page_number: u32,
        image_path: &str,
        image_type: &str,
    ) -> Result<Self, ContentError> {
        let unit = DataUnit::load_from_file(file_path, Some(image_path))?;
        Ok(Self {
            page_number,
            image_path: image_path.to_string(),
            image_type: image_type.to_string(),
            text: Some(unit),
        })
    }

    pub async fn upload_to_blob(
        &mut self,
        store: &BlobStore,
        container_name: &str,
        blob_prefix: Option<&str>,
    ) -> Result<(), StorageError> {
        if let Some(unit) = self.text.as_mut() {
            let prefix = format!("{}/images", page_blob_prefix(blob_prefix, self.page_number));
            unit.upload_to_blob(store, container_name, Some(&prefix)).await?;
        }
        Ok(())
    }

    pub async fn download_from_blob(
        &mut self,
        store: &BlobStore,
        local_dir: &Path,
    ) -> Result<(), StorageError> {
        if let Some(unit) = self.text.as_mut() {
            let images_dir = page_dir(local_dir, self.page_number).join("images");
            unit.download_from_blob(store, &images_dir).await?;
        }
        Ok(())
    }
}

/// An embedded table, carried as Markdown with an optional summary.
/// Saved as `pages/page_{N}/tables/page_{N}_table_{i+1}.txt`; the summary is
/// appended to the file as a trailing `Summary:` block and split back out on
/// load.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExtractedTable {
    pub page_number: u32,
    #[serde(default)]
    pub text: Option<DataUnit>,
    #[serde(default)]
    pub summary: Option<String>,
}

impl ExtractedTable {
    pub fn save_to_directory(
        &mut self,
        directory: &Path,
        index: usize,
    ) -> Result<Option<PathBuf>, ContentError> {
        let Some(unit) = self.text.as_mut() else {
            return Ok(None);
        };
        let tables_dir = page_dir(directory, self.page_number).join("tables");
        std::fs::create_dir_all(&tables_dir)?;

        let filename = format!("page_{}_table_{}.txt", self.page_number, index + 1);
        let file_path = tables_dir.join(&filename);
        let body = match &self.summary {
            Some(summary) => format!("{}\n\nSummary: {summary}", unit.text),
            None => unit.text.clone(),
        };
        std::fs::write(&file_path, body)?;
        unit.text_file_path = Some(file_path.to_string_lossy().into_owned());
        Ok(Some(file_path))
    }

    pub fn load_from_file(
        file_path: &Path,
        page_number: u32,
        page_image_path: Option<&str>,
    ) -> Result<Self, ContentError> {
        let mut unit = DataUnit::load_from_file(file_path, page_image_path)?;

        let summary_re = Regex::new(r"(?s)\n*Summary:\s*(.+)$").expect("static regex");
        let mut summary = None;
        let body = unit.text.clone();
        if let Some(caps) = summary_re.captures(&body) {
            let matched = caps.get(0).expect("whole match");
            summary = Some(caps[1].trim().to_string());
            unit.text = body[..matched.start()].trim().to_string();
        }

        Ok(Self {
            page_number,
            text: Some(unit),
            summary,
        })
    }

    pub async fn upload_to_blob(
        &mut self,
        store: &BlobStore,
        container_name: &str,
        blob_prefix: Option<&str>,
    ) -> Result<(), StorageError> {
        if let Some(unit) = self.text.as_mut() {
            let prefix = format!("{}/tables", page_blob_prefix(blob_prefix, self.page_number));
            unit.upload_to_blob(store, container_name, Some(&prefix)).await?;
        }
        Ok(())
    }

    pub async fn download_from_blob(
        &mut self,
        store: &BlobStore,
        local_dir: &Path,
    ) -> Result<(), StorageError> {
        if let Some(unit) = self.text.as_mut() {
            let tables_dir = page_dir(local_dir, self.page_number).join("tables");
            unit.download_from_blob(store, &tables_dir).await?;
        }
        Ok(())
    }
}

/// Aggregated content for a single page. `page_image_path` points at the
/// page rendering (PNG or JPEG at 300 DPI) and always exists for a
/// processed page.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PageContent {
    pub page_number: u32,
    pub text: ExtractedText,
    pub page_image_path: String,
    pub images: Vec<ExtractedImage>,
    pub tables: Vec<ExtractedTable>,
    #[serde(default)]
    pub page_text: Option<DataUnit>,
    #[serde(default)]
    pub page_image_cloud_storage_path: Option<String>,
    #[serde(default)]
    pub custom_page_processing_steps: Vec<DataUnit>,
}

impl PageContent {
    /// Saves text, images, tables, the combined page text and any custom
    /// step outputs under `pages/page_{N}/`.
    pub fn save_to_directory(&mut self, directory: &Path) -> Result<(), ContentError> {
        let page_dir = page_dir(directory, self.page_number);
        std::fs::create_dir_all(&page_dir)?;

        self.text.save_to_directory(directory)?;
        for (i, image) in self.images.iter_mut().enumerate() {
            image.save_to_directory(directory, i)?;
        }
        for (i, table) in self.tables.iter_mut().enumerate() {
            table.save_to_directory(directory, i)?;
        }

        if let Some(page_text) = self.page_text.as_mut() {
            let filename = format!("page_{}_twin.txt", self.page_number);
            page_text.save_to_file(&page_dir, Some(&filename))?;
        }

        if !self.custom_page_processing_steps.is_empty() {
            let custom_dir = page_dir.join("custom_processing");
            for (i, step) in self.custom_page_processing_steps.iter_mut().enumerate() {
                let filename = existing_filename(step)
                    .unwrap_or_else(|| format!("page_step_{}.txt", i + 1));
                step.save_to_file(&custom_dir, Some(&filename))?;
            }
        }
        Ok(())
    }

    /// Reconstructs a page from its folder layout.
    pub fn load_from_directory(directory: &Path, page_number: u32) -> Result<Self, ContentError> {
        let page_dir = page_dir(directory, page_number);

        let page_image_path = ["png", "jpg", "jpeg"]
            .iter()
            .map(|ext| page_dir.join(format!("page_{page_number}.{ext}")))
            .find(|p| p.is_file())
            .map(|p| p.to_string_lossy().into_owned())
            .ok_or_else(|| {
                ContentError::FileNotFound(format!("no image found for page {page_number}"))
            })?;

        let text_file = page_dir.join(format!("page_{page_number}.txt"));
        let text = if text_file.is_file() {
            ExtractedText::load_from_file(&text_file, page_number, Some(&page_image_path))?
        } else {
            ExtractedText::new(page_number, DataUnit::new(""))
        };

        let images = load_page_images(directory, page_number, &page_image_path)?;
        let tables = load_page_tables(directory, page_number, &page_image_path)?;

        let twin_file = page_dir.join(format!("page_{page_number}_twin.txt"));
        let page_text = if twin_file.is_file() {
            Some(DataUnit::load_from_file(&twin_file, Some(&page_image_path))?)
        } else {
            None
        };

        let custom_steps = load_page_custom_steps(directory, page_number, &page_image_path)?;

        Ok(Self {
            page_number,
            text,
            page_image_path,
            images,
            tables,
            page_text,
            page_image_cloud_storage_path: None,
            custom_page_processing_steps: custom_steps,
        })
    }

    /// Uploads the page image plus all nested units.
    pub async fn upload_to_blob(
        &mut self,
        store: &BlobStore,
        container_name: &str,
        blob_prefix: Option<&str>,
    ) -> Result<(), StorageError> {
        let page_prefix = page_blob_prefix(blob_prefix, self.page_number);

        let image_path = PathBuf::from(&self.page_image_path);
        if image_path.is_file() {
            let file_name = image_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let blob_name = format!("{page_prefix}/{file_name}");
            let cloud_uri = store
                .upload_blob(container_name, &blob_name, &image_path)
                .await?;
            self.page_image_cloud_storage_path = Some(cloud_uri);
        }

        self.text
            .upload_to_blob(store, container_name, blob_prefix)
            .await?;

        if let Some(page_text) = self.page_text.as_mut() {
            page_text
                .upload_to_blob(store, container_name, Some(&page_prefix))
                .await?;
        }

        let custom_prefix = format!("{page_prefix}/custom_processing");
        for step in &mut self.custom_page_processing_steps {
            step.upload_to_blob(store, container_name, Some(&custom_prefix))
                .await?;
        }

        for image in &mut self.images {
            image
                .upload_to_blob(store, container_name, blob_prefix)
                .await?;
        }
        for table in &mut self.tables {
            table
                .upload_to_blob(store, container_name, blob_prefix)
                .await?;
        }
        Ok(())
    }

    pub async fn download_from_blob(
        &mut self,
        store: &BlobStore,
        local_dir: &Path,
    ) -> Result<(), StorageError> {
        let page_dir = page_dir(local_dir, self.page_number);
        std::fs::create_dir_all(&page_dir)?;

        if let Some(cloud_path) = self.page_image_cloud_storage_path.clone() {
            match store.download_blob_url(&cloud_path, &page_dir).await {
                Ok(local) => self.page_image_path = local.to_string_lossy().into_owned(),
                Err(e) => warn!(url = %cloud_path, "failed to download page image: {e}"),
            }
        }

        self.text.download_from_blob(store, local_dir).await?;
        if let Some(page_text) = self.page_text.as_mut() {
            page_text.download_from_blob(store, &page_dir).await?;
        }
        let custom_dir = page_dir.join("custom_processing");
        for step in &mut self.custom_page_processing_steps {
            step.download_from_blob(store, &custom_dir).await?;
        }
        for image in &mut self.images {
            image.download_from_blob(store, local_dir).await?;
        }
        for table in &mut self.tables {
            table.download_from_blob(store, local_dir).await?;
        }
        Ok(())
    }

    /// Renders the page as a single Markdown block: header, extracted text,
    /// enumerated images, enumerated tables (with optional summaries) and a
    /// trailing reference to the page image.
    pub fn combine_content(&self) -> String {
        let mut combined = format!("##### --- Page {} ---\n\n", self.page_number);

        combined.push_str("# Extracted Text\n\n");
        if let Some(unit) = &self.text.text {
            if !unit.text.is_empty() {
                combined.push_str(&format!("{}\n\n", unit.text));
            }
        }

        if !self.images.is_empty() {
            combined.push_str("\n# Embedded Images:\n\n");
            for (i, image) in self.images.iter().enumerate() {
                combined.push_str(&format!("### - Image {}:\n", i + 1));
                if let Some(unit) = &image.text {
                    combined.push_str(&format!("{}\n\n", unit.text));
                }
            }
        }

        if !self.tables.is_empty() {
            combined.push_str("\n# Tables:\n\n");
            for (i, table) in self.tables.iter().enumerate() {
                combined.push_str(&format!("### - Table {}:\n\n", i + 1));
                if let Some(unit) = &table.text {
                    combined.push_str(&format!("{}\n\n", unit.text));
                }
                if let Some(summary) = &table.summary {
                    combined.push_str(&format!("Summary:\n{summary}\n\n"));
                }
            }
        }

        if !self.page_image_path.is_empty() {
            combined.push_str(&format!(
                "<br/>\n<br/>\n<img src=\"{}\" alt=\"Page Number {}\" width=\"300\" height=\"425\">",
                self.page_image_path, self.page_number
            ));
        }

        combined.push_str("\n\n\n\n");
        combined
    }
}

/// Loads the image-description files of one page, in filename order.
pub fn load_page_images(
    directory: &Path,
    page_number: u32,
    page_image_path: &str,
) -> Result<Vec<ExtractedImage>, ContentError> {
    let images_dir = page_dir(directory, page_number).join("images");
    let mut images = Vec::new();
    if !images_dir.is_dir() {
        return Ok(images);
    }
    let pattern = Regex::new(r"^page_(\d+)_(.+)_(\d+)\.txt$").expect("static regex");
    for file in sorted_files(&images_dir)? {
        let name = file.file_name().unwrap_or_default().to_string_lossy().into_owned();
        if let Some(caps) = pattern.captures(&name) {
            if caps[1].parse::<u32>() == Ok(page_number) {
                images.push(ExtractedImage::load_from_file(
                    &file,
                    page_number,
                    page_image_path,
                    &caps[2],
                )?);
            }
        }
    }
    Ok(images)
}

/// Loads the table files of one page, in filename order.
pub fn load_page_tables(
    directory: &Path,
    page_number: u32,
    page_image_path: &str,
) -> Result<Vec<ExtractedTable>, ContentError> {
    let tables_dir = page_dir(directory, page_number).join("tables");
    let mut tables = Vec::new();
    if !tables_dir.is_dir() {
        return Ok(tables);
    }
    let pattern = Regex::new(r"^page_(\d+)_table_(\d+)\.txt$").expect("static regex");
    for file in sorted_files(&tables_dir)? {
        let name = file.file_name().unwrap_or_default().to_string_lossy().into_owned();
        if let Some(caps) = pattern.captures(&name) {
            if caps[1].parse::<u32>() == Ok(page_number) {
                tables.push(ExtractedTable::load_from_file(
                    &file,
                    page_number,
                    Some(page_image_path),
                )?);
            }
        }
    }
    Ok(tables)
}

/// Loads custom per-page processing outputs, in filename order.
pub fn load_page_custom_steps(
    directory: &Path,
    page_number: u32,
    page_image_path: &str,
) -> Result<Vec<DataUnit>, ContentError> {
    let custom_dir = page_dir(directory, page_number).join("custom_processing");
    let mut steps = Vec::new();
    if !custom_dir.is_dir() {
        return Ok(steps);
    }
    for file in sorted_files(&custom_dir)? {
        let name = file.file_name().unwrap_or_default().to_string_lossy().into_owned();
        if name.starts_with("page_step_") {
            steps.push(DataUnit::load_from_file(&file, Some(page_image_path))?);
        }
    }
    Ok(steps)
}

fn page_dir(directory: &Path, page_number: u32) -> PathBuf {
    directory.join("pages").join(format!("page_{page_number}"))
}

fn page_blob_prefix(blob_prefix: Option<&str>, page_number: u32) -> String {
    match blob_prefix {
        Some(prefix) => format!("{prefix}/pages/page_{page_number}"),
        None => format!("pages/page_{page_number}"),
    }
}

fn existing_filename(unit: &DataUnit) -> Option<String> {
    unit.text_file_path
        .as_ref()
        .and_then(|p| Path::new(p).file_name().map(|n| n.to_string_lossy().into_owned()))
}

fn sorted_files(dir: &Path) -> Result<Vec<PathBuf>, ContentError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    Ok(files)
}
