//! The atomic text-bearing leaf of the document tree.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{ContentError, StorageError};
use crate::storage::BlobStore;

fn default_language() -> String {
    "en".to_string()
}

/// A text body plus the places it lives: an optional on-disk file, an
/// optional cloud copy, and an optional reference to the page image it was
/// derived from.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DataUnit {
    pub text: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub text_file_path: Option<String>,
    #[serde(default)]
    pub text_file_cloud_storage_path: Option<String>,
    #[serde(default)]
    pub page_image_path: Option<String>,
    #[serde(default)]
    pub page_image_cloud_storage_path: Option<String>,
}

impl Default for DataUnit {
    fn default() -> Self {
        Self::new("")
    }
}

impl DataUnit {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: default_language(),
            text_file_path: None,
            text_file_cloud_storage_path: None,
            page_image_path: None,
            page_image_cloud_storage_path: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_page_image(mut self, page_image_path: impl Into<String>) -> Self {
        self.page_image_path = Some(page_image_path.into());
        self
    }

    /// Writes the text to `directory/filename` and records the path.
    ///
    /// When no filename is given, one is derived from the md5 of the first
    /// 100 characters of the text: `content_{hash8}.txt`.
    pub fn save_to_file(
        &mut self,
        directory: &Path,
        filename: Option<&str>,
    ) -> Result<PathBuf, ContentError> {
        std::fs::create_dir_all(directory)?;

        let filename = match filename {
            Some(name) => name.to_string(),
            None => {
                let head: String = self.text.chars().take(100).collect();
                let digest = format!("{:x}", md5::compute(head.as_bytes()));
                format!("content_{}.txt", &digest[..8])
            }
        };

        let file_path = directory.join(filename);
        std::fs::write(&file_path, &self.text)?;
        self.text_file_path = Some(file_path.to_string_lossy().into_owned());
        Ok(file_path)
    }

    /// Builds a unit from an existing text file.
    pub fn load_from_file(
        file_path: &Path,
        page_image_path: Option<&str>,
    ) -> Result<Self, ContentError> {
        if !file_path.is_file() {
            return Err(ContentError::FileNotFound(file_path.display().to_string()));
        }
        let text = std::fs::read_to_string(file_path)?;
        Ok(Self {
            text,
            language: default_language(),
            text_file_path: Some(file_path.to_string_lossy().into_owned()),
            text_file_cloud_storage_path: None,
            page_image_path: page_image_path.map(str::to_string),
            page_image_cloud_storage_path: None,
        })
    }

    /// Uploads the text file and the referenced page image (when present)
    /// and records their cloud URIs.
    pub async fn upload_to_blob(
        &mut self,
        store: &BlobStore,
        container_name: &str,
        blob_prefix: Option<&str>,
    ) -> Result<(), StorageError> {
        let Some(text_file_path) = self.text_file_path.clone() else {
            return Ok(());
        };
        let file_path = Path::new(&text_file_path);
        if !file_path.is_file() {
            return Ok(());
        }

        let blob_name = prefixed_name(blob_prefix, file_path);
        let cloud_uri = store
            .upload_blob(container_name, &blob_name, file_path)
            .await?;
        self.text_file_cloud_storage_path = Some(cloud_uri);

        if let Some(image_path) = self.page_image_path.clone() {
            let image_path = Path::new(&image_path);
            if image_path.is_file() {
                let blob_name = prefixed_name(blob_prefix, image_path);
                let cloud_uri = store
                    .upload_blob(container_name, &blob_name, image_path)
                    .await?;
                self.page_image_cloud_storage_path = Some(cloud_uri);
            }
        }
        Ok(())
    }

    /// Downloads the cloud copies into `local_dir`, updating the local paths.
    /// Individual download failures are logged and skipped.
    pub async fn download_from_blob(
        &mut self,
        store: &BlobStore,
        local_dir: &Path,
    ) -> Result<(), StorageError> {
        std::fs::create_dir_all(local_dir)?;

        if let Some(cloud_path) = self.text_file_cloud_storage_path.clone() {
            match store.download_blob_url(&cloud_path, local_dir).await {
                Ok(local) => self.text_file_path = Some(local.to_string_lossy().into_owned()),
                Err(e) => warn!(url = %cloud_path, "failed to download text file: {e}"),
            }
        }
        if let Some(cloud_path) = self.page_image_cloud_storage_path.clone() {
            match store.download_blob_url(&cloud_path, local_dir).await {
                Ok(local) => self.page_image_path = Some(local.to_string_lossy().into_owned()),
                Err(e) => warn!(url = %cloud_path, "failed to download image file: {e}"),
            }
        }
        Ok(())
    }
}

fn prefixed_name(blob_prefix: Option<&str>, file_path: &Path) -> String {
    let file_name = file_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed-blob".to_string());
    match blob_prefix {
        Some(prefix) => format!("{prefix}/{file_name}"),
        None => file_name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_writes_text_and_records_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut unit = DataUnit::new("hello pipeline");
        let path = unit.save_to_file(dir.path(), Some("greeting.txt")).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello pipeline");
        assert_eq!(unit.text_file_path.as_deref(), Some(path.to_str().unwrap()));
    }

    #[test]
    fn generated_filenames_are_content_addressed() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = DataUnit::new("same text");
        let mut b = DataUnit::new("same text");
        let path_a = a.save_to_file(dir.path(), None).unwrap();
        let path_b = b.save_to_file(dir.path(), None).unwrap();
        assert_eq!(path_a, path_b);
        assert!(path_a
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("content_"));
    }

    #[test]
    fn load_round_trips_save() {
        let dir = tempfile::tempdir().unwrap();
        let mut unit = DataUnit::new("round trip body");
        let path = unit.save_to_file(dir.path(), None).unwrap();
        let loaded = DataUnit::load_from_file(&path, None).unwrap();
        assert_eq!(loaded.text, unit.text);
        assert_eq!(loaded.text_file_path, unit.text_file_path);
    }

    #[test]
    fn loading_a_missing_file_fails() {
        let err = DataUnit::load_from_file(Path::new("/nonexistent/file.txt"), None).unwrap_err();
        assert!(matches!(err, ContentError::FileNotFound(_)));
    }
}
