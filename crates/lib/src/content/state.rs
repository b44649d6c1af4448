//! Per-document resume token for the pipeline state machine.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::ContentError;

/// The per-page extraction stages tracked for resume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineStage {
    Text,
    Images,
    Tables,
    CustomPage,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Images => write!(f, "images"),
            Self::Tables => write!(f, "tables"),
            Self::CustomPage => write!(f, "custom_page"),
        }
    }
}

/// Which pages have completed which stages, plus the terminal
/// post-processing flag. Persisted as `pipeline_state.json` in the output
/// directory after every stage completion.
///
/// Page entries are append-only during a run; a recorded page is never
/// removed except by deleting the state file.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineState {
    #[serde(default)]
    pub text_extracted_pages: Vec<u32>,
    #[serde(default)]
    pub custom_page_processing: Vec<u32>,
    #[serde(default)]
    pub images_extracted_pages: Vec<u32>,
    #[serde(default)]
    pub tables_extracted_pages: Vec<u32>,
    #[serde(default)]
    pub post_processing_done: bool,
}

impl PipelineState {
    /// Loads the state file, falling back to an empty state when the file is
    /// absent or unparseable (corruption is logged, not fatal).
    pub fn load_or_default(path: &Path) -> Self {
        if !path.is_file() {
            return Self::default();
        }
        match std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str(&text).map_err(|e| e.to_string()))
        {
            Ok(state) => state,
            Err(e) => {
                warn!(path = %path.display(), "pipeline state is corrupt, starting fresh: {e}");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ContentError> {
        super::save_json(self, path)
    }

    /// Deletes the persisted state, if any.
    pub fn reset(path: &Path) -> Result<(), ContentError> {
        if path.is_file() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    fn pages(&self, stage: PipelineStage) -> &Vec<u32> {
        match stage {
            PipelineStage::Text => &self.text_extracted_pages,
            PipelineStage::Images => &self.images_extracted_pages,
            PipelineStage::Tables => &self.tables_extracted_pages,
            PipelineStage::CustomPage => &self.custom_page_processing,
        }
    }

    fn pages_mut(&mut self, stage: PipelineStage) -> &mut Vec<u32> {
        match stage {
            PipelineStage::Text => &mut self.text_extracted_pages,
            PipelineStage::Images => &mut self.images_extracted_pages,
            PipelineStage::Tables => &mut self.tables_extracted_pages,
            PipelineStage::CustomPage => &mut self.custom_page_processing,
        }
    }

    pub fn is_done(&self, stage: PipelineStage, page_number: u32) -> bool {
        self.pages(stage).contains(&page_number)
    }

    /// Records a completed stage. Appending is monotone: already-recorded
    /// pages are left in place.
    pub fn mark_done(&mut self, stage: PipelineStage, page_number: u32) {
        let pages = self.pages_mut(stage);
        if !pages.contains(&page_number) {
            pages.push(page_number);
        }
    }
}
