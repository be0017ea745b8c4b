//! Knowledge base loading.
//!
//! The knowledge source is a JSON document with a top-level
//! `knowledge_base` array, one entry per crop-disease pair. Records are
//! immutable once loaded: they are read at index-build time, flattened into
//! a single text block, embedded, and never touched again.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// One crop-disease entry from the knowledge source.
#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeRecord {
    pub crop: String,
    pub disease: String,
    pub symptoms: String,
    pub causes: String,
    pub treatment: String,
    pub prevention: String,
}

#[derive(Debug, Deserialize)]
struct KnowledgeFile {
    knowledge_base: Vec<KnowledgeRecord>,
}

impl KnowledgeRecord {
    /// Serialize the record into the single text block that gets embedded.
    ///
    /// Field order is fixed (Crop, Disease, Symptoms, Causes, Treatment,
    /// Prevention) so that rebuilt indices stay query-equivalent.
    pub fn flattened_text(&self) -> String {
        format!(
            "Crop: {}\nDisease: {}\nSymptoms: {}\nCauses: {}\nTreatment: {}\nPrevention: {}",
            self.crop, self.disease, self.symptoms, self.causes, self.treatment, self.prevention
        )
    }
}

/// Load and parse the knowledge source.
///
/// Absence or malformation is fatal at startup: the caller must not start
/// serving without a usable knowledge base.
pub fn load_records(path: &Path) -> Result<Vec<KnowledgeRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read knowledge source: {}", path.display()))?;

    let file: KnowledgeFile = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse knowledge source: {}", path.display()))?;

    if file.knowledge_base.is_empty() {
        anyhow::bail!(
            "Knowledge source {} contains no records",
            path.display()
        );
    }

    Ok(file.knowledge_base)
}
