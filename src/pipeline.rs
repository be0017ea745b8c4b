//! Diagnosis orchestration.
//!
//! One request flows linearly through resolve → decode → classify →
//! retrieve → compose → generate → shape. Each stage is a pure function of
//! the previous stage's output; nothing is retried automatically, and the
//! pipeline always terminates with either a shaped [`Diagnosis`] or one
//! typed [`DiagnosisError`].

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::classifier::{self, ClassifierRouter};
use crate::error::DiagnosisError;
use crate::generate::AdvisoryGenerator;
use crate::index::SimilarityIndex;
use crate::prompt::{self, PromptInput};

/// The externally visible diagnosis result.
///
/// `advice` is best-effort markdown prose from the generator, passed
/// through without structural validation.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnosis {
    pub crop: String,
    pub disease: String,
    /// Rounded to 4 decimal places at this boundary.
    pub confidence: f64,
    pub advice: String,
}

/// Long-lived service object sequencing the diagnosis stages.
///
/// Holds the shared read-mostly resources (classifier cache, similarity
/// index, generator handle); constructed once at startup and shared across
/// requests.
pub struct DiagnosisPipeline {
    router: Arc<ClassifierRouter>,
    index: Arc<SimilarityIndex>,
    generator: Arc<dyn AdvisoryGenerator>,
    top_k: usize,
}

impl DiagnosisPipeline {
    pub fn new(
        router: Arc<ClassifierRouter>,
        index: Arc<SimilarityIndex>,
        generator: Arc<dyn AdvisoryGenerator>,
        top_k: usize,
    ) -> Self {
        Self {
            router,
            index,
            generator,
            top_k,
        }
    }

    /// Run the full pipeline for one `(crop, image bytes)` request.
    pub async fn diagnose(
        &self,
        crop: &str,
        image_bytes: &[u8],
    ) -> Result<Diagnosis, DiagnosisError> {
        // Unknown crops are rejected before any model or retrieval I/O.
        let classifier = self.router.resolve(crop).await?;
        let image = classifier::decode_image(image_bytes)?;

        let prediction = classifier.classify(&image).await?;
        debug!(
            crop,
            disease = %prediction.label,
            confidence = prediction.confidence,
            "classified leaf image"
        );

        let query = retrieval_query(crop, &prediction.label);
        let docs = self
            .index
            .query(&query, self.top_k)
            .await
            .map_err(|e| DiagnosisError::IndexUnavailable(e.to_string()))?;
        debug!(query = %query, hits = docs.len(), "retrieved knowledge context");

        let prompt = prompt::compose(&PromptInput {
            crop: crop.to_string(),
            disease: prediction.label.clone(),
            confidence: prediction.confidence,
            context: docs.into_iter().map(|d| d.text).collect(),
        });

        let advice = self.generator.generate(&prompt).await?;

        info!(crop, disease = %prediction.label, "diagnosis complete");
        Ok(Diagnosis {
            crop: crop.to_string(),
            disease: prediction.label,
            confidence: prompt::round_confidence(prediction.confidence),
            advice,
        })
    }
}

/// The synthetic lookup key bridging classification to retrieval.
///
/// Built from the classifier output, not copied from any stored record.
pub fn retrieval_query(crop: &str, disease: &str) -> String {
    format!("Crop: {}, Disease: {}", crop, disease)
}
