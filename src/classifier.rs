//! Per-crop disease classification.
//!
//! Each configured crop has one ONNX model that maps a normalized leaf
//! image to a probability distribution over that crop's disease labels.
//! Models run locally through tract (pure Rust, no ONNX Runtime), on the
//! blocking thread pool.
//!
//! The [`ClassifierRouter`] resolves a crop name to its classifier. Loads
//! are lazy and cached for the process lifetime; concurrent first use of
//! the same crop is serialized per crop key, so exactly one load wins and
//! the others wait on it. A failed load leaves the slot empty, letting a
//! later request retry instead of pinning the failure.
//!
//! Preprocessing is fixed for numeric parity with the training pipeline:
//! decode to 3-channel RGB, resize to the configured square side (a no-op
//! for already-sized images), scale intensities to [0, 1] by dividing by
//! 255, and present a single-item NHWC batch.

use anyhow::Result;
use async_trait::async_trait;
use image::{imageops::FilterType, DynamicImage};
use ndarray::Array4;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tract_onnx::prelude::*;
use tracing::info;

use crate::config::{ClassifierConfig, CropModelConfig};
use crate::error::DiagnosisError;

/// Classification output: the argmax disease label and its probability.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub label: String,
    /// Maximum value of the output distribution, in `[0, 1]`.
    pub confidence: f32,
}

/// A disease classifier for one crop.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// The crop this classifier was trained for.
    fn crop(&self) -> &str;

    /// Classify a decoded leaf image.
    async fn classify(&self, image: &DynamicImage) -> Result<Prediction, DiagnosisError>;
}

/// Decode raw upload bytes into an image.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, DiagnosisError> {
    image::load_from_memory(bytes).map_err(|e| DiagnosisError::Decode(e.to_string()))
}

/// Convert an image into a `[1, side, side, 3]` tensor scaled to [0, 1].
///
/// Resizing an already-correctly-sized image is a no-op: the pixel values
/// pass through untouched except for the /255 rescale. Off-size images are
/// resampled bicubically, matching the resize the models were trained with.
pub fn preprocess(image: &DynamicImage, side: u32) -> Array4<f32> {
    let rgb = if image.width() == side && image.height() == side {
        image.to_rgb8()
    } else {
        image
            .resize_exact(side, side, FilterType::CatmullRom)
            .to_rgb8()
    };

    let n = side as usize;
    let mut tensor = Array4::<f32>::zeros((1, n, n, 3));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, y as usize, x as usize, c]] = pixel[c] as f32 / 255.0;
        }
    }
    tensor
}

/// Index of the maximum value; ties resolve to the lowest index.
pub fn argmax(probs: &[f32]) -> usize {
    let mut best = 0;
    for (i, &p) in probs.iter().enumerate() {
        if p > probs[best] {
            best = i;
        }
    }
    best
}

// ============ ONNX classifier ============

/// Classifier backed by an ONNX graph run through tract.
pub struct OnnxClassifier {
    crop: String,
    labels: Vec<String>,
    image_size: u32,
    plan: Arc<TypedSimplePlan<TypedModel>>,
}

impl OnnxClassifier {
    /// Load and optimize the model, pinning the input shape to a single
    /// NHWC image of the configured side.
    ///
    /// Fails fast when the model's output dimensionality does not match
    /// the configured label count, rather than at first inference.
    pub fn load(
        crop: &str,
        weights: &Path,
        labels: Vec<String>,
        image_size: u32,
    ) -> Result<Self> {
        let side = image_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(weights)
            .map_err(|e| anyhow::anyhow!("Load ONNX {}: {}", weights.display(), e))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, side, side, 3)),
            )
            .map_err(|e| anyhow::anyhow!("Set input shape: {}", e))?
            .into_optimized()
            .map_err(|e| anyhow::anyhow!("Optimize: {}", e))?;

        let output_fact = model
            .output_fact(0)
            .map_err(|e| anyhow::anyhow!("Read output fact: {}", e))?;
        let shape = output_fact
            .shape
            .as_concrete()
            .ok_or_else(|| anyhow::anyhow!("Model output shape is not concrete"))?;
        let classes = shape.last().copied().unwrap_or(0);
        if classes != labels.len() {
            anyhow::bail!(
                "Model for '{}' outputs {} classes but {} labels are configured",
                crop,
                classes,
                labels.len()
            );
        }

        let plan = model
            .into_runnable()
            .map_err(|e| anyhow::anyhow!("Build runnable plan: {}", e))?;

        info!(crop, classes, "loaded classifier model");
        Ok(Self {
            crop: crop.to_string(),
            labels,
            image_size,
            plan: Arc::new(plan),
        })
    }

    fn model_error(&self, message: impl std::fmt::Display) -> DiagnosisError {
        DiagnosisError::ModelLoad {
            crop: self.crop.clone(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl Classifier for OnnxClassifier {
    fn crop(&self) -> &str {
        &self.crop
    }

    async fn classify(&self, image: &DynamicImage) -> Result<Prediction, DiagnosisError> {
        let tensor: Tensor = preprocess(image, self.image_size).into();
        let plan = self.plan.clone();

        // The extraction happens inside the closure: tract's output values
        // are not Send, only the plain f32 distribution crosses back.
        let probs: Vec<f32> = tokio::task::spawn_blocking(move || -> Result<Vec<f32>> {
            let outputs = plan.run(tvec!(tensor.into()))?;
            let output = outputs
                .first()
                .ok_or_else(|| anyhow::anyhow!("model produced no output tensor"))?;
            Ok(output.to_array_view::<f32>()?.iter().copied().collect())
        })
        .await
        .map_err(|e| self.model_error(e))?
        .map_err(|e| self.model_error(e))?;

        if probs.is_empty() {
            return Err(self.model_error("model produced an empty distribution"));
        }

        let idx = argmax(&probs);
        let label = self
            .labels
            .get(idx)
            .ok_or_else(|| self.model_error(format!("class index {} out of bounds", idx)))?
            .clone();

        Ok(Prediction {
            label,
            confidence: probs[idx],
        })
    }
}

// ============ Router ============

/// Resolves crop names to cached classifiers.
///
/// Construction is cheap: no model is touched until its crop is first
/// requested. Unknown crops are rejected before any model-loading I/O.
pub struct ClassifierRouter {
    image_size: u32,
    crops: BTreeMap<String, CropModelConfig>,
    cells: Mutex<HashMap<String, Arc<OnceCell<Arc<dyn Classifier>>>>>,
}

impl ClassifierRouter {
    pub fn new(image_size: u32, crops: BTreeMap<String, CropModelConfig>) -> Self {
        Self {
            image_size,
            crops,
            cells: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self::new(config.image_size, config.crops.clone())
    }

    /// Pre-seed a ready classifier, bypassing model loading.
    ///
    /// Used by tests and custom builds to substitute implementations.
    pub fn register(&self, classifier: Arc<dyn Classifier>) {
        let cell = Arc::new(OnceCell::new());
        let _ = cell.set(classifier.clone());
        self.cells
            .lock()
            .expect("classifier cache poisoned")
            .insert(classifier.crop().to_string(), cell);
    }

    /// Resolve a crop to its classifier, loading and caching on first use.
    pub async fn resolve(&self, crop: &str) -> Result<Arc<dyn Classifier>, DiagnosisError> {
        // Fast path: already loaded (or pre-seeded).
        if let Some(cell) = self
            .cells
            .lock()
            .expect("classifier cache poisoned")
            .get(crop)
        {
            if let Some(ready) = cell.get() {
                return Ok(ready.clone());
            }
        }

        let spec = self
            .crops
            .get(crop)
            .cloned()
            .ok_or_else(|| DiagnosisError::UnknownCrop(crop.to_string()))?;

        let cell = {
            let mut cells = self.cells.lock().expect("classifier cache poisoned");
            cells
                .entry(crop.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let image_size = self.image_size;
        let crop_name = crop.to_string();
        let ready = cell
            .get_or_try_init(move || async move {
                let name = crop_name.clone();
                let loaded = tokio::task::spawn_blocking(move || {
                    OnnxClassifier::load(&name, &spec.weights, spec.labels, image_size)
                })
                .await
                .map_err(|e| DiagnosisError::ModelLoad {
                    crop: crop_name.clone(),
                    message: e.to_string(),
                })?
                .map_err(|e| DiagnosisError::ModelLoad {
                    crop: crop_name,
                    message: e.to_string(),
                })?;
                Ok::<Arc<dyn Classifier>, DiagnosisError>(Arc::new(loaded))
            })
            .await?;

        Ok(ready.clone())
    }
}
