use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    pub classifier: ClassifierConfig,
    pub server: ServerConfig,
}

/// Location of the persisted similarity index (a SQLite file).
#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    pub path: PathBuf,
}

/// Location of the JSON knowledge source.
#[derive(Debug, Deserialize, Clone)]
pub struct KnowledgeConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// How many knowledge documents to hand the prompt composer.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"openai"` or `"ollama"`.
    pub provider: String,
    pub model: Option<String>,
    pub dims: Option<usize>,
    /// Base URL override (Ollama host, or an OpenAI-compatible endpoint).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// Only `"mistral"` is supported.
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    /// Chat-completions endpoint override, mainly for tests.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: default_generation_model(),
            url: None,
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

fn default_generation_provider() -> String {
    "mistral".to_string()
}
fn default_generation_model() -> String {
    "mistral-small-latest".to_string()
}
fn default_generation_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    /// Square side the preprocessor resizes every image to. Must match what
    /// the models were trained on.
    #[serde(default = "default_image_size")]
    pub image_size: u32,
    /// One entry per supported crop, keyed by the crop name clients send.
    pub crops: BTreeMap<String, CropModelConfig>,
}

fn default_image_size() -> u32 {
    224
}

/// Static configuration for one crop's classifier.
#[derive(Debug, Deserialize, Clone)]
pub struct CropModelConfig {
    /// Path to the ONNX weights file.
    pub weights: PathBuf,
    /// Ordered disease labels, index-addressed by the model's output. The
    /// length is validated against the model's output dimensionality at
    /// load time.
    pub labels: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be openai or ollama.",
            other
        ),
    }
    if config.embedding.model.is_none() {
        anyhow::bail!(
            "embedding.model must be specified for provider '{}'",
            config.embedding.provider
        );
    }
    if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
        anyhow::bail!(
            "embedding.dims must be > 0 for provider '{}'",
            config.embedding.provider
        );
    }

    // Validate generation
    if config.generation.provider != "mistral" {
        anyhow::bail!(
            "Unknown generation provider: '{}'. Must be mistral.",
            config.generation.provider
        );
    }

    // Validate classifier
    if config.classifier.image_size == 0 {
        anyhow::bail!("classifier.image_size must be > 0");
    }
    if config.classifier.crops.is_empty() {
        anyhow::bail!("classifier.crops must configure at least one crop");
    }
    for (crop, model) in &config.classifier.crops {
        if model.labels.is_empty() {
            anyhow::bail!("classifier.crops.{}.labels must not be empty", crop);
        }
    }

    Ok(config)
}
