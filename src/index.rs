//! SQLite-persisted similarity index over the knowledge base.
//!
//! The index owns one row per [`KnowledgeRecord`]: the flattened text, the
//! `(crop, disease)` tags, and the embedding vector stored as a
//! little-endian f32 BLOB. It is either fully built or absent — there is no
//! partial-build state.
//!
//! Lifecycle: [`SimilarityIndex::ensure`] loads the persisted file when it
//! exists and otherwise builds from the knowledge source and persists
//! immediately, so later restarts skip the rebuild. That is a cold-start
//! optimization only: a rebuild is always query-equivalent to a load.
//! Rebuilding replaces the whole file; the index is never patched in place.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::embedding::{self, Embedder};
use crate::knowledge::{self, KnowledgeRecord};

/// One retrieval hit, ranked by descending similarity.
#[derive(Debug, Clone)]
pub struct RetrievedDoc {
    pub text: String,
    pub crop: String,
    pub disease: String,
    pub score: f32,
}

/// Nearest-neighbor search structure over embedded knowledge records.
///
/// Read-only after construction; shared across requests for the process
/// lifetime.
pub struct SimilarityIndex {
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
}

impl SimilarityIndex {
    /// Build a fresh index from records, replacing any file at `path`.
    ///
    /// Every record is flattened deterministically and embedded exactly
    /// once. Record ids follow insertion order, which makes query
    /// tie-breaking stable across rebuilds.
    pub async fn build(
        path: &Path,
        records: &[KnowledgeRecord],
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        if records.is_empty() {
            anyhow::bail!("Cannot build a similarity index from zero records");
        }

        // Embed before touching the persisted file: an embedding outage
        // during a rebuild must not destroy an existing usable index.
        let texts: Vec<String> = records.iter().map(|r| r.flattened_text()).collect();
        let vectors = embedder
            .embed(&texts)
            .await
            .context("Embedding service unavailable while building index")?;
        if vectors.len() != records.len() {
            anyhow::bail!(
                "Embedding service returned {} vectors for {} records",
                vectors.len(),
                records.len()
            );
        }

        remove_index_files(path);
        let pool = connect(path, true).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                id INTEGER PRIMARY KEY,
                crop TEXT NOT NULL,
                disease TEXT NOT NULL,
                text TEXT NOT NULL,
                embedding BLOB NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        let mut tx = pool.begin().await?;
        for (i, (record, vector)) in records.iter().zip(vectors.iter()).enumerate() {
            sqlx::query(
                "INSERT INTO records (id, crop, disease, text, embedding) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(i as i64)
            .bind(&record.crop)
            .bind(&record.disease)
            .bind(&texts[i])
            .bind(embedding::vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        info!(records = records.len(), path = %path.display(), "built similarity index");
        Ok(Self { pool, embedder })
    }

    /// Open a persisted index, returning `None` when no usable index exists
    /// at `path` (missing file, missing table, or zero records).
    pub async fn open(path: &Path, embedder: Arc<dyn Embedder>) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let pool = connect(path, false).await?;

        let count: i64 = match sqlx::query("SELECT COUNT(*) AS n FROM records")
            .fetch_one(&pool)
            .await
        {
            Ok(row) => row.get("n"),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "persisted index unreadable; will rebuild");
                pool.close().await;
                return Ok(None);
            }
        };

        if count == 0 {
            pool.close().await;
            return Ok(None);
        }

        info!(records = count, path = %path.display(), "loaded similarity index");
        Ok(Some(Self { pool, embedder }))
    }

    /// Load the persisted index, or build from the knowledge source and
    /// persist when absent.
    ///
    /// Fails fatally when no index can be loaded and the knowledge source
    /// is missing or malformed — the service must not start partially.
    pub async fn ensure(config: &Config, embedder: Arc<dyn Embedder>) -> Result<Self> {
        if let Some(index) = Self::open(&config.index.path, embedder.clone()).await? {
            return Ok(index);
        }

        let records = knowledge::load_records(&config.knowledge.path)
            .context("No persisted index and the knowledge source is unusable")?;
        Self::build(&config.index.path, &records, embedder).await
    }

    /// Top-k retrieval by embedding similarity.
    ///
    /// Results are ranked by descending cosine similarity, ties broken by
    /// ascending record id, and truncated to `k`.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<RetrievedDoc>> {
        let query_vec = self
            .embedder
            .embed_one(text)
            .await
            .context("Embedding service unavailable for retrieval query")?;

        let rows = sqlx::query("SELECT id, crop, disease, text, embedding FROM records")
            .fetch_all(&self.pool)
            .await?;

        let mut scored: Vec<(i64, RetrievedDoc)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = embedding::blob_to_vec(&blob);
                let score = embedding::cosine_similarity(&query_vec, &vec);
                (
                    row.get::<i64, _>("id"),
                    RetrievedDoc {
                        text: row.get("text"),
                        crop: row.get("crop"),
                        disease: row.get("disease"),
                        score,
                    },
                )
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.score
                .partial_cmp(&a.1.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k);

        Ok(scored.into_iter().map(|(_, doc)| doc).collect())
    }

    /// Number of indexed records.
    pub async fn len(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM records")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }
}

async fn connect(path: &Path, create: bool) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .create_if_missing(create)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Full-replace semantics: drop the index file and its WAL sidecars.
fn remove_index_files(path: &Path) {
    for suffix in ["", "-wal", "-shm"] {
        let mut p = path.as_os_str().to_owned();
        p.push(suffix);
        let _ = std::fs::remove_file(Path::new(&p));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Deterministic embedder: folds bytes into a fixed-width vector.
    struct HashEmbedder;

    fn embed_text(text: &str) -> Vec<f32> {
        let mut v = vec![0f32; 8];
        for (i, b) in text.bytes().enumerate() {
            v[i % 8] += b as f32 / 255.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 1e-9 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }

    #[async_trait]
    impl Embedder for HashEmbedder {
        fn model_name(&self) -> &str {
            "hash-stub"
        }
        fn dims(&self) -> usize {
            8
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| embed_text(t)).collect())
        }
    }

    fn record(crop: &str, disease: &str) -> KnowledgeRecord {
        KnowledgeRecord {
            crop: crop.into(),
            disease: disease.into(),
            symptoms: format!("{} symptoms", disease),
            causes: "fungal pathogen".into(),
            treatment: "fungicide".into(),
            prevention: "rotation".into(),
        }
    }

    fn sample_records() -> Vec<KnowledgeRecord> {
        vec![
            record("Wheat", "Brown Rust"),
            record("Wheat", "Smut"),
            record("Rice", "Leaf Blast"),
            record("Maize", "Common Rust"),
        ]
    }

    #[tokio::test]
    async fn test_build_and_query_ranking() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("index.sqlite");
        let index = SimilarityIndex::build(&path, &sample_records(), Arc::new(HashEmbedder))
            .await
            .unwrap();

        assert_eq!(index.len().await.unwrap(), 4);

        let results = index.query("Crop: Wheat, Disease: Brown Rust", 3).await.unwrap();
        assert_eq!(results.len(), 3);
        // Scores are descending.
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        // Every hit carries its tags and flattened text.
        assert!(results[0].text.starts_with("Crop: "));
        assert!(!results[0].crop.is_empty());
        assert!(!results[0].disease.is_empty());
    }

    #[tokio::test]
    async fn test_query_k_larger_than_records() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("index.sqlite");
        let index = SimilarityIndex::build(&path, &sample_records(), Arc::new(HashEmbedder))
            .await
            .unwrap();

        let results = index.query("anything", 50).await.unwrap();
        assert_eq!(results.len(), 4);
    }

    #[tokio::test]
    async fn test_persist_load_roundtrip_is_query_equivalent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("index.sqlite");
        let query = "Crop: Rice, Disease: Leaf Blast";

        let built = SimilarityIndex::build(&path, &sample_records(), Arc::new(HashEmbedder))
            .await
            .unwrap();
        let built_tags: Vec<(String, String)> = built
            .query(query, 4)
            .await
            .unwrap()
            .into_iter()
            .map(|d| (d.crop, d.disease))
            .collect();

        let loaded = SimilarityIndex::open(&path, Arc::new(HashEmbedder))
            .await
            .unwrap()
            .expect("persisted index should load");
        let loaded_tags: Vec<(String, String)> = loaded
            .query(query, 4)
            .await
            .unwrap()
            .into_iter()
            .map(|d| (d.crop, d.disease))
            .collect();

        assert_eq!(built_tags, loaded_tags);
    }

    #[tokio::test]
    async fn test_open_missing_returns_none() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("absent.sqlite");
        let opened = SimilarityIndex::open(&path, Arc::new(HashEmbedder))
            .await
            .unwrap();
        assert!(opened.is_none());
    }

    #[tokio::test]
    async fn test_build_from_zero_records_fails() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("index.sqlite");
        let err = SimilarityIndex::build(&path, &[], Arc::new(HashEmbedder))
            .await
            .map(|_| ())
            .unwrap_err();
        assert!(err.to_string().contains("zero records"));
    }

    /// Embedder that always fails, standing in for a service outage.
    struct DownEmbedder;

    #[async_trait]
    impl Embedder for DownEmbedder {
        fn model_name(&self) -> &str {
            "down-stub"
        }
        fn dims(&self) -> usize {
            8
        }
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            anyhow::bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn test_failed_rebuild_keeps_existing_index() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("index.sqlite");

        SimilarityIndex::build(&path, &sample_records(), Arc::new(HashEmbedder))
            .await
            .unwrap();

        let err = SimilarityIndex::build(&path, &sample_records(), Arc::new(DownEmbedder))
            .await
            .map(|_| ())
            .unwrap_err();
        assert!(err.to_string().contains("Embedding service unavailable"));

        // The previously persisted index is untouched and still loadable.
        let survivor = SimilarityIndex::open(&path, Arc::new(HashEmbedder))
            .await
            .unwrap()
            .expect("existing index should survive a failed rebuild");
        assert_eq!(survivor.len().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_rebuild_replaces_previous_index() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("index.sqlite");

        SimilarityIndex::build(&path, &sample_records(), Arc::new(HashEmbedder))
            .await
            .unwrap();
        let rebuilt =
            SimilarityIndex::build(&path, &sample_records()[..2], Arc::new(HashEmbedder))
                .await
                .unwrap();

        assert_eq!(rebuilt.len().await.unwrap(), 2);
    }
}
