//! Request-level error taxonomy.
//!
//! Every diagnosis request terminates either with a shaped response or with
//! exactly one of these variants. Client errors (`UnknownCrop`, `Decode`)
//! mean the request itself was invalid and map to HTTP 400; the remaining
//! variants are dependency failures and map to HTTP 500, with the failing
//! stage reported for diagnosability.
//!
//! Startup-time failures (bad config, missing credential, unreadable
//! knowledge source) are plain `anyhow` errors — the process refuses to
//! start, so no taxonomy is needed there.

use thiserror::Error;

/// A failure at some stage of the diagnosis pipeline.
#[derive(Debug, Error)]
pub enum DiagnosisError {
    /// The requested crop has no configured classifier. Raised before any
    /// model-loading or retrieval I/O.
    #[error("unknown crop: '{0}' is not configured")]
    UnknownCrop(String),

    /// The uploaded bytes could not be decoded as an image.
    #[error("could not decode image: {0}")]
    Decode(String),

    /// The crop's model could not be loaded or run (missing weights file,
    /// label/output shape mismatch, inference fault). Fatal for this crop's
    /// requests, not for the process.
    #[error("model failure for crop '{crop}': {message}")]
    ModelLoad { crop: String, message: String },

    /// The similarity index could not answer the retrieval query, usually
    /// because the embedding service is unreachable.
    #[error("similarity index unavailable: {0}")]
    IndexUnavailable(String),

    /// The text-generation service failed or returned an error status.
    #[error("advisory generation failed: {0}")]
    Generation(String),
}

impl DiagnosisError {
    /// Machine-readable code used in the HTTP error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            DiagnosisError::UnknownCrop(_) => "unknown_crop",
            DiagnosisError::Decode(_) => "decode_error",
            DiagnosisError::ModelLoad { .. } => "model_load_error",
            DiagnosisError::IndexUnavailable(_) => "index_unavailable",
            DiagnosisError::Generation(_) => "generation_error",
        }
    }

    /// The pipeline stage that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            DiagnosisError::UnknownCrop(_) => "resolve",
            DiagnosisError::Decode(_) => "decode",
            DiagnosisError::ModelLoad { .. } => "classify",
            DiagnosisError::IndexUnavailable(_) => "retrieve",
            DiagnosisError::Generation(_) => "generate",
        }
    }

    /// Whether the caller is at fault (HTTP 400) rather than a dependency
    /// (HTTP 500).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            DiagnosisError::UnknownCrop(_) | DiagnosisError::Decode(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors() {
        assert!(DiagnosisError::UnknownCrop("potato".into()).is_client_error());
        assert!(DiagnosisError::Decode("not an image".into()).is_client_error());
        assert!(!DiagnosisError::IndexUnavailable("down".into()).is_client_error());
        assert!(!DiagnosisError::Generation("timeout".into()).is_client_error());
    }

    #[test]
    fn test_codes_and_stages() {
        let err = DiagnosisError::ModelLoad {
            crop: "Wheat".into(),
            message: "missing file".into(),
        };
        assert_eq!(err.code(), "model_load_error");
        assert_eq!(err.stage(), "classify");
        assert_eq!(DiagnosisError::UnknownCrop("x".into()).stage(), "resolve");
        assert_eq!(
            DiagnosisError::IndexUnavailable("x".into()).code(),
            "index_unavailable"
        );
    }
}
