//! # Crop Clinic
//!
//! A leaf-photo crop disease diagnosis service with retrieval-augmented
//! advisories.
//!
//! Crop Clinic routes a `(crop, image)` request to a per-crop disease
//! classifier, turns the prediction into a retrieval query, fetches
//! supporting knowledge from an embedded similarity index, composes a
//! deterministic prompt, and asks a hosted language model for a
//! farmer-readable advisory.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌────────────┐   ┌───────────┐
//! │  Router  │──▶│ Classifier │──▶│ Similarity │──▶│  Prompt   │
//! │ per crop │   │ ONNX/tract │   │   Index    │   │ Composer  │
//! └──────────┘   └────────────┘   └─────┬──────┘   └─────┬─────┘
//!                                       │                ▼
//!                                  ┌────┴─────┐    ┌──────────┐
//!                                  │  SQLite  │    │ Advisory │
//!                                  │ vectors  │    │Generator │
//!                                  └──────────┘    └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! clinic init                          # embed the knowledge base
//! clinic query "Crop: Wheat, Disease: Brown Rust"
//! clinic diagnose Wheat leaf.jpg       # one-shot pipeline run
//! clinic serve                         # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Request-level error taxonomy |
//! | [`knowledge`] | Knowledge base loading and flattening |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | SQLite-persisted similarity index |
//! | [`classifier`] | Image preprocessing and per-crop classifier routing |
//! | [`prompt`] | Deterministic advisory prompt composition |
//! | [`generate`] | Advisory text generation |
//! | [`pipeline`] | Diagnosis orchestration |
//! | [`server`] | HTTP API |

pub mod classifier;
pub mod config;
pub mod embedding;
pub mod error;
pub mod generate;
pub mod index;
pub mod knowledge;
pub mod pipeline;
pub mod prompt;
pub mod server;
