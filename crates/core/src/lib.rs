//! Core library: scanning, fingerprinting, oracle batching, templated placement
//! and resumable run state.

pub mod assigner;
pub mod audit;
pub mod config;
pub mod dedup;
pub mod error;
pub mod extractor;
pub mod fingerprint;
pub mod models;
pub mod pipeline;
pub mod placer;
pub mod scanner;
pub mod state;
pub mod template;

pub use error::PipelineError;
pub use pipeline::{Pipeline, RunRequest, RunSummary};
