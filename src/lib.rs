//! Keyword Scorer - LLM-assisted conversion scoring for keyword lists
//!
//! This library provides:
//! - Batched scoring of keywords or content topics against a business context
//! - An OpenAI-compatible completion client behind the `CompletionProvider` trait
//! - CSV table loading and export with an appended `score` column
//! - Configuration, structured logging and error handling

pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod logging;
pub mod scoring;
pub mod table;

// Re-export main types for convenience
pub use crate::config::AppConfig;
pub use crate::context::BusinessContext;
pub use crate::error::{ScorerError, ScorerResult};
pub use crate::llm::{CompletionProvider, GenerationParams, OpenAiClient};
pub use crate::scoring::{BatchOutcome, BatchScorer, ScorerOptions, ScoringMode, ScoringReport};
pub use crate::table::KeywordTable;
