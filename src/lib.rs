//! taskeval - evaluate LLM task extraction against a labeled CSV dataset
//!
//! This crate provides:
//! - Defensive decoding of raw model output into typed predictions
//! - A streaming evaluator for detection metrics and token-overlap scores
//! - Async HTTP client for OpenAI-compatible APIs
//! - A standalone HTML report renderer

pub mod core;
pub mod error;
pub mod eval;
pub mod extract;
pub mod report;

pub use crate::core::{
    compute_dataset_hash, APIConfig, ApiClient, ChatMessage, GenKwargs, GoldRow, Prediction,
};
pub use crate::error::{Result, TaskEvalError};
pub use crate::eval::{parse_label, token_set_f1, EvalAccumulator, Metrics};
pub use crate::extract::{normalize_response, EXTRACTION_PROMPT};
pub use crate::report::build_html_report;
