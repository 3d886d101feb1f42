//! promptgrid - System prompt experimentation over OpenAI-compatible chat endpoints.
//!
//! ## Architecture
//!
//! - **Matrix**: every system prompt crossed with every user message, as
//!   two-turn conversation histories in nested order, plus a reverse index
//!   from each history back to its prompt pair
//! - **Harness**: hands the histories to an experiment built by an injected
//!   factory, then joins the trials back to their prompt pairs
//! - **Experiment**: `ChatExperiment` sends one completion per history with
//!   bounded concurrency
//!
//! ## Pipeline
//!
//! Config + prompt files → Matrix → Experiment → JSONL results

pub mod client;
pub mod experiment;
pub mod harness;
pub mod models;
pub mod pipeline;

// Re-exports for convenience
pub use client::ChatClient;
pub use experiment::{ChatExperiment, ChatExperimentFactory, Experiment, ExperimentFactory};
pub use harness::{HistoryIndex, PromptMatrix, SystemPromptHarness};
pub use models::{Config, ConversationHistory, HarnessError, PromptPair, PromptResult, Result};
pub use pipeline::{PromptInputs, SystemPromptPipeline};
