//! Experiment capability.
//!
//! The harness builds histories and hands them to an `ExperimentFactory`;
//! everything after that (request execution, result collection, error
//! reporting) belongs to the `Experiment` it returns.

mod chat;

pub use chat::*;

use crate::models::{ChatTrial, ConversationHistory, ModelArguments, Result, TelemetryConfig};
use async_trait::async_trait;

/// A runnable chat-completion experiment.
#[async_trait]
pub trait Experiment: Send {
    /// Prepare the experiment for execution. Must be safe to call twice.
    async fn prepare(&mut self) -> Result<()>;

    /// Execute every trial, preparing first if needed.
    async fn run(&mut self) -> Result<Vec<ChatTrial>>;
}

/// Constructs experiments from a model list, histories and model options.
pub trait ExperimentFactory {
    type Experiment: Experiment;

    fn create(
        &self,
        models: Vec<String>,
        histories: Vec<ConversationHistory>,
        telemetry: TelemetryConfig,
        arguments: ModelArguments,
    ) -> Result<Self::Experiment>;
}
