//! System prompt experimentation harness.
//!
//! `prepare` expands the prompt matrix, constructs the experiment through the
//! injected factory, then runs the experiment's own preparation step. Errors
//! from the factory or the experiment are returned unchanged.

use super::matrix::{HistoryIndex, PromptMatrix};
use crate::experiment::{Experiment, ExperimentFactory};
use crate::models::{
    ConversationHistory, HarnessError, ModelArguments, PromptResult, Result, TelemetryConfig,
};
use tracing::info;

/// Harness crossing system prompts with user messages for one model.
pub struct SystemPromptHarness<F: ExperimentFactory> {
    model_name: String,
    system_prompts: Vec<String>,
    human_messages: Vec<String>,
    telemetry: TelemetryConfig,
    model_arguments: ModelArguments,
    factory: F,
    histories: Vec<ConversationHistory>,
    history_index: HistoryIndex,
    experiment: Option<F::Experiment>,
}

impl<F: ExperimentFactory> SystemPromptHarness<F> {
    pub fn new(
        model_name: impl Into<String>,
        system_prompts: Vec<String>,
        human_messages: Vec<String>,
        factory: F,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            system_prompts,
            human_messages,
            telemetry: TelemetryConfig::default(),
            model_arguments: ModelArguments::default(),
            factory,
            histories: Vec::new(),
            history_index: HistoryIndex::default(),
            experiment: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryConfig) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_model_arguments(mut self, model_arguments: ModelArguments) -> Self {
        self.model_arguments = model_arguments;
        self
    }

    /// Build histories, construct the experiment and prepare it.
    pub async fn prepare(&mut self) -> Result<()> {
        let (histories, history_index) =
            PromptMatrix::build(self.system_prompts.as_slice(), self.human_messages.as_slice())
                .into_parts();

        info!(
            model = %self.model_name,
            system_prompts = self.system_prompts.len(),
            human_messages = self.human_messages.len(),
            histories = histories.len(),
            "Prepared prompt matrix"
        );

        self.histories = histories;
        self.history_index = history_index;

        let mut experiment = self.factory.create(
            vec![self.model_name.clone()],
            self.histories.clone(),
            self.telemetry.clone(),
            self.model_arguments.clone(),
        )?;
        experiment.prepare().await?;
        self.experiment = Some(experiment);
        Ok(())
    }

    /// Run the experiment and attach each trial to its prompt pair.
    ///
    /// Prepares first when `prepare` has not been called.
    pub async fn run(&mut self) -> Result<Vec<PromptResult>> {
        if self.experiment.is_none() {
            self.prepare().await?;
        }
        let experiment = self
            .experiment
            .as_mut()
            .ok_or_else(|| HarnessError::Internal("experiment missing after prepare".to_string()))?;

        let trials = experiment.run().await?;

        trials
            .into_iter()
            .map(|trial| match self.history_index.get(&trial.history) {
                Some(pair) => Ok(PromptResult {
                    pair: pair.clone(),
                    trial,
                }),
                None => Err(HarnessError::Internal(format!(
                    "trial {} has a history outside the prompt matrix",
                    trial.id
                ))),
            })
            .collect()
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Histories built by the last `prepare`.
    pub fn histories(&self) -> &[ConversationHistory] {
        &self.histories
    }

    /// Reverse index built by the last `prepare`.
    pub fn history_index(&self) -> &HistoryIndex {
        &self.history_index
    }

    pub fn experiment(&self) -> Option<&F::Experiment> {
        self.experiment.as_ref()
    }
}
