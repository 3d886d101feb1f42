//! Chat completion experiment.
//!
//! Runs every (model, history) combination against one endpoint, with a
//! bounded number of requests in flight. Per-trial failures are recorded on
//! the trial; they never abort the run.

use super::{Experiment, ExperimentFactory};
use crate::client::ChatClient;
use crate::models::{
    ChatTrial, ConversationHistory, HarnessError, ModelArguments, Result, TelemetryConfig,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

/// One planned request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialPlan {
    pub model: String,
    pub history: ConversationHistory,
}

/// Experiment that sends each history to a chat completion endpoint.
pub struct ChatExperiment {
    client: Arc<ChatClient>,
    models: Vec<String>,
    histories: Vec<ConversationHistory>,
    telemetry: TelemetryConfig,
    arguments: Arc<ModelArguments>,
    concurrency: usize,
    plan: Option<Vec<TrialPlan>>,
    show_progress: bool,
}

impl ChatExperiment {
    pub fn new(
        client: Arc<ChatClient>,
        models: Vec<String>,
        histories: Vec<ConversationHistory>,
        telemetry: TelemetryConfig,
        arguments: ModelArguments,
        concurrency: usize,
    ) -> Self {
        Self {
            client,
            models,
            histories,
            telemetry,
            arguments: Arc::new(arguments),
            concurrency: concurrency.max(1),
            plan: None,
            show_progress: true,
        }
    }

    /// Disable the terminal progress bar.
    pub fn without_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }

    /// Planned trials, once prepared. Models outer, histories inner.
    pub fn plan(&self) -> Option<&[TrialPlan]> {
        self.plan.as_deref()
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn histories(&self) -> &[ConversationHistory] {
        &self.histories
    }

    pub fn telemetry(&self) -> &TelemetryConfig {
        &self.telemetry
    }

    pub fn arguments(&self) -> &ModelArguments {
        &self.arguments
    }

    fn progress_bar(&self, total: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
        {
            pb.set_style(style.progress_chars("##-"));
        }
        pb
    }

    async fn execute(&self, plan: Vec<TrialPlan>) -> Vec<ChatTrial> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let pb = self.progress_bar(plan.len());
        let telemetry = self.telemetry.enabled;
        let mut pending = Vec::with_capacity(plan.len());

        for trial in plan {
            let client = Arc::clone(&self.client);
            let arguments = Arc::clone(&self.arguments);
            let semaphore = Arc::clone(&semaphore);
            let pb = pb.clone();
            let planned = trial.clone();

            let handle = tokio::spawn(
                async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    let result = run_trial(&client, trial, &arguments, telemetry).await;
                    pb.inc(1);
                    result
                }
                .in_current_span(),
            );
            pending.push((planned, handle));
        }

        let trials = join_trials(pending).await;
        let failed = trials.iter().filter(|t| !t.is_success()).count();
        pb.finish_with_message(format!("{} ok, {failed} failed", trials.len() - failed));
        trials
    }
}

/// Await every spawned trial in plan order.
///
/// A task that panics or is cancelled still yields a failed trial for its
/// planned entry.
async fn join_trials(pending: Vec<(TrialPlan, JoinHandle<ChatTrial>)>) -> Vec<ChatTrial> {
    let mut trials = Vec::with_capacity(pending.len());
    for (plan, handle) in pending {
        let started_at = Utc::now();
        match handle.await {
            Ok(trial) => trials.push(trial),
            Err(e) => {
                warn!(model = %plan.model, error = %e, "Trial task failed");
                trials.push(failed_trial(
                    Uuid::new_v4().to_string(),
                    plan,
                    format!("trial task failed: {e}"),
                    0,
                    started_at,
                ));
            }
        }
    }
    trials
}

fn failed_trial(
    id: String,
    plan: TrialPlan,
    error: String,
    latency_ms: u64,
    started_at: DateTime<Utc>,
) -> ChatTrial {
    ChatTrial {
        id,
        model: plan.model,
        history: plan.history,
        response: None,
        error: Some(error),
        latency_ms,
        started_at,
    }
}

async fn run_trial(
    client: &ChatClient,
    plan: TrialPlan,
    arguments: &ModelArguments,
    telemetry: bool,
) -> ChatTrial {
    let started_at = Utc::now();
    let start = Instant::now();
    let id = Uuid::new_v4().to_string();

    match client.complete(&plan.model, &plan.history, arguments).await {
        Ok(completion) => {
            let latency_ms = completion.duration.as_millis() as u64;
            if telemetry {
                info!(
                    trial_id = %id,
                    model = %plan.model,
                    latency_ms,
                    tokens_in = completion.response.input_tokens,
                    tokens_out = completion.response.output_tokens,
                    "Trial completed"
                );
            } else {
                debug!(trial_id = %id, model = %plan.model, latency_ms, "Trial completed");
            }
            ChatTrial {
                id,
                model: plan.model,
                history: plan.history,
                response: Some(completion.response),
                error: None,
                latency_ms,
                started_at,
            }
        }
        Err(e) => {
            warn!(trial_id = %id, model = %plan.model, error = %e, "Trial failed");
            let latency_ms = start.elapsed().as_millis() as u64;
            failed_trial(id, plan, e.to_string(), latency_ms, started_at)
        }
    }
}

#[async_trait]
impl Experiment for ChatExperiment {
    async fn prepare(&mut self) -> Result<()> {
        if self.plan.is_some() {
            return Ok(());
        }
        if self.models.is_empty() {
            return Err(HarnessError::InvalidInput("no models to query".to_string()));
        }
        if let Some(blank) = self.models.iter().position(|m| m.trim().is_empty()) {
            return Err(HarnessError::InvalidInput(format!(
                "model name at position {blank} is blank"
            )));
        }

        let plan: Vec<TrialPlan> = self
            .models
            .iter()
            .flat_map(|model| {
                self.histories.iter().map(move |history| TrialPlan {
                    model: model.clone(),
                    history: history.clone(),
                })
            })
            .collect();

        debug!(
            models = self.models.len(),
            histories = self.histories.len(),
            trials = plan.len(),
            "Chat experiment prepared"
        );
        self.plan = Some(plan);
        Ok(())
    }

    async fn run(&mut self) -> Result<Vec<ChatTrial>> {
        self.prepare().await?;
        let plan = self.plan.clone().unwrap_or_default();

        info!(
            trials = plan.len(),
            concurrency = self.concurrency,
            endpoint = %self.client.base_url(),
            "Starting chat experiment"
        );

        if self.telemetry.enabled {
            let span = info_span!("telemetry", name = %self.telemetry.name);
            Ok(self.execute(plan).instrument(span).await)
        } else {
            Ok(self.execute(plan).await)
        }
    }
}

/// Builds `ChatExperiment`s that share one client.
pub struct ChatExperimentFactory {
    client: Arc<ChatClient>,
    concurrency: usize,
    show_progress: bool,
}

impl ChatExperimentFactory {
    pub fn new(client: Arc<ChatClient>, concurrency: usize) -> Self {
        Self {
            client,
            concurrency,
            show_progress: true,
        }
    }

    pub fn without_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }
}

impl ExperimentFactory for ChatExperimentFactory {
    type Experiment = ChatExperiment;

    fn create(
        &self,
        models: Vec<String>,
        histories: Vec<ConversationHistory>,
        telemetry: TelemetryConfig,
        arguments: ModelArguments,
    ) -> Result<ChatExperiment> {
        let experiment = ChatExperiment::new(
            Arc::clone(&self.client),
            models,
            histories,
            telemetry,
            arguments,
            self.concurrency,
        );
        Ok(if self.show_progress {
            experiment
        } else {
            experiment.without_progress()
        })
    }
}
