//! System prompt experiment pipeline.
//!
//! Pipeline flow:
//! Config + prompt lists → Harness (matrix → ChatExperiment) → Results → JSONL

use crate::client::ChatClient;
use crate::experiment::ChatExperimentFactory;
use crate::harness::{PromptMatrix, SystemPromptHarness};
use crate::models::{Config, HarnessError, PromptsConfig, Result, RunStats};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// One line of a prompt file: a bare JSON string or `{"content": ...}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PromptLine {
    Text(String),
    Object { content: String },
}

/// Resolved prompt lists for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptInputs {
    pub system_prompts: Vec<String>,
    pub human_messages: Vec<String>,
}

/// Pipeline driving a system prompt experiment end to end.
pub struct SystemPromptPipeline {
    config: Config,
    client: Arc<ChatClient>,
    show_progress: bool,
}

impl SystemPromptPipeline {
    pub fn new(config: Config, client: Arc<ChatClient>) -> Self {
        Self {
            config,
            client,
            show_progress: true,
        }
    }

    /// Disable the terminal progress bar.
    pub fn without_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }

    /// Load prompts from a JSONL file.
    pub fn load_prompts(path: &Path) -> Result<Vec<String>> {
        let file = File::open(path)
            .map_err(|e| HarnessError::io(format!("opening prompt file {}", path.display()), e))?;
        let reader = BufReader::new(file);
        let mut prompts = Vec::new();

        for (line_num, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| HarnessError::io("reading prompt file", e))?;
            if line.trim().is_empty() {
                continue;
            }
            let prompt: PromptLine = serde_json::from_str(&line).map_err(|e| {
                let location = format!("{}: line {}", path.display(), line_num + 1);
                HarnessError::ParseError(format!("{location}: {e}"))
            })?;
            prompts.push(match prompt {
                PromptLine::Text(text) => text,
                PromptLine::Object { content } => content,
            });
        }

        info!(path = %path.display(), count = prompts.len(), "Loaded prompts");
        Ok(prompts)
    }

    /// Combine inline prompt lists with file-backed ones.
    ///
    /// `system_file` / `messages_file` override the files named in config.
    pub fn resolve_inputs(
        prompts: &PromptsConfig,
        system_file: Option<&Path>,
        messages_file: Option<&Path>,
    ) -> Result<PromptInputs> {
        let system_file = system_file.or(prompts.system_prompts_file.as_deref());
        let messages_file = messages_file.or(prompts.human_messages_file.as_deref());

        let mut inputs = PromptInputs {
            system_prompts: prompts.system_prompts.clone(),
            human_messages: prompts.human_messages.clone(),
        };
        if let Some(path) = system_file {
            inputs.system_prompts.extend(Self::load_prompts(path)?);
        }
        if let Some(path) = messages_file {
            inputs.human_messages.extend(Self::load_prompts(path)?);
        }
        Ok(inputs)
    }

    /// Expand the matrix without contacting the endpoint.
    pub fn plan(inputs: &PromptInputs) -> PromptMatrix {
        PromptMatrix::build(
            inputs.system_prompts.as_slice(),
            inputs.human_messages.as_slice(),
        )
    }

    /// Run the experiment and write one JSON result per line.
    pub async fn run(&self, inputs: PromptInputs, output_path: &Path) -> Result<RunStats> {
        let start = Instant::now();
        let experiment = &self.config.experiment;

        let client = Arc::clone(&self.client);
        let mut factory = ChatExperimentFactory::new(client, experiment.concurrency);
        if !self.show_progress {
            factory = factory.without_progress();
        }

        let mut harness = SystemPromptHarness::new(
            experiment.model.clone(),
            inputs.system_prompts,
            inputs.human_messages,
            factory,
        )
        .with_telemetry(experiment.telemetry.clone())
        .with_model_arguments(self.config.model_arguments.clone());

        harness.prepare().await?;
        let results = harness.run().await?;

        if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| HarnessError::io("creating output directory", e))?;
        }
        let output_file =
            File::create(output_path).map_err(|e| HarnessError::io("creating output file", e))?;
        let mut writer = BufWriter::new(output_file);

        let mut stats = RunStats::default();
        for result in &results {
            stats.record(&result.trial);

            if !result.trial.is_success() && !self.config.output.include_failed {
                continue;
            }
            let json = serde_json::to_string(result).map_err(|e| {
                HarnessError::Internal(format!("Failed to serialize result: {e}"))
            })?;
            writeln!(writer, "{json}").map_err(|e| HarnessError::io("writing output", e))?;
        }
        writer
            .flush()
            .map_err(|e| HarnessError::io("flushing output", e))?;

        stats.runtime_secs = start.elapsed().as_secs_f64();
        stats.finalize();

        info!(
            trials = stats.total_trials,
            succeeded = stats.succeeded,
            failed = stats.failed,
            success_rate = format!("{:.1}%", stats.success_rate * 100.0),
            output = %output_path.display(),
            "System prompt experiment complete"
        );

        Ok(stats)
    }

    /// Output path from config.
    pub fn default_output(&self) -> PathBuf {
        self.config.output.path.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn config(extra: &str) -> Config {
        Config::from_toml(&format!(
            "[experiment]\nmodel = \"gpt-test\"\nconcurrency = 2\n{extra}"
        ))
        .unwrap()
    }

    fn pipeline(config: Config, base_url: &str) -> SystemPromptPipeline {
        let client = Arc::new(ChatClient::new(None, base_url, 5).unwrap());
        SystemPromptPipeline::new(config, client).without_progress()
    }

    #[test]
    fn test_load_prompts_accepts_strings_and_objects() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("system.jsonl");
        std::fs::write(
            &path,
            "\"You are terse.\"\n\n{\"content\": \"You are verbose.\", \"tag\": \"v\"}\n\"\"\n",
        )
        .unwrap();

        let prompts = SystemPromptPipeline::load_prompts(&path).unwrap();
        assert_eq!(prompts, vec!["You are terse.", "You are verbose.", ""]);
    }

    #[test]
    fn test_load_prompts_reports_line_number() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.jsonl");
        std::fs::write(&path, "\"ok\"\n{not json}\n").unwrap();

        let err = SystemPromptPipeline::load_prompts(&path).unwrap_err();
        match err {
            HarnessError::ParseError(msg) => assert!(msg.contains("line 2"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_resolve_inputs_appends_files_after_inline() {
        let dir = TempDir::new().unwrap();
        let messages = dir.path().join("messages.jsonl");
        std::fs::write(&messages, "\"from file\"\n").unwrap();

        let config = config(&format!(
            "[prompts]\n\
             system_prompts = [\"S\"]\n\
             human_messages = [\"inline\"]\n\
             human_messages_file = {:?}\n",
            messages.display().to_string()
        ));

        let inputs = SystemPromptPipeline::resolve_inputs(&config.prompts, None, None).unwrap();
        assert_eq!(
            inputs,
            PromptInputs {
                system_prompts: vec!["S".to_string()],
                human_messages: vec!["inline".to_string(), "from file".to_string()],
            }
        );

        let matrix = SystemPromptPipeline::plan(&inputs);
        assert_eq!(matrix.len(), 2);
    }

    #[tokio::test]
    async fn test_run_writes_result_rows() {
        let mut server = Server::new_async().await;
        let _ok = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::PartialJson(serde_json::json!({"temperature": 0.0})))
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "choices": [{"message": {"content": "Hello."}}],
                    "usage": {"prompt_tokens": 7, "completion_tokens": 2}
                })
                .to_string(),
            )
            .expect(2)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out").join("results.jsonl");
        let pipeline = pipeline(config("[model_arguments]\ntemperature = 0.0\n"), &server.url());

        let inputs = PromptInputs {
            system_prompts: vec!["You are terse.".to_string()],
            human_messages: vec!["Hi".to_string(), "Bye".to_string()],
        };
        let stats = pipeline.run(inputs, &output).await.unwrap();

        assert_eq!(stats.total_trials, 2);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.input_tokens, 14);

        let rows: Vec<serde_json::Value> = std::fs::read_to_string(&output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["system_prompt"], "You are terse.");
        assert_eq!(rows[0]["user_input"], "Hi");
        assert_eq!(rows[1]["user_input"], "Bye");
        assert_eq!(rows[1]["response"]["content"], "Hello.");
        assert_eq!(rows[1]["model"], "gpt-test");
    }

    #[tokio::test]
    async fn test_run_can_skip_failed_rows() {
        let mut server = Server::new_async().await;
        let _fail = server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let output = dir.path().join("results.jsonl");
        let pipeline = pipeline(config("[output]\ninclude_failed = false\n"), &server.url());

        let inputs = PromptInputs {
            system_prompts: vec!["S".to_string()],
            human_messages: vec!["m".to_string()],
        };
        let stats = pipeline.run(inputs, &output).await.unwrap();

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "");
    }
}
