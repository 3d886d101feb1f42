//! Trial and result types.

use super::{ConversationHistory, PromptPair};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Successful chat completion for one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResponse {
    /// Assistant message content
    pub content: String,

    /// Model reported by the endpoint (may differ from the requested one)
    pub model: String,

    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// One executed (model, history) request.
///
/// Exactly one of `response` and `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTrial {
    /// Unique identifier for this trial
    pub id: String,

    /// Requested model
    pub model: String,

    /// Messages sent
    pub history: ConversationHistory,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<TrialResponse>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Wall-clock request time in milliseconds
    pub latency_ms: u64,

    pub started_at: DateTime<Utc>,
}

impl ChatTrial {
    pub fn is_success(&self) -> bool {
        self.response.is_some()
    }
}

/// A trial joined back to the prompt pair that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptResult {
    #[serde(flatten)]
    pub pair: PromptPair,

    #[serde(flatten)]
    pub trial: ChatTrial,
}

/// Statistics for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    /// Trials executed
    pub total_trials: usize,

    pub succeeded: usize,
    pub failed: usize,

    pub input_tokens: u64,
    pub output_tokens: u64,

    /// Total runtime in seconds
    pub runtime_secs: f64,

    /// Successful trials per hour
    pub throughput_per_hour: f64,

    /// Success rate (0.0 - 1.0)
    pub success_rate: f64,
}

impl RunStats {
    /// Count a finished trial.
    pub fn record(&mut self, trial: &ChatTrial) {
        self.total_trials += 1;
        match &trial.response {
            Some(response) => {
                self.succeeded += 1;
                self.input_tokens += u64::from(response.input_tokens);
                self.output_tokens += u64::from(response.output_tokens);
            }
            None => self.failed += 1,
        }
    }

    /// Calculate derived stats.
    pub fn finalize(&mut self) {
        if self.total_trials > 0 {
            self.success_rate = self.succeeded as f64 / self.total_trials as f64;
        }
        if self.runtime_secs > 0.0 {
            self.throughput_per_hour = self.succeeded as f64 / self.runtime_secs * 3600.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn trial(response: Option<TrialResponse>) -> ChatTrial {
        ChatTrial {
            id: "t".to_string(),
            model: "m".to_string(),
            history: ConversationHistory::new("s", "u"),
            error: response.is_none().then(|| "boom".to_string()),
            response,
            latency_ms: 5,
            started_at: Utc::now(),
        }
    }

    #[test]
    fn test_run_stats_finalize() {
        let mut stats = RunStats::default();
        stats.record(&trial(Some(TrialResponse {
            content: "ok".to_string(),
            model: "m".to_string(),
            input_tokens: 10,
            output_tokens: 3,
        })));
        stats.record(&trial(None));
        stats.runtime_secs = 1.0;
        stats.finalize();

        assert_eq!(stats.total_trials, 2);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.input_tokens, 10);
        assert_eq!(stats.output_tokens, 3);
        assert_eq!(stats.success_rate, 0.5);
        assert_eq!(stats.throughput_per_hour, 3600.0);
    }

    #[test]
    fn test_empty_stats_finalize_without_division() {
        let mut stats = RunStats::default();
        stats.finalize();
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.throughput_per_hour, 0.0);
    }

    #[test]
    fn test_prompt_result_row_is_flat() {
        let row = PromptResult {
            pair: PromptPair::new("s", "u"),
            trial: trial(None),
        };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["system_prompt"], "s");
        assert_eq!(json["user_input"], "u");
        assert_eq!(json["error"], "boom");
        assert!(json.get("response").is_none());
    }
}
