//! Chat completion client for OpenAI-compatible endpoints.
//!
//! One request per call: failures are mapped to typed errors and returned to
//! the caller as-is, with no retry, backoff or caching.

use crate::models::{
    ApiError, ConversationHistory, EndpointConfig, HarnessError, ModelArguments, Result,
    TrialResponse,
};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

/// Chat completion request payload.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a ConversationHistory,
    #[serde(flatten)]
    arguments: &'a ModelArguments,
}

/// Chat completion response.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// API error response (OpenAI-compatible).
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Completed request plus its wall-clock duration.
#[derive(Debug, Clone)]
pub struct Completion {
    pub response: TrialResponse,
    pub duration: Duration,
}

/// Client for a single OpenAI-compatible endpoint.
pub struct ChatClient {
    client: reqwest::Client,
    /// API key (None for local endpoints without auth)
    api_key: Option<String>,
    /// Base URL for the API
    base_url: String,
    timeout: Duration,
}

impl ChatClient {
    pub fn new(
        api_key: Option<String>,
        base_url: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_secs);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(HarnessError::Network)?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Create a client from endpoint configuration and a resolved key.
    pub fn from_config(endpoint: &EndpointConfig, api_key: Option<String>) -> Result<Self> {
        Self::new(api_key, endpoint.base_url.clone(), endpoint.timeout_secs)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        if let Some(ref api_key) = self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|_| {
                HarnessError::InvalidInput("API key contains invalid header characters".to_string())
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// Send one chat completion request.
    pub async fn complete(
        &self,
        model: &str,
        history: &ConversationHistory,
        arguments: &ModelArguments,
    ) -> Result<Completion> {
        let start = Instant::now();
        let request = ChatCompletionRequest {
            model,
            messages: history,
            arguments,
        };

        let url = format!("{}/chat/completions", self.base_url);
        debug!(model = %model, turns = history.len(), "Sending chat completion");

        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let code = status.as_u16();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);

            let error = match code {
                401 => ApiError::AuthenticationFailed,
                404 => ApiError::ModelNotFound(model.to_string()),
                429 => ApiError::RateLimited { message },
                _ => ApiError::Status {
                    status: code,
                    message,
                },
            };
            return Err(error.into());
        }

        let bytes = response.bytes().await.map_err(|e| self.transport_error(e))?;
        let body: ChatCompletionResponse = serde_json::from_slice(&bytes)
            .map_err(|e| HarnessError::ParseError(format!("Failed to parse response: {e}")))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or_else(|| HarnessError::ParseError("No choices in response".to_string()))?;

        let usage = body.usage.unwrap_or_default();

        Ok(Completion {
            response: TrialResponse {
                content,
                model: body.model.unwrap_or_else(|| model.to_string()),
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            },
            duration: start.elapsed(),
        })
    }

    /// The body can time out after the headers arrive, so both reads map here.
    fn transport_error(&self, e: reqwest::Error) -> HarnessError {
        if e.is_timeout() {
            HarnessError::Timeout(self.timeout)
        } else {
            HarnessError::Network(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn ok_body(content: &str) -> String {
        serde_json::json!({
            "model": "gpt-test-0001",
            "choices": [{"message": {"role": "assistant", "content": content}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 4, "total_tokens": 16}
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_complete_sends_history_and_arguments() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "model": "gpt-test",
                "messages": [
                    {"role": "system", "content": "You are terse."},
                    {"role": "user", "content": "Hi"}
                ],
                "temperature": 0.0,
                "max_tokens": 16,
                "logit_bias": {"50256": -100}
            })))
            .with_status(200)
            .with_body(ok_body("Hello."))
            .create_async()
            .await;

        let client = ChatClient::new(Some("sk-test".to_string()), server.url(), 5).unwrap();
        let arguments = ModelArguments {
            temperature: Some(0.0),
            max_tokens: Some(16),
            ..Default::default()
        }
        .with_extra("logit_bias", serde_json::json!({"50256": -100}));

        let completion = client
            .complete(
                "gpt-test",
                &ConversationHistory::new("You are terse.", "Hi"),
                &arguments,
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(completion.response.content, "Hello.");
        assert_eq!(completion.response.model, "gpt-test-0001");
        assert_eq!(completion.response.input_tokens, 12);
        assert_eq!(completion.response.output_tokens, 4);
    }

    #[tokio::test]
    async fn test_unset_arguments_are_not_sent() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::Json(serde_json::json!({
                "model": "m",
                "messages": [
                    {"role": "system", "content": "s"},
                    {"role": "user", "content": "u"}
                ]
            })))
            .with_status(200)
            .with_body(ok_body("ok"))
            .create_async()
            .await;

        let client = ChatClient::new(None, server.url(), 5).unwrap();
        client
            .complete(
                "m",
                &ConversationHistory::new("s", "u"),
                &ModelArguments::default(),
            )
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_statuses_map_to_api_errors() {
        let mut server = Server::new_async().await;
        let history = ConversationHistory::new("s", "u");
        let arguments = ModelArguments::default();

        let _auth = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::PartialJson(serde_json::json!({"model": "auth"})))
            .with_status(401)
            .with_body(r#"{"error": {"message": "bad key"}}"#)
            .create_async()
            .await;
        let busy = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::PartialJson(serde_json::json!({"model": "busy"})))
            .with_status(503)
            .with_body(r#"{"error": {"message": "overloaded"}}"#)
            .expect(1)
            .create_async()
            .await;

        let client = ChatClient::new(None, server.url(), 5).unwrap();

        let err = client.complete("auth", &history, &arguments).await.unwrap_err();
        assert!(matches!(err, HarnessError::Api(ApiError::AuthenticationFailed)));

        let err = client.complete("busy", &history, &arguments).await.unwrap_err();
        match err {
            HarnessError::Api(ApiError::Status { status, message }) => {
                assert_eq!(status, 503);
                assert_eq!(message, "overloaded");
            }
            other => panic!("unexpected error: {other}"),
        }
        // Exactly one attempt per call.
        busy.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_choices_is_parse_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices": []}"#)
            .create_async()
            .await;

        let client = ChatClient::new(None, format!("{}/", server.url()), 5).unwrap();
        let err = client
            .complete(
                "m",
                &ConversationHistory::new("s", "u"),
                &ModelArguments::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::ParseError(_)));
    }

    #[tokio::test]
    async fn test_missing_model_and_rate_limit_statuses() {
        let mut server = Server::new_async().await;
        let history = ConversationHistory::new("s", "u");
        let arguments = ModelArguments::default();

        let _missing = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::PartialJson(serde_json::json!({"model": "ghost"})))
            .with_status(404)
            .with_body(r#"{"error": {"message": "no such model"}}"#)
            .create_async()
            .await;
        let limited = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::PartialJson(serde_json::json!({"model": "hot"})))
            .with_status(429)
            .with_body(r#"{"error": {"message": "slow down"}}"#)
            .expect(1)
            .create_async()
            .await;

        let client = ChatClient::new(None, server.url(), 5).unwrap();

        let err = client.complete("ghost", &history, &arguments).await.unwrap_err();
        match err {
            HarnessError::Api(ApiError::ModelNotFound(model)) => assert_eq!(model, "ghost"),
            other => panic!("unexpected error: {other}"),
        }

        let err = client.complete("hot", &history, &arguments).await.unwrap_err();
        match err {
            HarnessError::Api(ApiError::RateLimited { message }) => {
                assert_eq!(message, "slow down")
            }
            other => panic!("unexpected error: {other}"),
        }
        limited.assert_async().await;
    }

    #[tokio::test]
    async fn test_slow_response_is_timeout() {
        let mut server = Server::new_async().await;
        let body = ok_body("late");
        let _slow = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_chunked_body(move |w| {
                std::thread::sleep(Duration::from_millis(2500));
                w.write_all(body.as_bytes())
            })
            .create_async()
            .await;

        let client = ChatClient::new(None, server.url(), 1).unwrap();
        let err = client
            .complete(
                "m",
                &ConversationHistory::new("s", "u"),
                &ModelArguments::default(),
            )
            .await
            .unwrap_err();

        match err {
            HarnessError::Timeout(after) => assert_eq!(after, Duration::from_secs(1)),
            other => panic!("unexpected error: {other}"),
        }
    }
}
