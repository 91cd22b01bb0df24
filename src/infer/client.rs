//! Chat-completion client for OpenAI-compatible endpoints

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::fetch::RequestThrottle;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// One structured-output request
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub schema_name: String,
    pub schema: Value,
}

/// A model that answers a system+user prompt with JSON conforming to a schema
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Raw JSON text produced by the model
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    fn model_name(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat<'a>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: JsonSchemaSpec<'a>,
}

#[derive(Debug, Serialize)]
struct JsonSchemaSpec<'a> {
    name: &'a str,
    strict: bool,
    schema: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

/// Client for `/chat/completions` with `json_schema` response format
pub struct OpenAiCompatClient {
    client: Client,
    endpoint: Url,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
    throttle: RequestThrottle,
}

impl OpenAiCompatClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let endpoint = Url::parse(&format!(
            "{}/chat/completions",
            config.endpoint.trim_end_matches('/')
        ))
        .map_err(|e| Error::Config(format!("Invalid LLM endpoint '{}': {}", config.endpoint, e)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        let api_key = config.api_key();
        if api_key.is_none() {
            debug!(
                "{} is not set, calling {} without credentials",
                config.api_key_env, endpoint
            );
        }

        Ok(Self {
            client,
            endpoint,
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            throttle: RequestThrottle::per_minute(config.requests_per_minute),
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompatClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_format: ResponseFormat {
                kind: "json_schema",
                json_schema: JsonSchemaSpec {
                    name: &request.schema_name,
                    strict: true,
                    schema: &request.schema,
                },
            },
        };

        self.throttle.wait().await;
        debug!(
            "Requesting {} from {} ({} prompt chars)",
            request.schema_name,
            self.model,
            request.user.len()
        );

        let mut builder = self.client.post(self.endpoint.clone()).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited(format!("LLM endpoint returned HTTP {}", status)));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(200).collect();
            return Err(Error::Network(format!("LLM HTTP {}: {}", status, snippet)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::ModelOutput(format!("Unreadable completion response: {}", e)))?;

        let message = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| Error::ModelOutput("Completion contained no choices".to_string()))?;

        if let Some(refusal) = message.refusal.filter(|r| !r.trim().is_empty()) {
            return Err(Error::ModelOutput(format!("Model refused: {}", refusal)));
        }

        match message.content {
            Some(content) if !content.trim().is_empty() => Ok(content),
            _ => Err(Error::ModelOutput("Empty completion".to_string())),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> LlmConfig {
        LlmConfig {
            endpoint: format!("{}/v1", server.uri()),
            api_key_env: "NEWSHOUND_TEST_UNSET_KEY".to_string(),
            requests_per_minute: 600,
            ..LlmConfig::default()
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            system: "system".to_string(),
            user: "user".to_string(),
            schema_name: "listing_selector".to_string(),
            schema: json!({"type": "object"}),
        }
    }

    #[tokio::test]
    async fn test_sends_strict_schema_and_sampling_settings() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("content-type", "application/json"))
            .and(body_partial_json(json!({
                "temperature": 0.1,
                "max_tokens": 1000,
                "response_format": {
                    "type": "json_schema",
                    "json_schema": { "name": "listing_selector", "strict": true }
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "content": "{\"selector\":\"article a\"}" } }]
            })))
            .mount(&server)
            .await;

        let client = OpenAiCompatClient::from_config(&config_for(&server)).unwrap();
        let content = client.complete(&request()).await.unwrap();
        assert!(content.contains("article a"));
    }

    #[tokio::test]
    async fn test_empty_content_is_model_output_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "content": "   " } }]
            })))
            .mount(&server)
            .await;

        let client = OpenAiCompatClient::from_config(&config_for(&server)).unwrap();
        let err = client.complete(&request()).await.unwrap_err();
        assert!(matches!(err, Error::ModelOutput(_)));
    }

    #[tokio::test]
    async fn test_http_errors_are_typed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let client = OpenAiCompatClient::from_config(&config_for(&server)).unwrap();
        assert!(matches!(
            client.complete(&request()).await.unwrap_err(),
            Error::RateLimited(_)
        ));
        assert!(matches!(
            client.complete(&request()).await.unwrap_err(),
            Error::Network(_)
        ));
    }
}
