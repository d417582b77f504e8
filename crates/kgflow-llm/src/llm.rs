//! Generative model clients
//!
//! Relation extraction sends a single user prompt and reads back plain
//! text, so neither client exposes chat history or streaming.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{http_client, read_json, request_error, DEFAULT_OPENAI_BASE_URL};
use kgflow_core::{CompletionOptions, KgError, LlmClient, LlmConfig, LlmProvider, Result};

// ============================================================================
// OpenAI Client
// ============================================================================

/// Client for `POST {base}/chat/completions`
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout_secs: u64,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            api_key: api_key.into(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            model: model.into(),
            timeout_secs,
        })
    }

    /// Create from config
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let Some(api_key) = &config.openai_api_key else {
            return Err(KgError::Config(
                "an OpenAI API key is required for completions".to_string(),
            ));
        };

        let client = Self::new(api_key.clone(), config.model.clone(), config.timeout_secs)?;
        Ok(match &config.openai_base_url {
            Some(url) => client.with_base_url(url.clone()),
            None => client,
        })
    }

    /// Point at an Azure deployment or an OpenAI-compatible gateway
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String> {
        let request = OpenAiRequest {
            model: &self.model,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            max_tokens: options.max_tokens,
            temperature: options.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| request_error("OpenAI completion", self.timeout_secs, e))?;

        let body: OpenAiResponse = read_json("OpenAI completion", response, KgError::Llm).await?;
        // refusals and tool calls arrive with null content
        body.choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .ok_or_else(|| KgError::Llm("OpenAI completion had no text choice".to_string()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Ollama Client
// ============================================================================

/// Client for Ollama's non-streaming `POST {base}/api/generate`
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    timeout_secs: u64,
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            timeout_secs,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        Self::new(config.ollama_url.clone(), config.model.clone(), config.timeout_secs)
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String> {
        let request = OllamaRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: OllamaOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| request_error("Ollama generate", self.timeout_secs, e))?;

        let body: OllamaResponse = read_json("Ollama generate", response, KgError::Llm).await?;
        Ok(body.response)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Create the completion client selected by `config.provider`
pub fn create_llm_client(config: &LlmConfig) -> Result<Box<dyn LlmClient>> {
    let client: Box<dyn LlmClient> = match config.provider {
        LlmProvider::OpenAI | LlmProvider::Azure => Box::new(OpenAiClient::from_config(config)?),
        LlmProvider::Ollama => Box::new(OllamaClient::from_config(config)?),
    };
    Ok(client)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_client_creation() {
        let client = OpenAiClient::new("test-key", "gpt-4o-mini", 30).unwrap();
        assert_eq!(client.model_name(), "gpt-4o-mini");
        assert_eq!(client.base_url, DEFAULT_OPENAI_BASE_URL);
    }

    #[test]
    fn test_openai_requires_key() {
        let config = LlmConfig::default();
        let err = OpenAiClient::from_config(&config).err().unwrap();
        assert!(matches!(err, KgError::Config(_)));
    }

    #[test]
    fn test_base_url_override() {
        let config = LlmConfig {
            openai_api_key: Some("key".to_string()),
            openai_base_url: Some("https://example.openai.azure.com/v1/".to_string()),
            ..LlmConfig::default()
        };
        let client = OpenAiClient::from_config(&config).unwrap();
        assert_eq!(client.base_url, "https://example.openai.azure.com/v1");
    }

    #[test]
    fn test_factory_selects_ollama() {
        let config = LlmConfig {
            provider: LlmProvider::Ollama,
            model: "llama3".to_string(),
            ..LlmConfig::default()
        };
        let client = create_llm_client(&config).unwrap();
        assert_eq!(client.model_name(), "llama3");
    }

    #[test]
    fn test_request_serialization() {
        let request = OllamaRequest {
            model: "llama3",
            prompt: "hi",
            stream: false,
            options: OllamaOptions {
                temperature: 0.0,
                num_predict: 256,
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["stream"], false);
        assert_eq!(json["options"]["num_predict"], 256);
    }
}
