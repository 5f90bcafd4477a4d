use std::time::Duration;

use async_trait::async_trait;
use dirpilot_core::config::{LlmConfig, LlmProvider};
use dirpilot_core::{ChatMessage, ChatRole, CompletionClient, CompletionError};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const AZURE_API_VERSION: &str = "2024-06-01";

/// Chat completion over HTTP for OpenAI, Azure OpenAI or Ollama.
pub struct HttpCompletionClient {
    client: reqwest::Client,
    provider: LlmProvider,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
    timeout: Duration,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct WireContent {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: WireContent,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: WireContent,
}

impl HttpCompletionClient {
    pub fn new(
        provider: LlmProvider,
        base_url: Option<&str>,
        model: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, CompletionError> {
        let base_url = match (provider, base_url) {
            (_, Some(url)) => url.trim().trim_end_matches('/').to_string(),
            (LlmProvider::OpenAi, None) => OPENAI_BASE_URL.to_string(),
            (other, None) => {
                let reason = format!("{} requires a base url", other.as_str());
                return Err(CompletionError::Transport(reason));
            }
        };
        let client = reqwest::Client::builder().build().map_err(|error| {
            CompletionError::Transport(format!("failed to build http client: {error}"))
        })?;
        Ok(Self { client, provider, base_url, model: model.into(), api_key, timeout })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, CompletionError> {
        Self::new(
            config.provider,
            config.base_url.as_deref(),
            config.model.clone(),
            config.api_key.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn endpoint(&self) -> String {
        match self.provider {
            LlmProvider::OpenAi => format!("{}/chat/completions", self.base_url),
            LlmProvider::AzureOpenAi => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={AZURE_API_VERSION}",
                self.base_url, self.model
            ),
            LlmProvider::Ollama => format!("{}/api/chat", self.base_url),
        }
    }

    fn body<'a>(&'a self, messages: &'a [ChatMessage]) -> ChatRequest<'a> {
        let messages = messages
            .iter()
            .map(|message| WireMessage { role: wire_role(message.role), content: &message.text })
            .collect();
        let model = Some(self.model.as_str());
        match self.provider {
            LlmProvider::OpenAi => {
                ChatRequest { model, messages, stream: None, temperature: Some(0.2) }
            }
            LlmProvider::AzureOpenAi => {
                ChatRequest { model: None, messages, stream: None, temperature: Some(0.2) }
            }
            LlmProvider::Ollama => {
                ChatRequest { model, messages, stream: Some(false), temperature: None }
            }
        }
    }
}

/// Tool results reach the model as system context.
fn wire_role(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System | ChatRole::ToolContext => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        let mut request =
            self.client.post(self.endpoint()).timeout(self.timeout).json(&self.body(messages));
        if let Some(api_key) = &self.api_key {
            request = match self.provider {
                LlmProvider::AzureOpenAi => request.header("api-key", api_key.expose_secret()),
                LlmProvider::OpenAi | LlmProvider::Ollama => {
                    request.bearer_auth(api_key.expose_secret())
                }
            };
        }

        debug!(
            event_name = "client.completion.request",
            provider = self.provider.as_str(),
            message_count = messages.len(),
            "sending completion request"
        );

        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                CompletionError::Timeout(self.timeout.as_secs())
            } else {
                CompletionError::Transport(error.to_string())
            }
        })?;

        let status = response.status();
        let raw =
            response.text().await.map_err(|error| CompletionError::Transport(error.to_string()))?;
        if !status.is_success() {
            return Err(CompletionError::Status { status: status.as_u16(), body: raw });
        }

        let content = match self.provider {
            LlmProvider::OpenAi | LlmProvider::AzureOpenAi => {
                serde_json::from_str::<OpenAiResponse>(&raw)
                    .map_err(|error| CompletionError::Malformed(error.to_string()))?
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.message.content)
            }
            LlmProvider::Ollama => serde_json::from_str::<OllamaResponse>(&raw)
                .map_err(|error| CompletionError::Malformed(error.to_string()))?
                .message
                .content,
        };

        content.ok_or_else(|| {
            CompletionError::Malformed("response carried no message content".to_string())
        })
    }
}
