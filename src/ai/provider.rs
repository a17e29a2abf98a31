use crate::config::Config;
use crate::error::AiError;
use anyhow::bail;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::sse::{text_stream, PayloadFormat};
use super::ChunkStream;

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiProvider {
    OpenAi,
    DeepSeek,
    Alibaba,
    Gemini,
}

impl ApiProvider {
    pub const ALL: [ApiProvider; 4] = [
        ApiProvider::OpenAi,
        ApiProvider::DeepSeek,
        ApiProvider::Alibaba,
        ApiProvider::Gemini,
    ];

    pub fn from_name(name: &str) -> anyhow::Result<Self> {
        let name = name.trim().to_ascii_lowercase();
        match Self::ALL.iter().find(|p| p.name() == name) {
            Some(provider) => Ok(*provider),
            None => bail!(
                "Unknown API provider '{}'. Expected one of: openai, deepseek, alibaba, gemini",
                name
            ),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ApiProvider::OpenAi => "openai",
            ApiProvider::DeepSeek => "deepseek",
            ApiProvider::Alibaba => "alibaba",
            ApiProvider::Gemini => "gemini",
        }
    }

    /// Chat completions endpoint, or the models base URL for Gemini
    pub fn default_url(&self) -> &'static str {
        match self {
            ApiProvider::OpenAi => "https://api.openai.com/v1/chat/completions",
            ApiProvider::DeepSeek => "https://api.deepseek.com/v1/chat/completions",
            ApiProvider::Alibaba => {
                "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions"
            }
            ApiProvider::Gemini => "https://generativelanguage.googleapis.com/v1beta/models",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ApiProvider::OpenAi => "gpt-4o-mini",
            ApiProvider::DeepSeek => "deepseek-chat",
            ApiProvider::Alibaba => "qwen-turbo",
            ApiProvider::Gemini => "gemini-1.5-flash",
        }
    }

    /// Environment variable holding this provider's key
    pub fn api_key_var(&self) -> &'static str {
        match self {
            ApiProvider::OpenAi => "OPENAI_API_KEY",
            ApiProvider::DeepSeek => "DEEPSEEK_API_KEY",
            ApiProvider::Alibaba => "ALIBABA_API_KEY",
            ApiProvider::Gemini => "GEMINI_API_KEY",
        }
    }

    /// Whether the provider speaks the OpenAI chat completions protocol
    pub fn is_openai_compatible(&self) -> bool {
        !matches!(self, ApiProvider::Gemini)
    }
}

impl fmt::Display for ApiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// OpenAI-compatible wire types

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
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

// Gemini wire types

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

/// Single-prompt client for the configured provider.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    provider: ApiProvider,
    api_url: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
}

impl ChatClient {
    pub fn from_config(config: &Config) -> Result<Self, AiError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.request_timeout)
            .read_timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http,
            provider: config.api_provider,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            timeout: config.request_timeout,
        })
    }

    pub fn provider(&self) -> ApiProvider {
        self.provider
    }

    fn api_key(&self) -> Result<&str, AiError> {
        self.api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| AiError::MissingApiKey(self.provider.to_string()))
    }

    /// Send one user prompt and return the full reply text.
    pub async fn complete(&self, prompt: &str, temperature: f32) -> Result<String, AiError> {
        if self.provider.is_openai_compatible() {
            self.complete_openai(prompt, temperature).await
        } else {
            self.complete_gemini(prompt).await
        }
    }

    /// Send one user prompt and stream the reply as text deltas.
    ///
    /// Gemini replies arrive as a single chunk.
    pub async fn stream(&self, prompt: &str, temperature: f32) -> Result<ChunkStream, AiError> {
        if !self.provider.is_openai_compatible() {
            let content = self.complete_gemini(prompt).await?;
            return Ok(futures::stream::iter(vec![Ok(content)]).boxed());
        }

        let request = ChatRequest {
            model: &self.model,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            temperature,
            stream: true,
        };

        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(self.api_key()?)
            .json(&request)
            .send()
            .await?;
        let response = check_status(response).await?;

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(AiError::from))
            .boxed();
        Ok(text_stream(bytes, PayloadFormat::OpenAiDelta))
    }

    async fn complete_openai(&self, prompt: &str, temperature: f32) -> Result<String, AiError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            temperature,
            stream: false,
        };

        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(self.api_key()?)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await?;
        let response = check_status(response).await?;

        let chat: ChatResponse = response.json().await?;
        Ok(chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    async fn complete_gemini(&self, prompt: &str) -> Result<String, AiError> {
        let url = format!(
            "{}/{}:generateContent",
            self.api_url.trim_end_matches('/'),
            self.model
        );
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
        };

        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key()?)])
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await?;
        let response = check_status(response).await?;

        let gemini: GeminiResponse = response.json().await?;
        Ok(gemini
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .unwrap_or_default())
    }
}

/// Turn a non-success response into [`AiError::Status`] carrying the body.
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, AiError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|e| format!("<failed to read body: {}>", e));
    Err(AiError::Status { status, body })
}
