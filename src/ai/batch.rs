use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::prompt::build_batch_prompt;
use super::provider::ChatClient;
use super::BatchTranslator;
use crate::error::AiError;

const BATCH_TEMPERATURE: f32 = 0.3;

/// Batch translator backed by a chat completion model.
#[derive(Debug, Clone)]
pub struct LlmBatchTranslator {
    client: ChatClient,
    target_language: String,
}

impl LlmBatchTranslator {
    pub fn new(client: ChatClient, target_language: impl Into<String>) -> Self {
        Self {
            client,
            target_language: target_language.into(),
        }
    }
}

#[async_trait]
impl BatchTranslator for LlmBatchTranslator {
    async fn translate_batch(&self, texts: &[String]) -> Result<Vec<String>, AiError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let prompt = build_batch_prompt(texts, &self.target_language);
        debug!(
            "Requesting {} translations from {}",
            texts.len(),
            self.client.provider()
        );
        let content = self.client.complete(&prompt, BATCH_TEMPERATURE).await?;
        parse_translation_array(&content)
    }
}

/// Extract the JSON array of translations from a model reply.
///
/// The span between the first `[` and the last `]` is parsed, which tolerates
/// markdown fences and chatter around it. Non-string entries become empty
/// strings so positions stay aligned with the input.
pub fn parse_translation_array(content: &str) -> Result<Vec<String>, AiError> {
    let start = content.find('[');
    let end = content.rfind(']');
    let (start, end) = match (start, end) {
        (Some(start), Some(end)) if end > start => (start, end),
        _ => {
            return Err(AiError::MalformedResponse(format!(
                "no JSON array in reply: {}",
                preview(content)
            )))
        }
    };

    let values: Vec<Value> = serde_json::from_str(&content[start..=end]).map_err(|e| {
        AiError::MalformedResponse(format!("invalid JSON array ({}): {}", e, preview(content)))
    })?;

    Ok(values
        .into_iter()
        .map(|value| match value {
            Value::String(s) => s,
            _ => String::new(),
        })
        .collect())
}

fn preview(content: &str) -> String {
    content.chars().take(120).collect()
}
