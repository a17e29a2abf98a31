use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::prompt::build_analysis_prompt;
use super::provider::{check_status, ApiProvider, ChatClient};
use super::sse::{text_stream, PayloadFormat};
use super::ChunkStream;
use crate::config::Config;
use crate::error::AiError;
use crate::parser::{parse_partial, AnalysisRecord};
use crate::retry::{with_retry_if, RetryConfig};
use crate::text::detect_input_kind;

const ANALYSIS_TEMPERATURE: f32 = 0.7;

/// Opens a stream of analysis text for one selection.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    async fn open_stream(&self, text: &str, context: &str) -> Result<ChunkStream, AiError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProxyRequest<'a> {
    text: &'a str,
    context: &'a str,
    api_type: ApiProvider,
}

#[derive(Debug, Clone)]
enum Route {
    /// Call the provider directly with a locally built prompt.
    Direct {
        client: ChatClient,
        target_language: String,
    },
    /// Send the selection to a streaming proxy that holds the keys.
    Proxy {
        http: reqwest::Client,
        url: String,
        provider: ApiProvider,
    },
}

/// [`ChunkSource`] talking to a provider or to the streaming proxy.
///
/// Opening the stream is retried on transient failures. Once chunks have
/// started flowing nothing is retried.
#[derive(Debug, Clone)]
pub struct LlmChunkSource {
    route: Route,
    retry: RetryConfig,
}

impl LlmChunkSource {
    /// Proxy route when a proxy URL is configured, otherwise the provider itself.
    pub fn from_config(config: &Config) -> Result<Self, AiError> {
        let route = match &config.proxy_url {
            Some(url) => Route::Proxy {
                http: reqwest::Client::builder()
                    .connect_timeout(config.request_timeout)
                    .read_timeout(config.request_timeout)
                    .build()?,
                url: url.clone(),
                provider: config.api_provider,
            },
            None => Route::Direct {
                client: ChatClient::from_config(config)?,
                target_language: config.target_language.clone(),
            },
        };
        Ok(Self {
            route,
            retry: RetryConfig::stream_open(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn is_proxied(&self) -> bool {
        matches!(self.route, Route::Proxy { .. })
    }

    /// Open a connection to the proxy ahead of the first selection.
    ///
    /// Failures are logged and otherwise ignored.
    pub async fn preheat(&self) {
        let Route::Proxy { http, url, .. } = &self.route else {
            return;
        };
        match http.get(url).send().await {
            Ok(_) => info!("Connection to {} preheated", url),
            Err(e) => debug!("Connection preheat failed (non-critical): {}", e),
        }
    }

    async fn open_once(&self, text: &str, context: &str) -> Result<ChunkStream, AiError> {
        match &self.route {
            Route::Direct {
                client,
                target_language,
            } => {
                let prompt = build_analysis_prompt(text, context, target_language);
                client.stream(&prompt, ANALYSIS_TEMPERATURE).await
            }
            Route::Proxy {
                http,
                url,
                provider,
            } => {
                let response = http
                    .post(url)
                    .json(&ProxyRequest {
                        text,
                        context,
                        api_type: *provider,
                    })
                    .send()
                    .await?;
                let response = check_status(response).await?;
                let bytes = response
                    .bytes_stream()
                    .map(|chunk| chunk.map(|b| b.to_vec()).map_err(AiError::from))
                    .boxed();
                Ok(text_stream(bytes, PayloadFormat::ProxyText))
            }
        }
    }
}

#[async_trait]
impl ChunkSource for LlmChunkSource {
    async fn open_stream(&self, text: &str, context: &str) -> Result<ChunkStream, AiError> {
        with_retry_if(
            &self.retry,
            "Open analysis stream",
            || self.open_once(text, context),
            AiError::is_retryable,
        )
        .await
    }
}

/// Progressive analysis of user selections.
#[derive(Clone)]
pub struct SelectionAnalyzer {
    source: Arc<dyn ChunkSource>,
}

impl SelectionAnalyzer {
    pub fn new(source: Arc<dyn ChunkSource>) -> Self {
        Self { source }
    }

    /// Stream an analysis of `text`, calling `on_update` with the best record
    /// after every chunk. Returns the final record.
    ///
    /// Failing to open the stream, or failing before the first chunk, is an
    /// error. A failure after some text arrived ends the stream early and the
    /// record built so far is returned.
    pub async fn analyze_stream<F>(
        &self,
        text: &str,
        context: &str,
        mut on_update: F,
    ) -> Result<AnalysisRecord, AiError>
    where
        F: FnMut(&AnalysisRecord) + Send,
    {
        let kind = detect_input_kind(text);
        let mut stream = self.source.open_stream(text, context).await?;
        let mut buffer = String::new();
        let mut record = AnalysisRecord::fallback(text);

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => {
                    buffer.push_str(&chunk);
                    record = parse_partial(&buffer, text).for_kind(kind);
                    on_update(&record);
                }
                Err(e) if buffer.is_empty() => return Err(e),
                Err(e) => {
                    warn!(
                        "Analysis stream for '{}' failed after {} bytes: {}",
                        text,
                        buffer.len(),
                        e
                    );
                    break;
                }
            }
        }

        debug!("Analysis of '{}' finished ({} bytes)", text, buffer.len());
        Ok(record)
    }

    /// Wait for the complete analysis.
    pub async fn analyze(&self, text: &str, context: &str) -> Result<AnalysisRecord, AiError> {
        self.analyze_stream(text, context, |_| {}).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::sync::Mutex;

    /// Replays fixed chunks, optionally ending with an error.
    struct ScriptedSource {
        chunks: Vec<&'static str>,
        fail_after: bool,
    }

    #[async_trait]
    impl ChunkSource for ScriptedSource {
        async fn open_stream(&self, _text: &str, _context: &str) -> Result<ChunkStream, AiError> {
            let mut items: Vec<Result<String, AiError>> =
                self.chunks.iter().map(|c| Ok(c.to_string())).collect();
            if self.fail_after {
                items.push(Err(AiError::Stream("connection reset".to_string())));
            }
            Ok(stream::iter(items).boxed())
        }
    }

    struct RefusingSource;

    #[async_trait]
    impl ChunkSource for RefusingSource {
        async fn open_stream(&self, _text: &str, _context: &str) -> Result<ChunkStream, AiError> {
            Err(AiError::MissingApiKey("openai".to_string()))
        }
    }

    fn analyzer(chunks: Vec<&'static str>, fail_after: bool) -> SelectionAnalyzer {
        SelectionAnalyzer::new(Arc::new(ScriptedSource { chunks, fail_after }))
    }

    #[tokio::test]
    async fn test_word_analysis_refines_progressively() {
        let analyzer = analyzer(
            vec![
                r#"{"correctedText": "apple", "phonetic": "/ˈæp"#,
                r#"əl/", "translation": "n. 苹"#,
                r#"果", "contextMeaning": null, "coreLogic": "A round fruit"}"#,
            ],
            false,
        );

        let updates = Mutex::new(Vec::new());
        let record = analyzer
            .analyze_stream("apple", "I ate an apple", |r| {
                updates.lock().unwrap().push(r.clone())
            })
            .await
            .unwrap();

        let updates = updates.into_inner().unwrap();
        assert_eq!(updates.len(), 3);
        assert_eq!(updates[0].phonetic.as_deref(), Some("/ˈæp"));
        assert_eq!(updates[1].translation.as_deref(), Some("n. 苹"));
        assert_eq!(record.translation.as_deref(), Some("n. 苹果"));
        assert_eq!(record.phonetic.as_deref(), Some("/ˈæpəl/"));
        assert_eq!(record.core_logic.as_deref(), Some("A round fruit"));
        assert_eq!(record.context_meaning, None);
    }

    #[tokio::test]
    async fn test_sentence_analysis_drops_word_fields() {
        let analyzer = analyzer(
            vec![r#"{"correctedText": "This is a test.", "phonetic": "/ðɪs/", "translation": "这是一个测试。", "coreLogic": "x"}"#],
            false,
        );
        let record = analyzer.analyze("This is a test.", "").await.unwrap();
        assert_eq!(record.translation.as_deref(), Some("这是一个测试。"));
        assert_eq!(record.phonetic, None);
        assert_eq!(record.core_logic, None);
    }

    #[tokio::test]
    async fn test_mid_stream_failure_keeps_partial_record() {
        let analyzer = analyzer(vec![r#"{"correctedText": "apple", "translation": "n. 苹"#], true);
        let record = analyzer.analyze("apple", "").await.unwrap();
        assert_eq!(record.corrected_text, "apple");
        assert_eq!(record.translation.as_deref(), Some("n. 苹"));
    }

    #[tokio::test]
    async fn test_failure_before_first_chunk_is_error() {
        let analyzer = analyzer(vec![], true);
        assert!(matches!(
            analyzer.analyze("apple", "").await,
            Err(AiError::Stream(_))
        ));

        let refusing = SelectionAnalyzer::new(Arc::new(RefusingSource));
        assert!(matches!(
            refusing.analyze("apple", "").await,
            Err(AiError::MissingApiKey(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_stream_returns_fallback() {
        let analyzer = analyzer(vec![], false);
        let record = analyzer.analyze("messag", "").await.unwrap();
        assert_eq!(record, AnalysisRecord::fallback("messag"));
    }
}
