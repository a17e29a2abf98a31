//! Language model clients.
//!
//! Two call shapes are used: a single batch request that translates many page
//! segments at once, and a streamed analysis of one selection.

mod analyze;
mod batch;
pub mod prompt;
mod provider;
pub mod sse;

pub use analyze::{ChunkSource, LlmChunkSource, SelectionAnalyzer};
pub use batch::{parse_translation_array, LlmBatchTranslator};
pub use provider::{ApiProvider, ChatClient};

use crate::error::AiError;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Stream of text deltas from a model.
pub type ChunkStream = BoxStream<'static, Result<String, AiError>>;

/// Translates a batch of segments in one call.
///
/// Implementations return one entry per input, in input order. An empty entry
/// means the segment should not be annotated.
#[async_trait]
pub trait BatchTranslator: Send + Sync {
    async fn translate_batch(&self, texts: &[String]) -> Result<Vec<String>, AiError>;
}
