//! Model capability seam
//!
//! The conversation loop only depends on the `LlmClient` trait; the
//! Anthropic Messages API implementation lives behind it.

mod anthropic;
mod error;
mod types;

pub use anthropic::AnthropicClient;
pub use error::{LlmError, LlmErrorKind};
pub use types::{ContentBlock, LlmMessage, LlmRequest, LlmResponse, MessageRole, ToolDefinition};

use async_trait::async_trait;

/// Client for making model requests
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete a model request
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}

#[async_trait]
impl<T: LlmClient + ?Sized> LlmClient for std::sync::Arc<T> {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        (**self).complete(request).await
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }
}
