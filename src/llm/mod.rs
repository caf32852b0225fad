pub mod client;

pub use client::LlmClient;

use crate::error::LlmError;
use async_trait::async_trait;

/// Seam over the summarization backend so the generator and scheduler can be
/// exercised without a live endpoint.
#[async_trait]
pub trait SummaryBackend: Send + Sync {
    async fn summarize(&self, prompt: &str, max_tokens: u32) -> Result<String, LlmError>;
}

#[async_trait]
impl SummaryBackend for LlmClient {
    async fn summarize(&self, prompt: &str, max_tokens: u32) -> Result<String, LlmError> {
        LlmClient::summarize(self, prompt, max_tokens).await
    }
}
