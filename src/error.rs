use async_openai::error::OpenAIError;
use thiserror::Error;

/// Failures from the summarization backend, classified so the scheduler can
/// decide between retrying and abandoning the day's window.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("summarization backend timed out")]
    Timeout,

    #[error("summarization backend rate limited the request")]
    RateLimited,

    #[error("malformed summarization response: {0}")]
    Malformed(String),

    #[error("summarization backend error: {0}")]
    Api(#[from] OpenAIError),
}

impl LlmError {
    /// Map an async-openai error, pulling rate-limit responses out into
    /// their own variant.
    pub fn classify(err: OpenAIError) -> Self {
        if let OpenAIError::ApiError(api) = &err {
            let is_rate_limit = api
                .r#type
                .as_deref()
                .is_some_and(|t| t.contains("rate_limit"))
                || api.message.to_lowercase().contains("rate limit");
            if is_rate_limit {
                return LlmError::RateLimited;
            }
        }
        LlmError::Api(err)
    }
}

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("summarization failed: {0}")]
    SummarizationFailed(#[from] LlmError),

    #[error("message store error: {0}")]
    Storage(#[from] anyhow::Error),
}
