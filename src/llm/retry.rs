//! 带重试的 LLM 客户端
//!
//! 对暂时性错误（RateLimited / Unavailable）按 base × attempt² 退避重试；
//! RateLimited 带 retry_after 时优先使用该提示。id 与内层客户端一致，序列化不受包装影响。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::agent::AgentContext;
use crate::cache::backoff_delay;
use crate::llm::{GenerateOptions, LlmClient, LlmError, LlmInput};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff: Duration::from_millis(250),
        }
    }
}

pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    config: RetryConfig,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    fn id(&self) -> String {
        self.inner.id()
    }

    async fn generate(
        &self,
        ctx: &AgentContext,
        input: &LlmInput,
        opts: &GenerateOptions,
    ) -> Result<String, LlmError> {
        let mut attempt = 1;
        loop {
            match self.inner.generate(ctx, input, opts).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = match &e {
                        LlmError::RateLimited {
                            retry_after_ms: Some(ms),
                        } => Duration::from_millis(*ms),
                        _ => backoff_delay(self.config.backoff, attempt),
                    };
                    warn!(
                        llm = %self.inner.id(),
                        attempt,
                        max = self.config.max_retries,
                        error = %e,
                        "LLM call failed, retrying"
                    );
                    debug!("Waiting {}ms before retry", delay.as_millis());
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::test_context;
    use crate::llm::MockLlmClient;

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let mock = Arc::new(MockLlmClient::new());
        mock.add_error(LlmError::Unavailable("503".into()))
            .add_error(LlmError::RateLimited {
                retry_after_ms: Some(1),
            })
            .add_response("ok");
        let client = RetryingLlmClient::new(mock.clone(), fast());
        let ctx = test_context();
        let out = client
            .generate(&ctx, &LlmInput::text("q"), &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(out, "ok");
        assert_eq!(mock.call_count(), 3);
        assert_eq!(client.id(), "mock:mock");
    }

    #[tokio::test]
    async fn test_does_not_retry_fatal_errors() {
        let mock = Arc::new(MockLlmClient::new());
        mock.add_error(LlmError::InvalidResponse("bad".into()))
            .add_response("never");
        let client = RetryingLlmClient::new(mock.clone(), fast());
        let ctx = test_context();
        let err = client
            .generate(&ctx, &LlmInput::text("q"), &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let mock = Arc::new(MockLlmClient::new());
        for _ in 0..5 {
            mock.add_error(LlmError::Unavailable("503".into()));
        }
        let client = RetryingLlmClient::new(mock.clone(), fast());
        let ctx = test_context();
        let err = client
            .generate(&ctx, &LlmInput::text("q"), &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(mock.call_count(), 3);
    }
}
