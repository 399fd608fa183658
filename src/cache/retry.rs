//! 缓存 + 重试包装
//!
//! 设置了作用域时先查缓存，命中直接返回（不调用被包装的函数）；
//! 否则最多调用 retries 次，仅对 FunctionError::Retryable 重试，第 n 次失败后等待 backoff × n²。
//! 成功结果写入缓存，失败从不缓存。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::agent::AgentContext;
use crate::cache::{CacheScope, FunctionCacheService};
use crate::config::CacheSection;
use crate::core::FunctionError;

/// 每个方法的缓存 / 重试配置
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRetryOptions {
    pub retries: u32,
    pub backoff: Duration,
    pub ttl: Option<Duration>,
    /// 未设置时不缓存，只重试
    pub scope: Option<CacheScope>,
}

impl Default for CacheRetryOptions {
    fn default() -> Self {
        Self {
            retries: 5,
            backoff: Duration::from_millis(250),
            ttl: None,
            scope: None,
        }
    }
}

/// 由配置 [cache] 段得到默认重试 / TTL；作用域由各能力方法决定
impl From<&CacheSection> for CacheRetryOptions {
    fn from(section: &CacheSection) -> Self {
        Self {
            retries: section.retries,
            backoff: section.backoff(),
            ttl: section.ttl_secs.map(Duration::from_secs),
            scope: None,
        }
    }
}

impl CacheRetryOptions {
    pub fn scoped(scope: CacheScope) -> Self {
        Self::default().in_scope(scope)
    }

    /// 在已有配置上设定缓存作用域
    pub fn in_scope(mut self, scope: CacheScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// 第 attempt 次（从 1 开始）失败后的等待时间
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(attempt.saturating_mul(attempt))
}

/// 缓存重试层；未绑定缓存服务时只做重试
#[derive(Clone, Default)]
pub struct CacheRetry {
    cache: Option<Arc<dyn FunctionCacheService>>,
    defaults: CacheRetryOptions,
}

impl CacheRetry {
    pub fn new(cache: Arc<dyn FunctionCacheService>) -> Self {
        Self {
            cache: Some(cache),
            defaults: CacheRetryOptions::default(),
        }
    }

    pub fn uncached() -> Self {
        Self::default()
    }

    pub fn with_defaults(mut self, defaults: CacheRetryOptions) -> Self {
        self.defaults = defaults;
        self
    }

    /// 能力声明缓存策略时的基线配置
    pub fn defaults(&self) -> &CacheRetryOptions {
        &self.defaults
    }

    pub fn cache(&self) -> Option<&Arc<dyn FunctionCacheService>> {
        self.cache.as_ref()
    }

    /// 按 options 包装一次方法调用
    pub async fn call<F, Fut>(
        &self,
        ctx: &AgentContext,
        options: &CacheRetryOptions,
        class_name: &str,
        method: &str,
        args: &[Value],
        mut op: F,
    ) -> Result<Value, FunctionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Value, FunctionError>>,
    {
        let cached_under = match (&self.cache, options.scope) {
            (Some(cache), Some(scope)) => Some((cache, scope.key(ctx))),
            _ => None,
        };
        if let Some((cache, scope_key)) = &cached_under {
            if let Some(cached) = cache.get(scope_key, class_name, method, args).await {
                debug!("Cached return for {}.{}", class_name, method);
                return Ok(cached);
            }
        }

        let retries = options.retries.max(1);
        let mut attempt = 1;
        loop {
            if attempt > 1 {
                debug!("{}.{} retry {}", class_name, method, attempt - 1);
            }
            match op().await {
                Ok(value) => {
                    if let Some((cache, scope_key)) = &cached_under {
                        cache
                            .set(scope_key, class_name, method, args, value.clone(), options.ttl)
                            .await;
                    }
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < retries => {
                    debug!("Retry attempt #{} error {}", attempt, e);
                    tokio::time::sleep(backoff_delay(options.backoff, attempt)).await;
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
    use crate::cache::InMemoryFunctionCache;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn layer() -> CacheRetry {
        CacheRetry::new(Arc::new(InMemoryFunctionCache::new(64)))
    }

    #[test]
    fn test_backoff_is_quadratic() {
        let base = Duration::from_millis(250);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(250));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(2250));
    }

    #[test]
    fn test_options_from_cache_section() {
        let section = CacheSection {
            retries: 2,
            backoff_ms: 40,
            ttl_secs: Some(30),
            max_entries: 8,
        };
        let options = CacheRetryOptions::from(&section).in_scope(CacheScope::User);
        assert_eq!(options.retries, 2);
        assert_eq!(options.backoff, Duration::from_millis(40));
        assert_eq!(options.ttl, Some(Duration::from_secs(30)));
        assert_eq!(options.scope, Some(CacheScope::User));
        assert_eq!(CacheRetryOptions::from(&CacheSection::default()), CacheRetryOptions::default());
    }

    #[tokio::test]
    async fn test_second_call_served_from_cache() {
        let ctx = test_context();
        let layer = layer();
        let calls = AtomicU32::new(0);
        let options = CacheRetryOptions::scoped(CacheScope::Agent);
        for _ in 0..2 {
            let out = layer
                .call(&ctx, &options, "Weather", "forecast", &[json!("paris")], || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!("sunny"))
                })
                .await
                .unwrap();
            assert_eq!(out, json!("sunny"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_value_result_is_cached() {
        let ctx = test_context();
        let layer = layer();
        let calls = AtomicU32::new(0);
        let options = CacheRetryOptions::scoped(CacheScope::Global);
        for _ in 0..2 {
            let out = layer
                .call(&ctx, &options, "C", "noop", &[], || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::Null)
                })
                .await
                .unwrap();
            assert_eq!(out, Value::Null);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retryable_error_retried_with_backoff() {
        let ctx = test_context();
        let layer = layer();
        let calls = AtomicU32::new(0);
        let options = CacheRetryOptions::default()
            .with_retries(3)
            .with_backoff(Duration::from_millis(10));
        let start = std::time::Instant::now();
        let out = layer
            .call(&ctx, &options, "C", "flaky", &[], || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(FunctionError::retryable("rate limited"))
                } else {
                    Ok(json!(n))
                }
            })
            .await
            .unwrap();
        assert_eq!(out, json!(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 10ms × 1² + 10ms × 2²
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_fatal_error_not_retried_or_cached() {
        let ctx = test_context();
        let layer = layer();
        let calls = AtomicU32::new(0);
        let options = CacheRetryOptions::scoped(CacheScope::Global).with_backoff(Duration::from_millis(1));
        for _ in 0..2 {
            let err = layer
                .call(&ctx, &options, "C", "broken", &[], || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(FunctionError::fatal("boom"))
                })
                .await
                .unwrap_err();
            assert_eq!(err, FunctionError::fatal("boom"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retries_exhausted_returns_last_error() {
        let ctx = test_context();
        let layer = layer();
        let calls = AtomicU32::new(0);
        let options = CacheRetryOptions::default()
            .with_retries(2)
            .with_backoff(Duration::from_millis(1));
        let err = layer
            .call(&ctx, &options, "C", "down", &[], || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FunctionError::retryable("503"))
            })
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
