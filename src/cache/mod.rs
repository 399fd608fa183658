//! 函数结果缓存与重试层

pub mod retry;
pub mod service;

pub use retry::{backoff_delay, CacheRetry, CacheRetryOptions};
pub use service::{args_key, cache_key, CacheScope, FunctionCacheService, InMemoryFunctionCache};
