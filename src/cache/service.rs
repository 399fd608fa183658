//! 函数结果缓存服务
//!
//! 键由 (作用域, 类名, 方法名, 参数摘要) 组成。作用域键：global / agent:{agentId} / user:{userId}，
//! 按前缀可清除某个智能体或用户的全部缓存。
//! 存储的值为 JSON；函数无返回值时存为 Null，与「未缓存」（get 返回 None）区分。

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

use crate::agent::AgentContext;
use crate::config::CacheSection;

/// 缓存作用域
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheScope {
    Global,
    Agent,
    User,
}

impl CacheScope {
    /// 解析为具体的作用域键（需要当前智能体上下文）
    pub fn key(&self, ctx: &AgentContext) -> String {
        match self {
            CacheScope::Global => "global".to_string(),
            CacheScope::Agent => format!("agent:{}", ctx.agent_id()),
            CacheScope::User => format!("user:{}", ctx.user_id()),
        }
    }
}

/// 参数摘要：取参数的紧凑 JSON 文本，长度 ≤ 20 时原样保留，
/// 更长的取前两个字符加 SHA-256。字符串带引号，"3" 与 3 不会相同
pub fn args_key(arg: &Value) -> String {
    let text = arg.to_string();
    if text.chars().count() <= 20 {
        text
    } else {
        let prefix: String = text.chars().take(2).collect();
        format!("{}_{}", prefix, hex::encode(Sha256::digest(text.as_bytes())))
    }
}

/// 参数列表编码为 JSON 字符串数组，各参数边界无歧义
pub fn cache_key(scope_key: &str, class_name: &str, method: &str, args: &[Value]) -> String {
    let params = Value::Array(args.iter().map(|a| Value::String(args_key(a))).collect());
    format!("{}:{}:{}:{}", scope_key, class_name, method, params)
}

/// 函数缓存服务
#[async_trait]
pub trait FunctionCacheService: Send + Sync {
    /// None 表示未缓存；Some(Value::Null) 表示已缓存且无返回值
    async fn get(&self, scope_key: &str, class_name: &str, method: &str, args: &[Value]) -> Option<Value>;

    async fn set(
        &self,
        scope_key: &str,
        class_name: &str,
        method: &str,
        args: &[Value],
        value: Value,
        ttl: Option<Duration>,
    );

    /// 清除某智能体作用域下的缓存，返回清除条数
    async fn clear_agent_cache(&self, agent_id: &str) -> usize;

    async fn clear_user_cache(&self, user_id: &str) -> usize;
}

#[derive(Debug, Clone)]
struct CachedValue {
    value: Value,
    expires_at: Option<Instant>,
}

/// 进程内 LRU 缓存
pub struct InMemoryFunctionCache {
    cache: Mutex<LruCache<String, CachedValue>>,
}

impl InMemoryFunctionCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    /// 按 [cache].max_entries 建立
    pub fn from_config(section: &CacheSection) -> Self {
        Self::new(section.max_entries)
    }

    pub async fn len(&self) -> usize {
        self.cache.lock().await.len()
    }

    async fn clear_prefix(&self, prefix: &str) -> usize {
        let mut cache = self.cache.lock().await;
        let keys: Vec<String> = cache
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for k in &keys {
            cache.pop(k);
        }
        keys.len()
    }
}

impl Default for InMemoryFunctionCache {
    fn default() -> Self {
        Self::new(4096)
    }
}

#[async_trait]
impl FunctionCacheService for InMemoryFunctionCache {
    async fn get(&self, scope_key: &str, class_name: &str, method: &str, args: &[Value]) -> Option<Value> {
        let key = cache_key(scope_key, class_name, method, args);
        let mut cache = self.cache.lock().await;
        let expired = match cache.get(&key) {
            Some(cached) => match cached.expires_at {
                Some(at) if Instant::now() >= at => true,
                _ => return Some(cached.value.clone()),
            },
            None => return None,
        };
        if expired {
            debug!(key = %key, "cache entry expired");
            cache.pop(&key);
        }
        None
    }

    async fn set(
        &self,
        scope_key: &str,
        class_name: &str,
        method: &str,
        args: &[Value],
        value: Value,
        ttl: Option<Duration>,
    ) {
        let key = cache_key(scope_key, class_name, method, args);
        let expires_at = ttl.map(|t| Instant::now() + t);
        self.cache.lock().await.put(key, CachedValue { value, expires_at });
    }

    async fn clear_agent_cache(&self, agent_id: &str) -> usize {
        self.clear_prefix(&format!("agent:{agent_id}:")).await
    }

    async fn clear_user_cache(&self, user_id: &str) -> usize {
        self.clear_prefix(&format!("user:{user_id}:")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_args_key_short_and_long_strings() {
        assert_eq!(args_key(&json!("short")), "\"short\"");
        let long = "a".repeat(40);
        let key = args_key(&json!(long));
        assert!(key.starts_with("\"a_"));
        assert_eq!(key.len(), 3 + 64);
    }

    #[test]
    fn test_args_key_nested_preserves_order() {
        let v = json!({"b": 1, "a": [true]});
        assert_eq!(args_key(&v), r#"{"b":1,"a":[true]}"#);
    }

    #[test]
    fn test_cache_key_layout() {
        let key = cache_key("agent:a1", "Search", "query", &[json!("rust"), json!(3)]);
        assert_eq!(key, r#"agent:a1:Search:query:["\"rust\"","3"]"#);
    }

    #[test]
    fn test_cache_key_distinguishes_argument_boundaries() {
        let joined = cache_key("global", "C", "m", &[json!("a__b")]);
        let split = cache_key("global", "C", "m", &[json!("a"), json!("b")]);
        assert_ne!(joined, split);

        let text = cache_key("global", "C", "m", &[json!("3")]);
        let number = cache_key("global", "C", "m", &[json!(3)]);
        assert_ne!(text, number);

        let comma = cache_key("global", "C", "m", &[json!("a\",\"b")]);
        assert_ne!(comma, split);
    }

    #[tokio::test]
    async fn test_string_and_number_args_cached_separately() {
        let cache = InMemoryFunctionCache::new(16);
        cache.set("global", "C", "m", &[json!("3")], json!("text"), None).await;
        assert_eq!(cache.get("global", "C", "m", &[json!(3)]).await, None);
        assert_eq!(cache.get("global", "C", "m", &[json!("3")]).await, Some(json!("text")));
    }

    #[tokio::test]
    async fn test_absent_value_distinct_from_not_cached() {
        let cache = InMemoryFunctionCache::new(16);
        assert_eq!(cache.get("global", "C", "m", &[]).await, None);
        cache.set("global", "C", "m", &[], Value::Null, None).await;
        assert_eq!(cache.get("global", "C", "m", &[]).await, Some(Value::Null));
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = InMemoryFunctionCache::new(16);
        cache
            .set("global", "C", "m", &[], json!(1), Some(Duration::from_millis(0)))
            .await;
        assert_eq!(cache.get("global", "C", "m", &[]).await, None);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_capacity_from_config() {
        let section = CacheSection {
            max_entries: 2,
            ..CacheSection::default()
        };
        let cache = InMemoryFunctionCache::from_config(&section);
        for i in 0..3 {
            cache.set("global", "C", "m", &[json!(i)], json!(i), None).await;
        }
        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get("global", "C", "m", &[json!(0)]).await, None);
    }

    #[tokio::test]
    async fn test_clear_agent_and_user_cache() {
        let cache = InMemoryFunctionCache::new(16);
        cache.set("agent:a1", "C", "m", &[json!(1)], json!(1), None).await;
        cache.set("agent:a1", "C", "m", &[json!(2)], json!(2), None).await;
        cache.set("agent:a10", "C", "m", &[], json!(3), None).await;
        cache.set("user:u1", "C", "m", &[], json!(4), None).await;
        assert_eq!(cache.clear_agent_cache("a1").await, 2);
        assert_eq!(cache.get("agent:a10", "C", "m", &[]).await, Some(json!(3)));
        assert_eq!(cache.clear_user_cache("u1").await, 1);
        assert_eq!(cache.len().await, 1);
    }
}
