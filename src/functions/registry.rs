//! 能力注册表
//!
//! 所有能力类实现 Capability trait（类名 / 方法 Schema / 异步调用），由 LlmFunctions 按类名注册与查找。
//! call_function 把按名参数映射为位置参数，按能力声明的缓存重试配置包装调用，并输出结构化审计日志（JSON）。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::agent::AgentContext;
use crate::cache::{CacheRetry, CacheRetryOptions, FunctionCacheService};
use crate::core::FunctionError;
use crate::functions::{split_function_name, AgentFunctions, FunctionCall, FunctionSchema};

/// 能力类：一组可被模型调用的方法
#[async_trait]
pub trait Capability: Send + Sync {
    /// 类名（函数名 `Class.method` 中的 Class）
    fn class_name(&self) -> &str;

    /// 方法 Schema（供模型理解）
    fn schemas(&self) -> Vec<FunctionSchema>;

    /// 调用方法；args 已按 Schema 的参数顺序排列，缺失的可选参数为 Null
    async fn call(&self, ctx: &AgentContext, method: &str, args: &[Value]) -> Result<Value, FunctionError>;

    /// 方法的缓存 / 重试配置；None 表示直接调用。defaults 来自配置 [cache] 段
    fn cache_policy(&self, _method: &str, _defaults: &CacheRetryOptions) -> Option<CacheRetryOptions> {
        None
    }
}

/// 智能体可用的能力集合；序列化时只保留类名
#[derive(Clone)]
pub struct LlmFunctions {
    classes: BTreeMap<String, Arc<dyn Capability>>,
    cache_retry: CacheRetry,
}

impl Default for LlmFunctions {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmFunctions {
    /// 包含内置 Agent 能力
    pub fn new() -> Self {
        let mut functions = Self::empty();
        functions.add(Arc::new(AgentFunctions));
        functions
    }

    pub fn empty() -> Self {
        Self {
            classes: BTreeMap::new(),
            cache_retry: CacheRetry::uncached(),
        }
    }

    pub fn add(&mut self, capability: Arc<dyn Capability>) -> &mut Self {
        self.classes
            .insert(capability.class_name().to_string(), capability);
        self
    }

    pub fn with(mut self, capability: Arc<dyn Capability>) -> Self {
        self.add(capability);
        self
    }

    pub fn remove(&mut self, class_name: &str) -> Option<Arc<dyn Capability>> {
        self.classes.remove(class_name)
    }

    pub fn get(&self, class_name: &str) -> Option<Arc<dyn Capability>> {
        self.classes.get(class_name).cloned()
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.classes.contains_key(class_name)
    }

    pub fn class_names(&self) -> Vec<String> {
        self.classes.keys().cloned().collect()
    }

    pub fn schemas(&self) -> Vec<FunctionSchema> {
        self.classes.values().flat_map(|c| c.schemas()).collect()
    }

    pub fn find_schema(&self, function_name: &str) -> Option<FunctionSchema> {
        let (class, method) = split_function_name(function_name)?;
        self.classes
            .get(class)?
            .schemas()
            .into_iter()
            .find(|s| s.method == method)
    }

    /// 绑定缓存服务，能力声明了作用域的方法将被缓存
    pub fn set_cache(&mut self, cache: Arc<dyn FunctionCacheService>) {
        let defaults = self.cache_retry.defaults().clone();
        self.cache_retry = CacheRetry::new(cache).with_defaults(defaults);
    }

    pub fn set_cache_defaults(&mut self, defaults: CacheRetryOptions) {
        self.cache_retry = self.cache_retry.clone().with_defaults(defaults);
    }

    pub fn cache_defaults(&self) -> &CacheRetryOptions {
        self.cache_retry.defaults()
    }

    pub fn has_cache(&self) -> bool {
        self.cache_retry.cache().is_some()
    }

    pub async fn call_function(&self, ctx: &AgentContext, call: &FunctionCall) -> Result<Value, FunctionError> {
        let start = Instant::now();
        let result = self.dispatch(ctx, call).await;

        let (ok, outcome) = match &result {
            Ok(_) => (true, "ok"),
            Err(FunctionError::Retryable(_)) => (false, "retryable_error"),
            Err(FunctionError::Fatal(_)) => (false, "error"),
        };
        let audit = serde_json::json!({
            "event": "function_audit",
            "agent_id": ctx.agent_id(),
            "function": call.function_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&call.parameters),
        });
        tracing::info!(audit = %audit.to_string(), "function");

        result
    }

    async fn dispatch(&self, ctx: &AgentContext, call: &FunctionCall) -> Result<Value, FunctionError> {
        let (class, method) = split_function_name(&call.function_name)
            .ok_or_else(|| FunctionError::fatal(format!("Invalid function name {}", call.function_name)))?;
        let capability = self.classes.get(class).ok_or_else(|| {
            FunctionError::fatal(format!("Function class {class} does not exist"))
        })?;
        let schema = capability
            .schemas()
            .into_iter()
            .find(|s| s.method == method)
            .ok_or_else(|| {
                FunctionError::fatal(format!("Function {} does not exist", call.function_name))
            })?;
        let args = positional_args(&schema, call)?;

        let _frame = ctx.enter_call(&call.function_name);
        match capability.cache_policy(method, self.cache_retry.defaults()) {
            Some(options) => {
                self.cache_retry
                    .call(ctx, &options, class, method, &args, || {
                        capability.call(ctx, method, &args)
                    })
                    .await
            }
            None => capability.call(ctx, method, &args).await,
        }
    }
}

/// 按 Schema 顺序取参数。只有一个参数且名称不匹配时按位置使用。
fn positional_args(schema: &FunctionSchema, call: &FunctionCall) -> Result<Vec<Value>, FunctionError> {
    if schema.parameters.len() == 1 && call.parameters.len() == 1 {
        if let Some(value) = call.parameters.values().next() {
            return Ok(vec![value.clone()]);
        }
    }
    for name in call.parameters.keys() {
        if !schema.parameters.iter().any(|p| &p.name == name) {
            let valid: Vec<&str> = schema.parameters.iter().map(|p| p.name.as_str()).collect();
            return Err(FunctionError::fatal(format!(
                "Invalid parameter name: {} for function {}. Valid parameters are: {}",
                name,
                call.function_name,
                valid.join(", ")
            )));
        }
    }
    Ok(schema
        .parameters
        .iter()
        .map(|p| call.parameters.get(&p.name).cloned().unwrap_or(Value::Null))
        .collect())
}

fn args_preview(args: &serde_json::Map<String, Value>) -> String {
    let s = Value::Object(args.clone()).to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

pub type CapabilityConstructor = Arc<dyn Fn() -> Arc<dyn Capability> + Send + Sync>;

/// 反序列化时按类名重建能力实例
#[derive(Clone, Default)]
pub struct FunctionFactory {
    constructors: HashMap<String, CapabilityConstructor>,
}

impl FunctionFactory {
    pub fn new() -> Self {
        let mut factory = Self::default();
        factory.register("Agent", || Arc::new(AgentFunctions));
        factory
    }

    pub fn register<F>(&mut self, class_name: &str, constructor: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn Capability> + Send + Sync + 'static,
    {
        self.constructors
            .insert(class_name.to_string(), Arc::new(constructor));
        self
    }

    pub fn create(&self, class_name: &str) -> Option<Arc<dyn Capability>> {
        self.constructors.get(class_name).map(|c| c())
    }

    /// 按类名列表重建；未知类名记录警告后跳过，Agent 始终存在
    pub fn build(&self, class_names: &[String]) -> LlmFunctions {
        let mut functions = LlmFunctions::new();
        for name in class_names {
            if functions.contains(name) {
                continue;
            }
            match self.create(name) {
                Some(capability) => {
                    functions.add(capability);
                }
                None => warn!(class = %name, "Unknown function class, skipping"),
            }
        }
        functions
    }
}
