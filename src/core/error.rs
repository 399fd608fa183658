//! 错误类型
//!
//! AgentError 描述控制循环边界上的错误；FunctionError 是单次能力调用的结果错误，
//! 是否可重试由变体决定（Retryable / Fatal），缓存重试层只对 Retryable 重试。

use thiserror::Error;

use crate::llm::LlmError;

/// 控制循环、恢复操作与持久化过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// 模型回复无法解析为动作（格式错误）
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// 模型回复格式正确但没有任何函数调用
    #[error("Found no function invocations")]
    NoFunctionCalls,

    #[error("Function {name} failed: {message}")]
    Function { name: String, message: String },

    #[error("Script error: {0}")]
    Script(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// 调用方持有的 executionId 已过期（智能体已被其它操作恢复或取消）
    #[error("Invalid executionId for agent {agent_id}. Agent has already been resumed or cancelled")]
    StaleExecution { agent_id: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: expected {expected}, was {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Agent {0} has been force stopped")]
    ForceStopped(String),
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::Serialization(e.to_string())
    }
}

/// 能力调用失败。重试资格在类型层面确定，而不是运行时检查异常类。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FunctionError {
    /// 暂时性失败（限流、服务暂不可用），缓存重试层会按退避策略重试
    #[error("{0}")]
    Retryable(String),
    /// 其它失败，立即向上传播
    #[error("{0}")]
    Fatal(String),
}

impl FunctionError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        FunctionError::Retryable(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        FunctionError::Fatal(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, FunctionError::Retryable(_))
    }
}

impl From<LlmError> for FunctionError {
    fn from(e: LlmError) -> Self {
        if e.is_retryable() {
            FunctionError::Retryable(e.to_string())
        } else {
            FunctionError::Fatal(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_error_retryable_flag() {
        assert!(FunctionError::retryable("429").is_retryable());
        assert!(!FunctionError::fatal("bad args").is_retryable());
    }

    #[test]
    fn test_llm_error_maps_to_function_error() {
        let e: FunctionError = LlmError::RateLimited { retry_after_ms: Some(100) }.into();
        assert!(e.is_retryable());
        let e: FunctionError = LlmError::InvalidResponse("x".into()).into();
        assert!(!e.is_retryable());
    }

    #[test]
    fn test_stale_execution_display() {
        let e = AgentError::StaleExecution { agent_id: "a1".into() };
        assert!(e.to_string().contains("a1"));
        assert!(e.to_string().contains("executionId"));
    }
}
