//! LLM 客户端抽象
//!
//! 所有后端实现 LlmClient::generate：输入为「系统提示 + 用户提示」或结构化消息列表，
//! 调用方显式传入 AgentContext，实现方据此累计成本。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::AgentContext;

/// LLM 调用错误；RateLimited / Unavailable 为暂时性错误，可重试
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Rate limited (retry after {retry_after_ms:?} ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Other(String),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::RateLimited { .. } | LlmError::Unavailable(_))
    }
}

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息；cache 为提示缓存提示（后端不支持时忽略）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cache: bool,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            cache: false,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            cache: false,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            cache: false,
        }
    }

    pub fn cached(mut self) -> Self {
        self.cache = true;
        self
    }
}

/// generate 的输入
#[derive(Clone, Debug, PartialEq)]
pub enum LlmInput {
    Text { system: Option<String>, prompt: String },
    Messages(Vec<Message>),
}

impl LlmInput {
    pub fn text(prompt: impl Into<String>) -> Self {
        LlmInput::Text {
            system: None,
            prompt: prompt.into(),
        }
    }

    pub fn with_system(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        LlmInput::Text {
            system: Some(system.into()),
            prompt: prompt.into(),
        }
    }

    /// 展开为消息列表（Text 形式的 system 放在首位）
    pub fn to_messages(&self) -> Vec<Message> {
        match self {
            LlmInput::Text { system, prompt } => {
                let mut messages = Vec::with_capacity(2);
                if let Some(s) = system {
                    messages.push(Message::system(s.clone()));
                }
                messages.push(Message::user(prompt.clone()));
                messages
            }
            LlmInput::Messages(m) => m.clone(),
        }
    }

    /// 最后一条用户消息（Mock 与日志用）
    pub fn last_user_content(&self) -> &str {
        match self {
            LlmInput::Text { prompt, .. } => prompt,
            LlmInput::Messages(m) => m
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.as_str())
                .unwrap_or(""),
        }
    }
}

/// 生成选项：id 用于调用栈与日志，stop_sequences 由后端截断
#[derive(Clone, Debug, Default)]
pub struct GenerateOptions {
    pub id: Option<String>,
    pub stop_sequences: Vec<String>,
    pub temperature: Option<f32>,
}

impl GenerateOptions {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn stop_at(mut self, stop: impl Into<String>) -> Self {
        self.stop_sequences.push(stop.into());
        self
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 稳定标识（`service:model`），序列化时按此重新解析
    fn id(&self) -> String;

    /// 生成文本；实现方应通过 ctx.add_cost 计入本次调用成本
    async fn generate(
        &self,
        ctx: &AgentContext,
        input: &LlmInput,
        opts: &GenerateOptions,
    ) -> Result<String, LlmError>;
}

/// 压入调用栈帧后调用模型，帧在返回时弹出
pub async fn generate_tracked(
    llm: &dyn LlmClient,
    ctx: &AgentContext,
    input: &LlmInput,
    opts: &GenerateOptions,
) -> Result<String, LlmError> {
    let _frame = ctx.enter_call(opts.id.as_deref().unwrap_or("generate"));
    llm.generate(ctx, input, opts).await
}
