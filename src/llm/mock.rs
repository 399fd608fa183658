//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按顺序返回预置回复；队列耗尽后返回固定回复（若设置），否则报错。
//! 每次调用记录输入并按 cost_per_call 计入智能体成本。

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::agent::AgentContext;
use crate::llm::{GenerateOptions, LlmClient, LlmError, LlmInput};

#[derive(Debug, Default)]
struct MockState {
    responses: VecDeque<Result<String, LlmError>>,
    fallback: Option<String>,
    calls: Vec<LlmInput>,
}

/// 预置回复的 Mock 客户端
#[derive(Debug)]
pub struct MockLlmClient {
    model: String,
    cost_per_call: f64,
    state: Mutex<MockState>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::with_model("mock")
    }

    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            cost_per_call: 0.0,
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn with_cost_per_call(mut self, cost: f64) -> Self {
        self.cost_per_call = cost;
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// 追加一条回复
    pub fn add_response(&self, response: impl Into<String>) -> &Self {
        self.state().responses.push_back(Ok(response.into()));
        self
    }

    /// 追加一次失败
    pub fn add_error(&self, err: LlmError) -> &Self {
        self.state().responses.push_back(Err(err));
        self
    }

    /// 队列耗尽后始终返回的回复
    pub fn set_fallback(&self, response: impl Into<String>) -> &Self {
        self.state().fallback = Some(response.into());
        self
    }

    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    /// 每次调用的最后一条用户消息
    pub fn prompts(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .map(|c| c.last_user_content().to_string())
            .collect()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn id(&self) -> String {
        format!("mock:{}", self.model)
    }

    async fn generate(
        &self,
        ctx: &AgentContext,
        input: &LlmInput,
        opts: &GenerateOptions,
    ) -> Result<String, LlmError> {
        let next = {
            let mut state = self.state();
            state.calls.push(input.clone());
            state
                .responses
                .pop_front()
                .or_else(|| state.fallback.clone().map(Ok))
        };
        ctx.add_cost(self.cost_per_call);
        tracing::debug!(llm = %self.id(), id = ?opts.id, "mock generate");
        match next {
            Some(Ok(mut text)) => {
                for stop in &opts.stop_sequences {
                    if let Some(idx) = text.find(stop.as_str()) {
                        text.truncate(idx);
                    }
                }
                Ok(text)
            }
            Some(Err(e)) => Err(e),
            None => Err(LlmError::InvalidResponse(
                "MockLlmClient has no response queued".to_string(),
            )),
        }
    }
}
