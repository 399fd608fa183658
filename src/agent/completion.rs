//! 完成通知
//!
//! 执行线程结束（completed / feedback / hil / error）时调用记录上的 CompletedHandler，每次终止只调用一次。
//! 处理器以 id 持久化，反序列化时从 CompletedHandlerRegistry 查回。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::agent::AgentRecord;
use crate::core::{AgentError, AgentRunningState};

#[async_trait]
pub trait CompletedHandler: Send + Sync {
    /// 持久化用的 id
    fn id(&self) -> &str;

    async fn notify_completed(&self, agent: &AgentRecord) -> Result<(), AgentError>;
}

/// 最后一次函数调用的第一个参数（完成说明 / 反馈问题）
pub fn last_function_call_arg(agent: &AgentRecord) -> String {
    agent
        .last_function_call()
        .and_then(|call| call.parameters.values().next())
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_default()
}

pub fn state_notification_message(agent: &AgentRecord) -> String {
    match agent.state {
        AgentRunningState::Error => format!(
            "Agent error.\nName: {}\nError: {}",
            agent.name,
            agent.error.as_deref().unwrap_or("")
        ),
        AgentRunningState::Hil => format!("Agent has reached Human-in-the-loop threshold.\nName: {}", agent.name),
        AgentRunningState::Feedback => format!(
            "Agent has requested feedback.\nName: {}\nQuestion: {}",
            agent.name,
            last_function_call_arg(agent)
        ),
        AgentRunningState::Completed => format!(
            "Agent has completed.\nName: {}\nNote: {}",
            agent.name,
            last_function_call_arg(agent)
        ),
        state => format!("Agent {} is in state {}", agent.name, state),
    }
}

pub fn completed_notification_message(agent: &AgentRecord) -> String {
    format!("{}\nAgent id: {}", state_notification_message(agent), agent.agent_id)
}

/// 输出到日志
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleCompletedHandler;

pub const CONSOLE_COMPLETED_HANDLER_ID: &str = "console";

#[async_trait]
impl CompletedHandler for ConsoleCompletedHandler {
    fn id(&self) -> &str {
        CONSOLE_COMPLETED_HANDLER_ID
    }

    async fn notify_completed(&self, agent: &AgentRecord) -> Result<(), AgentError> {
        info!(agent_id = %agent.agent_id, "{}", completed_notification_message(agent));
        Ok(())
    }
}

#[derive(Clone)]
pub struct CompletedHandlerRegistry {
    handlers: HashMap<String, Arc<dyn CompletedHandler>>,
}

impl Default for CompletedHandlerRegistry {
    fn default() -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
        };
        registry.register(Arc::new(ConsoleCompletedHandler));
        registry
    }
}

impl CompletedHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn CompletedHandler>) {
        self.handlers.insert(handler.id().to_string(), handler);
    }

    /// 未知 id 时回退到控制台处理器
    pub fn get(&self, id: Option<&str>) -> Arc<dyn CompletedHandler> {
        id.and_then(|id| self.handlers.get(id).cloned())
            .unwrap_or_else(|| Arc::new(ConsoleCompletedHandler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::test_record;
    use crate::functions::{FunctionCall, FunctionCallResult, AGENT_COMPLETED_NAME};

    #[test]
    fn test_completed_message_uses_note() {
        let mut record = test_record();
        record.state = AgentRunningState::Completed;
        record.function_call_history.push(FunctionCallResult::success(
            &FunctionCall::new(AGENT_COMPLETED_NAME).arg("note", "all done"),
            "",
        ));
        let message = completed_notification_message(&record);
        assert!(message.contains("Agent has completed."));
        assert!(message.contains("Note: all done"));
        assert!(message.contains(&record.agent_id));
    }

    #[test]
    fn test_error_message() {
        let mut record = test_record();
        record.state = AgentRunningState::Error;
        record.error = Some("boom".into());
        assert!(state_notification_message(&record).contains("Error: boom"));
    }

    #[test]
    fn test_registry_falls_back_to_console() {
        let registry = CompletedHandlerRegistry::new();
        assert_eq!(registry.get(Some("slack")).id(), CONSOLE_COMPLETED_HANDLER_ID);
        assert_eq!(registry.get(None).id(), CONSOLE_COMPLETED_HANDLER_ID);
    }
}
