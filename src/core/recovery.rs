//! 协议错误恢复
//!
//! 根据 AgentError 返回 RecoveryAction：格式错误 / 无函数调用时给出纠正提示（只重试一次），其余终止本轮。

use crate::core::AgentError;
use crate::functions::{AGENT_COMPLETED_NAME, AGENT_REQUEST_FEEDBACK};

/// 恢复引擎给出的动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 在提示末尾追加纠正说明后重新调用模型
    RetryWithPrompt(String),
    /// 终止当前迭代（由控制循环转为 error 状态）
    Abort,
}

#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::Protocol(_) => RecoveryAction::RetryWithPrompt(
                "Note: Your previous response did not contain the response in the required format of \
                 <response><function_calls>...</function_calls></response>. You must reply in the correct response format."
                    .to_string(),
            ),
            AgentError::NoFunctionCalls => RecoveryAction::RetryWithPrompt(format!(
                "Note: Your previous response did not contain a function call. If you are able to answer/complete the \
                 question/task, then call the {AGENT_COMPLETED_NAME} function with the appropriate response.\n\
                 If you are unsure what to do next then call the {AGENT_REQUEST_FEEDBACK} function with a clarifying question."
            )),
            _ => RecoveryAction::Abort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;

    #[test]
    fn test_recovery_protocol_error() {
        let engine = RecoveryEngine::new();
        match engine.handle(&AgentError::Protocol("missing block".into())) {
            RecoveryAction::RetryWithPrompt(msg) => assert!(msg.contains("<function_calls>")),
            other => panic!("Expected RetryWithPrompt, got {other:?}"),
        }
    }

    #[test]
    fn test_recovery_no_function_calls() {
        let engine = RecoveryEngine::new();
        match engine.handle(&AgentError::NoFunctionCalls) {
            RecoveryAction::RetryWithPrompt(msg) => {
                assert!(msg.contains(AGENT_COMPLETED_NAME));
                assert!(msg.contains(AGENT_REQUEST_FEEDBACK));
            }
            other => panic!("Expected RetryWithPrompt, got {other:?}"),
        }
    }

    #[test]
    fn test_recovery_llm_error_aborts() {
        let engine = RecoveryEngine::new();
        let err = AgentError::Llm(LlmError::Unavailable("503".into()));
        assert_eq!(engine.handle(&err), RecoveryAction::Abort);
    }
}
