//! 内置 Agent 能力：完成、请求反馈、工作记忆

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::agent::AgentContext;
use crate::core::FunctionError;
use crate::functions::{arg_str, FunctionSchema, Capability};

pub const AGENT_COMPLETED_NAME: &str = "Agent.completed";
pub const AGENT_REQUEST_FEEDBACK: &str = "Agent.requestFeedback";
pub const AGENT_SAVE_MEMORY: &str = "Agent.saveMemory";
pub const AGENT_GET_MEMORY: &str = "Agent.getMemory";
pub const REQUEST_FEEDBACK_PARAM_NAME: &str = "request";
pub const AGENT_COMPLETED_PARAM_NAME: &str = "note";

/// 结束本次执行线程的动作
pub fn is_terminal_function(name: &str) -> bool {
    name == AGENT_COMPLETED_NAME || name == AGENT_REQUEST_FEEDBACK
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AgentFunctions;

#[async_trait]
impl Capability for AgentFunctions {
    fn class_name(&self) -> &str {
        "Agent"
    }

    fn schemas(&self) -> Vec<FunctionSchema> {
        vec![
            FunctionSchema::new(
                "Agent",
                "requestFeedback",
                "Request feedback/interaction from a supervisor when a decision or approval needs to be made, \
                 or additional details are required, before proceeding with the plan.",
            )
            .param(
                REQUEST_FEEDBACK_PARAM_NAME,
                "string",
                "Notes on what additional information/decision is required. Be specific on what you have been doing \
                 up to this point, and provide relevant information to help with the decision/feedback.",
            ),
            FunctionSchema::new(
                "Agent",
                "completed",
                "Notifies that the user request has completed and there is no more work to be done, \
                 or that no more useful progress can be made with the functions.",
            )
            .param(
                AGENT_COMPLETED_PARAM_NAME,
                "string",
                "A detailed description that answers/completes the user request.",
            ),
            FunctionSchema::new(
                "Agent",
                "saveMemory",
                "Stores content to your working memory, and continues on with the plan. \
                 You can assume the memory element now contains this key and content.",
            )
            .param(
                "key",
                "string",
                "A descriptive identifier (alphanumeric and underscores allowed, under 30 characters) for the new memory contents",
            )
            .param("content", "string", "The plain text contents to store in the working memory"),
            FunctionSchema::new("Agent", "deleteMemory", "Deletes a key from your working memory.")
                .param("key", "string", "An existing key in the memory to delete."),
            FunctionSchema::new("Agent", "getMemory", "Retrieves contents from memory")
                .param("key", "string", "An existing key in the memory to retrieve.")
                .returns("The memory contents"),
        ]
    }

    async fn call(&self, ctx: &AgentContext, method: &str, args: &[Value]) -> Result<Value, FunctionError> {
        match method {
            "requestFeedback" => {
                info!(agent_id = %ctx.agent_id(), "Feedback requested: {}", arg_str(args, 0));
                Ok(Value::Null)
            }
            "completed" => {
                info!(agent_id = %ctx.agent_id(), "Agent completed. Note: {}", arg_str(args, 0));
                Ok(Value::Null)
            }
            "saveMemory" => {
                let key = arg_str(args, 0);
                let content = arg_str(args, 1);
                if key.trim().is_empty() {
                    return Err(FunctionError::fatal("Memory key must be provided"));
                }
                if content.trim().is_empty() {
                    return Err(FunctionError::fatal("Memory content must be provided"));
                }
                if ctx.memory_set(&key, &content).is_some() {
                    info!("Overwriting memory key {}", key);
                }
                Ok(Value::Null)
            }
            "deleteMemory" => {
                let key = arg_str(args, 0);
                if ctx.memory_delete(&key).is_none() {
                    info!("deleteMemory key doesn't exist: {}", key);
                }
                Ok(Value::Null)
            }
            "getMemory" => {
                let key = arg_str(args, 0);
                if key.is_empty() {
                    return Err(FunctionError::fatal("Parameter \"key\" must be provided"));
                }
                ctx.memory_get(&key)
                    .map(Value::String)
                    .ok_or_else(|| FunctionError::fatal(format!("Memory key {key} does not exist")))
            }
            other => Err(FunctionError::fatal(format!("Agent.{other} does not exist"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::test_context;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_round_trip() {
        let ctx = test_context();
        let agent = AgentFunctions;
        agent
            .call(&ctx, "saveMemory", &[json!("plan"), json!("step 1")])
            .await
            .unwrap();
        let got = agent.call(&ctx, "getMemory", &[json!("plan")]).await.unwrap();
        assert_eq!(got, json!("step 1"));
        agent.call(&ctx, "deleteMemory", &[json!("plan")]).await.unwrap();
        let err = agent.call(&ctx, "getMemory", &[json!("plan")]).await.unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn test_save_memory_requires_key_and_content() {
        let ctx = test_context();
        let agent = AgentFunctions;
        assert!(agent.call(&ctx, "saveMemory", &[json!(""), json!("x")]).await.is_err());
        assert!(agent.call(&ctx, "saveMemory", &[json!("k"), json!(" ")]).await.is_err());
    }

    #[test]
    fn test_terminal_functions() {
        assert!(is_terminal_function(AGENT_COMPLETED_NAME));
        assert!(is_terminal_function(AGENT_REQUEST_FEEDBACK));
        assert!(!is_terminal_function(AGENT_SAVE_MEMORY));
    }
}
