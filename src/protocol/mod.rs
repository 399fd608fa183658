//! 动作协议
//!
//! 控制循环只依赖 InvocationProtocol：协议负责把模型回复变为动作并执行，返回本轮结束后的状态。
//! 两个协议共用提示拼装与 execute_action（写入历史、长输出摘要）。

pub mod script;
pub mod tag;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::error;

use crate::agent::{build_context_prompt, summarise_long_output, AgentContext, AgentProtocol, AgentRecord};
use crate::config::{AgentSection, ScriptSection};
use crate::core::{AgentError, AgentRunningState, FunctionError};
use crate::functions::{
    value_to_output, FunctionCall, FunctionCallResult, AGENT_GET_MEMORY, AGENT_SAVE_MEMORY,
};
use crate::store::AgentStateService;

pub use script::{ScriptProtocol, SCRIPT_SYSTEM_PROMPT};
pub use tag::{parse_function_calls, TagProtocol, TAG_SYSTEM_PROMPT};

/// 写入历史时替代记忆内容的占位文本
const SEE_MEMORY_ENTRY: &str = "(See <memory> entry)";

/// 单次迭代可用的环境
pub struct IterationEnv<'a> {
    pub ctx: &'a AgentContext,
    pub state_service: &'a AgentStateService,
    pub settings: &'a AgentSection,
    /// 已填入函数定义的系统提示
    pub system_prompt: &'a str,
}

#[async_trait]
pub trait InvocationProtocol: Send + Sync {
    /// 每次迭代的 tracing span
    fn iteration_span(&self, agent_id: &str, iteration: u32) -> tracing::Span;

    /// 填入函数定义的系统提示
    fn system_prompt(&self, record: &AgentRecord) -> Result<String, AgentError>;

    /// 执行一次迭代（模型调用 + 动作执行）
    ///
    /// 返回 completed / feedback / agent；能力调用失败返回 AgentError::Function，
    /// 由控制循环转为 error 状态。
    async fn run_iteration(&self, env: &IterationEnv<'_>) -> Result<AgentRunningState, AgentError>;
}

pub fn protocol_for(protocol: AgentProtocol, script: &ScriptSection) -> Arc<dyn InvocationProtocol> {
    match protocol {
        AgentProtocol::Tag => Arc::new(TagProtocol::new()),
        AgentProtocol::Script => Arc::new(ScriptProtocol::new(script.clone())),
    }
}

/// 本轮发给模型的提示：历史 / 记忆 / 文件系统 + 上一轮留下的 input_prompt
pub fn assemble_prompt(ctx: &AgentContext, settings: &AgentSection) -> String {
    ctx.with(|r| {
        if r.input_prompt.contains("<function_call_history>") {
            r.input_prompt.clone()
        } else {
            format!(
                "{}{}",
                build_context_prompt(r, settings.history_max_chars),
                r.input_prompt
            )
        }
    })
}

pub fn user_request_xml(ctx: &AgentContext) -> String {
    ctx.with(|r| format!("<user_request>{}</user_request>\n", r.user_prompt))
}

/// 执行单个动作并写入历史；超过阈值的输出附带 easy 档模型生成的摘要
pub async fn execute_action(
    ctx: &AgentContext,
    settings: &AgentSection,
    call: &FunctionCall,
) -> Result<Value, FunctionError> {
    let functions = ctx.functions();
    let outcome = functions.call_function(ctx, call).await;

    let mut result = match &outcome {
        Ok(value) => FunctionCallResult::success(call, value_to_output(value)),
        Err(e) => {
            error!(function = %call.function_name, error = %e, "Function error");
            FunctionCallResult::failure(call, e.to_string())
        }
    };

    // 记忆内容已在 <memory> 中，不在历史里重复
    if call.function_name == AGENT_SAVE_MEMORY && result.parameters.contains_key("content") {
        result
            .parameters
            .insert("content".to_string(), Value::String(SEE_MEMORY_ENTRY.to_string()));
    }
    if call.function_name == AGENT_GET_MEMORY && outcome.is_ok() {
        result.stdout = Some(SEE_MEMORY_ENTRY.to_string());
    }

    let long_output = result
        .stdout
        .as_ref()
        .or(result.stderr.as_ref())
        .map(|s| s.chars().count() > settings.summarize_threshold_chars)
        .unwrap_or(false);
    if long_output {
        let summary = summarise_long_output(ctx, &result).await;
        if result.is_error() {
            result.stderr_summary = summary;
        } else {
            result.stdout_summary = summary;
        }
    }

    ctx.push_history(result);
    outcome
}

/// 成功结果回填到下一轮提示
pub fn format_function_result(function_name: &str, value: &Value) -> String {
    format!(
        "<function_results>\n<result>\n<function_name>{}</function_name>\n<stdout>\n{}\n</stdout>\n</result>\n</function_results>\n",
        function_name,
        value_to_output(value)
    )
}

pub fn format_function_error(function_name: &str, err: &FunctionError) -> String {
    format!(
        "<function_results>\n<error>\n<function_name>{function_name}</function_name>\n<stderr>\n{err}\n</stderr>\n</error>\n</function_results>\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::test_context;
    use crate::agent::AgentLlms;
    use crate::functions::{TestFunctions, TEST_FUNC_NOOP, TEST_FUNC_THROW_ERROR, THROW_ERROR_TEXT};
    use crate::llm::MockLlmClient;
    use serde_json::json;

    #[tokio::test]
    async fn test_execute_action_records_history() {
        let ctx = test_context();
        ctx.update(|r| {
            r.functions.add(Arc::new(TestFunctions));
        });
        let settings = AgentSection::default();

        execute_action(&ctx, &settings, &FunctionCall::new(TEST_FUNC_NOOP))
            .await
            .unwrap();
        let err = execute_action(&ctx, &settings, &FunctionCall::new(TEST_FUNC_THROW_ERROR))
            .await
            .unwrap_err();
        assert!(err.to_string().contains(THROW_ERROR_TEXT));

        let history = ctx.with(|r| r.function_call_history.clone());
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].stdout.as_deref(), Some(""));
        assert!(history[1].stderr.as_deref().unwrap().contains(THROW_ERROR_TEXT));
    }

    #[tokio::test]
    async fn test_memory_content_not_repeated_in_history() {
        let ctx = test_context();
        let llm = Arc::new(MockLlmClient::new());
        ctx.update(|r| r.llms = AgentLlms::uniform(llm.clone()));
        let settings = AgentSection {
            summarize_threshold_chars: 10,
            ..AgentSection::default()
        };

        let call = FunctionCall::new(AGENT_SAVE_MEMORY)
            .arg("key", "notes")
            .arg("content", "x".repeat(50));
        execute_action(&ctx, &settings, &call).await.unwrap();
        let call = FunctionCall::new(AGENT_GET_MEMORY).arg("key", "notes");
        let value = execute_action(&ctx, &settings, &call).await.unwrap();
        assert_eq!(value, json!("x".repeat(50)));

        let history = ctx.with(|r| r.function_call_history.clone());
        assert_eq!(history[0].parameters["content"], json!(SEE_MEMORY_ENTRY));
        assert_eq!(history[1].stdout.as_deref(), Some(SEE_MEMORY_ENTRY));
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_long_error_gets_summary() {
        let ctx = test_context();
        let llm = Arc::new(MockLlmClient::new());
        llm.add_response("error summary");
        ctx.update(|r| r.llms = AgentLlms::uniform(llm.clone()));
        let settings = AgentSection {
            summarize_threshold_chars: 5,
            ..AgentSection::default()
        };
        let _ = execute_action(&ctx, &settings, &FunctionCall::new("Missing.fn")).await;
        let last = ctx.with(|r| r.function_call_history[0].clone());
        assert_eq!(last.stderr_summary.as_deref(), Some("error summary"));
    }

    #[test]
    fn test_assemble_prompt_prepends_context_once() {
        let ctx = test_context();
        ctx.update(|r| r.input_prompt = "<user_request>go</user_request>".into());
        let settings = AgentSection::default();
        let prompt = assemble_prompt(&ctx, &settings);
        assert!(prompt.starts_with("<function_call_history>"));
        assert!(prompt.ends_with("<user_request>go</user_request>"));

        ctx.update(|r| r.input_prompt = prompt.clone());
        assert_eq!(assemble_prompt(&ctx, &settings), prompt);
    }

    #[test]
    fn test_format_results() {
        let ok = format_function_result("A.b", &json!(9));
        assert!(ok.contains("<function_name>A.b</function_name>"));
        assert!(ok.contains("<stdout>\n9\n</stdout>"));
        let err = format_function_error("A.b", &FunctionError::fatal("boom"));
        assert!(err.contains("<stderr>\nboom\n</stderr>"));
    }
}
