//! 标签协议：模型回复中的 `<function_calls>` 块解析为函数调用，按顺序执行

use async_trait::async_trait;
use regex::Regex;
use tracing::{error, info, warn};

use crate::agent::{update_function_definitions, AgentRecord, TaskLevel};
use crate::core::{AgentError, AgentRunningState, RecoveryAction, RecoveryEngine};
use crate::functions::{FunctionArgs, FunctionCall, FunctionSchema, AGENT_COMPLETED_NAME, AGENT_REQUEST_FEEDBACK};
use crate::llm::{generate_tracked, GenerateOptions, LlmInput};
use crate::protocol::{
    assemble_prompt, execute_action, format_function_error, format_function_result, user_request_xml,
    InvocationProtocol, IterationEnv,
};

pub const TAG_SYSTEM_PROMPT: &str = r#"You are an autonomous AI agent working to complete the task in the <user_request> tags.
You have access to the functions described in the <functions> tags. The results of previous function calls are in the <function_call_history> tags, and your working memory is in the <memory> tags.

<functions></functions>

On each turn first reason about the current state and write a short plan in <plan></plan> tags, then call one or more functions.
Function calls must be in the following format:
<response>
<plan>Your plan</plan>
<function_calls>
<function_call>
<function_name>Class.method</function_name>
<parameters>
<parameterName>value</parameterName>
</parameters>
</function_call>
</function_calls>
</response>

When the task is complete call Agent.completed with a note answering the request.
If you need a decision or more information from the supervisor call Agent.requestFeedback.
"#;

const FUNCTION_CALLS_OPEN: &str = "<function_calls>";

/// 函数定义（填入系统提示的 `<functions>` 块）
pub fn function_definitions_xml(schemas: &[FunctionSchema]) -> String {
    let mut xml = String::new();
    for schema in schemas {
        xml.push_str(&format!(
            "\n<function_description>\n<function_name>{}</function_name>\n<description>{}</description>\n<parameters>\n",
            schema.name(),
            schema.description
        ));
        for p in &schema.parameters {
            xml.push_str(&format!(
                "<parameter>\n<index>{}</index>\n<name>{}</name>\n<type>{}</type>\n<description>{}</description>\n",
                p.index, p.name, p.param_type, p.description
            ));
            if p.optional {
                xml.push_str("<optional>true</optional>\n");
            }
            xml.push_str("</parameter>\n");
        }
        xml.push_str("</parameters>\n");
        if let Some(returns) = &schema.returns {
            xml.push_str(&format!("<returns>{returns}</returns>\n"));
        }
        xml.push_str("</function_description>\n");
    }
    xml
}

/// `<tag>` 与其后第一个 `</tag>` 之间的内容
fn tag_content<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(&xml[start..end])
}

fn unescape_xml(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(cdata) = trimmed
        .strip_prefix("<![CDATA[")
        .and_then(|s| s.strip_suffix("]]>"))
    {
        return cdata.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// `<parameters>` 子元素：`<name>value</name>`，或 `<parameter><name/><value/></parameter>`
fn parse_parameters(xml: &str) -> Result<FunctionArgs, AgentError> {
    let mut params = FunctionArgs::new();
    let mut rest = xml;
    while let Some(lt) = rest.find('<') {
        let after = &rest[lt + 1..];
        let gt = after
            .find('>')
            .ok_or_else(|| AgentError::Protocol("Unterminated parameter tag".to_string()))?;
        let tag = after[..gt].trim();
        if tag.starts_with('/') || tag.starts_with('!') || tag.starts_with('?') {
            rest = &after[gt + 1..];
            continue;
        }
        if let Some(empty) = tag.strip_suffix('/') {
            params.insert(empty.trim().to_string(), serde_json::Value::String(String::new()));
            rest = &after[gt + 1..];
            continue;
        }
        let name = tag.split_whitespace().next().unwrap_or(tag).to_string();
        let body_start = &after[gt + 1..];
        let close = format!("</{name}>");
        let end = body_start
            .find(&close)
            .ok_or_else(|| AgentError::Protocol(format!("Missing closing tag {close}")))?;
        let body = &body_start[..end];

        if name == "parameter" {
            let param_name = tag_content(body, "name")
                .ok_or_else(|| AgentError::Protocol("<parameter> is missing <name>".to_string()))?;
            let value = tag_content(body, "value").unwrap_or("");
            params.insert(
                param_name.trim().to_string(),
                serde_json::Value::String(unescape_xml(value.trim())),
            );
        } else {
            params.insert(name, serde_json::Value::String(unescape_xml(body)));
        }
        rest = &body_start[end + close.len()..];
    }
    Ok(params)
}

/// 解析最后一个 `<function_calls>` 块
///
/// 没有该块返回 Protocol 错误；块中没有调用返回 NoFunctionCalls。
pub fn parse_function_calls(response: &str) -> Result<Vec<FunctionCall>, AgentError> {
    let index = response.rfind(FUNCTION_CALLS_OPEN).ok_or_else(|| {
        AgentError::Protocol("Could not find <function_calls> in the response".to_string())
    })?;
    let block = &response[index..];
    let call_re = Regex::new(r"(?s)<function_call>(.*?)</function_call>")
        .map_err(|e| AgentError::Protocol(e.to_string()))?;

    let mut calls = Vec::new();
    for cap in call_re.captures_iter(block) {
        let body = cap.get(1).map(|m| m.as_str()).unwrap_or("");
        let function_name = tag_content(body, "function_name")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AgentError::Protocol("<function_call> is missing <function_name>".to_string()))?;
        let parameters = match tag_content(body, "parameters") {
            Some(xml) => parse_parameters(xml)?,
            None => FunctionArgs::new(),
        };
        calls.push(FunctionCall {
            function_name,
            parameters,
        });
    }
    if calls.is_empty() {
        return Err(AgentError::NoFunctionCalls);
    }
    Ok(calls)
}

/// 回复中动作块之前的文本（模型的推理与计划）
fn text_before_calls(response: &str) -> &str {
    match response.rfind(FUNCTION_CALLS_OPEN) {
        Some(i) => response[..i].trim_end(),
        None => response,
    }
}

#[derive(Debug, Default)]
pub struct TagProtocol {
    recovery: RecoveryEngine,
}

impl TagProtocol {
    pub fn new() -> Self {
        Self {
            recovery: RecoveryEngine::new(),
        }
    }

    /// 调用模型并解析动作；格式错误或没有动作时带纠正说明重试一次
    async fn generate_function_calls(
        &self,
        env: &IterationEnv<'_>,
        prompt: &str,
    ) -> Result<(String, Vec<FunctionCall>), AgentError> {
        let llm = env.ctx.llm(TaskLevel::Hard);
        let input = LlmInput::with_system(env.system_prompt, prompt);
        let reply = generate_tracked(
            llm.as_ref(),
            env.ctx,
            &input,
            &GenerateOptions::with_id("generateFunctionCalls"),
        )
        .await?;

        let err = match parse_function_calls(&reply) {
            Ok(calls) => return Ok((reply, calls)),
            Err(e) => e,
        };
        match self.recovery.handle(&err) {
            RecoveryAction::RetryWithPrompt(note) => {
                warn!(agent_id = %env.ctx.agent_id(), error = %err, "Retrying function call generation");
                let retry_input = LlmInput::with_system(env.system_prompt, format!("{prompt}\n{note}"));
                let reply = generate_tracked(
                    llm.as_ref(),
                    env.ctx,
                    &retry_input,
                    &GenerateOptions::with_id("generateFunctionCalls-retry"),
                )
                .await?;
                let calls = parse_function_calls(&reply)?;
                Ok((reply, calls))
            }
            RecoveryAction::Abort => Err(err),
        }
    }
}

#[async_trait]
impl InvocationProtocol for TagProtocol {
    fn iteration_span(&self, agent_id: &str, iteration: u32) -> tracing::Span {
        tracing::info_span!("TagAgent", agent_id, iteration)
    }

    fn system_prompt(&self, record: &AgentRecord) -> Result<String, AgentError> {
        let base = record.system_prompt.as_deref().unwrap_or(TAG_SYSTEM_PROMPT);
        update_function_definitions(base, &function_definitions_xml(&record.functions.schemas()))
    }

    async fn run_iteration(&self, env: &IterationEnv<'_>) -> Result<AgentRunningState, AgentError> {
        let ctx = env.ctx;
        let user_request = user_request_xml(ctx);
        let prompt = assemble_prompt(ctx, env.settings);

        let (reply, calls) = match self.generate_function_calls(env, &prompt).await {
            Ok(generated) => generated,
            Err(e) => {
                ctx.update(|r| r.input_prompt = prompt);
                return Err(e);
            }
        };
        let text = text_before_calls(&reply).to_string();

        ctx.update(|r| {
            r.state = AgentRunningState::Functions;
            r.input_prompt = format!("{user_request}{text}");
            r.invoking = calls.clone();
        });
        env.state_service.save_context(ctx).await?;

        let mut results = Vec::with_capacity(calls.len());
        let mut next_state = AgentRunningState::Agent;
        let mut failure = None;
        for call in &calls {
            match execute_action(ctx, env.settings, call).await {
                Ok(value) => {
                    results.push(format_function_result(&call.function_name, &value));
                    if call.function_name == AGENT_COMPLETED_NAME {
                        info!(agent_id = %ctx.agent_id(), "Task completed");
                        next_state = AgentRunningState::Completed;
                        break;
                    }
                    if call.function_name == AGENT_REQUEST_FEEDBACK {
                        info!(agent_id = %ctx.agent_id(), "Feedback requested");
                        next_state = AgentRunningState::Feedback;
                        break;
                    }
                }
                Err(e) => {
                    error!(agent_id = %ctx.agent_id(), function = %call.function_name, error = %e, "Function call failed");
                    results.push(format_function_error(&call.function_name, &e));
                    failure = Some(AgentError::Function {
                        name: call.function_name.clone(),
                        message: e.to_string(),
                    });
                    break;
                }
            }
        }

        ctx.update(|r| {
            r.invoking.clear();
            r.input_prompt = format!("{user_request}\n{text}\n{}", results.join("\n"));
        });
        match failure {
            Some(e) => Err(e),
            None => Ok(next_state),
        }
    }
}
