//! 提示构建：函数调用历史、工作记忆、文件系统、用户请求提取、长输出摘要

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::agent::{AgentContext, AgentRecord, TaskLevel};
use crate::core::AgentError;
use crate::functions::{FunctionCallResult, FILE_SYSTEM_CLASS};
use crate::llm::{generate_tracked, GenerateOptions, LlmInput};

const PARAM_PREVIEW_CHARS: usize = 150;

/// 提取 `<user_request>`：返回 (user_prompt, input_prompt)
pub fn extract_user_request(initial_prompt: &str) -> (String, String) {
    const OPEN: &str = "<user_request>";
    const CLOSE: &str = "</user_request>";
    if let Some(start) = initial_prompt.find(OPEN) {
        let body_start = start + OPEN.len();
        let body_end = initial_prompt[body_start..]
            .find(CLOSE)
            .map(|i| body_start + i)
            .unwrap_or(initial_prompt.len());
        let user_prompt = initial_prompt[body_start..body_end].to_string();
        debug!("Extracted initial prompt:\n{}", user_prompt);
        (user_prompt, initial_prompt.to_string())
    } else {
        (
            initial_prompt.to_string(),
            format!("{OPEN}{initial_prompt}{CLOSE}"),
        )
    }
}

fn render_param(value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Array(_) => serde_json::to_string_pretty(value).unwrap_or_default(),
        other => other.to_string(),
    };
    let text = if text.chars().count() > PARAM_PREVIEW_CHARS {
        format!("{}...", text.chars().take(PARAM_PREVIEW_CHARS).collect::<String>())
    } else {
        text
    };
    text.replacen('"', "\\\"", 1)
}

fn render_call(call: &FunctionCallResult) -> String {
    let mut params = String::new();
    for (name, value) in &call.parameters {
        params.push_str(&format!("\n  \"{}\": \"{}\",\n", name, render_param(value)));
    }
    let mut output = String::new();
    if let Some(summary) = &call.stdout_summary {
        output.push_str(&format!("<output_summary>{summary}</output_summary>\n"));
    } else if let Some(stdout) = &call.stdout {
        output.push_str(&format!("<output>{stdout}</output>\n"));
    }
    if let Some(summary) = &call.stderr_summary {
        output.push_str(&format!("<error_summary>{summary}</error_summary>\n"));
    } else if let Some(stderr) = &call.stderr {
        output.push_str(&format!("<error>{stderr}</error>\n"));
    }
    format!(
        "<function_call>\n {}({{{}}})\n {}</function_call>\n",
        call.function_name, params, output
    )
}

/// 函数调用历史；超过 max_chars 时保留最近的条目
pub fn build_function_call_history_prompt(history: &[FunctionCallResult], max_chars: usize) -> String {
    let mut kept: Vec<String> = Vec::new();
    let mut size = 0;
    for call in history.iter().rev() {
        let rendered = render_call(call);
        if size + rendered.len() > max_chars && !kept.is_empty() {
            break;
        }
        size += rendered.len();
        kept.push(rendered);
    }
    let mut result = String::from("<function_call_history>\n");
    for rendered in kept.iter().rev() {
        result.push_str(rendered);
    }
    result.push_str("</function_call_history>\n");
    result
}

pub fn build_memory_prompt(record: &AgentRecord) -> String {
    let mut result = String::from("<memory>\n");
    for (key, value) in &record.memory {
        result.push_str(&format!("<{key}>\n{value}\n</{key}>\n"));
    }
    result.push_str("</memory>\n");
    result
}

/// 仅在智能体拥有 FileSystem 能力时输出
pub fn build_file_system_prompt(record: &AgentRecord) -> String {
    if !record.functions.contains(FILE_SYSTEM_CLASS) {
        return String::new();
    }
    format!(
        "\n<file_system>\n<base_path>{}</base_path>\n<current_working_directory>{}</current_working_directory>\n</file_system>\n",
        record.file_system.base_path().display(),
        record.file_system.working_directory().display()
    )
}

/// 历史 + 记忆 + 文件系统
pub fn build_context_prompt(record: &AgentRecord, history_max_chars: usize) -> String {
    format!(
        "{}{}{}",
        build_function_call_history_prompt(&record.function_call_history, history_max_chars),
        build_memory_prompt(record),
        build_file_system_prompt(record)
    )
}

/// 去掉上次组装提示时加在 input_prompt 前的上下文块，下一轮按最新历史重新渲染。
/// 需在修改历史之前调用
pub fn strip_context_prompt(record: &AgentRecord, history_max_chars: usize) -> String {
    let input = &record.input_prompt;
    if !input.contains("<function_call_history>") {
        return input.clone();
    }
    let context = build_context_prompt(record, history_max_chars);
    if let Some(rest) = input.strip_prefix(context.as_str()) {
        return rest.to_string();
    }
    match input.find("<user_request>") {
        Some(start) => input[start..].to_string(),
        None => input.clone(),
    }
}

/// 用函数定义替换系统提示中的 `<functions></functions>` 块
pub fn update_function_definitions(system_prompt: &str, definitions: &str) -> Result<String, AgentError> {
    let re = Regex::new(r"(?s)<functions>.*?</functions>")
        .map_err(|e| AgentError::Protocol(e.to_string()))?;
    if !re.is_match(system_prompt) {
        return Err(AgentError::Protocol(
            "Unable to update function definitions. System prompt has no <functions></functions> block".to_string(),
        ));
    }
    let replacement = format!("<functions>{definitions}</functions>");
    Ok(re
        .replace_all(system_prompt, regex::NoExpand(&replacement))
        .into_owned())
}

/// 用 easy 档模型为长输出生成摘要；失败只记录警告
pub async fn summarise_long_output(ctx: &AgentContext, result: &FunctionCallResult) -> Option<String> {
    let (tag, content) = match (&result.stdout, &result.stderr) {
        (_, Some(stderr)) => ("error-output", stderr),
        (Some(stdout), None) => ("output", stdout),
        (None, None) => return None,
    };
    let prompt = format!(
        "<function_name>{}</function_name><{tag}>\n{content}</{tag}>\n\
         For the above function call summarise the output into a paragraph that captures key details about the output content, \
         which might include identifiers, content summary, content structure and examples. Only respond with the summary",
        result.function_name
    );
    let llm = ctx.llm(TaskLevel::Easy);
    match generate_tracked(
        llm.as_ref(),
        ctx,
        &LlmInput::text(prompt),
        &GenerateOptions::with_id("summariseLongFunctionOutput"),
    )
    .await
    {
        Ok(summary) => Some(summary),
        Err(e) => {
            warn!(function = %result.function_name, error = %e, "Failed to summarise function output");
            None
        }
    }
}
