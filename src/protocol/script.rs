//! 脚本协议：模型生成 rhai 脚本，在隔离的解释器中执行
//!
//! 每个能力方法以 `Class_method` 符号暴露给脚本，调用经 host_call 回到宿主执行并写入历史。
//! 脚本最后一个表达式的值作为本轮观察结果。语法错误由模型修正一次；能力调用失败不重试。
//! 解释器运行在 spawn_blocking 线程上，能力调用通过 Handle::block_on 回到 tokio 运行时。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use regex::Regex;
use rhai::{Array, Dynamic, Engine, EvalAltResult, ImmutableString, Position};
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::agent::{update_function_definitions, AgentContext, AgentRecord, TaskLevel};
use crate::config::{AgentSection, ScriptSection};
use crate::core::{AgentError, AgentRunningState};
use crate::functions::{is_terminal_function, FunctionCall, FunctionSchema, AGENT_COMPLETED_NAME};
use crate::llm::{generate_tracked, GenerateOptions, LlmInput};
use crate::protocol::{
    assemble_prompt, execute_action, format_function_error, format_function_result, user_request_xml,
    InvocationProtocol, IterationEnv,
};

pub const SCRIPT_SYSTEM_PROMPT: &str = r#"You are an autonomous AI agent working to complete the task in the <user_request> tags.
The results of previous function calls are in the <function_call_history> tags, and your working memory is in the <memory> tags.

You act by writing a script in the Rhai scripting language. The functions below are available to call directly from the script:
<functions></functions>

Respond in the following format:
<response>
<plan>Your reasoning and plan for this step</plan>
<script>
let total = TestFunctions_sum(3, 6);
total
</script>
</response>

The value of the last expression in the script is returned to you as the script result.
Call Agent_completed(note) when the task is complete, or Agent_requestFeedback(request) when you need a decision or more information from the supervisor. These end the script immediately.
"#;

const SCRIPT_STOP_SEQUENCE: &str = "</response>";
const HOST_CALL: &str = "host_call";

/// 函数声明（填入系统提示的 `<functions>` 块）
pub fn script_function_declarations(schemas: &[FunctionSchema]) -> String {
    let mut out = String::new();
    for schema in schemas {
        out.push_str(&format!("\n/// {}\n", schema.description));
        for p in &schema.parameters {
            let optional = if p.optional { ", optional" } else { "" };
            out.push_str(&format!("/// * `{}` ({}{}) - {}\n", p.name, p.param_type, optional, p.description));
        }
        if let Some(returns) = &schema.returns {
            out.push_str(&format!("/// Returns: {returns}\n"));
        }
        let params: Vec<&str> = schema.parameters.iter().map(|p| p.name.as_str()).collect();
        out.push_str(&format!("fn {}({})\n", schema.script_symbol(), params.join(", ")));
    }
    out
}

/// 每个方法的脚本包装函数；可选参数按个数生成重载
fn build_prelude(schemas: &[FunctionSchema]) -> String {
    let mut prelude = String::new();
    for schema in schemas {
        let symbol = schema.script_symbol();
        let total = schema.parameters.len();
        let required = schema.parameters.iter().filter(|p| !p.optional).count();
        for arity in required..=total {
            let params: Vec<String> = (0..arity).map(|i| format!("p{i}")).collect();
            let params = params.join(", ");
            prelude.push_str(&format!(
                "fn {symbol}({params}) {{ {HOST_CALL}(\"{symbol}\", [{params}]) }}\n"
            ));
        }
    }
    prelude
}

/// 最后一个 `<script>` 块中的代码
pub fn extract_script(response: &str) -> Result<String, AgentError> {
    let index = response
        .rfind("<script>")
        .ok_or_else(|| AgentError::Protocol("Could not find <script> in the response".to_string()))?;
    let re = Regex::new(r"(?s)<script>(.*)</script>").map_err(|e| AgentError::Protocol(e.to_string()))?;
    let code = match re.captures(&response[index..]).and_then(|c| c.get(1)) {
        Some(m) => m.as_str(),
        // 停止序列可能截掉了结尾标签
        None => &response[index + "<script>".len()..],
    };
    let code = strip_code_fences(code);
    if code.is_empty() {
        return Err(AgentError::Protocol("The <script> block is empty".to_string()));
    }
    Ok(code)
}

fn strip_code_fences(code: &str) -> String {
    let trimmed = code.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // 去掉语言标记所在行
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or("");
    body.trim_end().trim_end_matches('`').trim().to_string()
}

fn text_before_script(response: &str) -> &str {
    match response.rfind("<script>") {
        Some(i) => response[..i].trim_end(),
        None => response,
    }
}

fn check_syntax(code: &str) -> Result<(), String> {
    Engine::new().compile(code).map(|_| ()).map_err(|e| e.to_string())
}

/// 脚本执行期间由 host_call 记录的状态
#[derive(Debug, Default)]
struct Bridge {
    results: Vec<String>,
    terminal: Option<String>,
    failure: Option<(String, String)>,
}

#[derive(Debug)]
struct ScriptRun {
    value: Result<Value, String>,
    bridge: Bridge,
}

fn lock_bridge(bridge: &Mutex<Bridge>) -> MutexGuard<'_, Bridge> {
    bridge.lock().unwrap_or_else(|p| p.into_inner())
}

fn terminated() -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorTerminated(Dynamic::UNIT, Position::NONE))
}

/// 在阻塞线程上执行脚本
fn run_script(
    handle: Handle,
    ctx: AgentContext,
    settings: AgentSection,
    limits: ScriptSection,
    schemas: Vec<FunctionSchema>,
    code: String,
) -> ScriptRun {
    let bridge = Arc::new(Mutex::new(Bridge::default()));
    let by_symbol: HashMap<String, FunctionSchema> =
        schemas.iter().map(|s| (s.script_symbol(), s.clone())).collect();

    let mut engine = Engine::new();
    engine.set_max_operations(limits.max_operations);
    engine.set_max_call_levels(limits.max_call_depth);
    engine.on_print(|s| info!("Script stdout: {}", s));
    engine.on_debug(|s, _, pos| debug!("Script debug {:?}: {}", pos, s));

    let host_bridge = bridge.clone();
    engine.register_fn(
        HOST_CALL,
        move |symbol: ImmutableString, args: Array| -> Result<Dynamic, Box<EvalAltResult>> {
            if lock_bridge(&host_bridge).terminal.is_some() {
                return Err(terminated());
            }
            let schema = by_symbol
                .get(symbol.as_str())
                .ok_or_else(|| format!("Function {symbol} does not exist"))?;

            let mut call = FunctionCall::new(schema.name());
            for (i, arg) in args.iter().enumerate() {
                let param = schema
                    .parameters
                    .get(i)
                    .ok_or_else(|| format!("Too many arguments for {}", schema.name()))?;
                let value: Value = rhai::serde::from_dynamic(arg)?;
                call.parameters.insert(param.name.clone(), value);
            }

            match handle.block_on(execute_action(&ctx, &settings, &call)) {
                Ok(value) => {
                    let mut bridge = lock_bridge(&host_bridge);
                    bridge.results.push(format_function_result(&call.function_name, &value));
                    if is_terminal_function(&call.function_name) {
                        bridge.terminal = Some(call.function_name.clone());
                        return Err(terminated());
                    }
                    rhai::serde::to_dynamic(value)
                }
                Err(e) => {
                    let mut bridge = lock_bridge(&host_bridge);
                    bridge.results.push(format_function_error(&call.function_name, &e));
                    bridge.failure = Some((call.function_name.clone(), e.to_string()));
                    Err(format!("{} failed: {}", call.function_name, e).into())
                }
            }
        },
    );

    let value = engine
        .compile(build_prelude(&schemas))
        .and_then(|prelude| engine.compile(&code).map(|script| prelude.merge(&script)))
        .map_err(|e| e.to_string())
        .and_then(|ast| {
            engine
                .eval_ast::<Dynamic>(&ast)
                .and_then(|d| rhai::serde::from_dynamic::<Value>(&d))
                .map_err(|e| e.to_string())
        });

    drop(engine);
    let bridge = std::mem::take(&mut *lock_bridge(&bridge));
    ScriptRun { value, bridge }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptProtocol {
    limits: ScriptSection,
}

impl ScriptProtocol {
    pub fn new(limits: ScriptSection) -> Self {
        Self { limits }
    }

    /// 生成计划与脚本；提取不到脚本时重试一次
    async fn generate_script(&self, env: &IterationEnv<'_>, prompt: &str) -> Result<(String, String), AgentError> {
        let llm = env.ctx.llm(TaskLevel::Hard);
        let mut opts = GenerateOptions::with_id("scriptAgentPlan").stop_at(SCRIPT_STOP_SEQUENCE);
        opts.temperature = Some(0.5);

        let reply = generate_tracked(llm.as_ref(), env.ctx, &LlmInput::with_system(env.system_prompt, prompt), &opts)
            .await?;
        match extract_script(&reply) {
            Ok(code) => Ok((reply, code)),
            Err(e) => {
                warn!(agent_id = %env.ctx.agent_id(), error = %e, "Retrying script generation");
                let retry_prompt = format!(
                    "{prompt}\nNote: Your previous response did not contain the script in the required format of \
                     <script>...</script>. You must reply in the correct response format."
                );
                let reply = generate_tracked(
                    llm.as_ref(),
                    env.ctx,
                    &LlmInput::with_system(env.system_prompt, retry_prompt),
                    &opts,
                )
                .await?;
                let code = extract_script(&reply)?;
                Ok((reply, code))
            }
        }
    }

    /// 语法错误时让模型修正一次
    async fn fix_script(
        &self,
        env: &IterationEnv<'_>,
        declarations: &str,
        code: String,
    ) -> Result<String, AgentError> {
        let Err(parse_error) = check_syntax(&code) else {
            return Ok(code);
        };
        warn!(agent_id = %env.ctx.agent_id(), error = %parse_error, "Script has a syntax error, requesting a fix");
        let prompt = format!(
            "<functions>{declarations}</functions>\n<script>\n{code}\n</script>\n<error>{parse_error}</error>\n\
             Please adjust/reformat the script to fix the issue. Output only the updated code. \
             Do not chat, do not output markdown ticks. Only the updated code."
        );
        let llm = env.ctx.llm(TaskLevel::Hard);
        let fixed = generate_tracked(
            llm.as_ref(),
            env.ctx,
            &LlmInput::text(prompt),
            &GenerateOptions::with_id("fixScriptError"),
        )
        .await?;
        let fixed = strip_code_fences(&fixed);
        check_syntax(&fixed).map_err(AgentError::Script)?;
        Ok(fixed)
    }
}

#[async_trait]
impl InvocationProtocol for ScriptProtocol {
    fn iteration_span(&self, agent_id: &str, iteration: u32) -> tracing::Span {
        tracing::info_span!("ScriptAgent", agent_id, iteration)
    }

    fn system_prompt(&self, record: &AgentRecord) -> Result<String, AgentError> {
        let base = record.system_prompt.as_deref().unwrap_or(SCRIPT_SYSTEM_PROMPT);
        update_function_definitions(base, &script_function_declarations(&record.functions.schemas()))
    }

    async fn run_iteration(&self, env: &IterationEnv<'_>) -> Result<AgentRunningState, AgentError> {
        let ctx = env.ctx;
        let user_request = user_request_xml(ctx);
        let prompt = assemble_prompt(ctx, env.settings);

        let (reply, code) = match self.generate_script(env, &prompt).await {
            Ok(generated) => generated,
            Err(e) => {
                ctx.update(|r| r.input_prompt = prompt);
                return Err(e);
            }
        };
        let plan = text_before_script(&reply).to_string();

        ctx.update(|r| {
            r.state = AgentRunningState::Functions;
            r.input_prompt = format!("{user_request}{plan}");
        });
        env.state_service.save_context(ctx).await?;

        let schemas = ctx.functions().schemas();
        let code = self
            .fix_script(env, &script_function_declarations(&schemas), code)
            .await?;
        info!(agent_id = %ctx.agent_id(), "Script:\n{}", code);

        let run = tokio::task::spawn_blocking({
            let handle = Handle::current();
            let ctx = ctx.clone();
            let settings = env.settings.clone();
            let limits = self.limits.clone();
            move || run_script(handle, ctx, settings, limits, schemas, code)
        })
        .await
        .map_err(|e| AgentError::Script(format!("Script execution task failed: {e}")))?;

        let script_result = match &run.value {
            Ok(value) => value.to_string(),
            Err(e) => format!("Error: {e}"),
        };
        info!(agent_id = %ctx.agent_id(), result = %script_result, "Script result");
        ctx.update(|r| {
            r.input_prompt = format!(
                "{user_request}\n{plan}\n{}\n<script-result>{script_result}</script-result>\n\
                 Review the results of the script and make any observations about the output/errors, then proceed with the response.",
                run.bridge.results.join("\n")
            );
        });

        if let Some(name) = &run.bridge.terminal {
            if name == AGENT_COMPLETED_NAME {
                info!(agent_id = %ctx.agent_id(), "Task completed");
                return Ok(AgentRunningState::Completed);
            }
            info!(agent_id = %ctx.agent_id(), "Feedback requested");
            return Ok(AgentRunningState::Feedback);
        }
        if let Some((name, message)) = run.bridge.failure {
            return Err(AgentError::Function { name, message });
        }
        // 脚本自身的运行错误已写入 <script-result>，交给模型下一轮修正
        if let Err(e) = &run.value {
            warn!(agent_id = %ctx.agent_id(), error = %e, "Script failed without a capability error");
        }
        Ok(AgentRunningState::Agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::test_context;
    use crate::functions::{AgentFunctions, Capability, FileSystem, TestFunctions, THROW_ERROR_TEXT};
    use serde_json::json;

    fn exec(ctx: &AgentContext, code: &str) -> ScriptRun {
        let schemas = ctx.functions().schemas();
        run_script(
            Handle::current(),
            ctx.clone(),
            AgentSection::default(),
            ScriptSection::default(),
            schemas,
            code.to_string(),
        )
    }

    fn script_context() -> AgentContext {
        let ctx = test_context();
        ctx.update(|r| {
            r.functions.add(Arc::new(TestFunctions));
        });
        ctx
    }

    #[test]
    fn test_extract_script() {
        let response = "<plan>add</plan>\n<script>\nlet x = 1;\nx\n</script>";
        assert_eq!(extract_script(response).unwrap(), "let x = 1;\nx");
        assert_eq!(text_before_script(response), "<plan>add</plan>");

        let fenced = "<script>\n```rhai\nTestFunctions_noop()\n```\n</script>";
        assert_eq!(extract_script(fenced).unwrap(), "TestFunctions_noop()");

        let truncated = "<plan>p</plan><script>TestFunctions_noop()";
        assert_eq!(extract_script(truncated).unwrap(), "TestFunctions_noop()");

        assert!(extract_script("no code").is_err());
        assert!(extract_script("<script>  </script>").is_err());
    }

    #[test]
    fn test_prelude_overloads_optional_params() {
        let fs = FileSystem::new(std::env::temp_dir());
        let prelude = build_prelude(&fs.schemas());
        assert!(prelude.contains("fn FileSystem_listFilesRecursively() { host_call(\"FileSystem_listFilesRecursively\", []) }"));
        assert!(prelude.contains("fn FileSystem_listFilesRecursively(p0) {"));
        assert!(check_syntax(&prelude).is_ok());
    }

    #[test]
    fn test_declarations() {
        let decls = script_function_declarations(&AgentFunctions.schemas());
        assert!(decls.contains("fn Agent_completed(note)"));
        assert!(decls.contains("fn Agent_saveMemory(key, content)"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_script_calls_capabilities() {
        let ctx = script_context();
        let ctx2 = ctx.clone();
        let run = tokio::task::spawn_blocking(move || exec(&ctx2, "let a = TestFunctions_sum(3, 6);\nTestFunctions_sum(a, 1)"))
            .await
            .unwrap();
        assert_eq!(run.value.unwrap(), json!(10));
        assert_eq!(run.bridge.results.len(), 2);
        assert!(run.bridge.terminal.is_none());
        let history = ctx.with(|r| r.function_call_history.clone());
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].parameters["num1"], json!(3));
        assert_eq!(history[0].stdout.as_deref(), Some("9"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_terminal_call_stops_script() {
        let ctx = script_context();
        let ctx2 = ctx.clone();
        let run = tokio::task::spawn_blocking(move || {
            exec(&ctx2, "Agent_completed(\"done\");\nTestFunctions_noop();\n1")
        })
        .await
        .unwrap();
        assert_eq!(run.bridge.terminal.as_deref(), Some(AGENT_COMPLETED_NAME));
        assert!(run.value.is_err());
        assert_eq!(ctx.history_len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_capability_error_recorded() {
        let ctx = script_context();
        let ctx2 = ctx.clone();
        let run = tokio::task::spawn_blocking(move || exec(&ctx2, "TestFunctions_throwError()"))
            .await
            .unwrap();
        let (name, message) = run.bridge.failure.unwrap();
        assert_eq!(name, "TestFunctions.throwError");
        assert!(message.contains(THROW_ERROR_TEXT));
        let last = ctx.with(|r| r.function_call_history[0].clone());
        assert!(last.is_error());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_operation_limit() {
        let ctx = script_context();
        let ctx2 = ctx.clone();
        let run = tokio::task::spawn_blocking(move || {
            run_script(
                Handle::current(),
                ctx2,
                AgentSection::default(),
                ScriptSection {
                    max_operations: 1_000,
                    max_call_depth: 8,
                },
                Vec::new(),
                "let x = 0; loop { x += 1; }".to_string(),
            )
        })
        .await
        .unwrap();
        assert!(run.value.is_err());
    }
}
