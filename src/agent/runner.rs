//! 控制循环与恢复操作
//!
//! 循环骨架（人工介入检查、检查点、迭代计数、完成通知）只在这里实现一次，
//! 每次迭代的模型调用与动作执行交给 InvocationProtocol。
//! 所有恢复 / 取消操作都要带上暂停时的 executionId，不一致时直接拒绝，不修改记录。
//! 同一智能体同时只允许一个控制循环：恢复前先原子地占用运行槽位，占用失败即拒绝。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::agent::{
    strip_context_prompt, AgentContext, AgentRecord, HilDecision, HilGate, HilTrigger, HumanInTheLoop,
    RunAgentConfig,
};
use crate::cache::{CacheRetryOptions, FunctionCacheService, InMemoryFunctionCache};
use crate::config::{AgentSection, CacheSection, ScriptSection};
use crate::core::{AgentError, AgentRunningState};
use crate::functions::{FunctionCall, FunctionCallResult, AGENT_REQUEST_FEEDBACK};
use crate::protocol::{protocol_for, InvocationProtocol, IterationEnv};
use crate::store::AgentStateService;

pub const SUPERVISOR_RESUMED_FUNCTION_NAME: &str = "Supervisor.Resumed";
pub const SUPERVISOR_CANCELLED_FUNCTION_NAME: &str = "Supervisor.Cancelled";

/// 对运行中智能体的停止请求，在下一次迭代开始时生效
#[derive(Debug, Clone)]
enum StopRequest {
    Cancel(String),
    Force,
}

struct RunningAgent {
    token: CancellationToken,
    stop: Option<StopRequest>,
}

/// 占用中的运行槽位，释放时从运行表移除
struct RunSlot<'a> {
    runner: &'a AgentRunner,
    agent_id: String,
    token: CancellationToken,
}

impl Drop for RunSlot<'_> {
    fn drop(&mut self) {
        self.runner.running().remove(&self.agent_id);
    }
}

/// 本轮循环是否继续
enum Flow {
    Continue,
    Stop,
}

pub struct AgentRunner {
    state_service: Arc<AgentStateService>,
    hil: Arc<dyn HumanInTheLoop>,
    settings: AgentSection,
    script: ScriptSection,
    cache: Option<Arc<dyn FunctionCacheService>>,
    cache_defaults: Option<CacheRetryOptions>,
    running: Mutex<HashMap<String, RunningAgent>>,
}

impl AgentRunner {
    pub fn new(state_service: Arc<AgentStateService>, hil: Arc<dyn HumanInTheLoop>) -> Self {
        Self {
            state_service,
            hil,
            settings: AgentSection::default(),
            script: ScriptSection::default(),
            cache: None,
            cache_defaults: None,
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_settings(mut self, settings: AgentSection) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_script_limits(mut self, script: ScriptSection) -> Self {
        self.script = script;
        self
    }

    /// 绑定到每个运行中智能体能力集合的函数缓存
    pub fn with_cache(mut self, cache: Arc<dyn FunctionCacheService>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// 按 [cache] 段建立内存缓存，并把重试 / TTL 作为能力缓存策略的基线
    pub fn with_cache_config(mut self, section: &CacheSection) -> Self {
        self.cache = Some(Arc::new(InMemoryFunctionCache::from_config(section)));
        self.cache_defaults = Some(CacheRetryOptions::from(section));
        self
    }

    pub fn state_service(&self) -> &Arc<AgentStateService> {
        &self.state_service
    }

    pub fn settings(&self) -> &AgentSection {
        &self.settings
    }

    fn running(&self) -> MutexGuard<'_, HashMap<String, RunningAgent>> {
        self.running.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn is_running(&self, agent_id: &str) -> bool {
        self.running().contains_key(agent_id)
    }

    /// 检查与登记在同一把锁内完成
    fn reserve(&self, agent_id: &str) -> Result<RunSlot<'_>, AgentError> {
        let mut running = self.running();
        if running.contains_key(agent_id) {
            warn!(agent_id, "Rejected request for agent with a running control loop");
            return Err(AgentError::InvalidState {
                expected: "not running".to_string(),
                actual: "running".to_string(),
            });
        }
        let token = CancellationToken::new();
        running.insert(
            agent_id.to_string(),
            RunningAgent {
                token: token.clone(),
                stop: None,
            },
        );
        Ok(RunSlot {
            runner: self,
            agent_id: agent_id.to_string(),
            token,
        })
    }

    /// 创建新智能体并运行到循环结束，返回 agentId
    pub async fn start_agent(&self, config: RunAgentConfig) -> Result<String, AgentError> {
        let record = AgentRecord::create(config, &self.settings);
        info!(agent_id = %record.agent_id, name = %record.name, protocol = ?record.protocol, "Starting agent");
        self.state_service.save(&record).await?;
        self.run_agent(record).await
    }

    /// 以新的 executionId 进入控制循环，直到状态不再是 agent。
    /// 该智能体已有控制循环在运行时返回 InvalidState
    pub async fn run_agent(&self, record: AgentRecord) -> Result<String, AgentError> {
        let slot = self.reserve(&record.agent_id)?;
        self.run_in_slot(record, slot).await
    }

    async fn run_in_slot(&self, mut record: AgentRecord, slot: RunSlot<'_>) -> Result<String, AgentError> {
        record.execution_id = Uuid::new_v4().to_string();
        record.state = AgentRunningState::Agent;
        if let Some(defaults) = &self.cache_defaults {
            record.functions.set_cache_defaults(defaults.clone());
        }
        if let Some(cache) = &self.cache {
            record.functions.set_cache(cache.clone());
        }
        let agent_id = record.agent_id.clone();
        let protocol = protocol_for(record.protocol, &self.script);
        let ctx = AgentContext::new(record);

        let outcome = self.control_loop(&ctx, protocol.as_ref(), &slot.token).await;

        if let Err(e) = &outcome {
            error!(agent_id = %agent_id, error = %e, "Agent control loop failed");
            ctx.update(|r| {
                r.state = AgentRunningState::Error;
                r.error = Some(e.to_string());
            });
            if let Err(save_err) = self.state_service.save_context(&ctx).await {
                error!(agent_id = %agent_id, error = %save_err, "Failed to save agent error state");
            }
        }

        let record = ctx.snapshot();
        info!(agent_id = %agent_id, state = %record.state, iterations = record.iterations, cost = record.cost, "Agent execution finished");
        if let Err(e) = record.completed_handler.notify_completed(&record).await {
            warn!(agent_id = %agent_id, error = %e, "Completed handler failed");
        }
        // 错误状态落盘后才释放槽位
        drop(slot);
        outcome.map(|_| agent_id)
    }

    async fn control_loop(
        &self,
        ctx: &AgentContext,
        protocol: &dyn InvocationProtocol,
        token: &CancellationToken,
    ) -> Result<(), AgentError> {
        self.state_service.save_context(ctx).await?;

        let system_prompt = match ctx.with(|r| protocol.system_prompt(r)) {
            Ok(prompt) => prompt,
            Err(e) => {
                ctx.update(|r| {
                    r.state = AgentRunningState::Error;
                    r.error = Some(e.to_string());
                });
                return self.state_service.save_context(ctx).await;
            }
        };

        let mut gate = ctx.with(|r| HilGate::new(r.hil_budget, r.hil_count, r.cost));
        let agent_id = ctx.agent_id();

        loop {
            if token.is_cancelled() {
                self.apply_stop(ctx);
                self.state_service.save_context(ctx).await?;
                break;
            }

            if let Some(trigger) = gate.check_iterations() {
                if let Flow::Stop = self.hil_pause(ctx, &trigger, token).await? {
                    break;
                }
            }
            gate.record_iteration();
            if let Some(trigger) = gate.check_budget(ctx.cost()) {
                if let Flow::Stop = self.hil_pause(ctx, &trigger, token).await? {
                    break;
                }
            }

            ctx.update(|r| r.call_stack.clear());
            let iteration = ctx.with(|r| r.iterations);
            let env = IterationEnv {
                ctx,
                state_service: &self.state_service,
                settings: &self.settings,
                system_prompt: &system_prompt,
            };
            let span = protocol.iteration_span(&agent_id, iteration);
            match protocol.run_iteration(&env).instrument(span).await {
                Ok(state) => ctx.set_state(state),
                Err(e) => {
                    error!(agent_id = %agent_id, iteration, error = %e, "Agent iteration failed");
                    ctx.update(|r| {
                        r.state = AgentRunningState::Error;
                        r.error = Some(e.to_string());
                        r.invoking.clear();
                    });
                }
            }

            ctx.update(|r| {
                r.iterations += 1;
                r.call_stack.clear();
            });
            self.state_service.save_context(ctx).await?;

            if ctx.state() != AgentRunningState::Agent {
                break;
            }
        }
        Ok(())
    }

    /// 进入 hil 状态并等待批准；等待期间的停止请求立即生效
    async fn hil_pause(
        &self,
        ctx: &AgentContext,
        trigger: &HilTrigger,
        token: &CancellationToken,
    ) -> Result<Flow, AgentError> {
        let agent_id = ctx.agent_id();
        info!(agent_id = %agent_id, reason = %trigger, "Human-in-the-loop check");
        self.state_service.update_state(ctx, AgentRunningState::Hil).await?;

        let decision = tokio::select! {
            decision = self.hil.request_approval(&agent_id, trigger) => decision,
            _ = token.cancelled() => {
                self.apply_stop(ctx);
                self.state_service.save_context(ctx).await?;
                return Ok(Flow::Stop);
            }
        };

        match decision {
            HilDecision::Continue => {
                self.state_service.update_state(ctx, AgentRunningState::Agent).await?;
                Ok(Flow::Continue)
            }
            HilDecision::Pause => Ok(Flow::Stop),
        }
    }

    fn apply_stop(&self, ctx: &AgentContext) {
        let agent_id = ctx.agent_id();
        let stop = self
            .running()
            .get_mut(&agent_id)
            .and_then(|running| running.stop.take())
            .unwrap_or(StopRequest::Force);
        match stop {
            StopRequest::Cancel(note) => {
                info!(agent_id = %agent_id, "Agent cancelled");
                ctx.update(|r| {
                    r.function_call_history.push(supervisor_entry(SUPERVISOR_CANCELLED_FUNCTION_NAME, &note));
                    r.invoking.clear();
                    r.state = AgentRunningState::Completed;
                });
            }
            StopRequest::Force => {
                warn!(agent_id = %agent_id, "Agent force stopped");
                ctx.update(|r| {
                    r.invoking.clear();
                    r.state = AgentRunningState::Error;
                    r.error = Some(AgentError::ForceStopped(agent_id.clone()).to_string());
                });
            }
        }
    }

    fn request_stop(&self, agent_id: &str, stop: StopRequest) -> bool {
        let mut running = self.running();
        match running.get_mut(agent_id) {
            Some(agent) => {
                agent.stop = Some(stop);
                agent.token.cancel();
                true
            }
            None => false,
        }
    }

    /// 加载记录并校验 executionId
    async fn load_checked(&self, agent_id: &str, execution_id: &str) -> Result<AgentRecord, AgentError> {
        let record = self.state_service.load(agent_id).await?;
        if record.execution_id != execution_id {
            warn!(agent_id, execution_id, "Rejected request with stale executionId");
            return Err(AgentError::StaleExecution {
                agent_id: agent_id.to_string(),
            });
        }
        Ok(record)
    }

    /// 取消智能体：记录 Supervisor.Cancelled 并置为 completed。
    /// 运行中的智能体在下一次迭代开始时停止。
    pub async fn cancel_agent(&self, agent_id: &str, execution_id: &str, note: &str) -> Result<(), AgentError> {
        let _slot = match self.reserve(agent_id) {
            Ok(slot) => slot,
            Err(_) => {
                self.load_checked(agent_id, execution_id).await?;
                if self.request_stop(agent_id, StopRequest::Cancel(note.to_string())) {
                    info!(agent_id, "Cancel requested for running agent");
                    return Ok(());
                }
                // 控制循环刚好结束
                self.reserve(agent_id)?
            }
        };
        let mut record = self.load_checked(agent_id, execution_id).await?;
        record
            .function_call_history
            .push(supervisor_entry(SUPERVISOR_CANCELLED_FUNCTION_NAME, note));
        record.state = AgentRunningState::Completed;
        self.state_service.save(&record).await?;
        info!(agent_id, "Agent cancelled");
        Ok(())
    }

    /// 带纠正说明从 error 状态恢复
    pub async fn resume_error(&self, agent_id: &str, execution_id: &str, note: &str) -> Result<String, AgentError> {
        let slot = self.reserve(agent_id)?;
        let mut record = self.load_checked(agent_id, execution_id).await?;
        expect_state(&record, AgentRunningState::Error)?;
        record.input_prompt = strip_context_prompt(&record, self.settings.history_max_chars);
        record
            .function_call_history
            .push(supervisor_entry(SUPERVISOR_RESUMED_FUNCTION_NAME, note));
        record.error = None;
        record.state = AgentRunningState::Agent;
        record.input_prompt.push_str(&format!("\nSupervisor note: {note}"));
        self.state_service.save(&record).await?;
        self.run_in_slot(record, slot).await
    }

    /// 批准 hil 暂停后继续；说明为空时不写历史
    pub async fn resume_hil(&self, agent_id: &str, execution_id: &str, note: &str) -> Result<String, AgentError> {
        let slot = self.reserve(agent_id)?;
        let mut record = self.load_checked(agent_id, execution_id).await?;
        expect_state(&record, AgentRunningState::Hil)?;
        if !note.trim().is_empty() {
            record
                .function_call_history
                .push(supervisor_entry(SUPERVISOR_RESUMED_FUNCTION_NAME, note));
        }
        record.state = AgentRunningState::Agent;
        self.state_service.save(&record).await?;
        self.run_in_slot(record, slot).await
    }

    /// 回答 Agent.requestFeedback：反馈写入该历史条目的 stdout
    pub async fn provide_feedback(&self, agent_id: &str, execution_id: &str, feedback: &str) -> Result<String, AgentError> {
        let slot = self.reserve(agent_id)?;
        let mut record = self.load_checked(agent_id, execution_id).await?;
        expect_state(&record, AgentRunningState::Feedback)?;
        match record.function_call_history.last_mut() {
            Some(last) if last.function_name == AGENT_REQUEST_FEEDBACK => {
                last.stdout = Some(feedback.to_string());
                last.stderr = None;
            }
            other => {
                return Err(AgentError::InvalidState {
                    expected: format!("last function call {AGENT_REQUEST_FEEDBACK}"),
                    actual: other
                        .map(|c| c.function_name.clone())
                        .unwrap_or_else(|| "empty history".to_string()),
                })
            }
        }
        record.state = AgentRunningState::Agent;
        self.state_service.save(&record).await?;
        self.run_in_slot(record, slot).await
    }

    /// 给已完成的智能体追加指令并重新运行
    pub async fn resume_completed(&self, agent_id: &str, execution_id: &str, instructions: &str) -> Result<String, AgentError> {
        let slot = self.reserve(agent_id)?;
        let mut record = self.load_checked(agent_id, execution_id).await?;
        expect_state(&record, AgentRunningState::Completed)?;
        record.input_prompt = strip_context_prompt(&record, self.settings.history_max_chars);
        if !instructions.trim().is_empty() {
            record
                .function_call_history
                .push(supervisor_entry(SUPERVISOR_RESUMED_FUNCTION_NAME, instructions));
        }
        record.state = AgentRunningState::Agent;
        record.input_prompt.push_str(&format!(
            "\nSupervisor note: The agent has been resumed from the completed state with the following instructions: {instructions}"
        ));
        self.state_service.save(&record).await?;
        self.run_in_slot(record, slot).await
    }

    /// 强制停止运行中的智能体，下一次迭代开始时置为 error
    pub fn force_stop(&self, agent_id: &str) -> Result<(), AgentError> {
        if self.request_stop(agent_id, StopRequest::Force) {
            info!(agent_id, "Force stop requested");
            Ok(())
        } else {
            Err(AgentError::NotFound(format!("Running agent {agent_id}")))
        }
    }
}

fn supervisor_entry(function_name: &str, note: &str) -> FunctionCallResult {
    FunctionCallResult::success(&FunctionCall::new(function_name), note)
}

fn expect_state(record: &AgentRecord, expected: AgentRunningState) -> Result<(), AgentError> {
    if record.state != expected {
        return Err(AgentError::InvalidState {
            expected: expected.to_string(),
            actual: record.state.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::test_record;
    use crate::agent::{build_context_prompt, AgentLlms, AgentResolver, AutoApprove, PauseForResume};
    use crate::functions::{FunctionFactory, TestFunctions, AGENT_COMPLETED_NAME, TEST_FUNC_NOOP};
    use crate::llm::{LlmRegistry, MockLlmClient};
    use crate::store::InMemoryAgentStore;
    use crate::user::InMemoryUserService;

    const COMPLETE: &str = "<function_calls><function_call><function_name>Agent.completed</function_name><parameters><note>done</note></parameters></function_call></function_calls>";
    const NOOP: &str = "<function_calls><function_call><function_name>TestFunctions.noop</function_name><parameters></parameters></function_call></function_calls>";

    fn runner_with(llm: Arc<MockLlmClient>, hil: Arc<dyn HumanInTheLoop>) -> AgentRunner {
        let mut llms = LlmRegistry::new();
        llms.register(llm);
        let mut factory = FunctionFactory::new();
        factory.register("TestFunctions", || Arc::new(TestFunctions));
        let resolver = AgentResolver::new(llms, factory, Arc::new(InMemoryUserService::single_user()));
        let service = AgentStateService::new(Arc::new(InMemoryAgentStore::new()), resolver);
        AgentRunner::new(Arc::new(service), hil)
    }

    fn record_with(llm: Arc<MockLlmClient>) -> AgentRecord {
        let mut record = test_record();
        record.llms = AgentLlms::uniform(llm);
        record.functions.add(Arc::new(TestFunctions));
        record.hil_count = 0;
        record.hil_budget = 100.0;
        record
    }

    #[tokio::test]
    async fn test_run_until_completed() {
        let llm = Arc::new(MockLlmClient::new());
        llm.add_response(NOOP).add_response(COMPLETE);
        let runner = runner_with(llm.clone(), Arc::new(AutoApprove));

        let id = runner.run_agent(record_with(llm.clone())).await.unwrap();
        let record = runner.state_service().load(&id).await.unwrap();
        assert_eq!(record.state, AgentRunningState::Completed);
        assert_eq!(record.iterations, 2);
        assert!(record.call_stack.is_empty());
        let names: Vec<_> = record
            .function_call_history
            .iter()
            .map(|c| c.function_name.as_str())
            .collect();
        assert_eq!(names, vec![TEST_FUNC_NOOP, AGENT_COMPLETED_NAME]);
        assert!(!runner.is_running(&id));
    }

    #[tokio::test]
    async fn test_hil_pause_keeps_state() {
        let llm = Arc::new(MockLlmClient::new());
        llm.set_fallback(NOOP);
        let runner = runner_with(llm.clone(), Arc::new(PauseForResume));
        let mut record = record_with(llm.clone());
        record.hil_count = 2;

        let id = runner.run_agent(record).await.unwrap();
        let record = runner.state_service().load(&id).await.unwrap();
        assert_eq!(record.state, AgentRunningState::Hil);
        assert_eq!(record.iterations, 2);
    }

    #[tokio::test]
    async fn test_stale_execution_rejected() {
        let llm = Arc::new(MockLlmClient::new());
        llm.add_response(COMPLETE);
        let runner = runner_with(llm.clone(), Arc::new(AutoApprove));
        let id = runner.run_agent(record_with(llm.clone())).await.unwrap();
        let before = runner.state_service().load(&id).await.unwrap();

        let err = runner.resume_completed(&id, "stale", "more").await.unwrap_err();
        assert!(matches!(err, AgentError::StaleExecution { .. }));
        let err = runner.cancel_agent(&id, "stale", "stop").await.unwrap_err();
        assert!(matches!(err, AgentError::StaleExecution { .. }));

        let after = runner.state_service().load(&id).await.unwrap();
        assert_eq!(after.function_call_history.len(), before.function_call_history.len());
        assert_eq!(after.execution_id, before.execution_id);
    }

    #[tokio::test]
    async fn test_resume_error_requires_error_state() {
        let llm = Arc::new(MockLlmClient::new());
        llm.add_response(COMPLETE);
        let runner = runner_with(llm.clone(), Arc::new(AutoApprove));
        let id = runner.run_agent(record_with(llm.clone())).await.unwrap();
        let record = runner.state_service().load(&id).await.unwrap();

        let err = runner
            .resume_error(&id, &record.execution_id, "retry")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_cancel_stopped_agent() {
        let llm = Arc::new(MockLlmClient::new());
        llm.set_fallback(NOOP);
        let runner = runner_with(llm.clone(), Arc::new(PauseForResume));
        let mut record = record_with(llm.clone());
        record.hil_count = 1;
        let id = runner.run_agent(record).await.unwrap();
        let paused = runner.state_service().load(&id).await.unwrap();
        assert_eq!(paused.state, AgentRunningState::Hil);

        runner
            .cancel_agent(&id, &paused.execution_id, "no longer needed")
            .await
            .unwrap();
        let record = runner.state_service().load(&id).await.unwrap();
        assert_eq!(record.state, AgentRunningState::Completed);
        let last = record.function_call_history.last().unwrap();
        assert_eq!(last.function_name, SUPERVISOR_CANCELLED_FUNCTION_NAME);
        assert_eq!(last.stdout.as_deref(), Some("no longer needed"));
    }

    #[tokio::test]
    async fn test_resume_completed_appends_instructions() {
        let llm = Arc::new(MockLlmClient::new());
        llm.add_response(COMPLETE).add_response(COMPLETE);
        let runner = runner_with(llm.clone(), Arc::new(AutoApprove));
        let id = runner.run_agent(record_with(llm.clone())).await.unwrap();
        let first = runner.state_service().load(&id).await.unwrap();

        runner
            .resume_completed(&id, &first.execution_id, "also check the logs")
            .await
            .unwrap();
        let record = runner.state_service().load(&id).await.unwrap();
        assert_eq!(record.state, AgentRunningState::Completed);
        assert_ne!(record.execution_id, first.execution_id);
        let names: Vec<_> = record
            .function_call_history
            .iter()
            .map(|c| c.function_name.as_str())
            .collect();
        assert_eq!(
            names,
            vec![AGENT_COMPLETED_NAME, SUPERVISOR_RESUMED_FUNCTION_NAME, AGENT_COMPLETED_NAME]
        );
        assert!(llm.prompts()[1].contains("also check the logs"));
    }

    #[tokio::test]
    async fn test_resume_error_rerenders_history() {
        let llm = Arc::new(MockLlmClient::new());
        llm.add_response(COMPLETE);
        let runner = runner_with(llm.clone(), Arc::new(AutoApprove));
        let mut record = record_with(llm.clone());
        record.state = AgentRunningState::Error;
        record.error = Some("LLM error: overloaded".into());
        // 生成失败时保存下来的已组装提示
        record.input_prompt = format!(
            "{}<user_request>go</user_request>\n",
            build_context_prompt(&record, runner.settings().history_max_chars)
        );
        runner.state_service().save(&record).await.unwrap();

        runner
            .resume_error(&record.agent_id, &record.execution_id, "try a smaller request")
            .await
            .unwrap();
        let prompt = &llm.prompts()[0];
        assert!(prompt.contains(SUPERVISOR_RESUMED_FUNCTION_NAME));
        assert!(prompt.contains("Supervisor note: try a smaller request"));
        assert_eq!(prompt.matches("<function_call_history>").count(), 1);
        assert_eq!(prompt.matches("<user_request>").count(), 1);
    }

    #[tokio::test]
    async fn test_run_slot_released_after_rejected_resume() {
        let llm = Arc::new(MockLlmClient::new());
        llm.add_response(COMPLETE);
        let runner = runner_with(llm.clone(), Arc::new(AutoApprove));
        let id = runner.run_agent(record_with(llm.clone())).await.unwrap();

        assert!(runner.resume_hil(&id, "stale", "").await.is_err());
        assert!(!runner.is_running(&id));
        let slot = runner.reserve(&id).unwrap();
        assert!(matches!(
            runner.reserve(&id),
            Err(AgentError::InvalidState { .. })
        ));
        drop(slot);
        assert!(!runner.is_running(&id));
    }

    #[test]
    fn test_force_stop_unknown_agent() {
        let llm = Arc::new(MockLlmClient::new());
        let runner = runner_with(llm, Arc::new(AutoApprove));
        assert!(matches!(runner.force_stop("nope"), Err(AgentError::NotFound(_))));
    }
}
