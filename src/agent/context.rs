//! 智能体上下文句柄
//!
//! 每个执行线程持有一个 AgentContext，并显式传给能力调用与模型调用。
//! 内部为 Arc<Mutex<AgentRecord>>，锁只在同步闭包内持有，不跨 await。

use std::sync::{Arc, Mutex, MutexGuard};

use crate::agent::{AgentRecord, TaskLevel};
use crate::core::AgentRunningState;
use crate::functions::{FileSystem, FunctionCallResult, LlmFunctions};
use crate::llm::LlmClient;

#[derive(Clone)]
pub struct AgentContext {
    inner: Arc<Mutex<AgentRecord>>,
}

impl AgentContext {
    pub fn new(record: AgentRecord) -> Self {
        Self {
            inner: Arc::new(Mutex::new(record)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AgentRecord> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn with<R>(&self, f: impl FnOnce(&AgentRecord) -> R) -> R {
        f(&self.lock())
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut AgentRecord) -> R) -> R {
        f(&mut self.lock())
    }

    /// 当前记录的副本（用于持久化与通知）
    pub fn snapshot(&self) -> AgentRecord {
        self.lock().clone()
    }

    pub fn agent_id(&self) -> String {
        self.with(|r| r.agent_id.clone())
    }

    pub fn user_id(&self) -> String {
        self.with(|r| r.user.id.clone())
    }

    pub fn state(&self) -> AgentRunningState {
        self.with(|r| r.state)
    }

    pub fn set_state(&self, state: AgentRunningState) {
        self.update(|r| r.state = state);
    }

    pub fn cost(&self) -> f64 {
        self.with(|r| r.cost)
    }

    /// 累计成本；剩余预算不低于 0
    pub fn add_cost(&self, cost: f64) {
        if cost <= 0.0 {
            return;
        }
        self.update(|r| {
            r.cost += cost;
            r.budget_remaining = (r.budget_remaining - cost).max(0.0);
        });
    }

    pub fn add_note(&self, note: impl Into<String>) {
        let note = note.into();
        self.update(|r| r.notes.push(note));
    }

    pub fn llm(&self, level: TaskLevel) -> Arc<dyn LlmClient> {
        self.with(|r| r.llms.get(level))
    }

    pub fn functions(&self) -> LlmFunctions {
        self.with(|r| r.functions.clone())
    }

    pub fn file_system(&self) -> Arc<FileSystem> {
        self.with(|r| r.file_system.clone())
    }

    pub fn push_history(&self, result: FunctionCallResult) {
        self.update(|r| r.function_call_history.push(result));
    }

    pub fn history_len(&self) -> usize {
        self.with(|r| r.function_call_history.len())
    }

    pub fn memory_get(&self, key: &str) -> Option<String> {
        self.with(|r| r.memory.get(key).cloned())
    }

    /// 返回被覆盖的旧值
    pub fn memory_set(&self, key: &str, content: &str) -> Option<String> {
        self.update(|r| r.memory.insert(key.to_string(), content.to_string()))
    }

    pub fn memory_delete(&self, key: &str) -> Option<String> {
        self.update(|r| r.memory.remove(key))
    }

    /// 压入调用栈帧，返回的守卫在 drop 时弹出
    pub fn enter_call(&self, name: &str) -> CallFrame {
        self.update(|r| r.call_stack.push(name.to_string()));
        CallFrame { ctx: self.clone() }
    }

    pub fn call_stack(&self) -> Vec<String> {
        self.with(|r| r.call_stack.clone())
    }
}

/// 调用栈帧守卫
pub struct CallFrame {
    ctx: AgentContext,
}

impl Drop for CallFrame {
    fn drop(&mut self) {
        self.ctx.update(|r| {
            r.call_stack.pop();
        });
    }
}
