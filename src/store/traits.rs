//! 智能体状态存储
//!
//! AgentStore 只负责序列化文档的读写；AgentStateService 在其上做记录的序列化 / 反序列化，
//! 并提供 list_running、update_state 等查询。

use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::{serialize_agent, AgentContext, AgentRecord, AgentResolver, SerializedAgent};
use crate::core::{AgentError, AgentRunningState};

#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn save(&self, doc: &SerializedAgent) -> Result<(), AgentError>;

    async fn load(&self, agent_id: &str) -> Result<Option<SerializedAgent>, AgentError>;

    /// 按 last_update 倒序
    async fn list(&self) -> Result<Vec<SerializedAgent>, AgentError>;

    async fn delete(&self, agent_ids: &[String]) -> Result<(), AgentError>;
}

/// 按 last_update 倒序排序
pub(crate) fn sort_by_last_update(docs: &mut [SerializedAgent]) {
    docs.sort_by(|a, b| b.last_update.cmp(&a.last_update));
}

pub struct AgentStateService {
    store: Arc<dyn AgentStore>,
    resolver: AgentResolver,
}

impl AgentStateService {
    pub fn new(store: Arc<dyn AgentStore>, resolver: AgentResolver) -> Self {
        Self { store, resolver }
    }

    pub fn store(&self) -> &Arc<dyn AgentStore> {
        &self.store
    }

    pub fn resolver(&self) -> &AgentResolver {
        &self.resolver
    }

    /// 保存记录（更新 last_update）
    pub async fn save(&self, record: &AgentRecord) -> Result<(), AgentError> {
        let mut doc = serialize_agent(record);
        doc.last_update = chrono::Utc::now().timestamp_millis();
        self.store.save(&doc).await
    }

    /// 保存上下文的当前快照；last_update 同步回上下文
    pub async fn save_context(&self, ctx: &AgentContext) -> Result<(), AgentError> {
        let now = chrono::Utc::now().timestamp_millis();
        let doc = ctx.update(|r| {
            r.last_update = now;
            serialize_agent(r)
        });
        self.store.save(&doc).await
    }

    pub async fn load(&self, agent_id: &str) -> Result<AgentRecord, AgentError> {
        let doc = self
            .store
            .load(agent_id)
            .await?
            .ok_or_else(|| AgentError::NotFound(format!("Agent {agent_id}")))?;
        self.resolver.deserialize(doc).await
    }

    pub async fn list(&self) -> Result<Vec<AgentRecord>, AgentError> {
        let mut records = Vec::new();
        for doc in self.store.list().await? {
            records.push(self.resolver.deserialize(doc).await?);
        }
        Ok(records)
    }

    /// 处于 agent / functions 状态的智能体
    pub async fn list_running(&self) -> Result<Vec<AgentRecord>, AgentError> {
        let mut records = Vec::new();
        for doc in self.store.list().await? {
            if doc.state.is_executing() {
                records.push(self.resolver.deserialize(doc).await?);
            }
        }
        Ok(records)
    }

    pub async fn delete(&self, agent_ids: &[String]) -> Result<(), AgentError> {
        self.store.delete(agent_ids).await
    }

    pub async fn update_state(&self, ctx: &AgentContext, state: AgentRunningState) -> Result<(), AgentError> {
        ctx.set_state(state);
        self.save_context(ctx).await
    }
}
