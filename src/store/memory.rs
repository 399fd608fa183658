//! 进程内存储：文档以 JSON 值保存，读写都经过完整的序列化

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::agent::SerializedAgent;
use crate::core::AgentError;
use crate::store::traits::sort_by_last_update;
use crate::store::AgentStore;

#[derive(Default)]
pub struct InMemoryAgentStore {
    docs: RwLock<HashMap<String, Value>>,
}

impl InMemoryAgentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }
}

#[async_trait]
impl AgentStore for InMemoryAgentStore {
    async fn save(&self, doc: &SerializedAgent) -> Result<(), AgentError> {
        let value = doc.to_value()?;
        self.docs.write().await.insert(doc.agent_id.clone(), value);
        Ok(())
    }

    async fn load(&self, agent_id: &str) -> Result<Option<SerializedAgent>, AgentError> {
        let value = self.docs.read().await.get(agent_id).cloned();
        value.map(SerializedAgent::from_value).transpose()
    }

    async fn list(&self) -> Result<Vec<SerializedAgent>, AgentError> {
        let values: Vec<Value> = self.docs.read().await.values().cloned().collect();
        let mut docs = values
            .into_iter()
            .map(SerializedAgent::from_value)
            .collect::<Result<Vec<_>, _>>()?;
        sort_by_last_update(&mut docs);
        Ok(docs)
    }

    async fn delete(&self, agent_ids: &[String]) -> Result<(), AgentError> {
        let mut docs = self.docs.write().await;
        for id in agent_ids {
            docs.remove(id);
        }
        Ok(())
    }
}
