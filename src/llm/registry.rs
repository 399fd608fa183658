//! LLM 注册表：按 id 注册客户端，反序列化时把持久化的 id 解析回实例

use std::collections::HashMap;
use std::sync::Arc;

use crate::agent::{AgentLlms, LlmIds};
use crate::core::AgentError;
use crate::llm::LlmClient;

#[derive(Default, Clone)]
pub struct LlmRegistry {
    clients: HashMap<String, Arc<dyn LlmClient>>,
}

impl LlmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, llm: Arc<dyn LlmClient>) {
        self.clients.insert(llm.id(), llm);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn LlmClient>> {
        self.clients.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.clients.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn resolve(&self, id: &str) -> Result<Arc<dyn LlmClient>, AgentError> {
        self.get(id)
            .ok_or_else(|| AgentError::NotFound(format!("LLM {id}")))
    }

    /// 解析四个档位；缺失的档位依次回退到相邻档位（旧记录可能只存了部分档位）
    pub fn resolve_tiers(&self, ids: &LlmIds) -> Result<AgentLlms, AgentError> {
        let fallback = ids
            .hard
            .as_ref()
            .or(ids.medium.as_ref())
            .or(ids.easy.as_ref())
            .or(ids.xhard.as_ref())
            .ok_or_else(|| AgentError::Serialization("agent has no LLMs".to_string()))?;
        let pick = |id: &Option<String>| self.resolve(id.as_ref().unwrap_or(fallback));
        Ok(AgentLlms {
            easy: pick(&ids.easy)?,
            medium: pick(&ids.medium)?,
            hard: pick(&ids.hard)?,
            xhard: pick(&ids.xhard)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    #[test]
    fn test_resolve_tiers_with_fallback() {
        let mut registry = LlmRegistry::new();
        registry.register(Arc::new(MockLlmClient::with_model("small")));
        registry.register(Arc::new(MockLlmClient::with_model("big")));
        let ids = LlmIds {
            easy: Some("mock:small".into()),
            medium: None,
            hard: Some("mock:big".into()),
            xhard: None,
        };
        let llms = registry.resolve_tiers(&ids).unwrap();
        assert_eq!(llms.easy.id(), "mock:small");
        assert_eq!(llms.medium.id(), "mock:big");
        assert_eq!(llms.xhard.id(), "mock:big");
    }

    #[test]
    fn test_resolve_unknown_llm() {
        let registry = LlmRegistry::new();
        let ids = LlmIds {
            easy: Some("openai:gpt".into()),
            ..Default::default()
        };
        assert!(matches!(
            registry.resolve_tiers(&ids),
            Err(AgentError::NotFound(_))
        ));
    }
}
