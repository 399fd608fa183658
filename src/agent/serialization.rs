//! 智能体记录的序列化
//!
//! 持久化形式为扁平 JSON：模型存 id，用户存 id，能力集合存类名，文件系统存路径，完成处理器存 id。
//! 反序列化兼容旧记录：缺失 type 视为 xml，"python" 视为 codegen，缺失 iterations 为 0，
//! 历史条目缺失 parameters 为空对象，能力集合可能以 toolbox 字段保存。

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agent::{AgentProtocol, AgentRecord, CompletedHandlerRegistry, LlmIds};
use crate::cache::{CacheRetryOptions, FunctionCacheService};
use crate::core::{AgentError, AgentRunningState};
use crate::functions::{FileSystem, FileSystemState, FunctionCall, FunctionCallResult, FunctionFactory, FILE_SYSTEM_CLASS};
use crate::llm::{LlmRegistry, Message};
use crate::user::UserService;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedFunctions {
    #[serde(default, alias = "tools")]
    pub function_classes: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedAgent {
    pub agent_id: String,
    pub execution_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_agent_id: Option<String>,
    #[serde(default)]
    pub name: String,
    pub user: String,
    pub state: AgentRunningState,
    #[serde(default)]
    pub iterations: u32,
    #[serde(default)]
    pub call_stack: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "type", default)]
    pub protocol: AgentProtocol,
    #[serde(default)]
    pub user_prompt: String,
    #[serde(default)]
    pub input_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub function_call_history: Vec<FunctionCallResult>,
    #[serde(default)]
    pub invoking: Vec<FunctionCall>,
    #[serde(default)]
    pub llms: LlmIds,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub budget_remaining: f64,
    #[serde(default)]
    pub hil_budget: f64,
    #[serde(default)]
    pub hil_count: u32,
    #[serde(default, alias = "toolbox")]
    pub functions: SerializedFunctions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_system: Option<FileSystemState>,
    #[serde(default)]
    pub memory: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_handler: Option<String>,
    #[serde(default)]
    pub last_update: i64,
}

impl SerializedAgent {
    pub fn from_value(value: Value) -> Result<Self, AgentError> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_value(&self) -> Result<Value, AgentError> {
        Ok(serde_json::to_value(self)?)
    }
}

pub fn serialize_agent(record: &AgentRecord) -> SerializedAgent {
    SerializedAgent {
        agent_id: record.agent_id.clone(),
        execution_id: record.execution_id.clone(),
        parent_agent_id: record.parent_agent_id.clone(),
        name: record.name.clone(),
        user: record.user.id.clone(),
        state: record.state,
        iterations: record.iterations,
        call_stack: record.call_stack.clone(),
        error: record.error.clone(),
        protocol: record.protocol,
        user_prompt: record.user_prompt.clone(),
        input_prompt: record.input_prompt.clone(),
        system_prompt: record.system_prompt.clone(),
        messages: record.messages.clone(),
        notes: record.notes.clone(),
        function_call_history: record.function_call_history.clone(),
        invoking: record.invoking.clone(),
        llms: record.llms.ids(),
        cost: record.cost,
        budget_remaining: record.budget_remaining,
        hil_budget: record.hil_budget,
        hil_count: record.hil_count,
        functions: SerializedFunctions {
            function_classes: record.functions.class_names(),
        },
        file_system: Some(record.file_system.to_state()),
        memory: record.memory.clone(),
        metadata: record.metadata.clone(),
        completed_handler: Some(record.completed_handler.id().to_string()),
        last_update: record.last_update,
    }
}

/// 反序列化时解析模型、能力、用户与完成处理器
#[derive(Clone)]
pub struct AgentResolver {
    pub llms: LlmRegistry,
    pub functions: FunctionFactory,
    pub users: Arc<dyn UserService>,
    pub completed_handlers: CompletedHandlerRegistry,
    /// 绑定到重建的能力集合上
    pub cache: Option<Arc<dyn FunctionCacheService>>,
    pub cache_defaults: CacheRetryOptions,
}

impl AgentResolver {
    pub fn new(llms: LlmRegistry, functions: FunctionFactory, users: Arc<dyn UserService>) -> Self {
        Self {
            llms,
            functions,
            users,
            completed_handlers: CompletedHandlerRegistry::default(),
            cache: None,
            cache_defaults: CacheRetryOptions::default(),
        }
    }

    pub fn with_completed_handlers(mut self, handlers: CompletedHandlerRegistry) -> Self {
        self.completed_handlers = handlers;
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn FunctionCacheService>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_cache_defaults(mut self, defaults: CacheRetryOptions) -> Self {
        self.cache_defaults = defaults;
        self
    }

    pub async fn deserialize(&self, serialized: SerializedAgent) -> Result<AgentRecord, AgentError> {
        let current = self.users.current_user();
        let user = if serialized.user == current.id {
            current
        } else {
            self.users.get_user(&serialized.user).await?
        };

        let llms = self.llms.resolve_tiers(&serialized.llms)?;

        let file_system = Arc::new(match &serialized.file_system {
            Some(state) => FileSystem::from_state(state),
            None => FileSystem::new(std::env::current_dir().unwrap_or_else(|_| ".".into())),
        });

        let mut functions = self.functions.build(&serialized.functions.function_classes);
        if serialized
            .functions
            .function_classes
            .iter()
            .any(|c| c == FILE_SYSTEM_CLASS)
        {
            functions.add(file_system.clone());
        }
        functions.set_cache_defaults(self.cache_defaults.clone());
        if let Some(cache) = &self.cache {
            functions.set_cache(cache.clone());
        }

        Ok(AgentRecord {
            agent_id: serialized.agent_id,
            execution_id: serialized.execution_id,
            parent_agent_id: serialized.parent_agent_id,
            name: serialized.name,
            user,
            state: serialized.state,
            iterations: serialized.iterations,
            call_stack: serialized.call_stack,
            error: serialized.error,
            protocol: serialized.protocol,
            user_prompt: serialized.user_prompt,
            input_prompt: serialized.input_prompt,
            system_prompt: serialized.system_prompt,
            messages: serialized.messages,
            notes: serialized.notes,
            function_call_history: serialized.function_call_history,
            invoking: serialized.invoking,
            llms,
            cost: serialized.cost,
            budget_remaining: serialized.budget_remaining,
            hil_budget: serialized.hil_budget,
            hil_count: serialized.hil_count,
            functions,
            file_system,
            memory: serialized.memory,
            metadata: serialized.metadata,
            completed_handler: self
                .completed_handlers
                .get(serialized.completed_handler.as_deref()),
            last_update: serialized.last_update,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::test_record;
    use crate::functions::{TestFunctions, AGENT_COMPLETED_NAME};
    use crate::llm::MockLlmClient;
    use crate::user::InMemoryUserService;
    use serde_json::json;

    fn resolver() -> AgentResolver {
        let mut llms = LlmRegistry::new();
        llms.register(Arc::new(MockLlmClient::new()));
        let mut functions = FunctionFactory::new();
        functions.register("TestFunctions", || Arc::new(TestFunctions));
        AgentResolver::new(llms, functions, Arc::new(InMemoryUserService::single_user()))
    }

    #[tokio::test]
    async fn test_round_trip_is_stable() {
        let mut record = test_record();
        record.functions.add(Arc::new(TestFunctions));
        record.functions.add(record.file_system.clone());
        record.memory.insert("k".into(), "v".into());
        record.metadata.insert("ticket".into(), json!("ABC-1"));
        record.function_call_history.push(FunctionCallResult::success(
            &FunctionCall::new(AGENT_COMPLETED_NAME).arg("note", "done"),
            "",
        ));
        record.cost = 1.25;

        let first = serialize_agent(&record);
        let restored = resolver().deserialize(first.clone()).await.unwrap();
        let second = serialize_agent(&restored);
        assert_eq!(first, second);
        assert_eq!(restored.user.id, "user");
        assert!(restored.functions.contains(FILE_SYSTEM_CLASS));
    }

    #[tokio::test]
    async fn test_legacy_document_defaults() {
        let doc = json!({
            "agentId": "a1",
            "executionId": "e1",
            "user": "user",
            "state": "completed",
            "type": "python",
            "llms": {"easy": "mock:mock", "medium": "mock:mock", "hard": "mock:mock", "xhard": "mock:mock"},
            "toolbox": {"functionClasses": ["TestFunctions"]},
            "functionCallHistory": [{"function_name": "TestFunctions.noop", "stdout": ""}]
        });
        let serialized = SerializedAgent::from_value(doc).unwrap();
        assert_eq!(serialized.iterations, 0);
        assert_eq!(serialized.protocol, AgentProtocol::Script);
        let record = resolver().deserialize(serialized).await.unwrap();
        assert!(record.functions.contains("TestFunctions"));
        assert!(record.function_call_history[0].parameters.is_empty());
    }

    #[tokio::test]
    async fn test_missing_type_defaults_to_xml() {
        let doc = json!({
            "agentId": "a1",
            "executionId": "e1",
            "user": "user",
            "state": "agent",
            "llms": {"hard": "mock:mock"}
        });
        let serialized = SerializedAgent::from_value(doc).unwrap();
        assert_eq!(serialized.protocol, AgentProtocol::Tag);
        let record = resolver().deserialize(serialized).await.unwrap();
        assert_eq!(record.llms.easy.id(), "mock:mock");
    }

    #[tokio::test]
    async fn test_cache_defaults_bound_on_deserialize() {
        let mut record = test_record();
        record.functions.add(Arc::new(TestFunctions));
        let defaults = CacheRetryOptions::default().with_retries(2);
        let restored = resolver()
            .with_cache_defaults(defaults.clone())
            .deserialize(serialize_agent(&record))
            .await
            .unwrap();
        assert_eq!(restored.functions.cache_defaults(), &defaults);
    }

    #[tokio::test]
    async fn test_unknown_user_fails() {
        let mut serialized = serialize_agent(&test_record());
        serialized.user = "stranger".into();
        assert!(matches!(
            resolver().deserialize(serialized).await,
            Err(AgentError::NotFound(_))
        ));
    }
}
