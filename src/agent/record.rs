//! 智能体记录：一次自主任务的全部可持久化状态

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::agent::{extract_user_request, CompletedHandler, ConsoleCompletedHandler};
use crate::config::AgentSection;
use crate::core::AgentRunningState;
use crate::functions::{FileSystem, FunctionCall, FunctionCallResult, LlmFunctions, FILE_SYSTEM_CLASS};
use crate::llm::{LlmClient, Message};
use crate::user::User;

/// 模型档位
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskLevel {
    Easy,
    Medium,
    Hard,
    Xhard,
}

/// 动作协议：tag 为 XML 函数调用块，script 为模型生成的脚本
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AgentProtocol {
    #[default]
    #[serde(rename = "xml")]
    Tag,
    #[serde(rename = "codegen", alias = "python")]
    Script,
}

/// 四个档位的模型
#[derive(Clone)]
pub struct AgentLlms {
    pub easy: Arc<dyn LlmClient>,
    pub medium: Arc<dyn LlmClient>,
    pub hard: Arc<dyn LlmClient>,
    pub xhard: Arc<dyn LlmClient>,
}

impl AgentLlms {
    /// 所有档位使用同一个模型
    pub fn uniform(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            easy: llm.clone(),
            medium: llm.clone(),
            hard: llm.clone(),
            xhard: llm,
        }
    }

    pub fn get(&self, level: TaskLevel) -> Arc<dyn LlmClient> {
        match level {
            TaskLevel::Easy => self.easy.clone(),
            TaskLevel::Medium => self.medium.clone(),
            TaskLevel::Hard => self.hard.clone(),
            TaskLevel::Xhard => self.xhard.clone(),
        }
    }

    pub fn ids(&self) -> LlmIds {
        LlmIds {
            easy: Some(self.easy.id()),
            medium: Some(self.medium.id()),
            hard: Some(self.hard.id()),
            xhard: Some(self.xhard.id()),
        }
    }
}

/// 持久化的模型 id
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmIds {
    #[serde(default)]
    pub easy: Option<String>,
    #[serde(default)]
    pub medium: Option<String>,
    #[serde(default)]
    pub hard: Option<String>,
    #[serde(default)]
    pub xhard: Option<String>,
}

/// 人工介入阈值；未设置的值取用户配置，再取默认配置
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HumanInLoopSettings {
    pub budget: Option<f64>,
    pub count: Option<u32>,
}

/// 创建 / 恢复智能体的参数
#[derive(Clone)]
pub struct RunAgentConfig {
    pub agent_name: String,
    pub initial_prompt: String,
    pub system_prompt: Option<String>,
    pub protocol: Option<AgentProtocol>,
    pub llms: AgentLlms,
    pub functions: LlmFunctions,
    pub user: User,
    pub human_in_loop: HumanInLoopSettings,
    /// 使用已有的 agentId（覆盖同 id 的记录）
    pub resume_agent_id: Option<String>,
    pub parent_agent_id: Option<String>,
    pub file_system_path: Option<PathBuf>,
    pub metadata: Map<String, Value>,
    pub completed_handler: Option<Arc<dyn CompletedHandler>>,
}

impl RunAgentConfig {
    pub fn new(agent_name: impl Into<String>, initial_prompt: impl Into<String>, llms: AgentLlms, user: User) -> Self {
        Self {
            agent_name: agent_name.into(),
            initial_prompt: initial_prompt.into(),
            system_prompt: None,
            protocol: None,
            llms,
            functions: LlmFunctions::new(),
            user,
            human_in_loop: HumanInLoopSettings::default(),
            resume_agent_id: None,
            parent_agent_id: None,
            file_system_path: None,
            metadata: Map::new(),
            completed_handler: None,
        }
    }

    pub fn with_functions(mut self, functions: LlmFunctions) -> Self {
        self.functions = functions;
        self
    }

    pub fn with_protocol(mut self, protocol: AgentProtocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_human_in_loop(mut self, budget: Option<f64>, count: Option<u32>) -> Self {
        self.human_in_loop = HumanInLoopSettings { budget, count };
        self
    }

    pub fn with_file_system_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_system_path = Some(path.into());
        self
    }

    pub fn with_completed_handler(mut self, handler: Arc<dyn CompletedHandler>) -> Self {
        self.completed_handler = Some(handler);
        self
    }

    pub fn with_parent(mut self, parent_agent_id: impl Into<String>) -> Self {
        self.parent_agent_id = Some(parent_agent_id.into());
        self
    }
}

/// 智能体记录
#[derive(Clone)]
pub struct AgentRecord {
    pub agent_id: String,
    /// 每次（重新）进入控制循环都会换新，用于拒绝过期的恢复请求
    pub execution_id: String,
    pub parent_agent_id: Option<String>,
    pub name: String,
    pub user: User,
    pub state: AgentRunningState,
    pub iterations: u32,
    pub call_stack: Vec<String>,
    pub error: Option<String>,
    pub protocol: AgentProtocol,
    /// 从初始提示中提取的 `<user_request>` 内容
    pub user_prompt: String,
    /// 下一次调用模型的提示
    pub input_prompt: String,
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    pub notes: Vec<String>,
    pub function_call_history: Vec<FunctionCallResult>,
    /// 当前迭代待执行的函数调用
    pub invoking: Vec<FunctionCall>,
    pub llms: AgentLlms,
    pub cost: f64,
    pub budget_remaining: f64,
    pub hil_budget: f64,
    pub hil_count: u32,
    pub functions: LlmFunctions,
    pub file_system: Arc<FileSystem>,
    pub memory: BTreeMap<String, String>,
    pub metadata: Map<String, Value>,
    pub completed_handler: Arc<dyn CompletedHandler>,
    /// 最后保存时间（毫秒时间戳）
    pub last_update: i64,
}

impl AgentRecord {
    /// 用运行参数和默认配置创建新记录（状态为 agent）
    pub fn create(config: RunAgentConfig, defaults: &AgentSection) -> Self {
        let hil_budget = config
            .human_in_loop
            .budget
            .unwrap_or(if config.user.hil_budget > 0.0 {
                config.user.hil_budget
            } else {
                defaults.hil_budget
            });
        let hil_count = config
            .human_in_loop
            .count
            .unwrap_or(if config.user.hil_count > 0 {
                config.user.hil_count
            } else {
                defaults.hil_count
            });

        let fs_root = config
            .file_system_path
            .or_else(|| defaults.file_system_root.clone())
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let file_system = Arc::new(FileSystem::new(fs_root));

        let mut functions = config.functions;
        // 能力集合中的 FileSystem 与记录的文件系统是同一实例
        if functions.contains(FILE_SYSTEM_CLASS) {
            functions.add(file_system.clone());
        }

        let (user_prompt, input_prompt) = extract_user_request(&config.initial_prompt);

        Self {
            agent_id: config
                .resume_agent_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            execution_id: Uuid::new_v4().to_string(),
            parent_agent_id: config.parent_agent_id,
            name: config.agent_name,
            user: config.user,
            state: AgentRunningState::Agent,
            iterations: 0,
            call_stack: Vec::new(),
            error: None,
            protocol: config.protocol.unwrap_or(defaults.protocol),
            user_prompt,
            input_prompt,
            system_prompt: config.system_prompt,
            messages: Vec::new(),
            notes: Vec::new(),
            function_call_history: Vec::new(),
            invoking: Vec::new(),
            llms: config.llms,
            cost: 0.0,
            budget_remaining: hil_budget,
            hil_budget,
            hil_count,
            functions,
            file_system,
            memory: BTreeMap::new(),
            metadata: config.metadata,
            completed_handler: config
                .completed_handler
                .unwrap_or_else(|| Arc::new(ConsoleCompletedHandler)),
            last_update: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn last_function_call(&self) -> Option<&FunctionCallResult> {
        self.function_call_history.last()
    }
}

impl std::fmt::Debug for AgentRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRecord")
            .field("agent_id", &self.agent_id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("iterations", &self.iterations)
            .field("cost", &self.cost)
            .finish_non_exhaustive()
    }
}
