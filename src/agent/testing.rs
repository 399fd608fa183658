//! 单元测试辅助

use std::sync::Arc;

use crate::agent::{AgentContext, AgentLlms, AgentRecord, RunAgentConfig};
use crate::config::AgentSection;
use crate::llm::MockLlmClient;
use crate::user::User;

pub(crate) fn test_record() -> AgentRecord {
    let config = RunAgentConfig::new(
        "test-agent",
        "<user_request>test</user_request>",
        AgentLlms::uniform(Arc::new(MockLlmClient::new())),
        User::new("user"),
    )
    .with_file_system_path(std::env::temp_dir());
    AgentRecord::create(config, &AgentSection::default())
}

pub(crate) fn test_context() -> AgentContext {
    AgentContext::new(test_record())
}
