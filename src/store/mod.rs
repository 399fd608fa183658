//! 智能体状态持久化：存储后端与状态服务

pub mod file;
pub mod memory;
pub mod traits;

use std::sync::Arc;

pub use file::FileAgentStore;
pub use memory::InMemoryAgentStore;
pub use traits::{AgentStateService, AgentStore};

use crate::config::{StoreKind, StoreSection};

/// 按配置创建存储后端
pub fn create_store(config: &StoreSection) -> Arc<dyn AgentStore> {
    match config.kind {
        StoreKind::Memory => Arc::new(InMemoryAgentStore::new()),
        StoreKind::File => Arc::new(FileAgentStore::new(&config.path)),
    }
}
