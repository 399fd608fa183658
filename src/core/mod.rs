//! 核心层：错误类型、运行状态、协议错误恢复

pub mod error;
pub mod recovery;
pub mod state;

pub use error::{AgentError, FunctionError};
pub use recovery::{RecoveryAction, RecoveryEngine};
pub use state::AgentRunningState;
