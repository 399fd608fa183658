//! 智能体运行状态
//!
//! agent -> functions -> (completed | feedback | hil | error) 或回到 agent。
//! error / feedback / hil 只能由外部恢复操作带回 agent。

use std::fmt;

use serde::{Deserialize, Serialize};

/// 控制循环状态（持久化为小写字符串）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRunningState {
    /// 即将调用模型规划下一步
    Agent,
    /// 正在执行模型选择的函数调用
    Functions,
    /// 已调用完成动作
    Completed,
    /// 等待人工反馈
    Feedback,
    /// 达到预算 / 迭代阈值，等待人工批准
    Hil,
    /// 致命错误
    Error,
}

impl AgentRunningState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRunningState::Agent => "agent",
            AgentRunningState::Functions => "functions",
            AgentRunningState::Completed => "completed",
            AgentRunningState::Feedback => "feedback",
            AgentRunningState::Hil => "hil",
            AgentRunningState::Error => "error",
        }
    }

    /// 是否仍有活跃的执行线程
    pub fn is_executing(&self) -> bool {
        matches!(self, AgentRunningState::Agent | AgentRunningState::Functions)
    }
}

impl fmt::Display for AgentRunningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serializes_lowercase() {
        let s = serde_json::to_string(&AgentRunningState::Feedback).unwrap();
        assert_eq!(s, "\"feedback\"");
        let back: AgentRunningState = serde_json::from_str("\"hil\"").unwrap();
        assert_eq!(back, AgentRunningState::Hil);
    }

    #[test]
    fn test_is_executing() {
        assert!(AgentRunningState::Agent.is_executing());
        assert!(AgentRunningState::Functions.is_executing());
        assert!(!AgentRunningState::Completed.is_executing());
        assert!(!AgentRunningState::Error.is_executing());
    }
}
