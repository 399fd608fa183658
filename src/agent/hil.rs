//! 人工介入（Human-in-the-Loop）
//!
//! HilGate 在每次迭代开始前检查：距上次批准的迭代数达到 hil_count，或花费超过 hil_budget 时，
//! 暂停并等待人工批准。两个值都为 0 时预算默认 2.0。

use std::fmt;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

/// 暂停原因
#[derive(Debug, Clone, PartialEq)]
pub enum HilTrigger {
    IterationCount(u32),
    Budget { spent: f64, budget: f64 },
}

impl fmt::Display for HilTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HilTrigger::IterationCount(n) => write!(f, "Agent control loop has performed {n} iterations"),
            HilTrigger::Budget { spent, budget } => {
                write!(f, "Agent cost has increased by ${spent:.2} (budget ${budget:.2})")
            }
        }
    }
}

const DEFAULT_HIL_BUDGET: f64 = 2.0;

/// 单次执行线程内的计数器（不持久化）
#[derive(Debug, Clone)]
pub struct HilGate {
    hil_budget: f64,
    hil_count: u32,
    count_since_hil: u32,
    cost_since_hil: f64,
    previous_cost: f64,
}

impl HilGate {
    /// starting_cost 为进入循环时的累计成本，之前的花费不计入本次预算
    pub fn new(hil_budget: f64, hil_count: u32, starting_cost: f64) -> Self {
        let hil_budget = if hil_budget <= 0.0 && hil_count == 0 {
            info!("Default Human in the Loop budget to ${}", DEFAULT_HIL_BUDGET);
            DEFAULT_HIL_BUDGET
        } else {
            hil_budget
        };
        Self {
            hil_budget,
            hil_count,
            count_since_hil: 0,
            cost_since_hil: 0.0,
            previous_cost: starting_cost,
        }
    }

    pub fn budget(&self) -> f64 {
        self.hil_budget
    }

    /// 迭代阈值检查；触发后计数清零
    pub fn check_iterations(&mut self) -> Option<HilTrigger> {
        if self.hil_count > 0 && self.count_since_hil >= self.hil_count {
            let trigger = HilTrigger::IterationCount(self.count_since_hil);
            self.count_since_hil = 0;
            return Some(trigger);
        }
        None
    }

    pub fn record_iteration(&mut self) {
        self.count_since_hil += 1;
    }

    /// 预算检查；total_cost 为当前累计成本，触发后花费清零
    pub fn check_budget(&mut self, total_cost: f64) -> Option<HilTrigger> {
        let new_costs = total_cost - self.previous_cost;
        self.previous_cost = total_cost;
        self.cost_since_hil += new_costs;
        debug!(
            "Spent ${:.2} since last input. Total cost ${:.2}",
            self.cost_since_hil, total_cost
        );
        if self.hil_budget > 0.0 && self.cost_since_hil > self.hil_budget {
            let trigger = HilTrigger::Budget {
                spent: self.cost_since_hil,
                budget: self.hil_budget,
            };
            self.cost_since_hil = 0.0;
            return Some(trigger);
        }
        None
    }
}

/// 人工决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HilDecision {
    /// 批准，继续执行
    Continue,
    /// 保持 hil 状态并结束执行线程，之后由 resume_hil 恢复
    Pause,
}

/// 人工批准通道
#[async_trait]
pub trait HumanInTheLoop: Send + Sync {
    async fn request_approval(&self, agent_id: &str, reason: &HilTrigger) -> HilDecision;
}

/// 自动批准（无人值守 / 测试）
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprove;

#[async_trait]
impl HumanInTheLoop for AutoApprove {
    async fn request_approval(&self, agent_id: &str, reason: &HilTrigger) -> HilDecision {
        info!(agent_id, reason = %reason, "Human-in-the-loop check auto approved");
        HilDecision::Continue
    }
}

/// 总是暂停，等待外部 resume_hil
#[derive(Debug, Default, Clone, Copy)]
pub struct PauseForResume;

#[async_trait]
impl HumanInTheLoop for PauseForResume {
    async fn request_approval(&self, agent_id: &str, reason: &HilTrigger) -> HilDecision {
        info!(agent_id, reason = %reason, "Human-in-the-loop threshold reached, pausing");
        HilDecision::Pause
    }
}

/// 发往审批方的请求
#[derive(Debug)]
pub struct ApprovalRequest {
    pub agent_id: String,
    pub reason: HilTrigger,
    pub respond: oneshot::Sender<HilDecision>,
}

/// 通过 channel 把审批请求交给外部（控制台、聊天机器人等）；
/// 接收端关闭或丢弃应答时视为 Pause
#[derive(Debug, Clone)]
pub struct ChannelApproval {
    tx: mpsc::Sender<ApprovalRequest>,
}

impl ChannelApproval {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<ApprovalRequest>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl HumanInTheLoop for ChannelApproval {
    async fn request_approval(&self, agent_id: &str, reason: &HilTrigger) -> HilDecision {
        let (respond, rx) = oneshot::channel();
        let request = ApprovalRequest {
            agent_id: agent_id.to_string(),
            reason: reason.clone(),
            respond,
        };
        if self.tx.send(request).await.is_err() {
            return HilDecision::Pause;
        }
        rx.await.unwrap_or(HilDecision::Pause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iteration_threshold() {
        let mut gate = HilGate::new(0.0, 2, 0.0);
        assert_eq!(gate.check_iterations(), None);
        gate.record_iteration();
        assert_eq!(gate.check_iterations(), None);
        gate.record_iteration();
        assert_eq!(gate.check_iterations(), Some(HilTrigger::IterationCount(2)));
        // 批准后重新计数
        assert_eq!(gate.check_iterations(), None);
    }

    #[test]
    fn test_budget_threshold_counts_new_costs_only() {
        let mut gate = HilGate::new(1.0, 0, 5.0);
        assert_eq!(gate.check_budget(5.5), None);
        assert!(matches!(gate.check_budget(6.2), Some(HilTrigger::Budget { .. })));
        assert_eq!(gate.check_budget(6.3), None);
    }

    #[test]
    fn test_default_budget_when_unset() {
        let gate = HilGate::new(0.0, 0, 0.0);
        assert!((gate.budget() - 2.0).abs() < f64::EPSILON);
        let gate = HilGate::new(0.0, 3, 0.0);
        assert_eq!(gate.budget(), 0.0);
    }

    #[tokio::test]
    async fn test_channel_approval() {
        let (hil, mut rx) = ChannelApproval::new(1);
        let handle = tokio::spawn(async move {
            hil.request_approval("a1", &HilTrigger::IterationCount(5)).await
        });
        let request = rx.recv().await.unwrap();
        assert_eq!(request.agent_id, "a1");
        request.respond.send(HilDecision::Continue).unwrap();
        assert_eq!(handle.await.unwrap(), HilDecision::Continue);
    }

    #[tokio::test]
    async fn test_channel_closed_pauses() {
        let (hil, rx) = ChannelApproval::new(1);
        drop(rx);
        assert_eq!(
            hil.request_approval("a1", &HilTrigger::IterationCount(1)).await,
            HilDecision::Pause
        );
    }
}
