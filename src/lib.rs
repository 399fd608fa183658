//! Forager - 可检查点、可恢复的自主任务执行引擎
//!
//! 模块划分：
//! - **agent**: 智能体记录、上下文句柄、控制循环、人工介入与恢复操作
//! - **cache**: 能力调用的缓存 / 重试层
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、运行状态、解析失败恢复策略
//! - **functions**: 能力注册、内置 Agent 能力、FileSystem
//! - **llm**: 模型接口、Mock、注册表、重试装饰
//! - **observability**: 日志初始化
//! - **protocol**: 标签协议与脚本协议
//! - **store**: 智能体状态持久化
//! - **user**: 用户与用户服务

pub mod agent;
pub mod cache;
pub mod config;
pub mod core;
pub mod functions;
pub mod llm;
pub mod observability;
pub mod protocol;
pub mod store;
pub mod user;
