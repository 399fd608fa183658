//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `FORAGER__*` 覆盖（双下划线表示嵌套，如 `FORAGER__AGENT__HIL_COUNT=10`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::agent::AgentProtocol;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub agent: AgentSection,
    pub cache: CacheSection,
    pub store: StoreSection,
    pub script: ScriptSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [agent] 段：人工介入默认阈值、协议、提示长度
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// 用户未设置时的默认预算
    pub hil_budget: f64,
    /// 用户未设置时的默认迭代次数
    pub hil_count: u32,
    pub protocol: AgentProtocol,
    /// 历史提示的最大字符数
    pub history_max_chars: usize,
    /// 超过该长度的函数输出会生成摘要
    pub summarize_threshold_chars: usize,
    /// 智能体文件系统根目录，未设置时用当前目录
    pub file_system_root: Option<PathBuf>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            hil_budget: 2.0,
            hil_count: 5,
            protocol: AgentProtocol::default(),
            history_max_chars: 10_000,
            summarize_threshold_chars: 2_000,
            file_system_root: None,
        }
    }
}

/// [cache] 段：函数缓存与默认重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub retries: u32,
    pub backoff_ms: u64,
    pub ttl_secs: Option<u64>,
    pub max_entries: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            retries: 5,
            backoff_ms: 250,
            ttl_secs: None,
            max_entries: 4096,
        }
    }
}

impl CacheSection {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    #[default]
    File,
}

/// [store] 段：智能体状态存储
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub kind: StoreKind,
    pub path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            kind: StoreKind::File,
            path: PathBuf::from("./.forager/agents"),
        }
    }
}

/// [script] 段：脚本协议解释器限制
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScriptSection {
    pub max_operations: u64,
    pub max_call_depth: usize,
}

impl Default for ScriptSection {
    fn default() -> Self {
        Self {
            max_operations: 1_000_000,
            max_call_depth: 64,
        }
    }
}

/// 从 config 目录加载配置，环境变量 FORAGER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 FORAGER__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("FORAGER")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
