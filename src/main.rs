//! Forager 状态查看
//!
//! 入口：初始化日志、加载配置、打开智能体存储，列出所有智能体；
//! `forager show <agentId>` 输出单个智能体的持久化文档。

use anyhow::Context;
use forager::config::{load_config, AppConfig};
use forager::observability;
use forager::store::create_store;
use tracing::warn;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config = match load_config(None) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            AppConfig::default()
        }
    };
    let store = create_store(&config.store);

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("show") => {
            let agent_id = args.get(1).context("Usage: forager show <agentId>")?;
            let doc = store
                .load(agent_id)
                .await
                .context("Failed to load agent")?
                .with_context(|| format!("Agent {agent_id} not found"))?;
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        _ => {
            let docs = store.list().await.context("Failed to list agents")?;
            if docs.is_empty() {
                println!("No agents in {}", config.store.path.display());
            }
            for doc in docs {
                println!(
                    "{}  {:<24} {:<10} iterations={:<4} cost=${:.4}",
                    doc.agent_id, doc.name, doc.state.as_str(), doc.iterations, doc.cost
                );
            }
        }
    }
    Ok(())
}
