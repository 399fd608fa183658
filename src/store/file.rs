//! 文件存储：每个智能体一个 `<agentId>.json`，先写临时文件再重命名

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::warn;

use crate::agent::SerializedAgent;
use crate::core::AgentError;
use crate::store::traits::sort_by_last_update;
use crate::store::AgentStore;

#[derive(Debug, Clone)]
pub struct FileAgentStore {
    dir: PathBuf,
}

fn store_err(e: std::io::Error) -> AgentError {
    AgentError::Store(e.to_string())
}

impl FileAgentStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, agent_id: &str) -> Result<PathBuf, AgentError> {
        if agent_id.is_empty()
            || agent_id
                .chars()
                .any(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        {
            return Err(AgentError::Store(format!("Invalid agent id {agent_id}")));
        }
        Ok(self.dir.join(format!("{agent_id}.json")))
    }
}

#[async_trait]
impl AgentStore for FileAgentStore {
    async fn save(&self, doc: &SerializedAgent) -> Result<(), AgentError> {
        let path = self.path_for(&doc.agent_id)?;
        tokio::fs::create_dir_all(&self.dir).await.map_err(store_err)?;
        let data = serde_json::to_string_pretty(doc)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await.map_err(store_err)?;
        tokio::fs::rename(&tmp, &path).await.map_err(store_err)?;
        Ok(())
    }

    async fn load(&self, agent_id: &str) -> Result<Option<SerializedAgent>, AgentError> {
        let path = self.path_for(agent_id)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(store_err(e)),
        }
    }

    async fn list(&self) -> Result<Vec<SerializedAgent>, AgentError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(store_err(e)),
        };
        let mut docs = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(store_err)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = tokio::fs::read_to_string(&path).await.map_err(store_err)?;
            match serde_json::from_str::<SerializedAgent>(&data) {
                Ok(doc) => docs.push(doc),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable agent file"),
            }
        }
        sort_by_last_update(&mut docs);
        Ok(docs)
    }

    async fn delete(&self, agent_ids: &[String]) -> Result<(), AgentError> {
        for id in agent_ids {
            let path = self.path_for(id)?;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(store_err(e)),
            }
        }
        Ok(())
    }
}
