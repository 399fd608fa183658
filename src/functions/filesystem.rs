//! 沙箱文件系统能力
//!
//! FileSystem 绑定 base_path，工作目录相对于 base_path 保存。以 `/` 开头的路径相对于 base_path，
//! 其余相对于工作目录；所有路径先做词法规范化，`..` 不能越过 base_path。
//! 词法检查之后再对已存在的最长前缀取真实路径，经符号链接指到 base_path 之外的路径同样拒绝。

use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;
use walkdir::WalkDir;

use crate::agent::AgentContext;
use crate::core::FunctionError;
use crate::functions::{arg_str, Capability, FunctionSchema};

pub const FILE_SYSTEM_CLASS: &str = "FileSystem";

/// 持久化形式
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSystemState {
    pub base_path: PathBuf,
    #[serde(default)]
    pub working_directory: PathBuf,
}

#[derive(Debug)]
pub struct FileSystem {
    base_path: PathBuf,
    /// 相对于 base_path
    working_directory: Mutex<PathBuf>,
}

impl FileSystem {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        let base = base_path.as_ref().to_path_buf();
        let base_path = base.canonicalize().unwrap_or(base);
        Self {
            base_path,
            working_directory: Mutex::new(PathBuf::new()),
        }
    }

    pub fn from_state(state: &FileSystemState) -> Self {
        let fs = Self {
            base_path: state.base_path.clone(),
            working_directory: Mutex::new(PathBuf::new()),
        };
        // 旧记录可能存了越界路径，规范化失败时回到根目录
        *fs.cwd() = normalize(&state.working_directory).unwrap_or_default();
        fs
    }

    pub fn to_state(&self) -> FileSystemState {
        FileSystemState {
            base_path: self.base_path.clone(),
            working_directory: self.cwd().clone(),
        }
    }

    fn cwd(&self) -> MutexGuard<'_, PathBuf> {
        self.working_directory
            .lock()
            .unwrap_or_else(|p| p.into_inner())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// 工作目录的完整路径
    pub fn working_directory(&self) -> PathBuf {
        self.base_path.join(&*self.cwd())
    }

    fn relative(&self, path: &str) -> Option<PathBuf> {
        let p = Path::new(path);
        let joined = if let Ok(stripped) = p.strip_prefix(&self.base_path) {
            stripped.to_path_buf()
        } else if let Some(rest) = path.strip_prefix('/') {
            PathBuf::from(rest)
        } else {
            self.cwd().join(p)
        };
        normalize(&joined)
    }

    /// 解析为 base_path 下的完整路径
    pub fn resolve(&self, path: &str) -> Result<PathBuf, FunctionError> {
        let full = self
            .relative(path)
            .map(|rel| self.base_path.join(rel))
            .ok_or_else(|| outside_root(path))?;
        self.ensure_contained(&full, path)?;
        Ok(full)
    }

    /// 目标可能尚不存在，取最近的已存在祖先的真实路径比较
    fn ensure_contained(&self, full: &Path, path: &str) -> Result<(), FunctionError> {
        let root = self
            .base_path
            .canonicalize()
            .unwrap_or_else(|_| self.base_path.clone());
        for ancestor in full.ancestors() {
            match ancestor.canonicalize() {
                Ok(real) if real.starts_with(&root) => return Ok(()),
                Ok(real) => {
                    debug!(path, real = %real.display(), "path resolves outside base path");
                    break;
                }
                // 悬空的符号链接
                Err(_) if ancestor.symlink_metadata().is_ok() => break,
                Err(_) => continue,
            }
        }
        Err(outside_root(path))
    }

    /// 切换工作目录；越过 base_path 时回到 base_path
    pub fn set_working_directory(&self, dir: &str) -> Result<(), FunctionError> {
        let rel = match self.relative(dir) {
            Some(rel) => rel,
            None => {
                debug!(dir, "working directory above base path, resetting to base");
                PathBuf::new()
            }
        };
        let full = self.base_path.join(&rel);
        self.ensure_contained(&full, dir)?;
        if !full.is_dir() {
            return Err(FunctionError::fatal(format!("{} is not a directory", full.display())));
        }
        *self.cwd() = rel;
        Ok(())
    }

    pub async fn read_file(&self, path: &str) -> Result<String, FunctionError> {
        let resolved = self.resolve(path)?;
        tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| FunctionError::fatal(format!("Read failed for {path}: {e}")))
    }

    pub async fn write_file(&self, path: &str, contents: &str) -> Result<(), FunctionError> {
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FunctionError::fatal(format!("Create dir failed: {e}")))?;
        }
        tokio::fs::write(&resolved, contents)
            .await
            .map_err(|e| FunctionError::fatal(format!("Write failed for {path}: {e}")))
    }

    pub fn file_exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.exists()).unwrap_or(false)
    }

    /// 列出目录下的直接子项（目录以 `/` 结尾，跳过隐藏文件）
    pub fn list_dir(&self, path: &str) -> Result<Vec<String>, FunctionError> {
        let base = self.resolve(path)?;
        let mut entries = Vec::new();
        for e in std::fs::read_dir(&base)
            .map_err(|e| FunctionError::fatal(format!("List failed: {e}")))?
        {
            let e = e.map_err(|e| FunctionError::fatal(e.to_string()))?;
            let name = e.file_name().to_string_lossy().to_string();
            if !name.starts_with('.') {
                let ty = if e.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    "/"
                } else {
                    ""
                };
                entries.push(format!("{}{}", name, ty));
            }
        }
        entries.sort();
        Ok(entries)
    }

    /// 递归列出文件，路径相对于 path 所指目录
    pub fn list_files_recursively(&self, path: &str) -> Result<Vec<String>, FunctionError> {
        let root = self.resolve(path)?;
        let mut files: Vec<String> = WalkDir::new(&root)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                e.path()
                    .strip_prefix(&root)
                    .ok()
                    .map(|p| p.to_string_lossy().to_string())
            })
            .collect();
        files.sort();
        Ok(files)
    }

    pub fn search_files_matching_name(&self, pattern: &str) -> Result<Vec<String>, FunctionError> {
        let re = Regex::new(pattern).map_err(|e| FunctionError::fatal(format!("Invalid regex: {e}")))?;
        Ok(self
            .list_files_recursively("")?
            .into_iter()
            .filter(|f| {
                Path::new(f)
                    .file_name()
                    .map(|n| re.is_match(&n.to_string_lossy()))
                    .unwrap_or(false)
            })
            .collect())
    }
}

fn outside_root(path: &str) -> FunctionError {
    FunctionError::fatal(format!("Path {path} is outside the file system root"))
}

/// 词法规范化；`..` 越过起点时返回 None
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(c) => out.push(c),
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    Some(out)
}

#[async_trait]
impl Capability for FileSystem {
    fn class_name(&self) -> &str {
        FILE_SYSTEM_CLASS
    }

    fn schemas(&self) -> Vec<FunctionSchema> {
        let path_desc = "A path starting with / is relative to the file system root, otherwise relative to the working directory";
        vec![
            FunctionSchema::new(FILE_SYSTEM_CLASS, "getWorkingDirectory", "Gets the current working directory")
                .returns("The full path of the working directory"),
            FunctionSchema::new(FILE_SYSTEM_CLASS, "setWorkingDirectory", "Sets the working directory")
                .param("dir", "string", path_desc),
            FunctionSchema::new(
                FILE_SYSTEM_CLASS,
                "listFiles",
                "Lists the files and folders in a directory. Folder names end with /",
            )
            .param("dirPath", "string", path_desc)
            .returns("The file and folder names"),
            FunctionSchema::new(
                FILE_SYSTEM_CLASS,
                "listFilesRecursively",
                "Lists all the files under a directory, excluding hidden files and folders",
            )
            .optional_param("dirPath", "string", "Defaults to the working directory")
            .returns("The file paths relative to the directory"),
            FunctionSchema::new(FILE_SYSTEM_CLASS, "readFile", "Gets the contents of a file")
                .param("filePath", "string", path_desc)
                .returns("The file contents"),
            FunctionSchema::new(FILE_SYSTEM_CLASS, "fileExists", "Checks if a file exists")
                .param("filePath", "string", path_desc)
                .returns("true if the file exists"),
            FunctionSchema::new(
                FILE_SYSTEM_CLASS,
                "writeFile",
                "Writes to a file, creating parent directories. Overwrites existing contents",
            )
            .param("filePath", "string", path_desc)
            .param("contents", "string", "The contents to write"),
            FunctionSchema::new(
                FILE_SYSTEM_CLASS,
                "searchFilesMatchingName",
                "Searches for files whose name matches a regular expression",
            )
            .param("fileNameRegex", "string", "The regular expression")
            .returns("The matching file paths relative to the working directory"),
        ]
    }

    async fn call(&self, _ctx: &AgentContext, method: &str, args: &[Value]) -> Result<Value, FunctionError> {
        match method {
            "getWorkingDirectory" => Ok(json!(self.working_directory().to_string_lossy())),
            "setWorkingDirectory" => {
                self.set_working_directory(&arg_str(args, 0))?;
                Ok(Value::Null)
            }
            "listFiles" => Ok(json!(self.list_dir(&arg_str(args, 0))?)),
            "listFilesRecursively" => Ok(json!(self.list_files_recursively(&arg_str(args, 0))?)),
            "readFile" => Ok(Value::String(self.read_file(&arg_str(args, 0)).await?)),
            "fileExists" => Ok(json!(self.file_exists(&arg_str(args, 0)))),
            "writeFile" => {
                self.write_file(&arg_str(args, 0), &arg_str(args, 1)).await?;
                Ok(Value::Null)
            }
            "searchFilesMatchingName" => Ok(json!(self.search_files_matching_name(&arg_str(args, 0))?)),
            other => Err(FunctionError::fatal(format!("{FILE_SYSTEM_CLASS}.{other} does not exist"))),
        }
    }
}
