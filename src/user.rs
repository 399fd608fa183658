//! 用户：身份与人工介入阈值
//!
//! 单用户模式下 current_user 即唯一用户；反序列化智能体时，id 与当前用户相同则直接复用，否则按 id 查询。

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::AgentError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: String,
    /// 每次人工批准之间允许花费的成本，0 表示未设置
    #[serde(default)]
    pub hil_budget: f64,
    /// 每次人工批准之间允许的迭代次数，0 表示未设置
    #[serde(default)]
    pub hil_count: u32,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: String::new(),
            hil_budget: 0.0,
            hil_count: 0,
        }
    }

    pub fn with_hil(mut self, budget: f64, count: u32) -> Self {
        self.hil_budget = budget;
        self.hil_count = count;
        self
    }
}

#[async_trait]
pub trait UserService: Send + Sync {
    async fn get_user(&self, id: &str) -> Result<User, AgentError>;

    fn current_user(&self) -> User;
}

/// 进程内用户服务
pub struct InMemoryUserService {
    current: User,
    users: RwLock<HashMap<String, User>>,
}

impl InMemoryUserService {
    pub fn new(current: User) -> Self {
        let mut users = HashMap::new();
        users.insert(current.id.clone(), current.clone());
        Self {
            current,
            users: RwLock::new(users),
        }
    }

    pub fn single_user() -> Self {
        Self::new(User::new("user"))
    }

    pub fn add_user(&self, user: User) {
        self.users
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(user.id.clone(), user);
    }
}

#[async_trait]
impl UserService for InMemoryUserService {
    async fn get_user(&self, id: &str) -> Result<User, AgentError> {
        self.users
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| AgentError::NotFound(format!("User {id}")))
    }

    fn current_user(&self) -> User {
        self.current.clone()
    }
}
