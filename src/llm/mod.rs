//! LLM 层：客户端抽象、Mock 实现、注册表与重试包装

pub mod mock;
pub mod registry;
pub mod retry;
pub mod traits;

pub use mock::MockLlmClient;
pub use registry::LlmRegistry;
pub use retry::{RetryConfig, RetryingLlmClient};
pub use traits::{generate_tracked, GenerateOptions, LlmClient, LlmError, LlmInput, Message, Role};
