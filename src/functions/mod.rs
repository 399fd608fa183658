//! 能力层：函数 Schema、注册表、内置 Agent 能力、文件系统与测试能力

pub mod agent_functions;
pub mod call;
pub mod filesystem;
pub mod registry;
pub mod schema;
pub mod testing;

use serde_json::Value;

use crate::core::FunctionError;

pub use agent_functions::{
    is_terminal_function, AgentFunctions, AGENT_COMPLETED_NAME, AGENT_COMPLETED_PARAM_NAME, AGENT_GET_MEMORY,
    AGENT_REQUEST_FEEDBACK, AGENT_SAVE_MEMORY, REQUEST_FEEDBACK_PARAM_NAME,
};
pub use call::{value_to_output, FunctionArgs, FunctionCall, FunctionCallResult};
pub use filesystem::{FileSystem, FileSystemState, FILE_SYSTEM_CLASS};
pub use registry::{Capability, CapabilityConstructor, FunctionFactory, LlmFunctions};
pub use schema::{split_function_name, FunctionParameter, FunctionSchema, FUNC_SEP};
pub use testing::{
    TestFunctions, TEST_FUNC_NOOP, TEST_FUNC_SKY_COLOUR, TEST_FUNC_SUM, TEST_FUNC_THROW_ERROR, THROW_ERROR_TEXT,
};

/// 第 i 个参数转为字符串；Null / 缺失为空串
pub fn arg_str(args: &[Value], i: usize) -> String {
    match args.get(i) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// 第 i 个参数转为数字；标签协议的参数都是字符串，这里一并解析
pub fn arg_f64(args: &[Value], i: usize) -> Result<f64, FunctionError> {
    match args.get(i) {
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| FunctionError::fatal(format!("Argument {i} is not a number"))),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| FunctionError::fatal(format!("Argument {i} is not a number: {s}"))),
        other => Err(FunctionError::fatal(format!("Argument {i} is not a number: {other:?}"))),
    }
}
