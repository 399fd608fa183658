//! 函数调用及其结果（持久化在智能体记录中）

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 按参数名传入的参数（保持模型给出的顺序）
pub type FunctionArgs = Map<String, Value>;

/// 模型请求的一次函数调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub function_name: String,
    #[serde(default)]
    pub parameters: FunctionArgs,
}

impl FunctionCall {
    pub fn new(function_name: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            parameters: FunctionArgs::new(),
        }
    }

    pub fn arg(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.to_string(), value.into());
        self
    }
}

/// 已执行的函数调用：stdout 为成功结果，stderr 为失败信息；*_summary 为长输出的摘要
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallResult {
    pub function_name: String,
    #[serde(default)]
    pub parameters: FunctionArgs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(rename = "stdoutSummary", default, skip_serializing_if = "Option::is_none")]
    pub stdout_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(rename = "stderrSummary", default, skip_serializing_if = "Option::is_none")]
    pub stderr_summary: Option<String>,
}

impl FunctionCallResult {
    pub fn success(call: &FunctionCall, stdout: impl Into<String>) -> Self {
        Self {
            function_name: call.function_name.clone(),
            parameters: call.parameters.clone(),
            stdout: Some(stdout.into()),
            stdout_summary: None,
            stderr: None,
            stderr_summary: None,
        }
    }

    pub fn failure(call: &FunctionCall, stderr: impl Into<String>) -> Self {
        Self {
            function_name: call.function_name.clone(),
            parameters: call.parameters.clone(),
            stdout: None,
            stdout_summary: None,
            stderr: Some(stderr.into()),
            stderr_summary: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.stderr.is_some()
    }
}

/// 函数返回值转为 stdout 文本：字符串原样，Null 为空串，其它为 JSON
pub fn value_to_output(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_legacy_result_without_parameters() {
        let r: FunctionCallResult =
            serde_json::from_value(json!({"function_name": "A.b", "stdout": "1"})).unwrap();
        assert!(r.parameters.is_empty());
        assert_eq!(r.stdout.as_deref(), Some("1"));
    }

    #[test]
    fn test_summary_field_names() {
        let mut r = FunctionCallResult::success(&FunctionCall::new("A.b"), "long");
        r.stdout_summary = Some("short".into());
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["stdoutSummary"], "short");
        assert!(v.get("stderr").is_none());
    }

    #[test]
    fn test_value_to_output() {
        assert_eq!(value_to_output(&json!("x")), "x");
        assert_eq!(value_to_output(&Value::Null), "");
        assert_eq!(value_to_output(&json!(9)), "9");
        assert_eq!(value_to_output(&json!({"a": 1})), "{\"a\":1}");
    }
}
