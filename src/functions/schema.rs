//! 函数 Schema：能力类对模型暴露的方法描述
//!
//! 名称格式为 `Class.method`；脚本协议中使用 `Class_method` 作为可调用符号。

use serde::{Deserialize, Serialize};

/// 类名与方法名之间的分隔符
pub const FUNC_SEP: &str = ".";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionParameter {
    pub index: usize,
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionSchema {
    pub class: String,
    pub method: String,
    pub description: String,
    pub parameters: Vec<FunctionParameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<String>,
}

impl FunctionSchema {
    pub fn new(class: impl Into<String>, method: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            method: method.into(),
            description: description.into(),
            parameters: Vec::new(),
            returns: None,
        }
    }

    pub fn param(self, name: &str, param_type: &str, description: &str) -> Self {
        self.push_param(name, param_type, description, false)
    }

    pub fn optional_param(self, name: &str, param_type: &str, description: &str) -> Self {
        self.push_param(name, param_type, description, true)
    }

    fn push_param(mut self, name: &str, param_type: &str, description: &str, optional: bool) -> Self {
        let index = self.parameters.len();
        self.parameters.push(FunctionParameter {
            index,
            name: name.to_string(),
            param_type: param_type.to_string(),
            description: description.to_string(),
            optional,
        });
        self
    }

    pub fn returns(mut self, description: &str) -> Self {
        self.returns = Some(description.to_string());
        self
    }

    /// `Class.method`
    pub fn name(&self) -> String {
        format!("{}{}{}", self.class, FUNC_SEP, self.method)
    }

    /// 脚本中的可调用符号 `Class_method`
    pub fn script_symbol(&self) -> String {
        format!("{}_{}", self.class, self.method)
    }
}

/// 拆分 `Class.method`
pub fn split_function_name(name: &str) -> Option<(&str, &str)> {
    let (class, method) = name.split_once(FUNC_SEP)?;
    if class.is_empty() || method.is_empty() {
        return None;
    }
    Some((class, method))
}
