//! 测试用能力：求和、空操作、抛错、调用模型

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agent::{AgentContext, TaskLevel};
use crate::core::FunctionError;
use crate::functions::{arg_f64, Capability, FunctionSchema};
use crate::llm::{generate_tracked, GenerateOptions, LlmInput};

pub const TEST_FUNC_SUM: &str = "TestFunctions.sum";
pub const TEST_FUNC_NOOP: &str = "TestFunctions.noop";
pub const TEST_FUNC_THROW_ERROR: &str = "TestFunctions.throwError";
pub const TEST_FUNC_SKY_COLOUR: &str = "TestFunctions.skyColour";
pub const THROW_ERROR_TEXT: &str = "FunctionErrorText";

#[derive(Debug, Default, Clone, Copy)]
pub struct TestFunctions;

#[async_trait]
impl Capability for TestFunctions {
    fn class_name(&self) -> &str {
        "TestFunctions"
    }

    fn schemas(&self) -> Vec<FunctionSchema> {
        vec![
            FunctionSchema::new("TestFunctions", "sum", "Calculates the sum of two numbers")
                .param("num1", "number", "The first number")
                .param("num2", "number", "The second number")
                .returns("The sum of the numbers"),
            FunctionSchema::new("TestFunctions", "noop", "Does nothing"),
            FunctionSchema::new("TestFunctions", "throwError", "This function always throws an error"),
            FunctionSchema::new("TestFunctions", "skyColour", "Asks the easy LLM what colour the day sky is")
                .returns("The colour of the sky"),
        ]
    }

    async fn call(&self, ctx: &AgentContext, method: &str, args: &[Value]) -> Result<Value, FunctionError> {
        match method {
            "sum" => {
                let total = arg_f64(args, 0)? + arg_f64(args, 1)?;
                if total.fract() == 0.0 && total.abs() < i64::MAX as f64 {
                    Ok(json!(total as i64))
                } else {
                    Ok(json!(total))
                }
            }
            "noop" => Ok(Value::Null),
            "throwError" => Err(FunctionError::fatal(THROW_ERROR_TEXT)),
            "skyColour" => {
                let llm = ctx.llm(TaskLevel::Easy);
                let text = generate_tracked(
                    llm.as_ref(),
                    ctx,
                    &LlmInput::text("What colour is the day sky? Answer in one word."),
                    &GenerateOptions::with_id("skyColour"),
                )
                .await?;
                Ok(Value::String(text))
            }
            other => Err(FunctionError::fatal(format!("TestFunctions.{other} does not exist"))),
        }
    }
}
