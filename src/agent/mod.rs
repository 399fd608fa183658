//! 智能体：记录、上下文、控制循环与恢复操作

pub mod completion;
pub mod context;
pub mod hil;
pub mod prompt;
pub mod record;
pub mod runner;
pub mod serialization;

#[cfg(test)]
pub(crate) mod testing;

pub use completion::{
    completed_notification_message, last_function_call_arg, state_notification_message, CompletedHandler,
    CompletedHandlerRegistry, ConsoleCompletedHandler, CONSOLE_COMPLETED_HANDLER_ID,
};
pub use context::{AgentContext, CallFrame};
pub use hil::{
    ApprovalRequest, AutoApprove, ChannelApproval, HilDecision, HilGate, HilTrigger, HumanInTheLoop, PauseForResume,
};
pub use prompt::{
    build_context_prompt, build_file_system_prompt, build_function_call_history_prompt, build_memory_prompt,
    extract_user_request, strip_context_prompt, summarise_long_output, update_function_definitions,
};
pub use record::{AgentLlms, AgentProtocol, AgentRecord, HumanInLoopSettings, LlmIds, RunAgentConfig, TaskLevel};
pub use runner::{AgentRunner, SUPERVISOR_CANCELLED_FUNCTION_NAME, SUPERVISOR_RESUMED_FUNCTION_NAME};
pub use serialization::{serialize_agent, AgentResolver, SerializedAgent, SerializedFunctions};
