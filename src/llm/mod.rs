//! 模型层：补全后端（OpenAI 兼容 / Mock）、输出解析、编排层模型适配

pub mod mock;
pub mod openai;
pub mod parse;
pub mod prompted;
pub mod traits;

pub use mock::{MockLlmClient, ScriptStep, ScriptedModel};
pub use openai::{OpenAiClient, TokenUsage};
pub use parse::parse_model_output;
pub use prompted::PromptedModel;
pub use traits::{LlmClient, LlmError, Message, ModelClient, ModelResponse, Role, TokenCount};
