//! 对话记忆：只追加的轮次历史

pub mod conversation;

pub use conversation::{History, ModelTurn, Turn};
