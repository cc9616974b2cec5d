//! Conversation turns and the capped buffer sent to the model

pub mod buffer;
pub mod turn;

pub use buffer::{BufferSnapshot, ConversationBuffer};
pub use turn::{ToolCall, ToolResult, ToolStatus, Turn};
