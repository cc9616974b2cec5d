//! Chat orchestration
//!
//! A [`ChatSession`] turns one user question into a final answer, looping
//! between the model and the tool gateway until the model stops asking for
//! tools.

mod record;
mod session;

pub use record::{ToolCallRecord, ToolResultRecord, TurnRecord, TurnTiming};
pub use session::{ChatSession, ChatState, SessionStats};

#[cfg(test)]
mod tests;
