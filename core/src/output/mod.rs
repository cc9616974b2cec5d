//! Output abstraction for chat progress
//!
//! The session reports what it is doing through [`ChatOutput`]; front ends
//! decide how (or whether) to show it.

use crate::chat::TurnTiming;
use crate::conversation::{ToolCall, ToolResult};
use async_trait::async_trait;
use std::time::Duration;

/// Progress events emitted while a turn runs
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// Tool descriptors are available for this turn
    ToolsLoaded { count: usize, elapsed: Duration },

    /// A model call returned
    ModelResponded { cycle: usize, elapsed: Duration },

    /// A batch of tool calls is being dispatched
    ToolBatchStarted { cycle: usize, calls: Vec<ToolCall> },

    /// One tool call finished, successfully or not
    ToolCallCompleted { result: ToolResult, elapsed: Duration },

    /// Every call in the batch has a result
    ToolBatchCompleted {
        cycle: usize,
        count: usize,
        elapsed: Duration,
    },

    /// Old turns were dropped to respect the history cap
    HistoryPruned { dropped: usize, remaining: usize },

    /// The turn produced a final answer
    TurnCompleted { timing: TurnTiming },

    /// The turn failed and the conversation was rolled back
    TurnFailed { error: String },
}

/// Sink for chat progress events
#[async_trait]
pub trait ChatOutput: Send + Sync {
    async fn emit_event(
        &self,
        event: ChatEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Output that discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutput;

#[async_trait]
impl ChatOutput for NullOutput {
    async fn emit_event(
        &self,
        _event: ChatEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}
