//! Capped conversation buffer

use super::turn::{ToolStatus, Turn};
use crate::llm::{ContentBlock, LlmMessage, MessageRole};
use std::ops::Range;
use std::sync::Arc;

/// Ordered, capped sequence of turns sent to the model as context.
///
/// Storage is shared copy-on-write, so [`ConversationBuffer::snapshot`] is O(1)
/// and the first mutation after a snapshot pays for one clone.
///
/// One turn may be pinned with [`ConversationBuffer::append_pinned`]. Truncation
/// never drops it and removes the oldest other groups instead.
#[derive(Debug, Clone)]
pub struct ConversationBuffer {
    turns: Arc<Vec<Turn>>,
    max_len: usize,
    pinned: Option<usize>,
}

/// A checkpoint of the buffer contents
#[derive(Debug, Clone)]
pub struct BufferSnapshot {
    turns: Arc<Vec<Turn>>,
}

impl BufferSnapshot {
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

impl ConversationBuffer {
    /// Create an empty buffer holding at most `max_len` turns (0 = unbounded)
    pub fn new(max_len: usize) -> Self {
        Self {
            turns: Arc::new(Vec::new()),
            max_len,
            pinned: None,
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Append a turn and truncate to the cap. Returns the number of turns dropped.
    pub fn append(&mut self, turn: Turn) -> usize {
        Arc::make_mut(&mut self.turns).push(turn);
        self.truncate(self.max_len)
    }

    /// Append a turn that survives truncation until [`ConversationBuffer::unpin`].
    /// Returns the number of turns dropped.
    pub fn append_pinned(&mut self, turn: Turn) -> usize {
        Arc::make_mut(&mut self.turns).push(turn);
        self.pinned = Some(self.turns.len() - 1);
        self.truncate(self.max_len)
    }

    /// The pinned turn, if any
    pub fn pinned(&self) -> Option<&Turn> {
        self.pinned.and_then(|i| self.turns.get(i))
    }

    /// Release the pinned turn; it becomes subject to truncation again
    pub fn unpin(&mut self) {
        self.pinned = None;
    }

    /// Append a batch of turns, then truncate once. Returns the number of turns dropped.
    pub fn append_all<I: IntoIterator<Item = Turn>>(&mut self, turns: I) -> usize {
        Arc::make_mut(&mut self.turns).extend(turns);
        self.truncate(self.max_len)
    }

    /// Keep at most the most recent `max_len` turns (0 = no cap).
    ///
    /// A tool request and its results are dropped together or not at all, and
    /// tool results with no owning request are always discarded. The pinned
    /// turn is kept. Returns the number of turns dropped.
    pub fn truncate(&mut self, max_len: usize) -> usize {
        let groups = group_turns(&self.turns);
        let mut keep: Vec<bool> = groups.iter().map(|g| !g.orphan).collect();

        if max_len > 0 {
            let mut total: usize = groups
                .iter()
                .zip(&keep)
                .filter(|(_, kept)| **kept)
                .map(|(g, _)| g.range.len())
                .sum();
            for (i, group) in groups.iter().enumerate() {
                if total <= max_len {
                    break;
                }
                let pinned = self.pinned.is_some_and(|p| group.range.contains(&p));
                if keep[i] && !pinned {
                    keep[i] = false;
                    total -= group.range.len();
                }
            }
        }

        let kept_len: usize = groups
            .iter()
            .zip(&keep)
            .filter(|(_, kept)| **kept)
            .map(|(g, _)| g.range.len())
            .sum();
        let dropped = self.turns.len() - kept_len;
        if dropped == 0 {
            return 0;
        }

        let mut retained = Vec::with_capacity(kept_len);
        let mut pinned = None;
        for (group, _) in groups.iter().zip(&keep).filter(|(_, kept)| **kept) {
            for index in group.range.clone() {
                if self.pinned == Some(index) {
                    pinned = Some(retained.len());
                }
                retained.push(self.turns[index].clone());
            }
        }
        self.turns = Arc::new(retained);
        self.pinned = pinned;

        tracing::debug!(dropped, remaining = self.turns.len(), "Pruned conversation history");
        dropped
    }

    /// Take a cheap checkpoint of the current contents
    pub fn snapshot(&self) -> BufferSnapshot {
        BufferSnapshot {
            turns: Arc::clone(&self.turns),
        }
    }

    /// Replace the contents with a previous checkpoint
    pub fn restore(&mut self, snapshot: BufferSnapshot) {
        self.turns = snapshot.turns;
        self.pinned = None;
    }

    /// Drop every turn
    pub fn clear(&mut self) {
        self.turns = Arc::new(Vec::new());
        self.pinned = None;
    }

    /// Render the buffer as provider-neutral LLM messages.
    ///
    /// Consecutive tool results collapse into a single tool message.
    pub fn to_messages(&self) -> Vec<LlmMessage> {
        let mut messages: Vec<LlmMessage> = Vec::with_capacity(self.turns.len());
        let mut pending_results: Vec<ContentBlock> = Vec::new();

        for turn in self.turns.iter() {
            if let Turn::ToolResult(result) = turn {
                pending_results.push(ContentBlock::ToolResult {
                    tool_use_id: result.call_id.clone(),
                    is_error: (result.status == ToolStatus::Error).then_some(true),
                    content: result.payload.clone(),
                });
                continue;
            }

            if !pending_results.is_empty() {
                messages.push(LlmMessage::with_blocks(
                    MessageRole::Tool,
                    std::mem::take(&mut pending_results),
                ));
            }

            match turn {
                Turn::UserText { text } => messages.push(LlmMessage::user(text.clone())),
                Turn::AssistantText { text } => messages.push(LlmMessage::assistant(text.clone())),
                Turn::AssistantToolRequest { text, calls } => {
                    let mut blocks = Vec::with_capacity(calls.len() + 1);
                    if let Some(text) = text.as_ref().filter(|t| !t.trim().is_empty()) {
                        blocks.push(ContentBlock::Text { text: text.clone() });
                    }
                    blocks.extend(calls.iter().map(|call| ContentBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: serde_json::Value::Object(call.arguments.clone()),
                    }));
                    messages.push(LlmMessage::with_blocks(MessageRole::Assistant, blocks));
                }
                Turn::ToolResult(_) => unreachable!("tool results are handled above"),
            }
        }

        if !pending_results.is_empty() {
            messages.push(LlmMessage::with_blocks(MessageRole::Tool, pending_results));
        }

        messages
    }
}

impl Default for ConversationBuffer {
    fn default() -> Self {
        Self::new(10)
    }
}

/// A run of turns that must be kept or dropped as a unit
struct TurnGroup {
    range: Range<usize>,
    orphan: bool,
}

fn group_turns(turns: &[Turn]) -> Vec<TurnGroup> {
    let mut groups = Vec::new();
    let mut i = 0;

    while i < turns.len() {
        match &turns[i] {
            Turn::AssistantToolRequest { calls, .. } => {
                let mut end = i + 1;
                while let Some(Turn::ToolResult(result)) = turns.get(end) {
                    if !calls.iter().any(|call| call.id == result.call_id) {
                        break;
                    }
                    end += 1;
                }
                groups.push(TurnGroup {
                    range: i..end,
                    orphan: false,
                });
                i = end;
            }
            Turn::ToolResult(_) => {
                groups.push(TurnGroup {
                    range: i..i + 1,
                    orphan: true,
                });
                i += 1;
            }
            Turn::UserText { .. } | Turn::AssistantText { .. } => {
                groups.push(TurnGroup {
                    range: i..i + 1,
                    orphan: false,
                });
                i += 1;
            }
        }
    }

    groups
}
