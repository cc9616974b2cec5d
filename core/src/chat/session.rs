//! Chat session: drives one user turn through model calls and tool dispatch

use super::record::{ToolCallRecord, ToolResultRecord, TurnTrace};
use crate::config::ChatConfig;
use crate::conversation::{ConversationBuffer, ToolCall, ToolResult, Turn};
use crate::error::{ChatError, ConnectionError, LlmError, Result, ToolError};
use crate::gateway::ToolInvoker;
use crate::llm::{ChatOptions, LlmClient, ModelReply, ToolDefinition};
use crate::logger::SessionSink;
use crate::output::{ChatEvent, ChatOutput, NullOutput};
use futures::future::try_join_all;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

/// Where a turn is in its lifecycle
#[derive(Debug, Clone, PartialEq)]
pub enum ChatState {
    /// Waiting for a user message
    Idle,

    /// Waiting on the model; `cycle` tool batches have run so far
    AwaitingModel { cycle: usize },

    /// Running the tool calls of batch number `cycle`
    DispatchingTools { cycle: usize, calls: Vec<ToolCall> },

    /// The model answered
    EndTurn { answer: String },
}

impl fmt::Display for ChatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatState::Idle => write!(f, "idle"),
            ChatState::AwaitingModel { cycle } => write!(f, "awaiting model (cycle {})", cycle),
            ChatState::DispatchingTools { cycle, calls } => {
                write!(f, "dispatching {} tools (cycle {})", calls.len(), cycle)
            }
            ChatState::EndTurn { .. } => write!(f, "end of turn"),
        }
    }
}

/// Counters over the life of a session
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub completed_turns: usize,
    pub failed_turns: usize,
    pub started: Instant,
}

impl SessionStats {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// One conversation with the model.
///
/// Turns are serialized by `&mut self`. A turn works on a copy of the
/// buffer that replaces the real one only when the model has answered, so a
/// turn that fails, is cancelled, or is dropped leaves the conversation as
/// it was before the question was asked.
pub struct ChatSession {
    llm: Arc<dyn LlmClient>,
    tools: Arc<dyn ToolInvoker>,
    config: ChatConfig,
    buffer: ConversationBuffer,
    output: Arc<dyn ChatOutput>,
    sink: Option<Arc<dyn SessionSink>>,
    stats: SessionStats,
}

impl ChatSession {
    /// Create a session over a model and a tool provider
    pub fn new(llm: Arc<dyn LlmClient>, tools: Arc<dyn ToolInvoker>, config: ChatConfig) -> Self {
        Self {
            buffer: ConversationBuffer::new(config.max_history),
            llm,
            tools,
            config,
            output: Arc::new(NullOutput),
            sink: None,
            stats: SessionStats {
                completed_turns: 0,
                failed_turns: 0,
                started: Instant::now(),
            },
        }
    }

    /// Report progress to `output`
    pub fn with_output(mut self, output: Arc<dyn ChatOutput>) -> Self {
        self.output = output;
        self
    }

    /// Record every turn to `sink`
    pub fn with_sink(mut self, sink: Arc<dyn SessionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn buffer(&self) -> &ConversationBuffer {
        &self.buffer
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Forget the conversation so far
    pub fn clear(&mut self) {
        self.buffer.clear();
        tracing::info!("Conversation history cleared");
    }

    /// Ask a question and wait for the model's final answer
    pub async fn submit(&mut self, question: &str) -> Result<String> {
        self.submit_with_cancel(question, &CancellationToken::new())
            .await
    }

    /// Like [`ChatSession::submit`], abandoning the turn when `cancel` fires
    pub async fn submit_with_cancel(
        &mut self,
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let started = Instant::now();
        let mut working = self.buffer.clone();
        let mut trace = TurnTrace::default();

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(ChatError::Cancelled.into()),
            result = self.run_turn(question, &mut working, &mut trace) => result,
        };
        trace.timing.total = started.elapsed().as_secs_f64();

        match &result {
            Ok(_) => {
                working.unpin();
                self.buffer = working;
                self.stats.completed_turns += 1;
                tracing::info!(
                    "Turn completed in {:.2}s after {} tool cycles",
                    trace.timing.total,
                    trace.cycles
                );
                self.emit(ChatEvent::TurnCompleted {
                    timing: trace.timing.clone(),
                })
                .await;
            }
            Err(error) => {
                self.stats.failed_turns += 1;
                tracing::warn!("Turn failed, conversation rolled back: {}", error);
                self.emit(ChatEvent::TurnFailed {
                    error: error.to_string(),
                })
                .await;
            }
        }

        self.record(question, &result, trace).await;
        result
    }

    async fn run_turn(
        &self,
        question: &str,
        working: &mut ConversationBuffer,
        trace: &mut TurnTrace,
    ) -> Result<String> {
        let loading = Instant::now();
        let descriptors = self.tools.list_tools().await?;
        let definitions: Vec<ToolDefinition> =
            descriptors.iter().map(ToolDefinition::from).collect();
        trace.timing.tools_loading = loading.elapsed().as_secs_f64();
        self.emit(ChatEvent::ToolsLoaded {
            count: definitions.len(),
            elapsed: loading.elapsed(),
        })
        .await;

        let options = ChatOptions {
            system: Some(self.config.system_prompt.clone()),
            ..Default::default()
        };

        let mut state = ChatState::Idle;
        loop {
            tracing::debug!("Chat state: {}", state);
            state = match state {
                ChatState::Idle => {
                    // The question stays in context for every model call of this turn.
                    let dropped = working.append_pinned(Turn::user(question));
                    self.note_pruned(dropped, working).await;
                    ChatState::AwaitingModel { cycle: 0 }
                }
                ChatState::AwaitingModel { cycle } => {
                    match self.call_model(working, &definitions, &options, cycle, trace).await? {
                        ModelReply::Final(answer) => {
                            let dropped = working.append(Turn::assistant(answer.clone()));
                            self.note_pruned(dropped, working).await;
                            ChatState::EndTurn { answer }
                        }
                        ModelReply::ToolRequests { text, calls } => {
                            if cycle >= self.config.max_tool_cycles {
                                return Err(ChatError::ToolLoopExceeded {
                                    max_cycles: self.config.max_tool_cycles,
                                }
                                .into());
                            }
                            trace.tool_calls.extend(calls.iter().map(ToolCallRecord::from));
                            let dropped = working.append(Turn::tool_request(text, calls.clone()));
                            self.note_pruned(dropped, working).await;
                            ChatState::DispatchingTools {
                                cycle: cycle + 1,
                                calls,
                            }
                        }
                    }
                }
                ChatState::DispatchingTools { cycle, calls } => {
                    let results = self.dispatch(cycle, &calls, trace).await?;
                    let dropped = working.append_all(results.into_iter().map(Turn::ToolResult));
                    self.note_pruned(dropped, working).await;
                    trace.cycles = cycle;
                    ChatState::AwaitingModel { cycle }
                }
                ChatState::EndTurn { answer } => return Ok(answer),
            };
        }
    }

    async fn call_model(
        &self,
        working: &ConversationBuffer,
        definitions: &[ToolDefinition],
        options: &ChatOptions,
        cycle: usize,
        trace: &mut TurnTrace,
    ) -> Result<ModelReply> {
        let started = Instant::now();
        let tools = (!definitions.is_empty()).then(|| definitions.to_vec());
        let response = timeout(
            self.config.model_timeout(),
            self.llm
                .chat_completion(working.to_messages(), tools, Some(options.clone())),
        )
        .await
        .map_err(|_| LlmError::Timeout {
            seconds: self.config.model_timeout_secs,
        })??;

        let elapsed = started.elapsed();
        if cycle == 0 {
            trace.timing.initial_api_call = elapsed.as_secs_f64();
        }
        trace.timing.model_calls += elapsed.as_secs_f64();
        if let Some(usage) = &response.usage {
            trace.add_usage(usage);
        }
        tracing::debug!(
            "{} answered in {:.2}s (cycle {})",
            self.llm.model_name(),
            elapsed.as_secs_f64(),
            cycle
        );
        self.emit(ChatEvent::ModelResponded { cycle, elapsed }).await;

        response.reply()
    }

    /// Run every call of a batch concurrently; each one yields a result
    async fn dispatch(
        &self,
        cycle: usize,
        calls: &[ToolCall],
        trace: &mut TurnTrace,
    ) -> Result<Vec<ToolResult>> {
        self.emit(ChatEvent::ToolBatchStarted {
            cycle,
            calls: calls.to_vec(),
        })
        .await;

        let started = Instant::now();
        let limit = self.config.tool_timeout();
        // Tool failures are values; only a broken connection ends the batch early.
        let outcomes = try_join_all(calls.iter().map(|call| self.run_tool(call, limit))).await?;
        let elapsed = started.elapsed();
        trace.timing.tool_execution += elapsed.as_secs_f64();

        let mut results = Vec::with_capacity(outcomes.len());
        for (result, took) in outcomes {
            trace.tool_results.push(ToolResultRecord::new(&result, took));
            results.push(result);
        }

        tracing::debug!(
            "{} tools completed in {:.2}s",
            results.len(),
            elapsed.as_secs_f64()
        );
        self.emit(ChatEvent::ToolBatchCompleted {
            cycle,
            count: results.len(),
            elapsed,
        })
        .await;
        Ok(results)
    }

    async fn run_tool(
        &self,
        call: &ToolCall,
        limit: Duration,
    ) -> std::result::Result<(ToolResult, Duration), ConnectionError> {
        let started = Instant::now();
        let outcome = match timeout(limit, self.tools.invoke(&call.name, call.arguments.clone())).await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::error!("Tool {} lost the gateway connection: {}", call.name, e);
                return Err(e);
            }
            Err(_) => Err(ToolError::Timeout {
                name: call.name.clone(),
                seconds: limit.as_secs(),
            }),
        };
        let elapsed = started.elapsed();

        let result = match outcome {
            Ok(text) => ToolResult::ok(call, text),
            Err(error) => {
                tracing::warn!("{}", error);
                ToolResult::error(call, &error)
            }
        };
        self.emit(ChatEvent::ToolCallCompleted {
            result: result.clone(),
            elapsed,
        })
        .await;
        Ok((result, elapsed))
    }

    async fn note_pruned(&self, dropped: usize, working: &ConversationBuffer) {
        if dropped > 0 {
            self.emit(ChatEvent::HistoryPruned {
                dropped,
                remaining: working.len(),
            })
            .await;
        }
    }

    async fn emit(&self, event: ChatEvent) {
        if let Err(e) = self.output.emit_event(event).await {
            tracing::debug!("Failed to emit chat event: {}", e);
        }
    }

    async fn record(&self, question: &str, result: &Result<String>, trace: TurnTrace) {
        let Some(sink) = &self.sink else {
            return;
        };
        let outcome = match result {
            Ok(answer) => Ok(answer.as_str()),
            Err(error) => Err(error.to_string()),
        };
        if let Err(e) = sink.record_turn(&trace.into_record(question, outcome)).await {
            tracing::warn!("Failed to write session log: {}", e);
        }
    }
}
