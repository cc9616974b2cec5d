use super::*;
use crate::config::ChatConfig;
use crate::conversation::{ToolStatus, Turn};
use crate::error::{ChatError, ConnectionError, Error, LlmError, Result, ToolError};
use crate::gateway::{ToolDescriptor, ToolInvoker, ToolOutcome};
use crate::llm::{
    ChatOptions, ContentBlock, LlmClient, LlmMessage, LlmResponse, MessageContent, MessageRole,
    ToolDefinition,
};
use crate::logger::SessionSink;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// One scripted model response
#[derive(Clone)]
enum Step {
    Answer(&'static str),
    /// Answer with the payload of the most recent tool result
    EchoLastResult,
    Tools(Vec<(&'static str, Value)>),
    RateLimited,
}

struct ScriptedModel {
    script: Mutex<VecDeque<Step>>,
    fallback: Option<Step>,
    calls: AtomicUsize,
    contexts: Mutex<Vec<Vec<LlmMessage>>>,
}

impl ScriptedModel {
    fn new(script: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback: None,
            calls: AtomicUsize::new(0),
            contexts: Mutex::new(Vec::new()),
        })
    }

    /// Keeps returning `step` once the script runs out
    fn repeating(step: Step) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(step),
            calls: AtomicUsize::new(0),
            contexts: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn push(&self, step: Step) {
        self.script.lock().unwrap().push_back(step);
    }
}

fn reply(content: MessageContent) -> LlmResponse {
    LlmResponse {
        message: LlmMessage {
            role: MessageRole::Assistant,
            content,
        },
        usage: None,
        model: "scripted".to_string(),
        finish_reason: None,
    }
}

#[async_trait]
impl LlmClient for ScriptedModel {
    async fn chat_completion(
        &self,
        messages: Vec<LlmMessage>,
        tools: Option<Vec<ToolDefinition>>,
        options: Option<ChatOptions>,
    ) -> Result<LlmResponse> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(tools.is_some_and(|t| !t.is_empty()));
        assert!(options.and_then(|o| o.system).is_some());

        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.fallback.clone())
            .expect("model script exhausted");

        let response = match step {
            Step::Answer(text) => reply(MessageContent::Text(text.to_string())),
            Step::EchoLastResult => {
                let payload = messages
                    .iter()
                    .rev()
                    .find_map(|m| match &m.content {
                        MessageContent::Blocks(blocks) => blocks.iter().rev().find_map(|b| match b {
                            ContentBlock::ToolResult { content, .. } => Some(content.clone()),
                            _ => None,
                        }),
                        MessageContent::Text(_) => None,
                    })
                    .expect("no tool result in context");
                reply(MessageContent::Text(payload))
            }
            Step::Tools(requests) => reply(MessageContent::Blocks(
                requests
                    .into_iter()
                    .enumerate()
                    .map(|(i, (name, input))| ContentBlock::ToolUse {
                        id: format!("call_{}_{}", n, i),
                        name: name.to_string(),
                        input,
                    })
                    .collect(),
            )),
            Step::RateLimited => return Err(LlmError::RateLimit.into()),
        };

        self.contexts.lock().unwrap().push(messages);
        Ok(response)
    }

    fn model_name(&self) -> &str {
        "scripted"
    }

    fn provider_name(&self) -> &str {
        "test"
    }
}

/// In-process stand-in for the MCP gateway
#[derive(Default)]
struct FakeGateway {
    delays: HashMap<&'static str, Duration>,
    payloads: HashMap<&'static str, &'static str>,
    failing: HashSet<&'static str>,
    broken: AtomicBool,
    started: AtomicUsize,
    finished: AtomicUsize,
}

impl FakeGateway {
    fn delay(mut self, name: &'static str, seconds: u64) -> Self {
        self.delays.insert(name, Duration::from_secs(seconds));
        self
    }

    fn payload(mut self, name: &'static str, text: &'static str) -> Self {
        self.payloads.insert(name, text);
        self
    }

    fn failing(mut self, name: &'static str) -> Self {
        self.failing.insert(name);
        self
    }

    fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolInvoker for FakeGateway {
    async fn list_tools(&self) -> std::result::Result<Arc<Vec<ToolDescriptor>>, ConnectionError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }
        let tools = ["get_verse", "search_bible", "get_word_analysis"]
            .into_iter()
            .map(|name| ToolDescriptor {
                name: name.to_string(),
                description: format!("{} tool", name),
                input_schema: json!({"type": "object", "properties": {}}),
            })
            .collect();
        Ok(Arc::new(tools))
    }

    async fn invoke(
        &self,
        name: &str,
        _arguments: Map<String, Value>,
    ) -> std::result::Result<ToolOutcome, ConnectionError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if self.broken.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }
        if let Some(delay) = self.delays.get(name) {
            sleep(*delay).await;
        }
        self.finished.fetch_add(1, Ordering::SeqCst);

        if self.failing.contains(name) {
            return Ok(Err(ToolError::Failed {
                name: name.to_string(),
                message: "book not found".to_string(),
            }));
        }
        let text = self
            .payloads
            .get(name)
            .map(|p| p.to_string())
            .unwrap_or_else(|| format!("{} output", name));
        Ok(Ok(text))
    }
}

#[derive(Default)]
struct RecordingSink {
    records: Mutex<Vec<TurnRecord>>,
}

#[async_trait]
impl SessionSink for RecordingSink {
    async fn record_turn(&self, record: &TurnRecord) -> Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

fn session(model: Arc<ScriptedModel>, gateway: Arc<FakeGateway>, config: ChatConfig) -> ChatSession {
    ChatSession::new(model, gateway, config)
}

fn tool_results(turns: &[Turn]) -> Vec<&crate::conversation::ToolResult> {
    turns
        .iter()
        .filter_map(|t| match t {
            Turn::ToolResult(r) => Some(r),
            _ => None,
        })
        .collect()
}

/// Every request is directly followed by one result per call, in call order
fn assert_groups_intact(turns: &[Turn]) {
    let mut i = 0;
    while i < turns.len() {
        match &turns[i] {
            Turn::AssistantToolRequest { calls, .. } => {
                let expected: Vec<&str> = calls.iter().map(|c| c.id.as_str()).collect();
                let actual: Vec<&str> = turns[i + 1..]
                    .iter()
                    .take(calls.len())
                    .filter_map(|t| match t {
                        Turn::ToolResult(r) => Some(r.call_id.as_str()),
                        _ => None,
                    })
                    .collect();
                assert_eq!(expected, actual, "tool group broken in {:?}", turns);
                i += 1 + calls.len();
            }
            Turn::ToolResult(r) => panic!("stranded tool result {} in {:?}", r.call_id, turns),
            _ => i += 1,
        }
    }
}

#[tokio::test]
async fn test_john_3_16_round_trip() {
    let model = ScriptedModel::new(vec![
        Step::Tools(vec![(
            "get_verse",
            json!({"book": "John", "chapter": 3, "verse": 16}),
        )]),
        Step::EchoLastResult,
    ]);
    let gateway = Arc::new(
        FakeGateway::default().payload("get_verse", "For God so loved the world..."),
    );
    let mut chat = session(model.clone(), gateway, ChatConfig::default());

    let answer = chat.submit("What does John 3:16 say?").await.unwrap();

    assert_eq!(answer, "For God so loved the world...");
    assert_eq!(model.calls(), 2);

    let turns = chat.buffer().turns();
    assert_eq!(turns.len(), 4);
    assert_eq!(turns[0], Turn::user("What does John 3:16 say?"));
    match &turns[1] {
        Turn::AssistantToolRequest { calls, .. } => {
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0].name, "get_verse");
            assert_eq!(calls[0].arguments["chapter"], json!(3));
        }
        other => panic!("expected tool request, got {:?}", other),
    }
    match &turns[2] {
        Turn::ToolResult(result) => {
            assert_eq!(result.status, ToolStatus::Ok);
            assert_eq!(result.payload, "For God so loved the world...");
        }
        other => panic!("expected tool result, got {:?}", other),
    }
    assert_eq!(turns[3], Turn::assistant("For God so loved the world..."));
    assert_eq!(chat.stats().completed_turns, 1);
}

#[tokio::test(start_paused = true)]
async fn test_tool_batch_runs_concurrently() {
    let model = ScriptedModel::new(vec![
        Step::Tools(vec![
            ("get_verse", json!({})),
            ("search_bible", json!({})),
            ("get_word_analysis", json!({})),
        ]),
        Step::Answer("done"),
    ]);
    let gateway = Arc::new(
        FakeGateway::default()
            .delay("get_verse", 1)
            .delay("search_bible", 2)
            .delay("get_word_analysis", 3),
    );
    let mut chat = session(model, gateway, ChatConfig::default());

    let started = Instant::now();
    chat.submit("compare").await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_secs(3), "took {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(4), "took {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_one_result_per_call_in_request_order() {
    let model = ScriptedModel::new(vec![
        Step::Tools(vec![
            ("get_word_analysis", json!({})),
            ("search_bible", json!({})),
            ("get_verse", json!({})),
        ]),
        Step::Answer("done"),
    ]);
    // Completion order is the reverse of request order, and one call fails.
    let gateway = Arc::new(
        FakeGateway::default()
            .delay("get_word_analysis", 3)
            .delay("search_bible", 2)
            .delay("get_verse", 1)
            .failing("search_bible"),
    );
    let mut chat = session(model, gateway, ChatConfig::default());
    chat.submit("q").await.unwrap();

    let turns = chat.buffer().turns();
    assert_groups_intact(turns);
    let results = tool_results(turns);
    let ids: Vec<&str> = results.iter().map(|r| r.call_id.as_str()).collect();
    assert_eq!(ids, vec!["call_0_0", "call_0_1", "call_0_2"]);
    assert_eq!(results[1].status, ToolStatus::Error);
    assert_eq!(results[1].payload, "book not found");
    assert_eq!(results[0].status, ToolStatus::Ok);
    assert_eq!(results[2].status, ToolStatus::Ok);
}

#[tokio::test(start_paused = true)]
async fn test_tool_timeout_does_not_abort_siblings() {
    let model = ScriptedModel::new(vec![
        Step::Tools(vec![("search_bible", json!({})), ("get_verse", json!({}))]),
        Step::Answer("partial answer"),
    ]);
    let gateway = Arc::new(
        FakeGateway::default()
            .delay("search_bible", 60)
            .delay("get_verse", 1),
    );
    let config = ChatConfig::default().with_tool_timeout_secs(5);
    let mut chat = session(model, gateway.clone(), config);

    let started = Instant::now();
    let answer = chat.submit("q").await.unwrap();
    assert_eq!(answer, "partial answer");
    assert!(started.elapsed() < Duration::from_secs(6));

    let results = tool_results(chat.buffer().turns());
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].status, ToolStatus::Error);
    assert_eq!(results[0].payload, "timed out after 5s");
    assert_eq!(results[1].status, ToolStatus::Ok);
    assert_eq!(gateway.finished(), 1);
}

#[tokio::test]
async fn test_tool_loop_cap_is_exact() {
    let model = ScriptedModel::repeating(Step::Tools(vec![("search_bible", json!({}))]));
    let gateway = Arc::new(FakeGateway::default());
    let config = ChatConfig::default().with_max_tool_cycles(5);
    let mut chat = session(model.clone(), gateway.clone(), config);

    let error = chat.submit("loop forever").await.unwrap_err();

    assert!(matches!(
        error,
        Error::Chat(ChatError::ToolLoopExceeded { max_cycles: 5 })
    ));
    assert_eq!(gateway.started(), 5);
    assert_eq!(model.calls(), 6);
    assert!(chat.buffer().is_empty());
    assert_eq!(chat.stats().failed_turns, 1);
}

#[tokio::test]
async fn test_session_usable_after_loop_exceeded() {
    let model = ScriptedModel::new(vec![
        Step::Tools(vec![("search_bible", json!({}))]),
        Step::Tools(vec![("search_bible", json!({}))]),
        Step::Answer("second try"),
    ]);
    let gateway = Arc::new(FakeGateway::default());
    let config = ChatConfig::default().with_max_tool_cycles(1);
    let mut chat = session(model.clone(), gateway, config);

    assert!(chat.submit("first").await.is_err());

    assert_eq!(chat.submit("again").await.unwrap(), "second try");
    assert_eq!(chat.buffer().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_mid_dispatch_rolls_back() {
    let model = ScriptedModel::new(vec![
        Step::Answer("Genesis 1:1"),
        Step::Tools(vec![("get_verse", json!({})), ("search_bible", json!({}))]),
    ]);
    let gateway = Arc::new(
        FakeGateway::default()
            .delay("get_verse", 1)
            .delay("search_bible", 10),
    );
    let mut chat = session(model, gateway.clone(), ChatConfig::default());
    chat.submit("In the beginning?").await.unwrap();
    let before = chat.buffer().snapshot();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        sleep(Duration::from_secs(2)).await;
        trigger.cancel();
    });

    let error = chat
        .submit_with_cancel("and then?", &cancel)
        .await
        .unwrap_err();
    assert!(error.is_cancelled());
    assert_eq!(chat.buffer().turns(), before.turns());

    // The slow call was abandoned, not left running.
    sleep(Duration::from_secs(20)).await;
    assert_eq!(gateway.started(), 2);
    assert_eq!(gateway.finished(), 1);
}

#[tokio::test]
async fn test_list_tools_failure_is_connection_error() {
    let model = ScriptedModel::new(vec![Step::Answer("unused"), Step::Answer("back")]);
    let gateway = Arc::new(FakeGateway::default());
    gateway.broken.store(true, Ordering::SeqCst);
    let mut chat = session(model.clone(), gateway.clone(), ChatConfig::default());

    let error = chat.submit("q").await.unwrap_err();
    assert!(matches!(error, Error::Connection(ConnectionError::Closed)));
    assert!(error.is_fatal());
    assert_eq!(model.calls(), 0);
    assert!(chat.buffer().is_empty());

    gateway.broken.store(false, Ordering::SeqCst);
    assert_eq!(chat.submit("q").await.unwrap(), "unused");
}

/// Lists tools fine, then loses the connection on every call
struct BreakOnInvoke(FakeGateway);

#[async_trait]
impl ToolInvoker for BreakOnInvoke {
    async fn list_tools(&self) -> std::result::Result<Arc<Vec<ToolDescriptor>>, ConnectionError> {
        self.0.list_tools().await
    }

    async fn invoke(
        &self,
        _name: &str,
        _arguments: Map<String, Value>,
    ) -> std::result::Result<ToolOutcome, ConnectionError> {
        Err(ConnectionError::Transport {
            message: "broken pipe".to_string(),
        })
    }
}

#[tokio::test]
async fn test_connection_loss_during_dispatch_fails_turn() {
    let model = ScriptedModel::new(vec![
        Step::Answer("Amen"),
        Step::Tools(vec![("get_verse", json!({})), ("search_bible", json!({}))]),
    ]);
    let mut chat = ChatSession::new(
        model.clone(),
        Arc::new(BreakOnInvoke(FakeGateway::default())),
        ChatConfig::default(),
    );
    chat.submit("hello").await.unwrap();

    let error = chat.submit("q").await.unwrap_err();
    assert!(matches!(
        error,
        Error::Connection(ConnectionError::Transport { .. })
    ));
    assert_eq!(chat.buffer().len(), 2);
    assert_eq!(model.calls(), 2);
}

#[tokio::test]
async fn test_model_error_rolls_back_turn() {
    let model = ScriptedModel::new(vec![
        Step::Answer("first answer"),
        Step::Tools(vec![("get_verse", json!({}))]),
        Step::RateLimited,
        Step::Answer("retried"),
    ]);
    let gateway = Arc::new(FakeGateway::default());
    let sink = Arc::new(RecordingSink::default());
    let mut chat =
        session(model, gateway, ChatConfig::default()).with_sink(sink.clone());

    chat.submit("one").await.unwrap();
    let before = chat.buffer().snapshot();

    let error = chat.submit("two").await.unwrap_err();
    assert!(matches!(error, Error::Llm(LlmError::RateLimit)));
    assert_eq!(chat.buffer().turns(), before.turns());

    assert_eq!(chat.submit("two").await.unwrap(), "retried");
    assert_eq!(chat.buffer().len(), 4);

    let records = sink.records.lock().unwrap();
    assert_eq!(records.len(), 3);
    assert!(records[1].error.as_deref().unwrap().contains("Rate limit"));
    assert_eq!(records[1].tool_calls.len(), 1);
    assert_eq!(records[1].tool_results.len(), 1);
    assert_eq!(records[2].assistant_response, "retried");
    assert!(records[2].error.is_none());
}

#[tokio::test]
async fn test_buffer_cap_holds_across_submissions() {
    for cap in 1..=7 {
        let model = ScriptedModel::new(Vec::new());
        let gateway = Arc::new(FakeGateway::default());
        let config = ChatConfig::default().with_max_history(cap);
        let mut chat = session(model.clone(), gateway, config);

        for round in 0..6 {
            match round % 3 {
                0 => model.push(Step::Answer("plain")),
                1 => {
                    model.push(Step::Tools(vec![("get_verse", json!({}))]));
                    model.push(Step::Answer("one tool"));
                }
                _ => {
                    model.push(Step::Tools(vec![
                        ("get_verse", json!({})),
                        ("search_bible", json!({})),
                    ]));
                    model.push(Step::Tools(vec![("get_word_analysis", json!({}))]));
                    model.push(Step::Answer("three tools"));
                }
            }
            let question = format!("question {}", round);
            let seen = model.contexts.lock().unwrap().len();
            chat.submit(&question).await.unwrap();

            let turns = chat.buffer().turns();
            assert!(turns.len() <= cap, "cap {} exceeded: {}", cap, turns.len());
            assert_groups_intact(turns);

            let contexts = model.contexts.lock().unwrap();
            assert!(contexts.len() > seen);
            for context in &contexts[seen..] {
                assert!(context.len() <= cap);
                assert!(
                    asks(context, &question),
                    "cap {}: {} missing from {:?}",
                    cap,
                    question,
                    context
                );
            }
        }
    }
}

/// Whether `context` carries `question` as a user message
fn asks(context: &[LlmMessage], question: &str) -> bool {
    context
        .iter()
        .any(|m| m.role == MessageRole::User && m.get_text().as_deref() == Some(question))
}

#[tokio::test]
async fn test_question_survives_long_tool_loop() {
    let batch = || Step::Tools(vec![("get_verse", json!({})), ("search_bible", json!({}))]);
    let model = ScriptedModel::new(vec![
        batch(),
        batch(),
        batch(),
        batch(),
        Step::Answer("found it"),
    ]);
    let gateway = Arc::new(FakeGateway::default());
    let config = ChatConfig::default();
    assert_eq!(config.max_history, 10);
    let mut chat = session(model.clone(), gateway.clone(), config);

    let question = "Where is love defined in the epistles?";
    assert_eq!(chat.submit(question).await.unwrap(), "found it");
    assert_eq!(gateway.started(), 8);

    let contexts = model.contexts.lock().unwrap();
    assert_eq!(contexts.len(), 5);
    for context in contexts.iter() {
        assert_eq!(context[0].role, MessageRole::User);
        assert_eq!(context[0].get_text().as_deref(), Some(question));
    }

    // Question plus the three most recent tool groups
    let last = contexts.last().unwrap();
    assert_eq!(last.len(), 7);
    assert_eq!(last[5].get_tool_uses().len(), 2);
    assert!(matches!(
        last[5].get_tool_uses()[0],
        ContentBlock::ToolUse { id, .. } if id == "call_3_0"
    ));

    let turns = chat.buffer().turns();
    assert!(turns.len() <= 10);
    assert_eq!(turns[0], Turn::user(question));
    assert_eq!(turns.last(), Some(&Turn::assistant("found it")));
    assert_groups_intact(turns);
}

#[tokio::test]
async fn test_clear_forgets_history() {
    let model = ScriptedModel::new(vec![Step::Answer("a"), Step::Answer("b")]);
    let mut chat = session(model.clone(), Arc::new(FakeGateway::default()), ChatConfig::default());

    chat.submit("first").await.unwrap();
    chat.clear();
    chat.submit("second").await.unwrap();

    assert_eq!(chat.buffer().len(), 2);
    let contexts = model.contexts.lock().unwrap();
    assert_eq!(contexts[1].len(), 1);
    assert_eq!(contexts[1][0].get_text().as_deref(), Some("second"));
}

#[tokio::test]
async fn test_completed_turns_outlive_cap_and_clear() {
    let model = ScriptedModel::repeating(Step::Answer("Amen"));
    let config = ChatConfig::default().with_max_history(4);
    let mut chat = session(model, Arc::new(FakeGateway::default()), config);

    for i in 0..12 {
        chat.submit(&format!("psalm {}", i)).await.unwrap();
        if i == 5 {
            chat.clear();
        }
    }

    assert_eq!(chat.buffer().len(), 4);
    assert_eq!(chat.stats().completed_turns, 12);
    assert_eq!(chat.stats().failed_turns, 0);
}

#[test]
fn test_state_display() {
    assert_eq!(ChatState::Idle.to_string(), "idle");
    assert_eq!(
        ChatState::AwaitingModel { cycle: 2 }.to_string(),
        "awaiting model (cycle 2)"
    );
}
