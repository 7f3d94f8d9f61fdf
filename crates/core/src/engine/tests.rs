use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chatloop_model::{ChunkKind, FinishReason, ModelMessage, Role, ToolCall};
use chatloop_stream::StreamProcessor;
use chatloop_test_model::{PresetEvent, PresetResponse, ScriptedAdapter};
use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::events::RecordingEventSink;
use crate::strategy::max_iterations;
use crate::tool::{ClientState, Error, ToolDefinition, ToolSet};

fn tool_call_turn<I>(calls: I) -> PresetResponse
where
    I: IntoIterator<Item = (&'static str, &'static str, &'static str)>,
{
    PresetResponse::with_events(
        calls
            .into_iter()
            .map(|(id, name, args)| {
                PresetEvent::ToolCall(ToolCall::function(id, name, args))
            })
            .collect::<Vec<_>>(),
    )
}

fn tools(counter: Arc<AtomicUsize>) -> ToolSet {
    ToolSet::new()
        .with(
            ToolDefinition::new("get_temperature", "Gets the temperature.")
                .server(move |_: Value| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, Error>(json!("70")) }
                }),
        )
        .with(
            ToolDefinition::new("delete_file", "Deletes a file.")
                .with_needs_approval(true)
                .server(|_: Value| async {
                    Ok::<_, Error>(json!({ "deleted": true }))
                }),
        )
        .with(ToolDefinition::new("pick_file", "Picks a file.").client())
}

struct Run {
    items: Vec<Result<StreamChunk, ChatError>>,
    events: RecordingEventSink,
}

impl Run {
    fn chunks(&self) -> Vec<StreamChunk> {
        self.items
            .iter()
            .map(|item| item.as_ref().unwrap().clone())
            .collect()
    }

    fn kinds(&self) -> Vec<&'static str> {
        self.items
            .iter()
            .map(|item| match item {
                Ok(chunk) => chunk.kind.type_name(),
                Err(_) => "err",
            })
            .collect()
    }

    fn ended(&self) -> bool {
        self.events.names().contains(&"stream:ended")
    }
}

async fn run(adapter: &ScriptedAdapter, options: ChatOptions) -> Run {
    let events = RecordingEventSink::new();
    let stream = ChatEngine::new(adapter.clone(), options)
        .with_events(events.clone())
        .run();
    let items = timeout(Duration::from_secs(5), stream.collect::<Vec<_>>())
        .await
        .unwrap();
    Run { items, events }
}

async fn transcript(
    processor: &mut StreamProcessor,
    chunks: Vec<StreamChunk>,
) -> chatloop_stream::ProcessorResult {
    processor.start_assistant_message();
    processor.process(futures_util::stream::iter(chunks)).await
}

#[tokio::test]
async fn test_server_tool_round_trip() {
    let counter = Arc::new(AtomicUsize::new(0));
    let adapter = ScriptedAdapter::with_turns([
        tool_call_turn([("call_1", "get_temperature", "")]),
        PresetResponse::text("The temperature is 70 degrees."),
    ]);
    let options = ChatOptions::builder("test-model")
        .with_messages(vec![ModelMessage::user("what's the temperature?")])
        .with_tools(tools(Arc::clone(&counter)))
        .with_loop_strategy(max_iterations(20))
        .build();

    let run = run(&adapter, options).await;
    let kinds = run.kinds();
    assert_eq!(kinds.iter().filter(|k| **k == "tool_call").count(), 1);
    assert_eq!(kinds.iter().filter(|k| **k == "tool_result").count(), 1);
    let chunks = run.chunks();
    let last = chunks.last().unwrap();
    assert_eq!(last.finish_reason(), Some(FinishReason::Stop));
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    let requests = adapter.requests();
    assert_eq!(requests.len(), 2);
    let offered = ["get_temperature", "delete_file", "pick_file"];
    assert_eq!(requests[0].tools, offered);
    let history = &requests[1].messages;
    assert_eq!(history.len(), 3);
    assert_eq!(history[1].tool_calls()[0].id, "call_1");
    assert_eq!(history[2], ModelMessage::tool_result("call_1", "70"));

    let mut processor = StreamProcessor::new();
    processor.add_user_message("what's the temperature?");
    let result = transcript(&mut processor, chunks).await;
    assert!(result.content.contains("70"));
    assert!(processor.are_all_tools_complete());
}

#[tokio::test]
async fn test_event_order() {
    let counter = Arc::new(AtomicUsize::new(0));
    let adapter = ScriptedAdapter::with_turns([
        tool_call_turn([("call_1", "get_temperature", "{}")]),
        PresetResponse::text("70 degrees."),
    ]);
    let options = ChatOptions::builder("test-model")
        .with_messages(vec![ModelMessage::user("temperature?")])
        .with_tools(tools(counter))
        .build();

    let run = run(&adapter, options).await;
    assert_eq!(
        run.events.names(),
        [
            "chat:started",
            "stream:started",
            "stream:chunk:tool-call",
            "stream:chunk:done",
            "chat:iteration",
            "tool:call-completed",
            "stream:chunk:content",
            "stream:chunk:content",
            "stream:chunk:done",
            "stream:ended",
        ]
    );

    let events = run.events.events();
    let ChatEvent::StreamStarted { provider, .. } = &events[1] else {
        panic!("unexpected event: {:?}", events[1]);
    };
    assert_eq!(provider, "scripted");
    let ChatEvent::ChatIteration {
        iteration_number,
        tool_call_count,
        ..
    } = &events[4]
    else {
        panic!("unexpected event: {:?}", events[4]);
    };
    assert_eq!((*iteration_number, *tool_call_count), (1, 1));
}

#[tokio::test]
async fn test_approval_round_trip() {
    let adapter = ScriptedAdapter::with_turns([
        tool_call_turn([("call_1", "delete_file", r#"{"path":"a.txt"}"#)]),
        PresetResponse::text("Deleted."),
    ]);
    let counter = Arc::new(AtomicUsize::new(0));
    let options = ChatOptions::builder("test-model")
        .with_messages(vec![ModelMessage::user("delete a.txt")])
        .with_tools(tools(Arc::clone(&counter)))
        .build();

    let first = run(&adapter, options).await;
    assert_eq!(first.kinds(), ["tool_call", "done", "approval-requested"]);
    assert!(!first.ended());
    let chunks = first.chunks();
    let ChunkKind::ApprovalRequested { approval, input, .. } = &chunks[2].kind
    else {
        panic!("unexpected chunk: {:?}", chunks[2]);
    };
    assert_eq!(approval.id, "approval_call_1");
    assert_eq!(input, &json!({ "path": "a.txt" }));

    let mut processor = StreamProcessor::new();
    processor.add_user_message("delete a.txt");
    transcript(&mut processor, chunks).await;
    assert!(!processor.are_all_tools_complete());
    processor
        .add_tool_approval_response("approval_call_1", true)
        .unwrap();
    assert!(processor.are_all_tools_complete());

    let client_state = ClientState::from_ui_messages(&processor.messages());
    let options = ChatOptions::builder("test-model")
        .with_messages(processor.to_model_messages())
        .with_tools(tools(counter))
        .with_client_state(client_state)
        .build();
    let second = run(&adapter, options).await;

    assert_eq!(second.kinds(), ["tool_result", "content", "done"]);
    let chunks = second.chunks();
    let ChunkKind::ToolResult { content, .. } = &chunks[0].kind else {
        panic!("unexpected chunk: {:?}", chunks[0]);
    };
    assert_eq!(content, r#"{"deleted":true}"#);
    assert!(second.ended());
    assert_eq!(adapter.request_count(), 2);
    assert_eq!(adapter.requests()[1].messages.len(), 3);
}

#[tokio::test]
async fn test_declined_approval() {
    let adapter = ScriptedAdapter::with_turns([
        tool_call_turn([("call_1", "delete_file", "{}")]),
        PresetResponse::text("Okay, I won't."),
    ]);
    let history = vec![
        ModelMessage::user("delete everything"),
        ModelMessage::assistant_tool_calls(
            None,
            vec![ToolCall::function("call_1", "delete_file", "{}")],
        ),
    ];
    let options = ChatOptions::builder("test-model")
        .with_messages(history)
        .with_tools(tools(Arc::default()))
        .with_client_state(
            ClientState::new().with_approval("approval_call_1", false),
        )
        .build();

    let run = run(&adapter, options).await;
    let chunks = run.chunks();
    let ChunkKind::ToolResult { content, .. } = &chunks[0].kind else {
        panic!("unexpected chunk: {:?}", chunks[0]);
    };
    assert_eq!(content, r#"{"error":"User declined tool execution"}"#);
    assert_eq!(
        chunks.last().unwrap().finish_reason(),
        Some(FinishReason::Stop)
    );
}

#[tokio::test]
async fn test_client_tool_wait_and_resume() {
    let adapter = ScriptedAdapter::with_turns([
        tool_call_turn([("call_1", "pick_file", "{}")]),
        PresetResponse::text("You picked a.txt."),
    ]);
    let user = ModelMessage::user("pick a file");
    let options = ChatOptions::builder("test-model")
        .with_messages(vec![user.clone()])
        .with_tools(tools(Arc::default()))
        .build();

    let first = run(&adapter, options).await;
    assert_eq!(first.kinds(), ["tool_call", "done", "tool-input-available"]);
    assert!(!first.ended());
    assert!(
        first
            .events
            .names()
            .contains(&"stream:tool-input-available")
    );

    let history = vec![
        user,
        ModelMessage::assistant_tool_calls(
            None,
            vec![ToolCall::function("call_1", "pick_file", "{}")],
        ),
    ];
    let options = ChatOptions::builder("test-model")
        .with_messages(history)
        .with_tools(tools(Arc::default()))
        .with_client_state(
            ClientState::new().with_client_result("call_1", json!("a.txt")),
        )
        .build();
    let second = run(&adapter, options).await;

    let chunks = second.chunks();
    let ChunkKind::ToolResult { content, .. } = &chunks[0].kind else {
        panic!("unexpected chunk: {:?}", chunks[0]);
    };
    assert_eq!(content, "a.txt");
    assert!(second.ended());
}

#[tokio::test]
async fn test_mixed_batch_executes_once() {
    let counter = Arc::new(AtomicUsize::new(0));
    let adapter = ScriptedAdapter::with_turns([
        tool_call_turn([
            ("call_1", "get_temperature", "{}"),
            ("call_2", "delete_file", "{}"),
        ]),
        PresetResponse::text("Done."),
    ]);
    let options = ChatOptions::builder("test-model")
        .with_messages(vec![ModelMessage::user("temperature, then delete")])
        .with_tools(tools(Arc::clone(&counter)))
        .build();

    let first = run(&adapter, options).await;
    assert_eq!(
        first.kinds(),
        [
            "tool_call",
            "tool_call",
            "done",
            "tool_result",
            "approval-requested"
        ]
    );

    let mut processor = StreamProcessor::new();
    processor.add_user_message("temperature, then delete");
    transcript(&mut processor, first.chunks()).await;
    processor
        .add_tool_approval_response("approval_call_2", true)
        .unwrap();

    let options = ChatOptions::builder("test-model")
        .with_messages(processor.to_model_messages())
        .with_tools(tools(Arc::clone(&counter)))
        .with_client_state(ClientState::from_ui_messages(
            &processor.messages(),
        ))
        .build();
    let second = run(&adapter, options).await;

    assert_eq!(second.kinds(), ["tool_result", "content", "done"]);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_finish_reason_is_not_downgraded() {
    let counter = Arc::new(AtomicUsize::new(0));
    let adapter = ScriptedAdapter::with_turns([
        PresetResponse::with_events([
            PresetEvent::ToolCall(ToolCall::function(
                "call_1",
                "get_temperature",
                "{}",
            )),
            PresetEvent::Done(FinishReason::ToolCalls),
            PresetEvent::Done(FinishReason::Stop),
        ]),
        PresetResponse::text("70."),
    ]);
    let options = ChatOptions::builder("test-model")
        .with_messages(vec![ModelMessage::user("temperature?")])
        .with_tools(tools(Arc::clone(&counter)))
        .build();

    let run = run(&adapter, options).await;
    assert_eq!(
        run.kinds(),
        ["tool_call", "done", "done", "tool_result", "content", "done"]
    );
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(adapter.request_count(), 2);
}

#[tokio::test]
async fn test_invalid_arguments_end_the_stream() {
    let adapter = ScriptedAdapter::with_turns([tool_call_turn([(
        "call_1",
        "get_temperature",
        "{invalid",
    )])]);
    let options = ChatOptions::builder("test-model")
        .with_messages(vec![ModelMessage::user("temperature?")])
        .with_tools(tools(Arc::default()))
        .build();

    let run = run(&adapter, options).await;
    assert_eq!(run.kinds(), ["tool_call", "done", "err"]);
    let Some(Err(ChatError::InvalidToolArguments { tool_call_id, .. })) =
        run.items.last()
    else {
        panic!("expected an error");
    };
    assert_eq!(tool_call_id, "call_1");
    assert!(!run.ended());
}

#[tokio::test]
async fn test_unknown_tool_is_reported_to_the_model() {
    let adapter = ScriptedAdapter::with_turns([
        tool_call_turn([("call_1", "get_humidity", "{}")]),
        PresetResponse::text("I can't check the humidity."),
    ]);
    let options = ChatOptions::builder("test-model")
        .with_messages(vec![ModelMessage::user("humidity?")])
        .with_tools(tools(Arc::default()))
        .build();

    let run = run(&adapter, options).await;
    let chunks = run.chunks();
    let ChunkKind::ToolResult { content, .. } = &chunks[2].kind else {
        panic!("unexpected chunk: {:?}", chunks[2]);
    };
    assert_eq!(content, r#"{"error":"Unknown tool: get_humidity"}"#);
    assert_eq!(adapter.request_count(), 2);
    assert!(run.ended());
}

#[tokio::test]
async fn test_adapter_error() {
    let adapter = ScriptedAdapter::default();
    let options = ChatOptions::builder("test-model")
        .with_messages(vec![ModelMessage::user("hi")])
        .build();

    let run = run(&adapter, options).await;
    assert_eq!(run.kinds(), ["error"]);
    assert!(run.events.names().contains(&"stream:chunk:error"));
    assert!(!run.ended());
}

#[tokio::test]
async fn test_abort() {
    let mut adapter =
        ScriptedAdapter::with_turns([PresetResponse::text("a b c d e f")]);
    adapter.set_delay(Duration::from_millis(5));
    let signal = CancellationToken::new();
    let options = ChatOptions::builder("test-model")
        .with_messages(vec![ModelMessage::user("count")])
        .with_abort_signal(signal.clone())
        .build();

    let events = RecordingEventSink::new();
    let mut stream = ChatEngine::new(adapter, options)
        .with_events(events.clone())
        .run();
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.kind.type_name(), "content");

    signal.cancel();
    let rest = timeout(Duration::from_secs(5), stream.collect::<Vec<_>>())
        .await
        .unwrap();
    assert!(rest.is_empty());
    assert!(!events.names().contains(&"stream:ended"));
}

#[tokio::test]
async fn test_loop_strategy_and_system_prompt() {
    let adapter = ScriptedAdapter::with_turns([
        tool_call_turn([("call_1", "get_temperature", "{}")]),
        PresetResponse::text("70."),
    ]);
    let options = ChatOptions::builder("test-model")
        .with_system_prompt("Be brief.")
        .with_messages(vec![ModelMessage::user("temperature?")])
        .with_tools(tools(Arc::default()))
        .with_loop_strategy(max_iterations(1))
        .build();

    let run = run(&adapter, options).await;
    assert_eq!(run.kinds(), ["tool_call", "done", "tool_result"]);
    assert!(run.ended());

    let requests = adapter.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].messages[0], ModelMessage::system("Be brief."));
    assert_eq!(requests[0].messages[1].role, Role::User);
}
