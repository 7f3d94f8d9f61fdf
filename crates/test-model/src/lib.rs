//! A local scripted chat adapter for testing purpose.

mod preset;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chatloop_model::{
    ChatAdapter, ChatStreamOptions, ChunkError, ChunkKind, ChunkStream,
    FinishReason, ModelMessage, Role, StreamChunk,
};
use tokio::time::sleep;

pub use preset::*;

/// A request received by a [`ScriptedAdapter`].
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedRequest {
    /// The requested model.
    pub model: String,
    /// The history sent with the request.
    pub messages: Vec<ModelMessage>,
    /// Names of the tools offered to the model.
    pub tools: Vec<String>,
}

#[derive(Default)]
struct State {
    requests: Vec<RecordedRequest>,
    attempts: HashMap<usize, u64>,
}

/// A local fake adapter for testing purpose.
///
/// Before sending requests, you need to set up the script, which is how
/// the model should respond to each turn. The turn is selected by the
/// number of assistant messages in the request history, so the first
/// request gets the first response, the request carrying one assistant
/// message gets the second, and so on. If there are not enough turns in
/// the script, an error chunk is returned.
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone, Default)]
pub struct ScriptedAdapter {
    turns: Vec<PresetResponse>,
    delay: Option<Duration>,
    state: Arc<Mutex<State>>,
}

impl ScriptedAdapter {
    /// Creates an adapter with the given turns.
    pub fn with_turns<I>(turns: I) -> Self
    where
        I: IntoIterator<Item = PresetResponse>,
    {
        Self {
            turns: turns.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Appends a turn to the script.
    #[inline]
    pub fn add_turn(&mut self, preset: PresetResponse) {
        self.turns.push(preset);
    }

    /// Waits `duration` before every chunk.
    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    /// Returns all requests received so far, shared across clones.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock_state().requests.clone()
    }

    /// Returns the number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.lock_state().requests.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, options: &ChatStreamOptions, turn: usize) -> bool {
        let mut state = self.lock_state();
        state.requests.push(RecordedRequest {
            model: options.model.clone(),
            messages: options.messages.clone(),
            tools: options.tools.iter().map(|t| t.name.clone()).collect(),
        });

        let attempt = state.attempts.entry(turn).or_default();
        *attempt += 1;
        match self.turns.get(turn).and_then(|preset| preset.failures) {
            Some(0) => true,
            Some(failures) => *attempt <= failures,
            None => false,
        }
    }
}

impl ChatAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        "scripted"
    }

    fn chat_stream(&self, options: ChatStreamOptions) -> ChunkStream {
        let turn = options
            .messages
            .iter()
            .filter(|msg| msg.role == Role::Assistant)
            .count();
        let failing = self.record(&options, turn);
        let response = self.turns.get(turn).cloned();

        let id = format!("chatcmpl-test-{turn}");
        let model = options.model;
        let signal = options.signal;
        let delay = self.delay;

        Box::pin(async_stream::stream! {
            let Some(response) = response else {
                let error = ChunkError::new(format!(
                    "no preset response for turn {turn}"
                ));
                yield StreamChunk::error(&id, &model, error);
                return;
            };
            if failing {
                let error = ChunkError::new("scripted failure")
                    .with_code("rate_limit_exceeded");
                yield StreamChunk::error(&id, &model, error);
                return;
            }

            let has_tool_calls = response.has_tool_calls();
            let mut content = String::new();
            let mut thinking = String::new();
            let mut call_count = 0;
            let mut call_index = 0;
            let mut saw_done = false;

            for event in response.events {
                if let Some(delay) = delay {
                    tokio::select! {
                        _ = signal.cancelled() => return,
                        _ = sleep(delay) => {}
                    }
                }
                if signal.is_cancelled() {
                    return;
                }

                let chunk = match event {
                    PresetEvent::Content(delta) => {
                        content.push_str(&delta);
                        StreamChunk::content(&id, &model, delta, &content)
                    }
                    PresetEvent::Thinking(delta) => {
                        thinking.push_str(&delta);
                        let kind = ChunkKind::Thinking {
                            delta,
                            content: thinking.clone(),
                        };
                        StreamChunk::new(&id, &model, kind)
                    }
                    PresetEvent::ToolCall(tool_call) => {
                        if !tool_call.id.is_empty() {
                            call_index = call_count;
                            call_count += 1;
                        }
                        let index = call_index;
                        StreamChunk::tool_call(&id, &model, tool_call, index)
                    }
                    PresetEvent::ToolResult { tool_call_id, content } => {
                        let kind = ChunkKind::ToolResult {
                            tool_call_id,
                            content,
                        };
                        StreamChunk::new(&id, &model, kind)
                    }
                    PresetEvent::Done(reason) => {
                        saw_done = true;
                        StreamChunk::done(&id, &model, Some(reason))
                    }
                    PresetEvent::Error(error) => {
                        yield StreamChunk::error(&id, &model, error);
                        return;
                    }
                };
                yield chunk;
            }

            if !saw_done {
                let reason = if has_tool_calls {
                    FinishReason::ToolCalls
                } else {
                    FinishReason::Stop
                };
                yield StreamChunk::done(&id, &model, Some(reason));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use chatloop_model::ToolCall;
    use futures_util::StreamExt;

    use super::*;

    fn kinds(chunks: &[StreamChunk]) -> Vec<&'static str> {
        chunks.iter().map(|chunk| chunk.kind.type_name()).collect()
    }

    #[tokio::test]
    async fn test_turn_selection() {
        let adapter = ScriptedAdapter::with_turns([
            PresetResponse::with_events([
                PresetEvent::Content("Let me check.".to_owned()),
                PresetEvent::ToolCall(ToolCall::function(
                    "call_1",
                    "get_temperature",
                    "{}",
                )),
            ]),
            PresetResponse::text("It is 70 degrees."),
        ]);

        let mut messages = vec![ModelMessage::user("temperature?")];
        let options = ChatStreamOptions::new("test", messages.clone());
        let chunks: Vec<_> = adapter.chat_stream(options).collect().await;
        assert_eq!(kinds(&chunks), ["content", "tool_call", "done"]);
        assert_eq!(
            chunks.last().unwrap().finish_reason(),
            Some(FinishReason::ToolCalls)
        );

        messages.push(ModelMessage::assistant_tool_calls(
            None,
            vec![ToolCall::function("call_1", "get_temperature", "{}")],
        ));
        messages.push(ModelMessage::tool_result("call_1", "70"));
        let options = ChatStreamOptions::new("test", messages);
        let chunks: Vec<_> = adapter.chat_stream(options).collect().await;
        let ChunkKind::Content { content, .. } = &chunks[3].kind else {
            panic!("unexpected chunk: {:?}", chunks[3]);
        };
        assert_eq!(content, "It is 70 degrees.");
        assert_eq!(
            chunks.last().unwrap().finish_reason(),
            Some(FinishReason::Stop)
        );
        assert_eq!(adapter.request_count(), 2);
        assert_eq!(adapter.requests()[1].messages.len(), 3);
    }

    #[tokio::test]
    async fn test_missing_turn_and_failures() {
        let adapter = ScriptedAdapter::with_turns([
            PresetResponse::text("Hi").with_failures(1),
        ]);
        let options = ChatStreamOptions::new("test", vec![]);

        let chunks: Vec<_> =
            adapter.chat_stream(options.clone()).collect().await;
        assert_eq!(kinds(&chunks), ["error"]);
        let chunks: Vec<_> =
            adapter.chat_stream(options.clone()).collect().await;
        assert_eq!(kinds(&chunks), ["content", "done"]);

        let history = vec![ModelMessage::assistant("Hi")];
        let chunks: Vec<_> = adapter
            .chat_stream(ChatStreamOptions::new("test", history))
            .collect()
            .await;
        assert_eq!(kinds(&chunks), ["error"]);
    }

    #[tokio::test]
    async fn test_abort() {
        let mut adapter =
            ScriptedAdapter::with_turns([PresetResponse::text("a b c d e")]);
        adapter.set_delay(Duration::from_millis(1));

        let options = ChatStreamOptions::new("test", vec![]);
        let signal = options.signal.clone();
        let mut stream = adapter.chat_stream(options);
        assert!(stream.next().await.is_some());
        signal.cancel();
        assert!(stream.next().await.is_none());
    }
}
