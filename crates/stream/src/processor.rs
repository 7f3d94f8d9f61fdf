
use std::collections::HashMap;
use std::pin::pin;
use std::sync::Arc;

use chatloop_model::{
    ChunkError, ChunkKind, FinishReason, ModelMessage, Role, StreamChunk,
    ToolCall,
};
use futures_util::{Stream, StreamExt};
use serde_json::Value;

use crate::convert::output_content;
use crate::updaters::{self, MessageList, ToolCallUpdate};
use crate::{
    ChunkRecording, ChunkStrategy, JsonParser, MessagePart, PartialJsonParser,
    ProcessorEvent, ProcessorEventSink, ProcessorResult, StreamError,
    ToolCallState, ToolResultState, TracingProcessorSink, UIMessage,
    strategy::Immediate,
};

/// A tool call tracked while its stream is in flight.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCallEntry {
    /// The tool call id.
    pub id: String,
    /// The tool name.
    pub name: String,
    /// All arguments received so far.
    pub arguments: String,
    /// The lifecycle state.
    pub state: ToolCallState,
    /// The latest parse of `arguments`.
    pub parsed_arguments: Option<Value>,
    /// The provider-local index the call first arrived with.
    pub index: usize,
}

/// A snapshot of the stream state of a [`StreamProcessor`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProcessorState {
    /// All text so far, across segments.
    pub content: String,
    /// The thinking text so far.
    pub thinking: String,
    /// Tool calls in order of first appearance.
    pub tool_calls: Vec<ToolCallEntry>,
    /// The last finish reason seen.
    pub finish_reason: Option<FinishReason>,
    /// Whether a `done` chunk has been seen.
    pub done: bool,
}

/// State of the assistant message being streamed.
#[derive(Default)]
struct Turn {
    total_text: String,
    segment_text: String,
    last_emitted_text: String,
    thinking: String,
    tool_calls: HashMap<String, ToolCallEntry>,
    tool_call_order: Vec<String>,
    ids_by_index: HashMap<usize, String>,
    finish_reason: Option<FinishReason>,
    done: bool,
    tool_calls_since_text_start: bool,
}

/// [`StreamProcessor`] builder.
pub struct StreamProcessorBuilder {
    chunk_strategy: Box<dyn ChunkStrategy>,
    events: Arc<dyn ProcessorEventSink>,
    json_parser: Arc<dyn JsonParser>,
    recording: bool,
    initial_messages: Vec<UIMessage>,
}

impl Default for StreamProcessorBuilder {
    fn default() -> Self {
        Self {
            chunk_strategy: Box::new(Immediate),
            events: Arc::new(TracingProcessorSink),
            json_parser: Arc::new(PartialJsonParser),
            recording: false,
            initial_messages: vec![],
        }
    }
}

impl StreamProcessorBuilder {
    /// Sets the strategy deciding when text updates are emitted.
    ///
    /// Defaults to emitting on every chunk.
    #[inline]
    pub fn with_chunk_strategy<S: ChunkStrategy + 'static>(
        mut self,
        strategy: S,
    ) -> Self {
        self.chunk_strategy = Box::new(strategy);
        self
    }

    /// Sets the event sink.
    #[inline]
    pub fn with_events<E: ProcessorEventSink + 'static>(
        mut self,
        events: E,
    ) -> Self {
        self.events = Arc::new(events);
        self
    }

    /// Sets a shared event sink.
    #[inline]
    pub fn with_shared_events(
        mut self,
        events: Arc<dyn ProcessorEventSink>,
    ) -> Self {
        self.events = events;
        self
    }

    /// Sets the parser used for partial tool call arguments.
    #[inline]
    pub fn with_json_parser<P: JsonParser + 'static>(
        mut self,
        parser: P,
    ) -> Self {
        self.json_parser = Arc::new(parser);
        self
    }

    /// Records every chunk passed to [`StreamProcessor::process`].
    #[inline]
    pub fn with_recording(mut self, recording: bool) -> Self {
        self.recording = recording;
        self
    }

    /// Populates the transcript.
    #[inline]
    pub fn with_initial_messages(mut self, messages: Vec<UIMessage>) -> Self {
        self.initial_messages = messages;
        self
    }

    /// Builds the processor.
    pub fn build(self) -> StreamProcessor {
        let mut processor = StreamProcessor {
            chunk_strategy: self.chunk_strategy,
            events: self.events,
            json_parser: self.json_parser,
            recording_enabled: self.recording,
            messages: MessageList::from([]),
            message_by_tool_call: HashMap::new(),
            message_by_approval: HashMap::new(),
            current_message_id: None,
            turn: Turn::default(),
            recording: None,
        };
        processor.replace_messages(
            self.initial_messages.into_iter().map(Arc::new).collect(),
        );
        processor
    }
}

/// A state machine turning a chunk stream into a transcript.
///
/// The processor owns the transcript. Every change replaces the message
/// list with a new one and is reported to the event sink, so a
/// [`MessageList`] handed out earlier stays valid and unchanged.
///
/// Chunks only update the transcript after
/// [`start_assistant_message`](Self::start_assistant_message) has been
/// called. The text, thinking and tool call accumulators behind
/// [`result`](Self::result) are updated either way.
pub struct StreamProcessor {
    chunk_strategy: Box<dyn ChunkStrategy>,
    events: Arc<dyn ProcessorEventSink>,
    json_parser: Arc<dyn JsonParser>,
    recording_enabled: bool,

    messages: MessageList,
    message_by_tool_call: HashMap<String, String>,
    message_by_approval: HashMap<String, String>,
    current_message_id: Option<String>,

    turn: Turn,
    recording: Option<ChunkRecording>,
}

impl Default for StreamProcessor {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl StreamProcessor {
    /// Creates a builder with the default options.
    #[inline]
    pub fn builder() -> StreamProcessorBuilder {
        StreamProcessorBuilder::default()
    }

    /// Creates a processor with the default options.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    // Transcript management.

    /// Replaces the transcript, e.g. with persisted state.
    pub fn set_messages(&mut self, messages: Vec<UIMessage>) {
        self.replace_messages(messages.into_iter().map(Arc::new).collect());
        self.emit_messages_changed();
    }

    /// Appends a user message.
    pub fn add_user_message<S: Into<String>>(
        &mut self,
        content: S,
    ) -> Arc<UIMessage> {
        let msg = Arc::new(UIMessage::text(Role::User, content));
        self.push_message(Arc::clone(&msg));
        self.emit_messages_changed();
        msg
    }

    /// Starts a new assistant message and resets the stream state.
    ///
    /// Returns the id of the new message.
    pub fn start_assistant_message(&mut self) -> String {
        self.reset_turn();

        let msg = UIMessage::new(Role::Assistant);
        let id = msg.id.clone();
        self.current_message_id = Some(id.clone());
        self.push_message(Arc::new(msg));

        self.events.on_event(ProcessorEvent::StreamStarted {
            message_id: id.clone(),
        });
        self.emit_messages_changed();
        id
    }

    /// Records the output of a tool call, usually a client tool.
    ///
    /// The tool call part gets the output (or `{"error": error}`), and a
    /// tool result part is added to the message holding the call.
    pub fn add_tool_result(
        &mut self,
        tool_call_id: &str,
        output: Value,
        error: Option<&str>,
    ) -> Result<(), StreamError> {
        let owner = self.message_by_tool_call.get(tool_call_id).cloned();
        let Some(message_id) = owner else {
            warn!("no message holds tool call {tool_call_id}");
            return Err(StreamError::ToolCallNotFound(tool_call_id.to_owned()));
        };

        let messages = updaters::update_tool_call_with_output(
            &self.messages,
            &message_id,
            tool_call_id,
            output.clone(),
            None,
            error,
        );
        let (content, state) = match error {
            Some(error) => (
                output_content(&serde_json::json!({ "error": error })),
                ToolResultState::Error,
            ),
            None => (output_content(&output), ToolResultState::Complete),
        };
        self.messages = updaters::update_tool_result_part(
            &messages,
            &message_id,
            tool_call_id,
            &content,
            state,
            error,
        );
        self.emit_messages_changed();
        Ok(())
    }

    /// Records an approval decision.
    pub fn add_tool_approval_response(
        &mut self,
        approval_id: &str,
        approved: bool,
    ) -> Result<(), StreamError> {
        let owner = self.message_by_approval.get(approval_id).cloned();
        let Some(message_id) = owner else {
            warn!("no tool call is waiting for approval {approval_id}");
            return Err(StreamError::ApprovalNotFound(approval_id.to_owned()));
        };
        self.messages = updaters::update_tool_call_approval_response(
            &self.messages,
            &message_id,
            approval_id,
            approved,
        );
        self.emit_messages_changed();
        Ok(())
    }

    /// Returns the transcript in provider message form.
    pub fn to_model_messages(&self) -> Vec<ModelMessage> {
        crate::ui_messages_to_model_messages(self.messages.iter().map(|m| &**m))
    }

    /// Returns the current transcript.
    #[inline]
    pub fn messages(&self) -> MessageList {
        Arc::clone(&self.messages)
    }

    /// Returns the id of the assistant message being streamed.
    #[inline]
    pub fn current_message_id(&self) -> Option<&str> {
        self.current_message_id.as_deref()
    }

    /// Returns `true` if every tool call of the latest assistant message
    /// has either an answered approval, or an output and no approval.
    pub fn are_all_tools_complete(&self) -> bool {
        let Some(last) =
            self.messages.iter().rev().find(|m| m.role == Role::Assistant)
        else {
            return true;
        };
        last.tool_calls().all(|call| call.is_terminal())
    }

    /// Keeps the messages up to and including `index`.
    pub fn remove_messages_after(&mut self, index: usize) {
        let keep = (index + 1).min(self.messages.len());
        let kept: MessageList = self.messages[..keep].iter().cloned().collect();
        self.replace_messages(kept);
        self.emit_messages_changed();
    }

    /// Removes every message.
    pub fn clear_messages(&mut self) {
        self.replace_messages(MessageList::from([]));
        self.current_message_id = None;
        self.emit_messages_changed();
    }

    /// Resets the stream state and the transcript.
    pub fn reset(&mut self) {
        self.reset_turn();
        self.replace_messages(MessageList::from([]));
        self.current_message_id = None;
    }

    // Stream processing.

    /// Processes a whole stream and returns its result.
    ///
    /// The stream state is reset first, the transcript is kept.
    pub async fn process<S>(&mut self, stream: S) -> ProcessorResult
    where
        S: Stream<Item = StreamChunk>,
    {
        self.reset_turn();
        if self.recording_enabled {
            self.start_recording();
        }

        let mut stream = pin!(stream);
        while let Some(chunk) = stream.next().await {
            self.process_chunk(&chunk);
        }

        self.finalize_stream();
        let result = self.result();
        if let Some(recording) = &mut self.recording {
            recording.result = Some(result.clone());
        }
        result
    }

    /// Processes a single chunk.
    pub fn process_chunk(&mut self, chunk: &StreamChunk) {
        if let Some(recording) = &mut self.recording {
            let now = chrono::Utc::now().timestamp_millis();
            recording.push_at(chunk.clone(), now);
        }
        trace!("processing {} chunk", chunk.kind.type_name());

        match &chunk.kind {
            ChunkKind::Content { delta, content, .. } => {
                self.handle_content(delta, content);
            }
            ChunkKind::ToolCall { tool_call, index } => {
                self.handle_tool_call(tool_call, *index);
            }
            ChunkKind::ToolResult {
                tool_call_id,
                content,
            } => self.handle_tool_result(tool_call_id, content),
            ChunkKind::Thinking { delta, content } => {
                self.handle_thinking(delta, content);
            }
            ChunkKind::Done { finish_reason, .. } => {
                self.turn.finish_reason = *finish_reason;
                self.turn.done = true;
                self.complete_all_tool_calls();
            }
            ChunkKind::Error { error } => self.handle_error(error),
            ChunkKind::ApprovalRequested {
                tool_call_id,
                tool_name,
                input,
                approval,
            } => {
                self.handle_approval_requested(
                    tool_call_id,
                    tool_name,
                    input,
                    &approval.id,
                );
            }
            ChunkKind::ToolInputAvailable {
                tool_call_id,
                tool_name,
                input,
            } => {
                self.events.on_event(ProcessorEvent::ToolInputAvailable {
                    tool_call_id: tool_call_id.clone(),
                    tool_name: tool_name.clone(),
                    input: input.clone(),
                });
            }
        }
    }

    /// Completes pending work at the end of a stream: open tool calls are
    /// completed and unemitted text is flushed.
    pub fn finalize_stream(&mut self) {
        self.complete_all_tool_calls();
        if self.turn.segment_text != self.turn.last_emitted_text {
            self.emit_text_update();
        }

        let Some(id) = &self.current_message_id else {
            return;
        };
        if let Some(msg) = self.messages.iter().find(|m| &m.id == id) {
            self.events.on_event(ProcessorEvent::StreamEnded(Arc::clone(msg)));
        }
    }

    /// Returns the result of the stream so far.
    pub fn result(&self) -> ProcessorResult {
        let tool_calls = self.completed_tool_calls();
        ProcessorResult {
            content: self.turn.total_text.clone(),
            thinking: Some(self.turn.thinking.clone())
                .filter(|thinking| !thinking.is_empty()),
            tool_calls: Some(tool_calls).filter(|calls| !calls.is_empty()),
            finish_reason: self.turn.finish_reason,
        }
    }

    /// Returns a snapshot of the stream state.
    pub fn state(&self) -> ProcessorState {
        ProcessorState {
            content: self.turn.total_text.clone(),
            thinking: self.turn.thinking.clone(),
            tool_calls: self.ordered_tool_calls().cloned().collect(),
            finish_reason: self.turn.finish_reason,
            done: self.turn.done,
        }
    }

    // Recording.

    /// Starts recording chunks, discarding any previous recording.
    pub fn start_recording(&mut self) {
        self.recording_enabled = true;
        self.recording = Some(ChunkRecording::new());
    }

    /// Returns the current recording.
    #[inline]
    pub fn recording(&self) -> Option<&ChunkRecording> {
        self.recording.as_ref()
    }

    /// Takes the current recording out of the processor.
    #[inline]
    pub fn take_recording(&mut self) -> Option<ChunkRecording> {
        self.recording.take()
    }

    /// Feeds a recording through a fresh processor.
    pub async fn replay(
        recording: &ChunkRecording,
        builder: StreamProcessorBuilder,
    ) -> ProcessorResult {
        let mut processor = builder.build();
        processor.process(crate::replay_stream(recording)).await
    }
}

impl StreamProcessor {
    fn handle_content(&mut self, delta: &str, content: &str) {
        // Content after a tool call means its arguments are complete.
        self.complete_all_tool_calls();

        // Providers that restart `content` after a tool call are detected
        // heuristically, a shorter or diverging text opens a new segment.
        let previous = &self.turn.segment_text;
        let is_new_segment = self.turn.tool_calls_since_text_start
            && !previous.is_empty()
            && (content.len() < previous.len()
                || !(content.starts_with(previous.as_str())
                    || previous.starts_with(content)));
        if is_new_segment {
            trace!("new text segment after tool calls");
            if self.turn.segment_text != self.turn.last_emitted_text {
                self.emit_text_update();
            }
            self.turn.segment_text.clear();
            self.turn.last_emitted_text.clear();
            self.turn.tool_calls_since_text_start = false;
        }

        let current = &self.turn.segment_text;
        let next = merge_text(current, delta, content);
        let added = next[current.len()..].to_owned();
        self.turn.total_text.push_str(&added);
        self.turn.segment_text = next;

        let should_emit = self
            .chunk_strategy
            .should_emit(&added, &self.turn.segment_text);
        let changed = self.turn.segment_text != self.turn.last_emitted_text;
        if should_emit && changed {
            self.emit_text_update();
        }
    }

    fn handle_tool_call(&mut self, tool_call: &ToolCall, index: usize) {
        self.turn.tool_calls_since_text_start = true;

        let id = if tool_call.id.is_empty() {
            match self.turn.ids_by_index.get(&index) {
                Some(id) => id.clone(),
                None => {
                    warn!("dropping tool call fragment without id at {index}");
                    return;
                }
            }
        } else {
            self.turn.ids_by_index.insert(index, tool_call.id.clone());
            tool_call.id.clone()
        };
        let fragment = tool_call.arguments();

        let entry = match self.turn.tool_calls.get_mut(&id) {
            Some(entry) => {
                entry.arguments.push_str(fragment);
                if entry.name.is_empty() {
                    entry.name = tool_call.name().to_owned();
                }
                if entry.state == ToolCallState::AwaitingInput
                    && !fragment.is_empty()
                {
                    entry.state = ToolCallState::InputStreaming;
                }
                entry.parsed_arguments =
                    self.json_parser.parse(&entry.arguments);
                entry.clone()
            }
            None => {
                let state = if fragment.is_empty() {
                    ToolCallState::AwaitingInput
                } else {
                    ToolCallState::InputStreaming
                };
                let entry = ToolCallEntry {
                    id: id.clone(),
                    name: tool_call.name().to_owned(),
                    arguments: fragment.to_owned(),
                    state,
                    parsed_arguments: self.json_parser.parse(fragment),
                    index,
                };
                debug!("tool call {id} ({}) started", entry.name);
                self.turn.tool_calls.insert(id.clone(), entry.clone());
                self.turn.tool_call_order.push(id);
                entry
            }
        };

        self.update_tool_call_part(&entry);
    }

    fn handle_tool_result(&mut self, tool_call_id: &str, content: &str) {
        let Some(message_id) = self.owner_of(tool_call_id) else {
            return;
        };
        let messages = updaters::update_tool_call_with_output(
            &self.messages,
            &message_id,
            tool_call_id,
            crate::convert::parse_output(content),
            None,
            None,
        );
        self.messages = updaters::update_tool_result_part(
            &messages,
            &message_id,
            tool_call_id,
            content,
            ToolResultState::Complete,
            None,
        );
        self.emit_messages_changed();
    }

    fn handle_thinking(&mut self, delta: &str, content: &str) {
        self.turn.thinking = merge_text(&self.turn.thinking, delta, content);

        let Some(message_id) = self.current_message_id.clone() else {
            return;
        };
        self.messages = updaters::update_thinking_part(
            &self.messages,
            &message_id,
            &self.turn.thinking,
        );
        self.emit_messages_changed();
        self.events.on_event(ProcessorEvent::ThinkingUpdated {
            message_id,
            content: self.turn.thinking.clone(),
        });
    }

    fn handle_error(&mut self, error: &ChunkError) {
        error!("stream reported an error: {error}");
        self.events.on_event(ProcessorEvent::Error(error.clone()));
    }

    fn handle_approval_requested(
        &mut self,
        tool_call_id: &str,
        tool_name: &str,
        input: &Value,
        approval_id: &str,
    ) {
        // Approvals are only indexed for known tool calls.
        let owner = self.message_by_tool_call.get(tool_call_id).cloned();
        if let Some(message_id) = owner {
            self.messages = updaters::update_tool_call_approval(
                &self.messages,
                &message_id,
                tool_call_id,
                approval_id,
            );
            self.message_by_approval
                .insert(approval_id.to_owned(), message_id);
            self.emit_messages_changed();
        } else {
            warn!("approval {approval_id} for unknown call {tool_call_id}");
        }

        self.events.on_event(ProcessorEvent::ApprovalRequested {
            tool_call_id: tool_call_id.to_owned(),
            tool_name: tool_name.to_owned(),
            input: input.clone(),
            approval_id: approval_id.to_owned(),
        });
    }

    fn complete_all_tool_calls(&mut self) {
        let pending: Vec<_> = self
            .turn
            .tool_call_order
            .iter()
            .filter(|id| {
                self.turn.tool_calls.get(*id).is_some_and(|entry| {
                    entry.state < ToolCallState::InputComplete
                })
            })
            .cloned()
            .collect();

        for id in pending {
            let Some(entry) = self.turn.tool_calls.get_mut(&id) else {
                continue;
            };
            entry.state = ToolCallState::InputComplete;
            entry.parsed_arguments = self.json_parser.parse(&entry.arguments);
            let entry = entry.clone();
            debug!("tool call {id} input complete");
            self.update_tool_call_part(&entry);
        }
    }

    fn update_tool_call_part(&mut self, entry: &ToolCallEntry) {
        let Some(message_id) = self.current_message_id.clone() else {
            return;
        };
        self.messages = updaters::update_tool_call_part(
            &self.messages,
            &message_id,
            ToolCallUpdate {
                id: &entry.id,
                name: &entry.name,
                arguments: &entry.arguments,
                state: entry.state,
                parsed_arguments: entry.parsed_arguments.clone(),
            },
        );
        self.message_by_tool_call
            .insert(entry.id.clone(), message_id.clone());
        self.emit_messages_changed();
        self.events.on_event(ProcessorEvent::ToolCallStateChanged {
            message_id,
            tool_call_id: entry.id.clone(),
            state: entry.state,
            arguments: entry.arguments.clone(),
        });
    }

    fn emit_text_update(&mut self) {
        self.turn.last_emitted_text = self.turn.segment_text.clone();

        let Some(message_id) = self.current_message_id.clone() else {
            return;
        };
        self.messages = updaters::update_text_part(
            &self.messages,
            &message_id,
            &self.turn.segment_text,
        );
        self.emit_messages_changed();
        self.events.on_event(ProcessorEvent::TextUpdated {
            message_id,
            content: self.turn.segment_text.clone(),
        });
    }

    #[inline]
    fn emit_messages_changed(&self) {
        self.events
            .on_event(ProcessorEvent::MessagesChanged(self.messages()));
    }

    /// Returns the message holding a tool call, falling back to the
    /// message being streamed.
    fn owner_of(&self, tool_call_id: &str) -> Option<String> {
        self.message_by_tool_call
            .get(tool_call_id)
            .or(self.current_message_id.as_ref())
            .cloned()
    }

    fn push_message(&mut self, msg: Arc<UIMessage>) {
        let mut messages = self.messages.to_vec();
        messages.push(msg);
        self.replace_messages(messages.into());
    }

    fn replace_messages(&mut self, messages: MessageList) {
        self.message_by_tool_call.clear();
        self.message_by_approval.clear();
        for msg in messages.iter() {
            for part in &msg.parts {
                let MessagePart::ToolCall(call) = part else {
                    continue;
                };
                self.message_by_tool_call
                    .insert(call.id.clone(), msg.id.clone());
                if let Some(approval) = &call.approval {
                    self.message_by_approval
                        .insert(approval.id.clone(), msg.id.clone());
                }
            }
        }
        self.messages = messages;
    }

    fn ordered_tool_calls(&self) -> impl Iterator<Item = &ToolCallEntry> {
        self.turn
            .tool_call_order
            .iter()
            .filter_map(|id| self.turn.tool_calls.get(id))
    }

    fn completed_tool_calls(&self) -> Vec<ToolCall> {
        self.ordered_tool_calls()
            .filter(|entry| entry.state >= ToolCallState::InputComplete)
            .map(|entry| {
                ToolCall::function(&entry.id, &entry.name, &entry.arguments)
            })
            .collect()
    }

    fn reset_turn(&mut self) {
        self.turn = Turn::default();
        self.chunk_strategy.reset();
    }
}

/// Merges a text chunk into `current`.
///
/// A non-empty `delta` is appended. Otherwise `content` replaces the text
/// if it extends it, is ignored if the text already extends it, and is
/// appended if neither is a prefix of the other.
fn merge_text(current: &str, delta: &str, content: &str) -> String {
    if !delta.is_empty() {
        return format!("{current}{delta}");
    }
    if content.is_empty() || current.starts_with(content) {
        return current.to_owned();
    }
    if content.starts_with(current) {
        return content.to_owned();
    }
    format!("{current}{content}")
}
