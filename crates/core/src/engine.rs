use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use async_stream::stream;
use chatloop_model::{
    ApprovalInfo, ChatAdapter, ChatStreamOptions, ChunkKind, ChunkStream,
    FinishReason, ModelMessage, Role, StreamChunk, ToolCall,
};
use chatloop_stream::generate_id;
use futures_util::{Stream, StreamExt};

use crate::events::{ChatEvent, ChatEventSink, TracingEventSink};
use crate::strategy::AgentLoopState;
use crate::tool::{
    ApprovalRequest, ClientToolRequest, ToolCallResult, ToolExecutionResult,
    execute_tool_calls,
};
use crate::{ChatError, ChatOptions, ToolCallManager};

/// The chunk stream of a chat run.
///
/// An `Err` item is the last item of the stream.
pub type ChatStream =
    Pin<Box<dyn Stream<Item = Result<StreamChunk, ChatError>> + Send>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ToolPhase {
    Continue,
    Stop,
    Wait,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CyclePhase {
    ProcessChat,
    ExecuteToolCalls,
}

/// Drives repeated model turns and resolves the tool calls they make.
///
/// Each iteration streams one model turn, then resolves the tool calls
/// of that turn. Tool results are appended to the history and the model
/// is called again, until the loop strategy says otherwise.
///
/// When a tool call needs approval or has to run on the client, the
/// corresponding chunks are sent and the stream ends without a
/// `stream:ended` event. Run the engine again with the same history and a
/// [`ClientState`](crate::tool::ClientState) holding the answers: calls
/// without a result in the history are resolved before the model is
/// called.
pub struct ChatEngine {
    adapter: Box<dyn ChatAdapter>,
    events: Arc<dyn ChatEventSink>,
    options: ChatOptions,
    tool_call_manager: ToolCallManager,
    messages: Vec<ModelMessage>,
    initial_message_count: usize,
    request_id: String,
    stream_id: String,

    iteration_count: usize,
    last_finish_reason: Option<FinishReason>,
    started_at: Instant,
    total_chunk_count: usize,
    current_message_id: Option<String>,
    accumulated_content: String,
    done_chunk: Option<StreamChunk>,
    should_emit_stream_end: bool,
    early_termination: bool,
    tool_phase: ToolPhase,
    cycle_phase: CyclePhase,
}

impl ChatEngine {
    /// Creates an engine. Nothing happens until the stream returned by
    /// [`run`](Self::run) is polled.
    pub fn new<A>(adapter: A, options: ChatOptions) -> Self
    where
        A: ChatAdapter + 'static,
    {
        let mut messages: Vec<_> = options
            .system_prompts
            .iter()
            .map(ModelMessage::system)
            .collect();
        messages.extend(options.messages.iter().cloned());

        Self {
            adapter: Box::new(adapter),
            events: Arc::new(TracingEventSink),
            initial_message_count: options.messages.len(),
            options,
            tool_call_manager: ToolCallManager::new(),
            messages,
            request_id: generate_id("chat"),
            stream_id: generate_id("stream"),
            iteration_count: 0,
            last_finish_reason: None,
            started_at: Instant::now(),
            total_chunk_count: 0,
            current_message_id: None,
            accumulated_content: String::new(),
            done_chunk: None,
            should_emit_stream_end: true,
            early_termination: false,
            tool_phase: ToolPhase::Continue,
            cycle_phase: CyclePhase::ProcessChat,
        }
    }

    /// Sets the event sink, [`TracingEventSink`] by default.
    #[inline]
    pub fn with_events<E>(mut self, events: E) -> Self
    where
        E: ChatEventSink + 'static,
    {
        self.events = Arc::new(events);
        self
    }

    /// Sets a shared event sink.
    #[inline]
    pub fn with_shared_events(
        mut self,
        events: Arc<dyn ChatEventSink>,
    ) -> Self {
        self.events = events;
        self
    }

    /// Returns the history as it is now, system prompts included.
    #[inline]
    pub fn messages(&self) -> &[ModelMessage] {
        &self.messages
    }

    /// Starts the run.
    ///
    /// Chunks are forwarded in the order the adapter produced them,
    /// followed by the chunks the engine creates for tool results,
    /// approval requests and client tool inputs. The stream ends early,
    /// and silently, once the abort signal is cancelled.
    pub fn run(self) -> ChatStream {
        let mut engine = self;
        Box::pin(stream! {
            engine.before_chat();

            match engine.resolve_pending_tool_calls().await {
                Ok((chunks, phase)) => {
                    for chunk in chunks {
                        yield Ok(chunk);
                    }
                    if phase == ToolPhase::Wait {
                        engine.after_chat();
                        return;
                    }
                }
                Err(err) => {
                    engine.should_emit_stream_end = false;
                    yield Err(err);
                    return;
                }
            }

            loop {
                if engine.early_termination || engine.is_aborted() {
                    break;
                }

                engine.begin_cycle();
                match engine.cycle_phase {
                    CyclePhase::ProcessChat => {
                        let mut turn = engine.start_turn();
                        while let Some(chunk) = turn.next().await {
                            if engine.is_aborted() {
                                break;
                            }
                            engine.total_chunk_count += 1;
                            yield Ok(chunk.clone());
                            engine.handle_stream_chunk(&chunk);
                            if engine.early_termination {
                                break;
                            }
                        }
                    }
                    CyclePhase::ExecuteToolCalls => {
                        match engine.process_tool_calls().await {
                            Ok(chunks) => {
                                for chunk in chunks {
                                    yield Ok(chunk);
                                }
                            }
                            Err(err) => {
                                engine.should_emit_stream_end = false;
                                yield Err(err);
                                return;
                            }
                        }
                    }
                }
                engine.end_cycle();

                if !engine.should_continue() {
                    break;
                }
            }

            engine.after_chat();
        })
    }

    fn before_chat(&mut self) {
        self.started_at = Instant::now();
        debug!("chat {} started", self.request_id);
        self.emit(ChatEvent::ChatStarted {
            request_id: self.request_id.clone(),
            model: self.options.model.clone(),
            message_count: self.initial_message_count,
            has_tools: !self.options.tools.is_empty(),
        });
        self.emit(ChatEvent::StreamStarted {
            stream_id: self.stream_id.clone(),
            model: self.options.model.clone(),
            provider: self.adapter.name().to_owned(),
        });
    }

    fn after_chat(&mut self) {
        if self.is_aborted() {
            debug!("chat {} aborted", self.request_id);
            return;
        }
        if !self.should_emit_stream_end {
            return;
        }
        debug!("chat {} ended", self.request_id);
        self.emit(ChatEvent::StreamEnded {
            stream_id: self.stream_id.clone(),
            total_chunks: self.total_chunk_count,
            duration: self.started_at.elapsed(),
        });
    }

    fn begin_cycle(&mut self) {
        if self.cycle_phase == CyclePhase::ProcessChat {
            self.current_message_id = Some(generate_id("msg"));
            self.accumulated_content.clear();
            self.done_chunk = None;
        }
    }

    fn end_cycle(&mut self) {
        match self.cycle_phase {
            CyclePhase::ProcessChat => {
                self.cycle_phase = CyclePhase::ExecuteToolCalls;
            }
            CyclePhase::ExecuteToolCalls => {
                self.cycle_phase = CyclePhase::ProcessChat;
                self.iteration_count += 1;
            }
        }
    }

    fn should_continue(&self) -> bool {
        if self.cycle_phase == CyclePhase::ExecuteToolCalls {
            return true;
        }
        let state = AgentLoopState {
            iteration_count: self.iteration_count,
            messages: &self.messages,
            finish_reason: self.last_finish_reason,
        };
        self.options.loop_strategy.should_continue(&state)
            && self.tool_phase == ToolPhase::Continue
    }

    #[inline]
    fn is_aborted(&self) -> bool {
        self.options.abort_signal.is_cancelled()
    }

    #[inline]
    fn emit(&self, event: ChatEvent) {
        self.events.on_event(event);
    }

    fn start_turn(&self) -> ChunkStream {
        let span = trace_span!("chat turn", iteration = self.iteration_count);
        span.in_scope(|| {
            debug!("requesting model with {} messages", self.messages.len());
            let mut options = ChatStreamOptions::new(
                self.options.model.clone(),
                self.messages.clone(),
            );
            options.tools = self.options.tools.descriptors();
            options.provider_options = self.options.provider_options.clone();
            options.signal = self.options.abort_signal.clone();
            self.adapter.chat_stream(options)
        })
    }

    fn handle_stream_chunk(&mut self, chunk: &StreamChunk) {
        trace!("chunk: {}", chunk.kind.type_name());
        let stream_id = self.stream_id.clone();
        let message_id = self.current_message_id.clone();

        match &chunk.kind {
            ChunkKind::Content { delta, content, .. } => {
                if content.is_empty() {
                    self.accumulated_content.push_str(delta);
                } else {
                    self.accumulated_content.clone_from(content);
                }
                self.emit(ChatEvent::StreamChunkContent {
                    stream_id,
                    message_id,
                    content: self.accumulated_content.clone(),
                    delta: delta.clone(),
                });
            }
            ChunkKind::ToolCall { tool_call, index } => {
                self.tool_call_manager.add_tool_call_chunk(tool_call, *index);
                self.emit(ChatEvent::StreamChunkToolCall {
                    stream_id,
                    message_id,
                    tool_call_id: tool_call.id.clone(),
                    tool_name: tool_call.name().to_owned(),
                    index: *index,
                    arguments: tool_call.arguments().to_owned(),
                });
            }
            ChunkKind::ToolResult {
                tool_call_id,
                content,
            } => {
                self.emit(ChatEvent::StreamChunkToolResult {
                    stream_id,
                    message_id,
                    tool_call_id: tool_call_id.clone(),
                    result: content.clone(),
                });
            }
            ChunkKind::Done {
                finish_reason,
                usage,
            } => {
                let recorded = self.recorded_finish_reason();
                let downgrade = recorded == Some(FinishReason::ToolCalls)
                    && *finish_reason == Some(FinishReason::Stop);
                if downgrade {
                    debug!("keeping tool_calls over a later stop");
                } else {
                    self.done_chunk = Some(chunk.clone());
                    self.last_finish_reason = *finish_reason;
                }
                self.emit(ChatEvent::StreamChunkDone {
                    stream_id,
                    message_id,
                    finish_reason: *finish_reason,
                    usage: *usage,
                });
            }
            ChunkKind::Error { error } => {
                error!("adapter {} failed: {error}", self.adapter.name());
                self.emit(ChatEvent::StreamChunkError {
                    stream_id,
                    message_id,
                    error: error.message.clone(),
                });
                self.early_termination = true;
                self.should_emit_stream_end = false;
            }
            ChunkKind::Thinking { .. }
            | ChunkKind::ApprovalRequested { .. }
            | ChunkKind::ToolInputAvailable { .. } => {}
        }
    }

    /// Finds tool calls in the history that have no `tool` message yet.
    fn pending_tool_calls(&self) -> Vec<ToolCall> {
        let completed: HashSet<&str> = self
            .messages
            .iter()
            .filter(|msg| msg.role == Role::Tool)
            .filter_map(|msg| msg.tool_call_id.as_deref())
            .collect();

        self.messages
            .iter()
            .filter(|msg| msg.role == Role::Assistant)
            .flat_map(|msg| msg.tool_calls())
            .filter(|call| !completed.contains(call.id.as_str()))
            .cloned()
            .collect()
    }

    async fn resolve_pending_tool_calls(
        &mut self,
    ) -> Result<(Vec<StreamChunk>, ToolPhase), ChatError> {
        let pending = self.pending_tool_calls();
        if pending.is_empty() {
            return Ok((vec![], ToolPhase::Continue));
        }
        debug!("resuming {} pending tool calls", pending.len());

        let done = StreamChunk::done(
            generate_id("pending"),
            self.options.model.clone(),
            Some(FinishReason::ToolCalls),
        );
        self.emit_iteration(pending.len());

        let outcome = execute_tool_calls(
            &pending,
            &self.options.tools,
            &self.options.client_state,
        )
        .await?;
        let waiting = outcome.is_waiting();
        let chunks = self.emit_outcome(outcome, &done);
        if waiting {
            self.should_emit_stream_end = false;
            return Ok((chunks, ToolPhase::Wait));
        }
        Ok((chunks, ToolPhase::Continue))
    }

    async fn process_tool_calls(
        &mut self,
    ) -> Result<Vec<StreamChunk>, ChatError> {
        let tool_calls = self.tool_call_manager.tool_calls();
        let done = match self.done_chunk.clone() {
            Some(done) if self.should_execute_tool_phase() => done,
            _ => {
                self.set_tool_phase(ToolPhase::Stop);
                return Ok(vec![]);
            }
        };
        if tool_calls.is_empty() {
            self.set_tool_phase(ToolPhase::Stop);
            return Ok(vec![]);
        }

        self.emit_iteration(tool_calls.len());
        let content = std::mem::take(&mut self.accumulated_content);
        self.messages.push(ModelMessage::assistant_tool_calls(
            Some(content),
            tool_calls.clone(),
        ));

        let outcome = execute_tool_calls(
            &tool_calls,
            &self.options.tools,
            &self.options.client_state,
        )
        .await?;
        let waiting = outcome.is_waiting();
        let chunks = self.emit_outcome(outcome, &done);
        if waiting {
            self.set_tool_phase(ToolPhase::Wait);
            return Ok(chunks);
        }

        self.tool_call_manager.clear();
        self.set_tool_phase(ToolPhase::Continue);
        Ok(chunks)
    }

    #[inline]
    fn recorded_finish_reason(&self) -> Option<FinishReason> {
        self.done_chunk.as_ref().and_then(StreamChunk::finish_reason)
    }

    fn should_execute_tool_phase(&self) -> bool {
        self.recorded_finish_reason() == Some(FinishReason::ToolCalls)
            && !self.options.tools.is_empty()
            && self.tool_call_manager.has_tool_calls()
    }

    fn set_tool_phase(&mut self, phase: ToolPhase) {
        self.tool_phase = phase;
        if phase == ToolPhase::Wait {
            self.should_emit_stream_end = false;
        }
    }

    fn emit_iteration(&self, tool_call_count: usize) {
        self.emit(ChatEvent::ChatIteration {
            request_id: self.request_id.clone(),
            iteration_number: self.iteration_count + 1,
            message_count: self.messages.len(),
            tool_call_count,
        });
    }

    /// Turns a batch outcome into chunks.
    ///
    /// Resolved results come first and are appended to the history, so a
    /// later run never executes them again. Approval requests and client
    /// tool inputs follow.
    fn emit_outcome(
        &mut self,
        outcome: ToolExecutionResult,
        done: &StreamChunk,
    ) -> Vec<StreamChunk> {
        let mut chunks = Vec::with_capacity(
            outcome.results.len()
                + outcome.needs_approval.len()
                + outcome.needs_client_execution.len(),
        );
        for result in outcome.results {
            chunks.push(self.emit_tool_result(result, done));
        }
        for request in outcome.needs_approval {
            chunks.push(self.emit_approval_request(request, done));
        }
        for request in outcome.needs_client_execution {
            chunks.push(self.emit_client_tool_input(request, done));
        }
        chunks
    }

    fn emit_tool_result(
        &mut self,
        result: ToolCallResult,
        done: &StreamChunk,
    ) -> StreamChunk {
        let content = result.content();
        self.emit(ChatEvent::ToolCallCompleted {
            stream_id: self.stream_id.clone(),
            tool_call_id: result.tool_call_id.clone(),
            tool_name: result.tool_name,
            result: result.result,
            duration: result.duration,
        });
        self.messages.push(ModelMessage::tool_result(
            result.tool_call_id.clone(),
            content.clone(),
        ));
        let kind = ChunkKind::ToolResult {
            tool_call_id: result.tool_call_id,
            content,
        };
        StreamChunk::new(&done.id, &done.model, kind)
    }

    fn emit_approval_request(
        &self,
        request: ApprovalRequest,
        done: &StreamChunk,
    ) -> StreamChunk {
        self.emit(ChatEvent::StreamApprovalRequested {
            stream_id: self.stream_id.clone(),
            message_id: self.current_message_id.clone(),
            tool_call_id: request.tool_call_id.clone(),
            tool_name: request.tool_name.clone(),
            input: request.input.clone(),
            approval_id: request.approval_id.clone(),
        });
        let kind = ChunkKind::ApprovalRequested {
            tool_call_id: request.tool_call_id,
            tool_name: request.tool_name,
            input: request.input,
            approval: ApprovalInfo {
                id: request.approval_id,
                needs_approval: true,
            },
        };
        StreamChunk::new(&done.id, &done.model, kind)
    }

    fn emit_client_tool_input(
        &self,
        request: ClientToolRequest,
        done: &StreamChunk,
    ) -> StreamChunk {
        self.emit(ChatEvent::StreamToolInputAvailable {
            stream_id: self.stream_id.clone(),
            tool_call_id: request.tool_call_id.clone(),
            tool_name: request.tool_name.clone(),
            input: request.input.clone(),
        });
        let kind = ChunkKind::ToolInputAvailable {
            tool_call_id: request.tool_call_id,
            tool_name: request.tool_name,
            input: request.input,
        };
        StreamChunk::new(&done.id, &done.model, kind)
    }
}

/// Runs a chat with the default event sink.
#[inline]
pub fn chat<A: ChatAdapter + 'static>(
    adapter: A,
    options: ChatOptions,
) -> ChatStream {
    ChatEngine::new(adapter, options).run()
}

#[cfg(test)]
mod tests;
