use std::fmt::Write as _;
use std::sync::Arc;

use chatloop_model::Role;
use chatloop_stream::{
    MessagePart, ToolCallPart, ToolCallState, ToolResultState, UIMessage,
};
use owo_colors::{OwoColorize, Style};

const BAR_CHAR: &str = "▎";

/// Renders transcripts for the terminal.
#[derive(Clone, Copy, Debug, Default)]
pub struct TranscriptRenderer {
    colored: bool,
}

impl TranscriptRenderer {
    /// Creates a renderer that emits plain text.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables ANSI colors.
    #[inline]
    pub fn with_colors(mut self, colored: bool) -> Self {
        self.colored = colored;
        self
    }

    /// Renders every message, one block per message.
    pub fn render(&self, messages: &[Arc<UIMessage>]) -> String {
        let mut out = String::new();
        for message in messages {
            self.render_message(&mut out, message);
        }
        out
    }

    fn render_message(&self, out: &mut String, message: &UIMessage) {
        let (label, style) = match message.role {
            Role::System => ("system", Style::new().dimmed()),
            Role::User => ("user", Style::new().bright_green()),
            Role::Assistant => ("assistant", Style::new().bright_cyan()),
            Role::Tool => ("tool", Style::new().bright_yellow()),
        };
        let bar = self.paint(BAR_CHAR, style);
        writeln!(out, "{bar}{}", self.paint(label, style.bold())).ok();

        for part in &message.parts {
            match part {
                MessagePart::Text { content } => {
                    for line in content.lines() {
                        writeln!(out, "{bar}{line}").ok();
                    }
                }
                MessagePart::Thinking { content } => {
                    let thinking = self.paint(content, Style::new().dimmed());
                    writeln!(out, "{bar}💭 {thinking}").ok();
                }
                MessagePart::ToolCall(call) => {
                    writeln!(out, "{bar}{}", self.tool_call(call)).ok();
                }
                MessagePart::ToolResult(result) => {
                    let marker = match result.state {
                        ToolResultState::Error => "✗",
                        _ => "↳",
                    };
                    writeln!(
                        out,
                        "{bar}{marker} {}: {}",
                        result.tool_call_id,
                        result.error.as_deref().unwrap_or(&result.content)
                    )
                    .ok();
                }
            }
        }
    }

    fn tool_call(&self, call: &ToolCallPart) -> String {
        let mut line = format!(
            "⚙ {}({}) [{}]",
            self.paint(&call.name, Style::new().bold()),
            call.arguments,
            state_name(call.state)
        );
        if let Some(approval) = &call.approval {
            let decision = match approval.approved {
                Some(true) => "approved",
                Some(false) => "declined",
                None => "pending",
            };
            write!(line, " approval {}: {decision}", approval.id).ok();
        }
        if let Some(output) = &call.output {
            write!(line, " → {output}").ok();
        }
        line
    }

    fn paint(&self, text: &str, style: Style) -> String {
        if self.colored {
            text.style(style).to_string()
        } else {
            text.to_owned()
        }
    }
}

/// Tracks the text already printed while a transcript streams.
///
/// Adapters report text as deltas, as the full text so far, or both. Feeding
/// the accumulated text of the processor after every chunk yields exactly
/// the part that has not been shown yet.
#[derive(Clone, Debug, Default)]
pub struct LiveText {
    shown: String,
}

impl LiveText {
    /// Creates a tracker with nothing shown.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the unseen part of `content` and marks it as shown.
    ///
    /// Text that does not continue what was shown starts over.
    pub fn advance<'a>(&mut self, content: &'a str) -> &'a str {
        let unseen = match content.strip_prefix(self.shown.as_str()) {
            Some(rest) => rest,
            None => content,
        };
        self.shown.clear();
        self.shown.push_str(content);
        unseen
    }
}

fn state_name(state: ToolCallState) -> &'static str {
    match state {
        ToolCallState::AwaitingInput => "awaiting-input",
        ToolCallState::InputStreaming => "input-streaming",
        ToolCallState::InputComplete => "input-complete",
        ToolCallState::ApprovalRequested => "approval-requested",
        ToolCallState::ApprovalResponded => "approval-responded",
    }
}
