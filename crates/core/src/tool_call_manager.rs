use std::collections::HashMap;

use chatloop_model::ToolCall;

/// Accumulates streamed tool call fragments of one model turn.
///
/// The first fragment of a call carries its id and name; continuations
/// may leave the id empty and are matched through the provider index.
#[derive(Debug, Default)]
pub struct ToolCallManager {
    calls: Vec<ToolCall>,
    positions: HashMap<String, usize>,
    ids_by_index: HashMap<usize, String>,
}

impl ToolCallManager {
    /// Creates an empty manager.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one `tool_call` chunk into the accumulated calls.
    ///
    /// Arguments are appended in arrival order. A fragment that can't be
    /// matched to any call is dropped.
    pub fn add_tool_call_chunk(&mut self, fragment: &ToolCall, index: usize) {
        let id = if fragment.id.is_empty() {
            match self.ids_by_index.get(&index) {
                Some(id) => id.clone(),
                None => {
                    warn!("dropping tool call fragment at index {index}");
                    return;
                }
            }
        } else {
            self.ids_by_index.insert(index, fragment.id.clone());
            fragment.id.clone()
        };

        match self.positions.get(&id) {
            Some(&pos) => {
                let call = &mut self.calls[pos];
                if call.function.name.is_empty() {
                    call.function.name = fragment.name().to_owned();
                }
                call.function.arguments.push_str(fragment.arguments());
            }
            None => {
                trace!("new tool call {id} at index {index}");
                self.positions.insert(id.clone(), self.calls.len());
                self.calls.push(ToolCall {
                    id,
                    kind: fragment.kind,
                    function: fragment.function.clone(),
                });
            }
        }
    }

    /// Returns `true` if a complete call has been seen.
    #[inline]
    pub fn has_tool_calls(&self) -> bool {
        self.calls.iter().any(|call| !call.name().is_empty())
    }

    /// Returns the calls that have a name, in arrival order.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.calls
            .iter()
            .filter(|call| !call.name().is_empty())
            .cloned()
            .collect()
    }

    /// Forgets all calls.
    pub fn clear(&mut self) {
        self.calls.clear();
        self.positions.clear();
        self.ids_by_index.clear();
    }
}
