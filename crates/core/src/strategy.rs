//! Agent loop strategies, which decide whether the model is called again.

use chatloop_model::{FinishReason, ModelMessage};

/// What a strategy sees when asked for another iteration.
#[derive(Clone, Copy, Debug)]
pub struct AgentLoopState<'a> {
    /// Model turns completed so far.
    pub iteration_count: usize,
    /// The conversation history.
    pub messages: &'a [ModelMessage],
    /// The finish reason of the latest turn.
    pub finish_reason: Option<FinishReason>,
}

/// A policy deciding whether another model turn should be attempted.
///
/// It is consulted once per iteration, after the tool calls of a model
/// turn have been resolved, and never while a call waits on the caller.
/// A model turn is always followed by its tool phase.
pub trait AgentLoopStrategy: Send + Sync {
    /// Returns `true` to call the model again.
    fn should_continue(&self, state: &AgentLoopState<'_>) -> bool;
}

impl<F> AgentLoopStrategy for F
where
    F: Fn(&AgentLoopState<'_>) -> bool + Send + Sync,
{
    #[inline]
    fn should_continue(&self, state: &AgentLoopState<'_>) -> bool {
        self(state)
    }
}

/// Continues until `max` turns have been made.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MaxIterations(pub usize);

impl AgentLoopStrategy for MaxIterations {
    #[inline]
    fn should_continue(&self, state: &AgentLoopState<'_>) -> bool {
        state.iteration_count < self.0
    }
}

/// Returns a strategy that allows at most `max` turns.
#[inline]
pub fn max_iterations(max: usize) -> MaxIterations {
    MaxIterations(max)
}

/// Stops once the latest turn finished with one of the given reasons.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UntilFinishReason(Vec<FinishReason>);

impl AgentLoopStrategy for UntilFinishReason {
    fn should_continue(&self, state: &AgentLoopState<'_>) -> bool {
        if state.iteration_count == 0 {
            return true;
        }
        match state.finish_reason {
            Some(reason) => !self.0.contains(&reason),
            None => true,
        }
    }
}

/// Returns a strategy that stops on any of `reasons`.
#[inline]
pub fn until_finish_reason(reasons: &[FinishReason]) -> UntilFinishReason {
    UntilFinishReason(reasons.to_vec())
}

/// Continues only while every inner strategy does.
pub struct CombinedStrategy(Vec<Box<dyn AgentLoopStrategy>>);

impl AgentLoopStrategy for CombinedStrategy {
    fn should_continue(&self, state: &AgentLoopState<'_>) -> bool {
        self.0.iter().all(|strategy| strategy.should_continue(state))
    }
}

/// Combines strategies with a logical AND.
#[inline]
pub fn combine_strategies(
    strategies: Vec<Box<dyn AgentLoopStrategy>>,
) -> CombinedStrategy {
    CombinedStrategy(strategies)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(
        iteration_count: usize,
        finish_reason: Option<FinishReason>,
    ) -> AgentLoopState<'static> {
        AgentLoopState {
            iteration_count,
            messages: &[],
            finish_reason,
        }
    }

    #[test]
    fn test_max_iterations() {
        let strategy = max_iterations(2);
        assert!(strategy.should_continue(&state(0, None)));
        assert!(strategy.should_continue(&state(1, None)));
        assert!(!strategy.should_continue(&state(2, None)));
    }

    #[test]
    fn test_until_finish_reason() {
        let strategy = until_finish_reason(&[FinishReason::Stop]);
        let stop = Some(FinishReason::Stop);
        assert!(strategy.should_continue(&state(0, stop)));
        assert!(!strategy.should_continue(&state(1, stop)));
        assert!(strategy.should_continue(&state(1, None)));
        let length = Some(FinishReason::Length);
        assert!(strategy.should_continue(&state(1, length)));
    }

    #[test]
    fn test_combine() {
        let strategy = combine_strategies(vec![
            Box::new(max_iterations(3)),
            Box::new(|state: &AgentLoopState<'_>| {
                state.finish_reason != Some(FinishReason::ContentFilter)
            }),
        ]);
        assert!(strategy.should_continue(&state(1, None)));
        assert!(!strategy.should_continue(&state(3, None)));
        let filtered = Some(FinishReason::ContentFilter);
        assert!(!strategy.should_continue(&state(1, filtered)));
    }
}
