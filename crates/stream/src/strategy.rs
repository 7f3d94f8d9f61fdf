//! Policies deciding when accumulated text is surfaced as an update.

use std::fmt::{self, Debug};
use std::str::FromStr;

/// Decides whether a text update should be emitted for a chunk.
///
/// The processor calls [`ChunkStrategy::reset`] whenever a new stream
/// starts, so strategies may keep counters between calls.
pub trait ChunkStrategy: Send {
    /// Called for every text chunk.
    ///
    /// `chunk` is the new text portion and `accumulated` the whole text of
    /// the current segment, `chunk` included.
    fn should_emit(&mut self, chunk: &str, accumulated: &str) -> bool;

    /// Resets internal state.
    fn reset(&mut self) {}
}

impl<S: ChunkStrategy + ?Sized> ChunkStrategy for Box<S> {
    #[inline]
    fn should_emit(&mut self, chunk: &str, accumulated: &str) -> bool {
        (**self).should_emit(chunk, accumulated)
    }

    #[inline]
    fn reset(&mut self) {
        (**self).reset()
    }
}

/// Emits on every chunk.
#[derive(Clone, Copy, Debug, Default)]
pub struct Immediate;

impl ChunkStrategy for Immediate {
    #[inline]
    fn should_emit(&mut self, _chunk: &str, _accumulated: &str) -> bool {
        true
    }
}

/// Emits when a chunk contains sentence or clause punctuation.
#[derive(Clone, Copy, Debug, Default)]
pub struct Punctuation;

impl ChunkStrategy for Punctuation {
    fn should_emit(&mut self, chunk: &str, _accumulated: &str) -> bool {
        chunk.contains(['.', ',', '!', '?', ';', ':', '\n'])
    }
}

/// Emits every `size` chunks.
#[derive(Clone, Copy, Debug)]
pub struct Batch {
    size: usize,
    count: usize,
}

impl Batch {
    /// The batch size used when none is given.
    pub const DEFAULT_SIZE: usize = 5;

    /// Creates a strategy emitting once per `size` chunks.
    #[inline]
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            count: 0,
        }
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SIZE)
    }
}

impl ChunkStrategy for Batch {
    fn should_emit(&mut self, _chunk: &str, _accumulated: &str) -> bool {
        self.count += 1;
        if self.count >= self.size {
            self.count = 0;
            return true;
        }
        false
    }

    fn reset(&mut self) {
        self.count = 0;
    }
}

/// Emits when a chunk ends with whitespace.
#[derive(Clone, Copy, Debug, Default)]
pub struct WordBoundary;

impl ChunkStrategy for WordBoundary {
    fn should_emit(&mut self, chunk: &str, _accumulated: &str) -> bool {
        chunk.ends_with(char::is_whitespace)
    }
}

/// Emits when any of the inner strategies does.
///
/// Every inner strategy sees every chunk, so stateful ones such as
/// [`Batch`] keep counting even when an earlier one already fired.
#[derive(Default)]
pub struct Composite {
    strategies: Vec<Box<dyn ChunkStrategy>>,
}

impl Composite {
    /// Creates a composite of the given strategies.
    #[inline]
    pub fn new(strategies: Vec<Box<dyn ChunkStrategy>>) -> Self {
        Self { strategies }
    }

    /// Appends a strategy.
    #[inline]
    pub fn with<S: ChunkStrategy + 'static>(mut self, strategy: S) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }
}

impl Debug for Composite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Composite")
            .field("len", &self.strategies.len())
            .finish()
    }
}

impl ChunkStrategy for Composite {
    fn should_emit(&mut self, chunk: &str, accumulated: &str) -> bool {
        self.strategies
            .iter_mut()
            .fold(false, |emit, s| s.should_emit(chunk, accumulated) || emit)
    }

    fn reset(&mut self) {
        for strategy in &mut self.strategies {
            strategy.reset();
        }
    }
}

/// The error returned when a strategy name can't be parsed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown chunk strategy: {0}")]
pub struct ParseStrategyError(String);

/// A strategy selected by name, e.g. from a command line.
///
/// Accepted forms are `immediate`, `punctuation`, `word`, `batch`,
/// `batch:N` and any of them joined with `+` into a composite.
pub struct NamedStrategy(Box<dyn ChunkStrategy>);

impl Debug for NamedStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NamedStrategy").finish_non_exhaustive()
    }
}

impl NamedStrategy {
    /// Unwraps the boxed strategy.
    #[inline]
    pub fn into_inner(self) -> Box<dyn ChunkStrategy> {
        self.0
    }
}

impl FromStr for NamedStrategy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        fn single(
            name: &str,
        ) -> Result<Box<dyn ChunkStrategy>, ParseStrategyError> {
            let err = || ParseStrategyError(name.to_owned());
            let strategy: Box<dyn ChunkStrategy> = match name.trim() {
                "immediate" => Box::new(Immediate),
                "punctuation" => Box::new(Punctuation),
                "word" => Box::new(WordBoundary),
                "batch" => Box::new(Batch::default()),
                other => {
                    let size = other
                        .strip_prefix("batch:")
                        .and_then(|n| n.parse::<usize>().ok())
                        .filter(|n| *n > 0)
                        .ok_or_else(err)?;
                    Box::new(Batch::new(size))
                }
            };
            Ok(strategy)
        }

        if !s.contains('+') {
            return single(s).map(Self);
        }
        let strategies =
            s.split('+').map(single).collect::<Result<Vec<_>, _>>()?;
        Ok(Self(Box::new(Composite::new(strategies))))
    }
}

impl ChunkStrategy for NamedStrategy {
    #[inline]
    fn should_emit(&mut self, chunk: &str, accumulated: &str) -> bool {
        self.0.should_emit(chunk, accumulated)
    }

    #[inline]
    fn reset(&mut self) {
        self.0.reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(strategy: &mut dyn ChunkStrategy, chunks: &[&str]) -> Vec<bool> {
        let mut acc = String::new();
        chunks
            .iter()
            .map(|chunk| {
                acc.push_str(chunk);
                strategy.should_emit(chunk, &acc)
            })
            .collect()
    }

    #[test]
    fn test_punctuation_and_word() {
        assert_eq!(
            feed(&mut Punctuation, &["Hello", ",", " world", "!\n"]),
            [false, true, false, true]
        );
        assert_eq!(
            feed(&mut WordBoundary, &["Hello ", "wor", "ld\t"]),
            [true, false, true]
        );
    }

    #[test]
    fn test_batch_resets() {
        let mut batch = Batch::new(3);
        assert_eq!(
            feed(&mut batch, &["a", "b", "c", "d"]),
            [false, false, true, false]
        );
        batch.reset();
        assert_eq!(feed(&mut batch, &["a", "b", "c"]), [false, false, true]);
    }

    #[test]
    fn test_composite_feeds_every_child() {
        let mut composite =
            Composite::default().with(Punctuation).with(Batch::new(2));
        // The batch counts "a." even though punctuation already fired.
        assert_eq!(feed(&mut composite, &["a.", "b"]), [true, true]);
        assert_eq!(feed(&mut composite, &["c"]), [false]);
        composite.reset();
        assert_eq!(feed(&mut composite, &["d", "e"]), [false, true]);
    }

    #[test]
    fn test_parse_names() {
        let mut s: NamedStrategy = "batch:2".parse().unwrap();
        assert_eq!(feed(&mut s, &["a", "b"]), [false, true]);

        let mut s: NamedStrategy = "punctuation+word".parse().unwrap();
        assert_eq!(feed(&mut s, &["a", "b ", "c."]), [false, true, true]);

        assert!("batch:0".parse::<NamedStrategy>().is_err());
        assert_eq!(
            "fast".parse::<NamedStrategy>().unwrap_err().to_string(),
            "unknown chunk strategy: fast"
        );
    }
}
