//! Best-effort parsing of incomplete JSON.
//!
//! Tool call arguments arrive as fragments of a JSON document. While the
//! document is still streaming, [`PartialJsonParser`] closes whatever is
//! left open so that consumers can render the arguments seen so far.

use serde_json::{Map, Number, Value};

/// A parser for JSON text that may be truncated.
///
/// Implementations must never panic. `None` means nothing useful could be
/// recovered, either because the input is empty or because it is not a
/// prefix of any valid JSON document.
pub trait JsonParser: Send + Sync {
    /// Parses the text.
    fn parse(&self, text: &str) -> Option<Value>;
}

impl<F> JsonParser for F
where
    F: Fn(&str) -> Option<Value> + Send + Sync,
{
    #[inline]
    fn parse(&self, text: &str) -> Option<Value> {
        self(text)
    }
}

/// The default [`JsonParser`], tolerant of truncation at any point.
///
/// An unfinished string is closed, unfinished arrays and objects keep the
/// members completed so far, a key without a value is dropped, a trailing
/// partial number is trimmed to its longest valid prefix and a literal
/// prefix such as `tr` completes to `true`.
#[derive(Clone, Copy, Debug, Default)]
pub struct PartialJsonParser;

impl JsonParser for PartialJsonParser {
    fn parse(&self, text: &str) -> Option<Value> {
        parse_partial_json(text)
    }
}

/// Parses possibly truncated JSON with [`PartialJsonParser`] rules.
pub fn parse_partial_json(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return None;
    }
    let mut cursor = Cursor { src: text, pos: 0 };
    let value = cursor.value().ok()?;
    cursor.skip_ws();
    if cursor.peek().is_some() {
        trace!("trailing characters after json value at {}", cursor.pos);
        return None;
    }
    Some(value)
}

enum Fault {
    /// The input ended before anything usable was read.
    Eof,
    /// The input can't be a prefix of valid JSON.
    Syntax,
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl Cursor<'_> {
    #[inline]
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    #[inline]
    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_ws(&mut self) {
        while let Some(ch) = self.peek() {
            if !matches!(ch, ' ' | '\t' | '\n' | '\r') {
                break;
            }
            self.pos += 1;
        }
    }

    fn value(&mut self) -> Result<Value, Fault> {
        self.skip_ws();
        match self.peek() {
            None => Err(Fault::Eof),
            Some('{') => self.object(),
            Some('[') => self.array(),
            Some('"') => self.string().map(|(s, _)| Value::String(s)),
            Some('t') => self.literal("true", Value::Bool(true)),
            Some('f') => self.literal("false", Value::Bool(false)),
            Some('n') => self.literal("null", Value::Null),
            Some(ch) if ch == '-' || ch.is_ascii_digit() => self.number(),
            Some(_) => Err(Fault::Syntax),
        }
    }

    fn object(&mut self) -> Result<Value, Fault> {
        self.bump();
        let mut map = Map::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => return Ok(Value::Object(map)),
                Some('}') => {
                    self.bump();
                    return Ok(Value::Object(map));
                }
                Some('"') => {}
                Some(_) => return Err(Fault::Syntax),
            }

            let (key, closed) = self.string()?;
            if !closed {
                return Ok(Value::Object(map));
            }

            self.skip_ws();
            match self.bump() {
                None => return Ok(Value::Object(map)),
                Some(':') => {}
                Some(_) => return Err(Fault::Syntax),
            }

            match self.value() {
                Ok(value) => {
                    map.insert(key, value);
                }
                Err(Fault::Eof) => return Ok(Value::Object(map)),
                Err(err) => return Err(err),
            }

            self.skip_ws();
            match self.bump() {
                None => return Ok(Value::Object(map)),
                Some(',') => {}
                Some('}') => return Ok(Value::Object(map)),
                Some(_) => return Err(Fault::Syntax),
            }
        }
    }

    fn array(&mut self) -> Result<Value, Fault> {
        self.bump();
        let mut items = vec![];
        loop {
            self.skip_ws();
            match self.peek() {
                None => return Ok(Value::Array(items)),
                Some(']') => {
                    self.bump();
                    return Ok(Value::Array(items));
                }
                Some(_) => {}
            }

            match self.value() {
                Ok(value) => items.push(value),
                Err(Fault::Eof) => return Ok(Value::Array(items)),
                Err(err) => return Err(err),
            }

            self.skip_ws();
            match self.bump() {
                None => return Ok(Value::Array(items)),
                Some(',') => {}
                Some(']') => return Ok(Value::Array(items)),
                Some(_) => return Err(Fault::Syntax),
            }
        }
    }

    /// Reads a string, also reporting whether its closing quote was seen.
    fn string(&mut self) -> Result<(String, bool), Fault> {
        self.bump();
        let mut out = String::new();
        loop {
            let Some(ch) = self.bump() else {
                return Ok((out, false));
            };
            match ch {
                '"' => return Ok((out, true)),
                '\\' => {
                    let Some(escaped) = self.bump() else {
                        return Ok((out, false));
                    };
                    match escaped {
                        '"' => out.push('"'),
                        '\\' => out.push('\\'),
                        '/' => out.push('/'),
                        'b' => out.push('\u{8}'),
                        'f' => out.push('\u{c}'),
                        'n' => out.push('\n'),
                        'r' => out.push('\r'),
                        't' => out.push('\t'),
                        'u' => match self.unicode_escape()? {
                            Some(ch) => out.push(ch),
                            None => return Ok((out, false)),
                        },
                        _ => return Err(Fault::Syntax),
                    }
                }
                ch if (ch as u32) < 0x20 => {
                    return Err(Fault::Syntax);
                }
                ch => out.push(ch),
            }
        }
    }

    /// Reads the hex digits of a `\u` escape. `Ok(None)` means the input
    /// ended inside the escape.
    fn unicode_escape(&mut self) -> Result<Option<char>, Fault> {
        let Some(high) = self.hex4()? else {
            return Ok(None);
        };
        if !(0xD800..0xDC00).contains(&high) {
            return Ok(Some(char::from_u32(high).unwrap_or('\u{fffd}')));
        }

        // A high surrogate must be followed by `\uXXXX` with a low one.
        if self.peek().is_none() {
            return Ok(None);
        }
        if self.peek() != Some('\\') {
            return Ok(Some('\u{fffd}'));
        }
        self.bump();
        match self.bump() {
            None => return Ok(None),
            Some('u') => {}
            Some(_) => return Err(Fault::Syntax),
        }
        let Some(low) = self.hex4()? else {
            return Ok(None);
        };
        if !(0xDC00..0xE000).contains(&low) {
            return Ok(Some('\u{fffd}'));
        }
        let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
        Ok(Some(char::from_u32(code).unwrap_or('\u{fffd}')))
    }

    fn hex4(&mut self) -> Result<Option<u32>, Fault> {
        let mut code = 0;
        for _ in 0..4 {
            let Some(ch) = self.bump() else {
                return Ok(None);
            };
            let digit = ch.to_digit(16).ok_or(Fault::Syntax)?;
            code = code * 16 + digit;
        }
        Ok(Some(code))
    }

    fn literal(&mut self, word: &str, value: Value) -> Result<Value, Fault> {
        let rest = &self.src[self.pos..];
        if rest.starts_with(word) {
            self.pos += word.len();
            return Ok(value);
        }
        if word.starts_with(rest) {
            // Truncated literal, e.g. `tr` or `nul`.
            self.pos = self.src.len();
            return Ok(value);
        }
        Err(Fault::Syntax)
    }

    fn number(&mut self) -> Result<Value, Fault> {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if !(ch.is_ascii_digit() || is_number_sign(ch)) {
                break;
            }
            self.pos += 1;
        }
        let mut text = &self.src[start..self.pos];
        if let Ok(number) = text.parse::<Number>() {
            return Ok(Value::Number(number));
        }
        if self.peek().is_some() {
            return Err(Fault::Syntax);
        }
        // Cut off mid-number; keep the longest prefix that parses.
        while let Some(trimmed) = text.strip_suffix(is_number_sign) {
            text = trimmed;
        }
        match text.parse::<Number>() {
            Ok(number) => Ok(Value::Number(number)),
            Err(_) if text.is_empty() => Err(Fault::Eof),
            Err(_) => Err(Fault::Syntax),
        }
    }
}

#[inline]
fn is_number_sign(ch: char) -> bool {
    matches!(ch, '-' | '+' | '.' | 'e' | 'E')
}
