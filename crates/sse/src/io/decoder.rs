use bytes::Bytes;
use chatloop_model::StreamChunk;

use super::Chunks;
use crate::{DONE_SENTINEL, Error};

/// An incremental decoder of server-sent events.
///
/// Bytes can be pushed in pieces of any size, events are returned once
/// their terminating blank line has arrived. Only the `data` field is
/// kept; several `data` lines of one event are joined with line feeds.
/// Lines may end with `\n` or `\r\n`.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Creates an empty decoder.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends received bytes.
    #[inline]
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Returns the data of the next complete event, or `None` if more bytes
    /// are needed.
    pub fn next_event(&mut self) -> Result<Option<String>, Error> {
        while let Some(eol_idx) = self.buf.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=eol_idx).collect();
            let Ok(line) = std::str::from_utf8(&raw) else {
                return Err(Error::InvalidPayload);
            };
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if self.data.is_empty() {
                    continue;
                }
                let data = self.data.join("\n");
                self.data.clear();
                return Ok(Some(data));
            }
            if let Some(comment) = line.strip_prefix(':') {
                warn!("sse comment: {}", comment.trim());
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => {
                    (field, value.strip_prefix(' ').unwrap_or(value))
                }
                None => (line, ""),
            };
            if field == "data" {
                self.data.push(value.to_owned());
            } else {
                trace!("ignoring sse field: {field}");
            }
        }
        Ok(None)
    }
}

/// Reads [`StreamChunk`]s from an event stream body.
///
/// The reader stops at the `[DONE]` sentinel. An event that is not
/// terminated when the body ends is dropped.
pub struct EventReader {
    decoder: SseDecoder,
    chunks: Chunks,
    done: bool,
}

impl EventReader {
    #[inline]
    pub(crate) fn new(chunks: Chunks) -> Self {
        Self {
            decoder: SseDecoder::new(),
            chunks,
            done: false,
        }
    }

    /// Creates a reader over a captured body.
    #[inline]
    pub fn from_bytes<I: IntoIterator<Item = Bytes>>(bytes: I) -> Self {
        Self::new(Chunks::from_bytes(bytes))
    }

    /// Returns the data of the next event.
    pub async fn next_event(&mut self) -> Result<Option<String>, Error> {
        loop {
            if let Some(event) = self.decoder.next_event()? {
                return Ok(Some(event));
            }
            match self.chunks.next_chunk().await? {
                Some(bytes) => self.decoder.push(&bytes),
                None => return Ok(None),
            }
        }
    }

    /// Returns the next chunk, or `None` once the stream has finished.
    pub async fn next_chunk(&mut self) -> Result<Option<StreamChunk>, Error> {
        if self.done {
            return Ok(None);
        }
        let Some(data) = self.next_event().await? else {
            self.done = true;
            return Ok(None);
        };
        if data == DONE_SENTINEL {
            self.done = true;
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&data)?))
    }
}

#[cfg(test)]
mod tests {
    use chatloop_model::ChunkKind;

    use super::*;

    fn reader(parts: &[&'static str]) -> EventReader {
        EventReader::from_bytes(
            parts.iter().map(|part| Bytes::from_static(part.as_bytes())),
        )
    }

    #[tokio::test]
    async fn test_normal_events() {
        let mut sse = reader(&["data: hello\n\n", "data: bye\n\n"]);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "hello");
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "bye");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_split_events() {
        let mut sse = reader(&["da", "ta:", " hel", "lo\r\n", "\r", "\n"]);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "hello");
        assert_eq!(sse.next_event().await.unwrap(), None);

        // A multi-byte character split between two reads.
        let mut decoder = SseDecoder::new();
        decoder.push(b"data: caf\xc3");
        assert_eq!(decoder.next_event().unwrap(), None);
        decoder.push(b"\xa9\n\n");
        assert_eq!(decoder.next_event().unwrap().unwrap(), "café");
    }

    #[tokio::test]
    async fn test_comments_and_fields() {
        let mut sse = reader(&[
            ": keep-alive\n\n",
            "event: message\nid: 7\ndata: first\ndata:second\n\n",
            "retry: 100\n\n",
            "data\n\n",
        ]);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "first\nsecond");
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_incomplete_and_invalid_data() {
        let mut sse = reader(&["data: hello\n", "data: bye\n"]);
        assert_eq!(sse.next_event().await.unwrap(), None);

        let mut decoder = SseDecoder::new();
        decoder.push(b"data: \xff\n\n");
        assert!(matches!(decoder.next_event(), Err(Error::InvalidPayload)));
    }

    #[tokio::test]
    async fn test_chunks_until_done() {
        let mut sse = reader(&[
            "data: {\"id\":\"r1\",\"model\":\"m\",\"timestamp\":1,",
            "\"type\":\"content\",\"delta\":\"Hi\",\"content\":\"Hi\"}\n\n",
            "data: [DONE]\n\n",
            "data: {\"not\":\"read\"}\n\n",
        ]);
        let chunk = sse.next_chunk().await.unwrap().unwrap();
        assert_eq!(chunk.id, "r1");
        assert!(matches!(chunk.kind, ChunkKind::Content { .. }));
        assert!(sse.next_chunk().await.unwrap().is_none());
        assert!(sse.next_chunk().await.unwrap().is_none());

        let mut sse = reader(&["data: {\"type\":\"bogus\"}\n\n"]);
        assert!(matches!(sse.next_chunk().await, Err(Error::Json(_))));
    }
}
