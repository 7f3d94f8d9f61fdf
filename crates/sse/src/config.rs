use std::fmt::{self, Debug, Formatter};

use serde_json::{Map, Value};

/// Builder for [`SseConnectionConfig`].
#[derive(Clone, PartialEq)]
pub struct SseConnectionConfigBuilder {
    url: String,
    headers: Vec<(String, String)>,
    body_extra: Map<String, Value>,
}

impl SseConnectionConfigBuilder {
    /// Creates a builder for the given endpoint.
    #[inline]
    pub fn with_url<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            headers: vec![],
            body_extra: Map::new(),
        }
    }

    /// Adds a request header.
    #[inline]
    pub fn with_header<K, V>(mut self, name: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Adds fields to the request body. Only objects are merged, other
    /// values are ignored.
    pub fn with_body_extra(mut self, extra: Value) -> Self {
        match extra {
            Value::Object(fields) => self.body_extra.extend(fields),
            other => warn!("ignoring non-object body extra: {other}"),
        }
        self
    }

    /// Builds the configuration.
    #[inline]
    pub fn build(self) -> SseConnectionConfig {
        SseConnectionConfig {
            url: self.url,
            headers: self.headers,
            body_extra: self.body_extra,
        }
    }
}

impl Debug for SseConnectionConfigBuilder {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseConnectionConfigBuilder")
            .field("url", &self.url)
            .field("headers", &RedactedHeaders(&self.headers))
            .field("body_extra", &self.body_extra)
            .finish()
    }
}

/// Configuration of an [`SseConnection`](crate::SseConnection).
#[derive(Clone, PartialEq)]
pub struct SseConnectionConfig {
    pub(crate) url: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body_extra: Map<String, Value>,
}

impl SseConnectionConfig {
    /// Returns the endpoint.
    #[inline]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Debug for SseConnectionConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseConnectionConfig")
            .field("url", &self.url)
            .field("headers", &RedactedHeaders(&self.headers))
            .field("body_extra", &self.body_extra)
            .finish()
    }
}

struct RedactedHeaders<'a>(&'a [(String, String)]);

impl Debug for RedactedHeaders<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.iter().map(|(name, _)| (name, "<redacted>")))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_redacted_debug() {
        let config = SseConnectionConfigBuilder::with_url("http://x/chat")
            .with_header("Authorization", "Bearer secret")
            .with_body_extra(json!({ "conversationId": "c1" }))
            .with_body_extra(json!("ignored"))
            .build();
        let debug = format!("{config:?}");
        assert!(debug.contains("Authorization"));
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("secret"));
        assert_eq!(config.body_extra["conversationId"], "c1");
        assert_eq!(config.body_extra.len(), 1);
    }
}
