use std::marker::PhantomData;
use std::pin::Pin;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{Error, Tool, ToolResult};

pub(crate) type BoxedToolFuture =
    Pin<Box<dyn Future<Output = ToolResult> + Send>>;

/// A type-erased server-side implementation of a tool.
pub(crate) trait ToolObject: Send + Sync + 'static {
    fn execute(&self, arguments: Value) -> BoxedToolFuture;
}

fn decode<I>(arguments: Value) -> Result<I, BoxedToolFuture>
where
    I: DeserializeOwned,
{
    serde_json::from_value(arguments).map_err(|err| {
        let reason = format!("{err}");
        let fut: BoxedToolFuture = Box::pin(std::future::ready(
            ToolResult::Err(Error::invalid_input().with_reason(reason)),
        ));
        fut
    })
}

pub(crate) struct AnyTool<T: Tool>(pub T);

impl<T: Tool> ToolObject for AnyTool<T> {
    #[inline]
    fn execute(&self, arguments: Value) -> BoxedToolFuture {
        match decode::<T::Input>(arguments) {
            Ok(input) => Box::pin(self.0.execute(input)),
            Err(fut) => fut,
        }
    }
}

/// A server tool backed by a closure.
pub(crate) struct FnTool<I, F> {
    f: F,
    _input: PhantomData<fn(I)>,
}

impl<I, F> FnTool<I, F> {
    #[inline]
    pub(crate) fn new(f: F) -> Self {
        Self {
            f,
            _input: PhantomData,
        }
    }
}

impl<I, F, Fut> ToolObject for FnTool<I, F>
where
    I: DeserializeOwned + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ToolResult> + Send + 'static,
{
    #[inline]
    fn execute(&self, arguments: Value) -> BoxedToolFuture {
        match decode::<I>(arguments) {
            Ok(input) => Box::pin((self.f)(input)),
            Err(fut) => fut,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Deserialize)]
    struct Location {
        city: String,
    }

    #[tokio::test]
    async fn test_fn_tool() {
        let tool = FnTool::new(|input: Location| async move {
            Ok::<_, Error>(json!({ "city": input.city, "temp": 70 }))
        });
        let output = tool.execute(json!({ "city": "SF" })).await.unwrap();
        assert_eq!(output["temp"], 70);

        let err = tool.execute(json!({ "town": "SF" })).await.unwrap_err();
        assert_eq!(err.kind(), crate::tool::ErrorKind::InvalidInput);
    }
}
