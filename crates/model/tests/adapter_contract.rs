use std::time::Duration;

use chatloop_model::{
    ChatAdapter, ChatStreamOptions, ChunkKind, ChunkStream, FinishReason,
    ModelMessage, Role, StreamChunk,
};
use futures_util::StreamExt;
use tokio::time::sleep;

struct FakeAdapter;

impl ChatAdapter for FakeAdapter {
    fn name(&self) -> &str {
        "fake"
    }

    fn chat_stream(&self, options: ChatStreamOptions) -> ChunkStream {
        let input = options
            .messages
            .iter()
            .rev()
            .find(|msg| msg.role == Role::User)
            .and_then(|msg| msg.content.clone())
            .unwrap_or_default();
        let model = options.model.clone();
        let signal = options.signal.clone();

        Box::pin(async_stream::stream! {
            let mut content = String::new();
            let words: Vec<String> = format!("You said {input}")
                .split(' ')
                .map(ToString::to_string)
                .collect();
            let count = words.len();
            for (i, mut word) in words.into_iter().enumerate() {
                if signal.is_cancelled() {
                    return;
                }
                sleep(Duration::from_millis(1)).await;
                if i + 1 < count {
                    word.push(' ');
                }
                content.push_str(&word);
                yield StreamChunk::content("resp", &model, word, &content);
            }
            yield StreamChunk::done("resp", &model, Some(FinishReason::Stop));
        })
    }
}

#[tokio::test]
async fn test_completion() {
    let options = ChatStreamOptions::new(
        "fake-1",
        vec![ModelMessage::user("Good morning")],
    );
    let chunks: Vec<_> = FakeAdapter.chat_stream(options).collect().await;

    let last = chunks.last().unwrap();
    assert_eq!(last.finish_reason(), Some(FinishReason::Stop));
    assert_eq!(chunks.iter().filter(|c| c.is_terminal()).count(), 1);

    let ChunkKind::Content { content, .. } = &chunks[chunks.len() - 2].kind
    else {
        unreachable!("unexpected chunk: {:?}", chunks[chunks.len() - 2]);
    };
    assert_eq!(content, "You said Good morning");
}

#[tokio::test]
async fn test_abort() {
    let options =
        ChatStreamOptions::new("fake-1", vec![ModelMessage::user("hi")]);
    options.signal.cancel();
    let chunks: Vec<_> = FakeAdapter.chat_stream(options).collect().await;
    assert!(chunks.is_empty());
}
