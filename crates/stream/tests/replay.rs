use chatloop_model::{FinishReason, Role};
use chatloop_stream::strategy::Punctuation;
use chatloop_stream::{
    ChunkRecording, MessagePart, StreamProcessor, ToolCallState,
};

fn fixture(name: &str) -> ChunkRecording {
    let raw = match name {
        "text-simple" => include_str!("fixtures/text-simple.json"),
        "tool-call-parallel" => {
            include_str!("fixtures/tool-call-parallel.json")
        }
        _ => panic!("no fixture named {name}"),
    };
    serde_json::from_str(raw).unwrap()
}

#[tokio::test]
async fn test_replay_matches_recorded_result() {
    for name in ["text-simple", "tool-call-parallel"] {
        let recording = fixture(name);
        let first =
            StreamProcessor::replay(&recording, StreamProcessor::builder())
                .await;
        let second =
            StreamProcessor::replay(&recording, StreamProcessor::builder())
                .await;

        assert_eq!(first, second, "{name}");
        assert_eq!(recording.result.as_ref(), Some(&first), "{name}");
    }
}

#[tokio::test]
async fn test_strategy_does_not_change_result() {
    let recording = fixture("text-simple");
    let builder = StreamProcessor::builder().with_chunk_strategy(Punctuation);
    let result = StreamProcessor::replay(&recording, builder).await;
    assert_eq!(result.content, "Hello world!");
    assert_eq!(result.finish_reason, Some(FinishReason::Stop));
}

#[tokio::test]
async fn test_replay_into_transcript() {
    let recording = fixture("tool-call-parallel");
    let mut processor = StreamProcessor::new();
    processor.add_user_message("Weather and time in SF?");
    processor.start_assistant_message();
    processor
        .process(chatloop_stream::replay_stream(&recording))
        .await;

    let messages = processor.messages();
    assert_eq!(messages.len(), 2);
    let assistant = &messages[1];
    assert_eq!(assistant.role, Role::Assistant);
    assert_eq!(
        assistant.parts[0],
        MessagePart::Text {
            content: "Checking both.".to_owned()
        }
    );
    let names: Vec<_> =
        assistant.tool_calls().map(|call| call.name.as_str()).collect();
    assert_eq!(names, ["get_weather", "get_time"]);
    assert!(
        assistant
            .tool_calls()
            .all(|call| call.state == ToolCallState::InputComplete)
    );
    assert!(!processor.are_all_tools_complete());

    let model = processor.to_model_messages();
    assert_eq!(model.len(), 2);
    assert_eq!(model[1].tool_calls().len(), 2);
}

#[test]
fn test_recording_round_trips_through_json() {
    let recording = fixture("tool-call-parallel");
    let json = serde_json::to_string(&recording).unwrap();
    let back: ChunkRecording = serde_json::from_str(&json).unwrap();
    assert_eq!(back, recording);
    assert_eq!(back.provider.as_deref(), Some("openai"));
}
