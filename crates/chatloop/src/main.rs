//! A command line tool for chunk recordings and remote engines.

#[macro_use]
extern crate tracing;

use std::convert::Infallible;
use std::io::{IsTerminal as _, Write as _};
use std::path::{Path, PathBuf};

use anyhow::{Context as _, bail};
use chatloop::{LiveText, TranscriptRenderer};
use chatloop::core::{ChatEngine, ChatOptions};
use chatloop::model::{ChunkKind, ModelMessage};
use chatloop::sse::{SseConnection, SseConnectionConfigBuilder, encode_stream};
use chatloop::stream::strategy::NamedStrategy;
use chatloop::stream::{
    ChunkRecording, StreamProcessor, UIMessage, replay_stream,
};
use clap::{Parser, Subcommand};
use futures_util::StreamExt as _;
use owo_colors::OwoColorize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "chatloop", version, about)]
struct Cli {
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replays a chunk recording and prints the reconstructed transcript.
    Replay {
        /// The recording file.
        file: PathBuf,
        /// The chunk strategy, e.g. `immediate`, `word` or `batch:5+word`.
        #[arg(long, default_value = "immediate")]
        strategy: String,
        /// Print the result and the transcript as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Prints a chunk recording in its SSE framing.
    Sse {
        /// The recording file.
        file: PathBuf,
    },
    /// Sends a message to a remote engine and streams the answer.
    Chat {
        /// The SSE endpoint of the engine.
        #[arg(long)]
        url: String,
        /// The requested model.
        #[arg(long, default_value = "default")]
        model: String,
        /// An optional system prompt.
        #[arg(long)]
        system: Option<String>,
        /// Extra request headers, as `name:value`.
        #[arg(long = "header", short = 'H')]
        headers: Vec<String>,
        /// The user message.
        message: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let renderer = TranscriptRenderer::new()
        .with_colors(!cli.no_color && std::io::stdout().is_terminal());

    match cli.command {
        Command::Replay {
            file,
            strategy,
            json,
        } => replay(&file, &strategy, json, renderer).await,
        Command::Sse { file } => sse(&file).await,
        Command::Chat {
            url,
            model,
            system,
            headers,
            message,
        } => {
            chat(url, model, system, &headers, message, renderer).await
        }
    }
}

async fn load_recording(path: &Path) -> anyhow::Result<ChunkRecording> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let recording = serde_json::from_slice(&data)
        .with_context(|| format!("invalid recording {}", path.display()))?;
    Ok(recording)
}

async fn replay(
    path: &Path,
    strategy: &str,
    json: bool,
    renderer: TranscriptRenderer,
) -> anyhow::Result<()> {
    let recording = load_recording(path).await?;
    let strategy: NamedStrategy = strategy.parse()?;
    debug!("replaying {} chunks", recording.chunks.len());

    let mut processor =
        StreamProcessor::builder().with_chunk_strategy(strategy).build();
    processor.start_assistant_message();
    let result = processor.process(replay_stream(&recording)).await;

    let matches = recording.result.as_ref().is_none_or(|r| *r == result);
    if !matches {
        warn!("replayed result differs from the recorded one");
    }

    if json {
        let transcript = processor.messages();
        let messages: Vec<&UIMessage> =
            transcript.iter().map(|message| &**message).collect();
        let output = json!({
            "model": recording.model,
            "provider": recording.provider,
            "result": result,
            "messages": messages,
            "matchesRecording": matches,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    print!("{}", renderer.render(&processor.messages()));
    let reason = result
        .finish_reason
        .map(|reason| reason.as_str())
        .unwrap_or("none");
    println!("finish reason: {}", reason.bright_white());
    if !matches {
        println!("{}", "the recorded result differs".bright_red());
    }
    Ok(())
}

async fn sse(path: &Path) -> anyhow::Result<()> {
    let recording = load_recording(path).await?;
    let chunks = replay_stream(&recording).map(Ok::<_, Infallible>);
    let mut events =
        std::pin::pin!(encode_stream(chunks, CancellationToken::new()));

    let mut stdout = std::io::stdout().lock();
    while let Some(bytes) = events.next().await {
        stdout.write_all(&bytes)?;
    }
    stdout.flush()?;
    Ok(())
}

async fn chat(
    url: String,
    model: String,
    system: Option<String>,
    headers: &[String],
    message: String,
    renderer: TranscriptRenderer,
) -> anyhow::Result<()> {
    let mut config = SseConnectionConfigBuilder::with_url(url);
    for header in headers {
        let Some((name, value)) = header.split_once(':') else {
            bail!("invalid header {header:?}, expected `name:value`");
        };
        config = config.with_header(name.trim(), value.trim());
    }
    let connection = SseConnection::new(config.build());

    let mut options = ChatOptions::builder(model)
        .with_messages(vec![ModelMessage::user(message.clone())]);
    if let Some(system) = system {
        options = options.with_system_prompt(system);
    }

    let signal = CancellationToken::new();
    let options = options.with_abort_signal(signal.clone()).build();
    tokio::spawn({
        let signal = signal.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                signal.cancel();
            }
        }
    });

    let mut processor = StreamProcessor::new();
    processor.add_user_message(message);
    processor.start_assistant_message();

    let mut stream = ChatEngine::new(connection, options).run();
    let mut stdout = std::io::stdout();
    let mut live = LiveText::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        processor.process_chunk(&chunk);
        if let ChunkKind::Content { .. } = &chunk.kind {
            let content = processor.state().content;
            write!(stdout, "{}", live.advance(&content))?;
            stdout.flush()?;
        }
    }
    processor.finalize_stream();
    println!();

    if signal.is_cancelled() {
        println!("{}", "aborted".bright_red());
    }
    print!("{}", renderer.render(&processor.messages()));
    Ok(())
}
