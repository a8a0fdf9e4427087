use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::info;

use character_channel::{
    AudioChunkQueue, AudioError, ChannelClient, ChannelHandlers, ChannelMessage, CharacterProfile,
    ClientConfig, ReconnectionEvent, TtsClient, create_speech_transport,
    core::audio::{FRAME_SAMPLES, PcmFramer, pcm::VOICE_SAMPLE_RATE},
};

/// Character channel - chat and speech client for AI characters
#[derive(Parser, Debug)]
#[command(name = "character-channel")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Chat with a character over the resilient channel, one line per message
    Chat {
        /// Character identifier
        character: String,

        /// Resume an existing session
        #[arg(short = 's', long = "session")]
        session: Option<String>,
    },

    /// Synthesize text and write the PCM16 audio as a WAV file
    Speak {
        text: String,

        #[arg(short = 'o', long = "output", default_value = "speech.wav")]
        output: PathBuf,

        /// Sample rate of the synthesized PCM
        #[arg(long = "sample-rate", default_value_t = VOICE_SAMPLE_RATE)]
        sample_rate: u32,
    },

    /// Stream a 16-bit WAV file through speech-to-text
    Transcribe {
        input: PathBuf,

        /// Character used for the voice session transport
        #[arg(long = "character", default_value = "default")]
        character: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            ClientConfig::from_file(path)?
        }
        None => ClientConfig::from_env()?,
    };

    let client_id = uuid::Uuid::new_v4().to_string();

    match cli.command {
        Commands::Chat { character, session } => {
            run_chat(&config, &client_id, &character, session.as_deref()).await
        }
        Commands::Speak {
            text,
            output,
            sample_rate,
        } => run_speak(&config, &text, &output, sample_rate).await,
        Commands::Transcribe { input, character } => {
            run_transcribe(&config, &client_id, &character, &input).await
        }
    }
}

async fn run_chat(
    config: &ClientConfig,
    client_id: &str,
    character: &str,
    session: Option<&str>,
) -> anyhow::Result<()> {
    let handlers = ChannelHandlers::new()
        .on_open(Arc::new(|| {
            Box::pin(async {
                info!("Connected");
            })
        }))
        .on_message(Arc::new(|message| {
            Box::pin(async move {
                match message {
                    ChannelMessage::TextResponse(text) => println!("< {text}"),
                    ChannelMessage::Error(text) => eprintln!("! {text}"),
                    ChannelMessage::ChatHistory(history) => println!("history: {history}"),
                    ChannelMessage::Typing(true) => println!("..."),
                    other => tracing::debug!("Ignoring {} message", other.message_type()),
                }
            })
        }))
        .on_disconnect(Arc::new(|reason| {
            Box::pin(async move {
                info!("Disconnected: {} (code {:?})", reason.message, reason.code);
            })
        }))
        .on_reconnect(Arc::new(|event| {
            Box::pin(async move {
                match event {
                    ReconnectionEvent::Scheduled {
                        attempt, delay_ms, ..
                    } => info!("Reconnecting in {}ms (attempt {})", delay_ms, attempt),
                    ReconnectionEvent::Succeeded { attempt } => {
                        info!("Reconnected after {} attempt(s)", attempt)
                    }
                    ReconnectionEvent::GaveUp { attempts } => {
                        info!("Gave up after {} attempt(s)", attempts)
                    }
                }
            })
        }));

    let client = ChannelClient::new(config.chat_channel_config(), handlers);
    client.connect(character, client_id, session).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let sent = if line == "/history" {
                    client.request_chat_history()
                } else {
                    client.send_chat(line)
                };
                if !sent {
                    eprintln!("! not connected ({})", client.state());
                }
            }
        }
    }

    client.disconnect().await;
    Ok(())
}

async fn run_speak(
    config: &ClientConfig,
    text: &str,
    output: &PathBuf,
    sample_rate: u32,
) -> anyhow::Result<()> {
    let tts = TtsClient::new(config.tts_url()?, config.tts_voice_type.clone());
    let queue = AudioChunkQueue::unbounded();
    let cancel = CancellationToken::new();

    let segments = tts.synthesize(text, &queue, &cancel).await?;
    let audio = queue.drain_concat().unwrap_or_default();
    if audio.is_empty() {
        bail!("TTS returned no audio");
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(output, spec)
        .with_context(|| format!("creating {}", output.display()))?;
    for pair in audio.chunks_exact(2) {
        writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
    }
    writer.finalize()?;
    info!(
        "Wrote {} samples from {} segment(s) to {}",
        audio.len() / 2,
        segments,
        output.display()
    );
    Ok(())
}

async fn run_transcribe(
    config: &ClientConfig,
    client_id: &str,
    character: &str,
    input: &PathBuf,
) -> anyhow::Result<()> {
    let mut reader = hound::WavReader::open(input)
        .with_context(|| format!("opening {}", input.display()))?;
    let spec = reader.spec();
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        bail!("expected 16-bit integer PCM, got {:?}", spec);
    }
    let samples: Vec<i16> = reader.samples::<i16>().collect::<Result<_, _>>()?;
    info!(
        "Read {} samples at {} Hz from {}",
        samples.len(),
        spec.sample_rate,
        input.display()
    );

    let endpoints = config.speech_endpoints(client_id, CharacterProfile::new(character));
    let mut transport = create_speech_transport(config.stt_transport, &endpoints)?;

    transport
        .start(
            Arc::new(|transcript| {
                Box::pin(async move {
                    println!("transcript: {transcript}");
                })
            }),
            Arc::new(|error| {
                Box::pin(async move {
                    eprintln!("! {error}");
                })
            }),
        )
        .await?;

    let mut framer = PcmFramer::new(FRAME_SAMPLES);
    let frames: Vec<Bytes> = framer
        .push_i16(&samples)
        .into_iter()
        .chain(framer.flush())
        .collect();
    // The voice socket opens asynchronously; hold frames until it accepts them.
    let deadline = tokio::time::Instant::now()
        + std::time::Duration::from_millis(
            config.channel.connect_delay_ms + config.channel.connect_timeout_ms,
        );
    for frame in frames {
        loop {
            match transport.send_audio(frame.clone()).await {
                Ok(()) => break,
                Err(AudioError::TransportClosed(_)) if tokio::time::Instant::now() < deadline => {
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    transport.finish().await?;
    Ok(())
}
