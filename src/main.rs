use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::EnvFilter;

use parley_gateway::adapters::{Adapters, ReplyGenerator as _, TextToSpeech as _};
use parley_gateway::api::ApiServer;
use parley_gateway::client::{
    AudioCapture, BackoffPolicy, CpalSink, PlaybackQueue, TokenSource, Transport, TransportEvent,
};
use parley_gateway::protocol::ServerEvent;
use parley_gateway::{Config, Error};

/// Parley - real-time voice conversation gateway
#[derive(Parser)]
#[command(name = "parley", version, about)]
struct Cli {
    /// Port to listen on (serve mode)
    #[arg(long, env = "PARLEY_PORT")]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway server (default)
    Serve,
    /// Talk to a running gateway from this machine's microphone
    Talk,
    /// Send one text message through the reply generator
    Chat {
        /// Text to send
        text: String,
    },
    /// Synthesize text and play it locally
    Say {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,parley_gateway=info",
        1 => "info,parley_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Talk => talk(config).await,
        Command::Chat { text } => chat(&config, &text).await,
        Command::Say { text } => say(&config, &text).await,
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker(),
    }
}

/// Run the gateway server
async fn serve(config: Config) -> anyhow::Result<()> {
    tracing::info!(
        port = config.server.port,
        stt = %config.stt.provider,
        tts = %config.tts.provider,
        reply_configured = config.reply.chat_url.is_some(),
        "starting parley gateway"
    );

    let adapters = Adapters::from_config(&config)?;
    ApiServer::new(&config, adapters).run().await?;
    Ok(())
}

/// Interactive voice loop against a running gateway
async fn talk(config: Config) -> anyhow::Result<()> {
    let token_source = match (&config.client.token, &config.client.token_url) {
        (Some(token), _) => TokenSource::Static(token.clone()),
        (None, Some(url)) => TokenSource::Discovery {
            url: url.clone(),
            cached: None,
        },
        (None, None) => TokenSource::None,
    };

    let (transport, _status, mut events) = Transport::new(
        config.client.server_url.clone(),
        token_source,
        BackoffPolicy::default(),
    );
    transport.connect().await?;
    println!("Connected to {}", config.client.server_url);

    // Events and reply audio arrive in order; the queue plays chunks
    // back-to-back without overlap.
    let queue = PlaybackQueue::new(Box::new(CpalSink));
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Event(ServerEvent::Partial { text }) => {
                    // presentation only: latest partial replaces the line
                    print!("\r… {text}          ");
                    use std::io::Write;
                    let _ = std::io::stdout().flush();
                }
                TransportEvent::Event(ServerEvent::Transcript { text }) => {
                    println!("\ryou: {text}");
                }
                TransportEvent::Event(ServerEvent::ReplyDelta { text }) => {
                    print!("{text}");
                    use std::io::Write;
                    let _ = std::io::stdout().flush();
                }
                TransportEvent::Event(ServerEvent::Reply { text }) => {
                    println!("bot: {text}");
                }
                TransportEvent::Event(ServerEvent::NoReply { reason }) => {
                    println!("(no reply: {reason:?})");
                }
                TransportEvent::Event(ServerEvent::Error { code, message }) => {
                    eprintln!("error [{code}]: {message}");
                }
                TransportEvent::Event(ServerEvent::Debug { message }) => {
                    tracing::debug!(message = %message, "server debug");
                }
                TransportEvent::Audio(chunk) => queue.enqueue(chunk),
            }
        }
    });

    let mut capture = AudioCapture::new()?;
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    println!("Press Enter to start talking, Enter again to stop, Ctrl-D to quit.");
    loop {
        if lines.next_line().await?.is_none() {
            break;
        }

        // a dropped connection reconnects here, on user action, never
        // mid-capture
        if !transport.is_connected() {
            transport.connect().await?;
        }

        capture.start()?;
        transport.set_capturing(true);
        println!("listening… press Enter to stop");

        let mut ticker = tokio::time::interval(Duration::from_millis(160));
        let stopped = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let frame = capture.take_frame_pcm()?;
                    if !frame.is_empty() {
                        transport.send_audio(frame).await?;
                    }
                }
                line = lines.next_line() => break line?.is_none(),
            }
        };

        capture.stop();
        transport.set_capturing(false);

        let frame = capture.take_frame_pcm()?;
        if !frame.is_empty() {
            transport.send_audio(frame).await?;
        }
        transport.send_stop().await?;

        if stopped {
            break;
        }
    }

    transport.close().await;
    printer.abort();
    Ok(())
}

/// One text round trip through the reply generator
async fn chat(config: &Config, text: &str) -> anyhow::Result<()> {
    let adapters = Adapters::from_config(config)?;
    match adapters.reply.generate(text).await {
        Ok(reply) if reply.is_empty() => println!("(empty reply)"),
        Ok(reply) => println!("{reply}"),
        Err(Error::NotConfigured(what)) => {
            anyhow::bail!("no {what} configured; set PARLEY_CHAT_URL")
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Synthesize text and play it on the local speakers
async fn say(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Synthesizing: \"{text}\"");

    let adapters = Adapters::from_config(config)?;
    let chunks = adapters.tts.synthesize(text).await?;
    let total: usize = chunks.iter().map(Vec::len).sum();
    println!("Got {total} bytes of audio");

    let queue = PlaybackQueue::new(Box::new(CpalSink));
    for chunk in chunks {
        queue.enqueue(chunk);
    }
    queue.shutdown();

    println!("Done");
    Ok(())
}

/// Test microphone input with a level meter
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        // drain the last second of audio and meter it
        let samples = capture.take_buffer();
        let energy = rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]", i + 1);
    }

    capture.stop();
    println!("\nIf you saw movement in the meter, your mic is working.");
    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave
fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sample_rate = 24_000u32;
    let frequency = 440.0_f32;
    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    let mut sink = CpalSink;
    use parley_gateway::client::AudioSink;
    sink.play(
        &samples,
        sample_rate,
        &std::sync::atomic::AtomicBool::new(false),
    )?;

    println!("If you heard the tone, your speakers are working.");
    Ok(())
}
