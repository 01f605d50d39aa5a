use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use guardian_live::audio::{AudioOutput, Microphone, NoMicrophone, NullOutput};
use guardian_live::credential::{CredentialProvider, UpstreamTokenMinter};
use guardian_live::{
    create_router, AppState, Config, ConversationContext, HttpCredentialProvider, SessionEvent,
    SessionOrchestrator, StaticCredentialProvider, Token, WavFileMicrophone, WavFileOutput,
    WebSocketTransportFactory,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "guardian-live", version, about = "Realtime voice sessions with Guardian")]
struct Cli {
    /// Configuration file (TOML, extension optional)
    #[arg(long, default_value = "config/guardian-live")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the token minting backend
    Serve,

    /// Talk to Guardian from the terminal
    Talk(TalkArgs),
}

#[derive(clap::Args)]
struct TalkArgs {
    /// Where the user is
    #[arg(long)]
    location: String,

    /// Active alert summary (repeatable, most important first)
    #[arg(long = "alert")]
    alerts: Vec<String>,

    #[arg(long)]
    household_size: Option<u32>,

    /// Known hazard at home (repeatable)
    #[arg(long = "hazard")]
    hazards: Vec<String>,

    /// Use this session token instead of asking the credential endpoint
    #[arg(long)]
    token: Option<String>,

    /// Stream a WAV recording as the microphone
    #[arg(long)]
    mic_wav: Option<PathBuf>,

    /// Write Guardian's audio to a WAV file instead of the speakers
    #[arg(long)]
    record_wav: Option<PathBuf>,

    /// Text only; never open the microphone
    #[arg(long)]
    no_mic: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("guardian_live=info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;
    info!("Loaded config: {}", cfg.service.name);

    match cli.command {
        Command::Serve => serve(cfg).await,
        Command::Talk(args) => talk(cfg, args).await,
    }
}

async fn serve(cfg: Config) -> Result<()> {
    let minter = UpstreamTokenMinter::new(cfg.minting_config())
        .context("Token minting is not configured (set GUARDIAN__MINTING__API_KEY)")?;
    let app = create_router(AppState::new(Arc::new(minter)));

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app).await.context("HTTP server failed")?;
    Ok(())
}

async fn talk(cfg: Config, args: TalkArgs) -> Result<()> {
    let session_config = cfg.session_config();
    let playback_rate = session_config.playback_sample_rate;

    let credentials: Arc<dyn CredentialProvider> = match &args.token {
        Some(value) => Arc::new(StaticCredentialProvider::new(Token::new(
            value.clone(),
            chrono::Utc::now() + chrono::Duration::minutes(30),
        ))),
        None => Arc::new(HttpCredentialProvider::new(cfg.credential.endpoint.clone())?),
    };

    let microphone: Arc<dyn Microphone> = match (&args.mic_wav, args.no_mic) {
        (_, true) => Arc::new(NoMicrophone),
        (Some(path), false) => Arc::new(WavFileMicrophone::new(path)),
        (None, false) => default_microphone(),
    };

    let output: Arc<dyn AudioOutput> = match &args.record_wav {
        Some(path) => Arc::new(
            WavFileOutput::create(path, playback_rate)
                .with_context(|| format!("Failed to create {}", path.display()))?,
        ),
        None => default_output(playback_rate)?,
    };

    let orchestrator = SessionOrchestrator::new(
        session_config,
        Arc::new(WebSocketTransportFactory::new(cfg.transport_config())),
        microphone,
        output,
    );

    let mut context = ConversationContext::new(args.location.clone());
    context.active_alerts = args.alerts.clone();
    context.household_size = args.household_size;
    context.known_hazards = args.hazards.clone();

    let (events_tx, mut events) = mpsc::unbounded_channel();
    if let Err(e) = orchestrator.connect(credentials, context, events_tx).await {
        anyhow::bail!("{} ({})", e, e.user_message());
    }

    if !args.no_mic {
        match orchestrator.toggle_microphone().await {
            Ok(_) => println!("[microphone on; type /mic to toggle, /quit to leave]"),
            Err(e) => anyhow::bail!("{} ({})", e, e.user_message()),
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if !print_event(event) {
                    break;
                }
            }
            line = lines.next_line(), if stdin_open => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    stdin_open = false;
                    orchestrator.disconnect().await;
                    continue;
                };
                match line.trim() {
                    "" => {}
                    "/quit" => orchestrator.disconnect().await,
                    "/mic" => match orchestrator.toggle_microphone().await {
                        Ok(true) => println!("[microphone on]"),
                        Ok(false) => println!("[microphone off]"),
                        Err(e) => println!("[{}]", e.user_message()),
                    },
                    text => {
                        if let Err(e) = orchestrator.send_text(text).await {
                            warn!("Failed to send text: {}", e);
                        }
                    }
                }
            }
        }
    }

    let stats = orchestrator.stats().await;
    info!(
        "Session ended: {} frames sent, {} received, {} dropped, {} interruptions",
        stats.frames_sent, stats.frames_received, stats.frames_dropped, stats.interruptions
    );
    Ok(())
}

/// Print one event; returns false once the session is over
fn print_event(event: SessionEvent) -> bool {
    match event {
        SessionEvent::Connected => println!("[connected]"),
        SessionEvent::TextReceived(text) => {
            print!("{}", text);
            std::io::stdout().flush().ok();
        }
        SessionEvent::TurnComplete => println!(),
        SessionEvent::Interrupted => println!("\n[interrupted]"),
        SessionEvent::AudioReceived(_) => {}
        SessionEvent::Disconnected => {
            println!("\n[disconnected]");
            return false;
        }
        SessionEvent::Error(e) => {
            println!("\n[error: {}] {}", e, e.user_message());
            return false;
        }
    }
    true
}

#[cfg(feature = "audio-io")]
fn default_microphone() -> Arc<dyn Microphone> {
    Arc::new(guardian_live::audio::CpalMicrophone::new())
}

#[cfg(not(feature = "audio-io"))]
fn default_microphone() -> Arc<dyn Microphone> {
    Arc::new(NoMicrophone)
}

#[cfg(feature = "audio-io")]
fn default_output(sample_rate: u32) -> Result<Arc<dyn AudioOutput>> {
    match guardian_live::audio::CpalOutput::open(sample_rate) {
        Ok(output) => Ok(Arc::new(output)),
        Err(e) => {
            warn!("No audio output ({}), Guardian's voice will be discarded", e);
            Ok(Arc::new(NullOutput))
        }
    }
}

#[cfg(not(feature = "audio-io"))]
fn default_output(_sample_rate: u32) -> Result<Arc<dyn AudioOutput>> {
    Ok(Arc::new(NullOutput))
}
