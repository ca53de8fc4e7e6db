use anyhow::{Context, Result};
use callwire::audio::list_input_devices;
use callwire::{
    create_router, AppState, AudioBackendConfig, CallEngine, CallSettings, Config, EngineConfig,
    MicrophoneBackend, SessionDeps, SettingsStore, SpeakerPlayer, WebhookGateway,
};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "callwire", version, about = "Hands-free voice calls with a webhook agent")]
struct Cli {
    /// Configuration file (extension optional)
    #[arg(long, default_value = "config/callwire")]
    config: String,

    /// Agent webhook URL (overrides gateway.webhook_url)
    #[arg(long)]
    webhook: Option<String>,

    /// HTTP bind address
    #[arg(long)]
    bind: Option<String>,

    /// HTTP port
    #[arg(long)]
    port: Option<u16>,

    /// Start a call as soon as the service is up
    #[arg(long)]
    start: bool,

    /// Print input device names and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if cli.list_devices {
        for name in list_input_devices()? {
            println!("{name}");
        }
        return Ok(());
    }

    let mut cfg = Config::load(&cli.config)?;
    if let Some(url) = cli.webhook {
        cfg.gateway.webhook_url = Some(url);
    }
    if let Some(bind) = cli.bind {
        cfg.service.http.bind = bind;
    }
    if let Some(port) = cli.port {
        cfg.service.http.port = port;
    }

    info!("Callwire v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    let store = SettingsStore::new(&cfg.call.settings_path);
    let mut engine_config = EngineConfig::from(&cfg);
    engine_config.settings = store.load_or(CallSettings::from(&cfg.call));

    let deps = SessionDeps {
        capture: Arc::new(MicrophoneBackend::new(AudioBackendConfig::from(&cfg.audio))),
        gateway: Arc::new(WebhookGateway::new(
            cfg.gateway.webhook_url.clone(),
            Duration::from_secs(cfg.gateway.request_timeout_secs),
        )?),
        player: Arc::new(SpeakerPlayer::new(cfg.audio.output_device.clone())),
    };

    let (engine, driver) = CallEngine::spawn(engine_config, deps);

    if cli.start || cfg.call.auto_start {
        if let Err(e) = engine.start_session().await {
            warn!("Could not start call: {}", e);
        }
    }

    let app = create_router(AppState::new(engine.clone(), store));
    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("HTTP API listening on {}", addr);

    let shutdown_engine = engine.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for ctrl-c: {}", e);
            }
            info!("Shutting down");
            // Ends the driver, which also closes open event streams
            if let Err(e) = shutdown_engine.shutdown().await {
                warn!("Engine shutdown: {}", e);
            }
        })
        .await
        .context("HTTP server failed")?;

    driver.await.context("Call engine task failed")?;
    Ok(())
}
