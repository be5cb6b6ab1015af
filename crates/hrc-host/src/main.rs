use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use hrc_core::config::RemoteConfig;
use hrc_core::server::RemoteServer;
use hrc_core::settings::SettingsStore;

mod engine;
mod settings;
mod ui;

#[derive(Parser)]
#[command(name = "hrc-host")]
#[command(about = "Harmonium remote control host - playback API server")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind host, overriding the configuration
    #[arg(long)]
    host: Option<String>,

    /// Bind port, overriding the configuration
    #[arg(short, long)]
    port: Option<u16>,

    /// Settings file holding the enable flag
    #[arg(short, long, default_value = "harmonium-settings.toml")]
    settings: PathBuf,

    /// Enable the playback API now and persist the flag
    #[arg(long)]
    enable: bool,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "hrc_host={},hrc_core={}",
            args.log_level, args.log_level
        ))
        .init();

    info!("Starting hrc-host");

    // Load configuration
    let mut config = RemoteConfig::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    config.validate()?;

    let ui = Arc::new(ui::TerminalUi::new());
    let settings = Arc::new(settings::FileSettings::load(&args.settings));
    let engine = Arc::new(engine::DemoEngine::new());

    #[cfg(windows)]
    let port_access: Arc<dyn hrc_core::platform::PortAccess> =
        Arc::new(hrc_platform_win::WinPortAccess::new(ui.clone()));

    #[cfg(not(windows))]
    let port_access: Arc<dyn hrc_core::platform::PortAccess> =
        Arc::new(hrc_core::platform::OpenPortAccess);

    let server = Arc::new(RemoteServer::new(
        config,
        engine.clone(),
        ui.clone(),
        settings.clone(),
        port_access,
    ));

    if args.enable {
        server.set_enabled(true).await?;
    } else if settings.remote_enabled() {
        info!("playback API enabled in settings; starting");
        server.start().await?;
    } else {
        info!("playback API disabled; start with --enable or flip the setting");
    }

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    server.stop().await;
    info!("hrc-host stopped");

    Ok(())
}
