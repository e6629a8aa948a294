use clap::Parser;
use dietec_core::{
    spawn_probe_loop, AiProviderConfig, EngineConfig, HttpProbe, InMemoryStore,
    NetworkStatusMonitor, QueryEngine, Secret,
};
use dietec_server::{run_server, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "dietec-server", about = "Adaptive health assistant query server")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// API key for the generative provider
    #[arg(short = 'k', long)]
    api_key: Option<String>,

    /// Model for the generative provider
    #[arg(short = 'o', long)]
    model: Option<String>,

    /// HTTP server address
    #[arg(long, default_value = "127.0.0.1:8080")]
    http_addr: SocketAddr,

    /// Start with the network considered unreachable
    #[arg(long)]
    offline: bool,

    /// Disable the periodic connectivity probe; connectivity is then only
    /// changed through the /connectivity route
    #[arg(long)]
    no_probe: bool,
}

fn load_config(args: &Args) -> anyhow::Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let mut config = EngineConfig::load_from_file(path)
                .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
            config.apply_env_overrides();
            info!("Loaded configuration from {}", path.display());
            config
        }
        None => EngineConfig::load_from_default()
            .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?,
    };

    if args.api_key.is_some() || args.model.is_some() {
        let ai = config.ai.get_or_insert_with(AiProviderConfig::default);
        if let Some(api_key) = &args.api_key {
            ai.api_key = Some(Secret::new(api_key.clone()));
        }
        if let Some(model) = &args.model {
            ai.model = Some(model.clone());
        }
    }

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting dietec server");

    let args = Args::parse();
    let config = load_config(&args)?;

    let monitor = NetworkStatusMonitor::start(!args.offline, config.debounce());

    let _probe = if args.no_probe {
        info!("Connectivity probe disabled");
        None
    } else {
        match HttpProbe::new(config.probe_url(), Duration::from_secs(5)) {
            Ok(probe) => {
                info!(url = %config.probe_url(), "Connectivity probe started");
                Some(spawn_probe_loop(&monitor, Arc::new(probe), config.probe_interval()))
            }
            Err(e) => {
                warn!(error = %e, "Failed to build connectivity probe");
                None
            }
        }
    };

    let engine = Arc::new(QueryEngine::from_config(config, monitor));
    let state = AppState::new(engine, Arc::new(InMemoryStore::new()));

    if let Err(e) = run_server(state, args.http_addr).await {
        error!(error = %e, "HTTP server failed");
        return Err(e);
    }

    info!("dietec server shutting down");
    Ok(())
}
