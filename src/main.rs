use clap::{Parser, ValueEnum};
use kpppoed::ac::{AcSettings, Orchestrator};
use kpppoed::capture::AfPacketSocket;
use kpppoed::config::{self, Config};
use kpppoed::l2tp::Kl2tpdSupervisor;
use kpppoed::route::RouteBackend;
use kpppoed::telemetry::{init_logging, LogConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl LogFormat {
    fn as_str(self) -> &'static str {
        match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Compact => "compact",
            LogFormat::Json => "json",
        }
    }
}

#[derive(Parser)]
#[command(name = "kpppoed")]
#[command(about = "PPPoE access concentrator bridging sessions into L2TP")]
struct Cli {
    /// Path to kpppoed.toml
    #[arg(short, long, default_value = "/etc/kpppoed/kpppoed.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

fn main() {
    let cli = Cli::parse();

    // RUST_LOG still takes priority over --verbose
    init_logging(Some(&LogConfig::from_flags(
        cli.verbose,
        cli.log_format.as_str(),
    )));

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = cmd_run(config) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn load_config(path: &Path) -> Result<Config, String> {
    info!("Loading {}...", path.display());

    let config = config::load(path).map_err(|e| format!("{}: {}", path.display(), e))?;

    let result = config::validate(&config);
    result.log_diagnostics();
    if result.has_errors() {
        return Err(format!(
            "{}: {} configuration error(s)",
            path.display(),
            result.errors.len()
        ));
    }
    Ok(config)
}

fn cmd_run(config: Config) -> Result<(), String> {
    let rt = Runtime::new().map_err(|e| format!("Failed to create runtime: {}", e))?;

    rt.block_on(async move {
        let link = AfPacketSocket::bind(&config.interface_name)
            .map_err(|e| format!("Failed to open {}: {}", config.interface_name, e))?;

        let supervisor = Kl2tpdSupervisor::new(
            &config.kl2tpd_path,
            config.runtime_dir(),
            &config.interface_name,
        );
        let routes = RouteBackend::from_helper(config.route_helper.as_deref());
        info!(backend = routes.name(), "Kernel route backend selected");

        let orchestrator = Orchestrator::new(
            AcSettings::from_config(&config),
            Arc::new(link),
            supervisor,
            Arc::new(routes),
        );

        let (shutdown_tx, shutdown_rx) = mpsc::channel(4);
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| format!("Failed to install SIGTERM handler: {}", e))?;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result {
                            warn!("SIGINT handler failed: {}", e);
                            return;
                        }
                        info!("SIGINT received");
                    }
                    Some(()) = sigterm.recv() => info!("SIGTERM received"),
                }
                if shutdown_tx.send(()).await.is_err() {
                    return;
                }
            }
        });

        orchestrator
            .run(shutdown_rx)
            .await
            .map_err(|e| format!("Access concentrator failed: {}", e))
    })
}
