use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use hyperv_api::{DEFAULT_SERVICE_PORT, POWERSHELL_MODULE};
use hyperv_provider::{PowerShell, Runner, VolumeService, metrics, server};

#[derive(Parser, Debug)]
#[command(name = "hyperv-provider")]
#[command(about = "Hyper-V virtual disk provider for the Kubernetes CSI driver")]
struct Args {
    /// REST listen address
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0")]
    listen: String,

    /// REST listen port
    #[arg(long, env = "PORT", default_value_t = DEFAULT_SERVICE_PORT)]
    port: u16,

    /// Shared key expected in the X-Api-Key header
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    api_key: String,

    /// Directory holding volume disks (default: chosen by the PowerShell module)
    #[arg(long, env = "PV_DIRECTORY", default_value = "")]
    directory: String,

    /// PowerShell executable
    #[arg(long, env = "PWSH_PATH", default_value = "pwsh")]
    shell: String,

    /// PowerShell module providing the disk cmdlets
    #[arg(long, default_value = POWERSHELL_MODULE)]
    module: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Prometheus metrics HTTP address (e.g., 0.0.0.0:9091)
    /// If not set, metrics endpoint is disabled
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize tracing with configured log level
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Initialize Prometheus metrics endpoint if configured
    if let Some(ref addr_str) = args.metrics_addr {
        let addr = addr_str
            .parse()
            .map_err(|e| format!("Invalid metrics address '{}': {}", addr_str, e))?;
        if let Err(e) = metrics::init_metrics(addr) {
            return Err(format!("Failed to initialize metrics: {}", e).into());
        }
    }

    if args.api_key.is_empty() {
        return Err("an API key must be configured".into());
    }

    let addr: SocketAddr = format!("{}:{}", args.listen, args.port)
        .parse()
        .map_err(|e| format!("Invalid listen address '{}': {}", args.listen, e))?;

    info!("Starting hyperv-provider on {}", addr);
    info!("Log level: {}", args.log_level);

    let shell = PowerShell::open(&args.shell, &args.module)
        .await
        .map_err(|e| format!("Failed to start PowerShell: {}", e))?;
    let service = VolumeService::open(Runner::new(shell), &args.directory)
        .await
        .map_err(|e| format!("Failed to initialize volume service: {}", e))?;
    let service = Arc::new(service);

    let app = server::router(Arc::clone(&service), &args.api_key);
    let listener = TcpListener::bind(addr).await?;
    info!("server starting");

    let result = server::serve(listener, app, shutdown_signal()).await;

    service.close().await;
    result?;

    info!("hyperv-provider shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM, SIGINT, or SIGHUP)
#[cfg(unix)]
async fn shutdown_signal() {
    use signal::unix::{SignalKind, signal};

    // Install signal handlers, logging errors but continuing with available handlers
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::error!("Failed to install SIGTERM handler: {}", e);
            None
        }
    };

    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::error!("Failed to install SIGINT handler: {}", e);
            None
        }
    };

    let mut sighup = match signal(SignalKind::hangup()) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::error!("Failed to install SIGHUP handler: {}", e);
            None
        }
    };

    // Handlers that failed to install never fire
    tokio::select! {
        Some(_) = recv(&mut sigterm) => info!("Received SIGTERM"),
        Some(_) = recv(&mut sigint) => info!("Received SIGINT"),
        Some(_) = recv(&mut sighup) => info!("Received SIGHUP"),
        else => info!("Signal streams closed"),
    }
}

#[cfg(unix)]
async fn recv(sig: &mut Option<signal::unix::Signal>) -> Option<()> {
    match sig {
        Some(s) => s.recv().await,
        None => std::future::pending().await,
    }
}

/// Wait for Ctrl-C (the only portable signal on Windows hosts)
#[cfg(not(unix))]
async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl-C");
}
