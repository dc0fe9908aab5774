use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

use hyperv_csi_driver::controller::DEFAULT_PAGE_SIZE;
use hyperv_csi_driver::kvp::{KVP_DIR, VM_ID_KEY, VM_NAME_KEY};
use hyperv_csi_driver::node::DEFAULT_MAX_VOLUMES_PER_NODE;
use hyperv_csi_driver::platform::LinuxMounter;
use hyperv_csi_driver::{
    DEFAULT_DRIVER_NAME, DRIVER_VERSION, Driver, DriverConfig, KvpReader, RestClient, metrics,
};

/// CLI arguments for the CSI driver
#[derive(Parser, Debug)]
#[command(name = "hyperv-csi-driver")]
#[command(about = "Hyper-V CSI Driver for Kubernetes")]
struct Args {
    /// CSI endpoint (unix socket URL)
    #[arg(
        long,
        env = "CSI_ENDPOINT",
        default_value = "unix:///var/lib/kubelet/plugins/hyperv.csi.fireflycons.io/csi.sock"
    )]
    endpoint: String,

    /// Base URL of the Hyper-V provider REST service
    #[arg(long, env = "HYPERV_URL")]
    url: String,

    /// Key sent to the provider in the X-Api-Key header
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    api_key: String,

    /// Driver name
    #[arg(long, env = "DRIVER_NAME", default_value = DEFAULT_DRIVER_NAME)]
    driver_name: String,

    /// Address for the debug HTTP /health listener (e.g., 0.0.0.0:8081)
    /// If not set, the listener is disabled
    #[arg(long, env = "DEBUG_ADDR")]
    debug_addr: Option<String>,

    /// Volume limit reported by NodeGetInfo
    #[arg(long, default_value_t = DEFAULT_MAX_VOLUMES_PER_NODE)]
    max_volumes_per_node: i64,

    /// ListVolumes page size when the caller does not set one
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    default_page_size: u32,

    /// Check the disk is attached and running before formatting it
    #[arg(long, default_value = "false")]
    validate_attachment: bool,

    /// Directory holding the Hyper-V KVP pool files
    #[arg(long, default_value = KVP_DIR)]
    kvp_dir: String,

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

    if let Some(ref addr_str) = args.metrics_addr {
        let addr = addr_str
            .parse()
            .map_err(|e| format!("Invalid metrics address '{}': {}", addr_str, e))?;
        if let Err(e) = metrics::init_metrics(addr) {
            return Err(format!("Failed to initialize metrics: {}", e).into());
        }
    }

    let debug_addr: Option<SocketAddr> = match args.debug_addr.as_deref() {
        Some(addr) if !addr.is_empty() => Some(
            addr.parse()
                .map_err(|e| format!("Invalid debug address '{}': {}", addr, e))?,
        ),
        _ => None,
    };

    let kvp = KvpReader::new(&args.kvp_dir);
    if !kvp.is_present() {
        error!("Hyper-V KVP metadata service is not present; the driver cannot function");
        return Err("hyper-v kvp metadata service is not present".into());
    }

    let vm_name = kvp.find(VM_NAME_KEY).map_err(|e| {
        format!("cannot retrieve VM name from Hyper-V KVP metadata service: {}", e)
    })?;
    let vm_id = kvp.find(VM_ID_KEY).map_err(|e| {
        format!("cannot retrieve VM ID from Hyper-V KVP metadata service: {}", e)
    })?;

    let client = RestClient::new(&args.url, &args.api_key)
        .map_err(|e| format!("cannot create Hyper-V client: {}", e))?;

    info!(
        driver_name = %args.driver_name,
        version = DRIVER_VERSION,
        endpoint = %args.endpoint,
        url = %args.url,
        vm_name = %vm_name,
        vm_id = %vm_id,
        "Starting Hyper-V CSI Driver"
    );
    info!("Log level: {}", args.log_level);

    let config = DriverConfig {
        endpoint: args.endpoint,
        driver_name: args.driver_name,
        node_id: vm_id,
        debug_addr,
        default_page_size: args.default_page_size,
        max_volumes_per_node: args.max_volumes_per_node,
        validate_attachment: args.validate_attachment,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    Driver::new(config, Arc::new(client), LinuxMounter)
        .run(shutdown_rx)
        .await?;

    info!("hyperv-csi-driver shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM, SIGINT, or SIGHUP)
async fn shutdown_signal() {
    use signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => Some(s),
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            None
        }
    };

    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => Some(s),
        Err(e) => {
            error!("Failed to install SIGINT handler: {}", e);
            None
        }
    };

    let mut sighup = match signal(SignalKind::hangup()) {
        Ok(s) => Some(s),
        Err(e) => {
            error!("Failed to install SIGHUP handler: {}", e);
            None
        }
    };

    tokio::select! {
        Some(_) = recv(&mut sigterm) => info!("Received SIGTERM"),
        Some(_) = recv(&mut sigint) => info!("Received SIGINT"),
        Some(_) = recv(&mut sighup) => info!("Received SIGHUP"),
        else => info!("Signal streams closed"),
    }
}

async fn recv(sig: &mut Option<signal::unix::Signal>) -> Option<()> {
    match sig {
        Some(s) => s.recv().await,
        None => std::future::pending().await,
    }
}
