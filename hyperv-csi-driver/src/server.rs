//! Process-level serving: the CSI gRPC endpoint on a unix socket and the
//! optional debug HTTP listener.

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use reqwest::Url;
use thiserror::Error;
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::{oneshot, watch};
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tracing::{error, info, warn};

use crate::controller::{ControllerService, DEFAULT_PAGE_SIZE};
use crate::csi::controller_server::ControllerServer;
use crate::csi::identity_server::IdentityServer;
use crate::csi::node_server::NodeServer;
use crate::identity::{DEFAULT_DRIVER_NAME, IdentityService, Readiness};
use crate::node::{DEFAULT_MAX_VOLUMES_PER_NODE, NodeService};
use crate::platform::Mounter;
use crate::rest_client::HyperVApi;

/// How long the debug listener may keep serving after shutdown is requested.
pub const DEBUG_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("unable to parse address: {0}")]
    InvalidEndpoint(String),

    #[error("currently only unix domain sockets are supported, have: {0}")]
    UnsupportedScheme(String),

    #[error("failed to remove unix domain socket file {path}, error: {source}")]
    RemoveSocket {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to listen: {0}")]
    Listen(#[source] std::io::Error),

    #[error("gRPC server error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("debug server error: {0}")]
    Debug(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;

/// Settings the driver is started with.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// `unix://` URL of the CSI socket
    pub endpoint: String,
    pub driver_name: String,
    /// VM ID reported by NodeGetInfo
    pub node_id: String,
    pub debug_addr: Option<SocketAddr>,
    pub default_page_size: u32,
    pub max_volumes_per_node: i64,
    pub validate_attachment: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            endpoint: format!("unix:///var/lib/kubelet/plugins/{}/csi.sock", DEFAULT_DRIVER_NAME),
            driver_name: DEFAULT_DRIVER_NAME.to_string(),
            node_id: String::new(),
            debug_addr: None,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_volumes_per_node: DEFAULT_MAX_VOLUMES_PER_NODE,
            validate_attachment: false,
        }
    }
}

/// Socket path named by a `unix://` endpoint URL.
pub fn parse_endpoint(endpoint: &str) -> Result<PathBuf> {
    let url = Url::parse(endpoint).map_err(|e| ServerError::InvalidEndpoint(e.to_string()))?;

    if url.scheme() != "unix" {
        return Err(ServerError::UnsupportedScheme(url.scheme().to_string()));
    }

    // unix://relative/path puts the first segment in the host
    let path = match url.host_str() {
        Some(host) if !host.is_empty() => Path::new(host).join(url.path().trim_start_matches('/')),
        _ => PathBuf::from(url.path()),
    };

    if path.as_os_str().is_empty() {
        return Err(ServerError::InvalidEndpoint(format!("no socket path in {}", endpoint)));
    }
    Ok(path)
}

/// Remove a socket left behind by a previous instance.
pub fn remove_stale_socket(path: &Path) -> Result<()> {
    info!(socket = %path.display(), "removing socket");
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(ServerError::RemoveSocket {
            path: path.display().to_string(),
            source,
        }),
    }
}

/// Router for the debug listener: `/health` reflects the provider's health.
pub fn debug_router<C: HyperVApi>(client: Arc<C>) -> Router {
    Router::new()
        .route("/health", get(health::<C>))
        .with_state(client)
}

async fn health<C: HyperVApi>(State(client): State<Arc<C>>) -> (StatusCode, String) {
    match client.health_check(None).await {
        Ok(_) => (StatusCode::OK, String::new()),
        Err(e) => {
            error!(error = %e, "executing health check");
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}

/// Resolves once `shutdown` flips to true or its sender goes away.
async fn stopped(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// The three CSI services on one socket.
pub struct Driver<C: HyperVApi, M: Mounter> {
    config: DriverConfig,
    client: Arc<C>,
    mounter: M,
    readiness: Readiness,
}

impl<C: HyperVApi, M: Mounter> Driver<C, M> {
    pub fn new(config: DriverConfig, client: Arc<C>, mounter: M) -> Self {
        Self {
            config,
            client,
            mounter,
            readiness: Readiness::new(),
        }
    }

    /// Flag reported by Probe; true while serving.
    pub fn readiness(&self) -> Readiness {
        self.readiness.clone()
    }

    /// Serve until `shutdown` becomes true, then drain in-flight calls.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let socket = parse_endpoint(&self.config.endpoint)?;
        remove_stale_socket(&socket)?;

        let listener = UnixListener::bind(&socket).map_err(ServerError::Listen)?;

        let debug = match self.config.debug_addr {
            Some(addr) => Some((
                TcpListener::bind(addr).await.map_err(ServerError::Debug)?,
                debug_router(Arc::clone(&self.client)),
            )),
            None => None,
        };

        let identity = IdentityService::new(&self.config.driver_name, self.readiness.clone());
        let controller = ControllerService::new(
            Arc::clone(&self.client),
            &self.config.driver_name,
            self.config.default_page_size,
        );
        let node = NodeService::new(&self.config.node_id, &self.config.driver_name, self.mounter)
            .with_max_volumes_per_node(self.config.max_volumes_per_node)
            .with_attachment_validation(self.config.validate_attachment);

        self.readiness.set(true).await;
        info!(
            grpc_addr = %socket.display(),
            http_addr = ?self.config.debug_addr,
            "starting server"
        );

        let readiness = self.readiness.clone();
        let grpc_shutdown = {
            let shutdown = shutdown.clone();
            async move {
                stopped(shutdown).await;
                info!("server stopped");
                readiness.set(false).await;
            }
        };

        let grpc = async {
            Server::builder()
                .add_service(IdentityServer::new(identity))
                .add_service(ControllerServer::new(controller))
                .add_service(NodeServer::new(node))
                .serve_with_incoming_shutdown(UnixListenerStream::new(listener), grpc_shutdown)
                .await
                .map_err(ServerError::from)
        };

        let debug = async {
            match debug {
                Some((listener, app)) => serve_debug(listener, app, stopped(shutdown))
                    .await
                    .map_err(ServerError::Debug),
                None => Ok(()),
            }
        };

        tokio::try_join!(grpc, debug)?;
        Ok(())
    }
}

/// Serve `app` until `shutdown` resolves, then allow
/// [`DEBUG_SHUTDOWN_GRACE`] for in-flight requests.
async fn serve_debug<F>(listener: TcpListener, app: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send,
{
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = stop_rx.await;
            })
            .await
    });

    tokio::select! {
        result = &mut server => {
            return match result {
                Ok(result) => result,
                Err(e) => Err(std::io::Error::other(e)),
            };
        }
        _ = shutdown => {}
    }

    let _ = stop_tx.send(());
    match tokio::time::timeout(DEBUG_SHUTDOWN_GRACE, &mut server).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(std::io::Error::other(e)),
        Err(_) => {
            warn!("debug server shutdown forced");
            server.abort();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(
            parse_endpoint("unix:///var/lib/kubelet/plugins/x/csi.sock").unwrap(),
            PathBuf::from("/var/lib/kubelet/plugins/x/csi.sock")
        );
        assert_eq!(
            parse_endpoint("unix://tmp/csi.sock").unwrap(),
            PathBuf::from("tmp/csi.sock")
        );
    }

    #[test]
    fn test_parse_endpoint_rejects_tcp() {
        let err = parse_endpoint("tcp://127.0.0.1:10000").unwrap_err();
        assert_eq!(
            err.to_string(),
            "currently only unix domain sockets are supported, have: tcp"
        );
        assert!(matches!(
            parse_endpoint("not a url"),
            Err(ServerError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_remove_stale_socket() {
        let tmp = TempDir::new().unwrap();
        let socket = tmp.path().join("csi.sock");

        // Missing is fine
        remove_stale_socket(&socket).unwrap();

        std::fs::write(&socket, b"").unwrap();
        remove_stale_socket(&socket).unwrap();
        assert!(!socket.exists());
    }

    #[test]
    fn test_remove_stale_socket_failure() {
        let tmp = TempDir::new().unwrap();
        // A non-empty directory cannot be removed as a file
        std::fs::write(tmp.path().join("inner"), b"").unwrap();

        let err = remove_stale_socket(tmp.path()).unwrap_err();
        assert!(
            err.to_string()
                .starts_with("failed to remove unix domain socket file")
        );
    }

    #[tokio::test]
    async fn test_stopped_on_flag_or_drop() {
        let (tx, rx) = watch::channel(false);
        let waiter = tokio::spawn(stopped(rx));
        tx.send(true).unwrap();
        waiter.await.unwrap();

        let (tx, rx) = watch::channel(false);
        drop(tx);
        stopped(rx).await;
    }
}
