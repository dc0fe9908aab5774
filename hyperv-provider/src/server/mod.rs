//! The REST surface served to the CSI driver.

mod auth;
mod routes;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post, put};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::powershell::Shell;
use crate::service::VolumeService;

pub use auth::require_api_key;

/// How long in-flight requests may run after shutdown is requested.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Build the router for `service`, guarded by `api_key`.
pub fn router<S: Shell>(service: Arc<VolumeService<S>>, api_key: &str) -> Router {
    let api_key: Arc<str> = Arc::from(api_key);

    Router::new()
        .route(
            "/volume/{id}",
            post(routes::create_volume::<S>)
                .get(routes::get_volume::<S>)
                .delete(routes::delete_volume::<S>),
        )
        .route("/volume/{id}/size/{size}", put(routes::expand_volume::<S>))
        .route("/volumes", get(routes::list_volumes::<S>))
        .route("/capacity", get(routes::get_capacity::<S>))
        .route(
            "/attachment/{nodeid}/volume/{volid}",
            put(routes::publish_volume::<S>)
                .post(routes::publish_volume::<S>)
                .delete(routes::unpublish_volume::<S>),
        )
        .route("/vms", get(routes::vms::<S>))
        .route("/healthz", get(routes::health_check::<S>))
        .layer(middleware::from_fn_with_state(api_key, require_api_key))
        .with_state(service)
}

/// Serve `app` until `shutdown` resolves, then allow [`SHUTDOWN_GRACE`]
/// for in-flight requests before giving up on them.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send,
{
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let mut server = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
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
        _ = shutdown => {
            info!("server stopping");
        }
    }

    let _ = stop_tx.send(());
    match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
        Ok(Ok(Ok(()))) => info!("server shutdown complete"),
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server terminated with error");
            return Err(e);
        }
        Ok(Err(e)) => return Err(std::io::Error::other(e)),
        Err(_) => {
            warn!("server shutdown forced");
            server.abort();
        }
    }
    Ok(())
}
