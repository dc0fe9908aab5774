//! CSI Identity Service Implementation
//!
//! Provides plugin identification, capability reporting and readiness.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tonic::{Request, Response, Status};
use tracing::debug;

use crate::csi;

/// Canonical name the driver registers under.
pub const DEFAULT_DRIVER_NAME: &str = "hyperv.csi.fireflycons.io";
/// Reverse-DNS form of the driver name used by older deployments.
pub const LEGACY_DRIVER_NAME: &str = "io.fireflycons.csi.hyperv";
pub const DRIVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared readiness flag reported by `Probe`.
#[derive(Debug, Clone, Default)]
pub struct Readiness(Arc<RwLock<bool>>);

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, ready: bool) {
        *self.0.write().await = ready;
    }

    pub async fn is_ready(&self) -> bool {
        *self.0.read().await
    }
}

/// CSI Identity Service
pub struct IdentityService {
    name: String,
    readiness: Readiness,
}

impl IdentityService {
    pub fn new(name: impl Into<String>, readiness: Readiness) -> Self {
        Self {
            name: name.into(),
            readiness,
        }
    }
}

#[tonic::async_trait]
impl csi::identity_server::Identity for IdentityService {
    /// Returns the name and version of the CSI plugin.
    async fn get_plugin_info(
        &self,
        _request: Request<csi::GetPluginInfoRequest>,
    ) -> Result<Response<csi::GetPluginInfoResponse>, Status> {
        debug!(method = "get_plugin_info", "get plugin info called");

        Ok(Response::new(csi::GetPluginInfoResponse {
            name: self.name.clone(),
            vendor_version: DRIVER_VERSION.to_string(),
            manifest: HashMap::new(),
        }))
    }

    async fn get_plugin_capabilities(
        &self,
        _request: Request<csi::GetPluginCapabilitiesRequest>,
    ) -> Result<Response<csi::GetPluginCapabilitiesResponse>, Status> {
        let capabilities = vec![csi::PluginCapability {
            r#type: Some(csi::plugin_capability::Type::Service(
                csi::plugin_capability::Service {
                    r#type: csi::plugin_capability::service::Type::ControllerService as i32,
                },
            )),
        }];

        Ok(Response::new(csi::GetPluginCapabilitiesResponse { capabilities }))
    }

    /// Ready once the servers are up, and again not ready while shutting down.
    async fn probe(
        &self,
        _request: Request<csi::ProbeRequest>,
    ) -> Result<Response<csi::ProbeResponse>, Status> {
        let ready = self.readiness.is_ready().await;
        debug!(ready = ready, "probe called");
        Ok(Response::new(csi::ProbeResponse { ready: Some(ready) }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csi::identity_server::Identity;

    #[tokio::test]
    async fn test_get_plugin_info() {
        let service = IdentityService::new("custom.csi.example", Readiness::new());
        let request = Request::new(csi::GetPluginInfoRequest {});
        let response = Identity::get_plugin_info(&service, request).await.unwrap();
        let info = response.into_inner();

        assert_eq!(info.name, "custom.csi.example");
        assert_eq!(info.vendor_version, DRIVER_VERSION);
    }

    #[tokio::test]
    async fn test_get_plugin_capabilities() {
        let service = IdentityService::new(DEFAULT_DRIVER_NAME, Readiness::new());
        let request = Request::new(csi::GetPluginCapabilitiesRequest {});
        let response = Identity::get_plugin_capabilities(&service, request).await.unwrap();
        let caps = response.into_inner();

        assert_eq!(caps.capabilities.len(), 1);
    }

    #[tokio::test]
    async fn test_probe_follows_readiness() {
        let readiness = Readiness::new();
        let service = IdentityService::new(DEFAULT_DRIVER_NAME, readiness.clone());

        let probe = Identity::probe(&service, Request::new(csi::ProbeRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(probe.ready, Some(false));

        readiness.set(true).await;
        let probe = Identity::probe(&service, Request::new(csi::ProbeRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(probe.ready, Some(true));
    }
}
