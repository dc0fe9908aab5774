//! Hyper-V CSI Driver Library
//!
//! Kubernetes CSI driver for virtual disks managed by a Hyper-V host. The
//! controller talks to the `hyperv-provider` REST service on the host; the
//! node side finds the attached disks through their SCSI identifiers.
//!
//! This library provides:
//! - CSI Identity, Controller, and Node service implementations
//! - REST client for the Hyper-V provider
//! - Volume ID to device link mapping and the KVP metadata reader
//! - Linux mount, format and resize operations

/// CSI proto generated types
pub mod csi {
    tonic::include_proto!("csi.v1");
}

pub mod controller;
pub mod disk_id;
pub mod identity;
pub mod kvp;
pub mod metrics;
pub mod node;
pub mod platform;
pub mod rest_client;
pub mod server;

pub use controller::ControllerService;
pub use identity::{DEFAULT_DRIVER_NAME, DRIVER_VERSION, IdentityService, Readiness};
pub use kvp::KvpReader;
pub use node::NodeService;
pub use rest_client::{ClientError, HyperVApi, RestClient};
pub use server::{Driver, DriverConfig};

/// Publish context key carrying the volume ID from ControllerPublishVolume
/// to the node.
pub fn publish_context_key(driver_name: &str) -> String {
    format!("{}/volume-name", driver_name)
}
