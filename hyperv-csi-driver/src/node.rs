//! CSI Node Service Implementation
//!
//! Handles volume staging and publishing on the VM the disk was attached to.
//! The disk appears as a synthetic SCSI device whose `/dev/disk/by-id` link is
//! derived from the volume ID (see [`crate::disk_id`]).
//!
//! Disk and mount work is delegated to a [`Mounter`], which is
//! [`platform::LinuxMounter`](crate::platform::LinuxMounter) in production.

use std::path::Path;

use tonic::{Request, Response, Status};
use tracing::{debug, info, instrument, warn};

use crate::csi;
use crate::csi::volume_capability::AccessType;
use crate::disk_id;
use crate::identity::{DEFAULT_DRIVER_NAME, LEGACY_DRIVER_NAME};
use crate::metrics::OperationTimer;
use crate::platform::{self, Mounter};
use crate::publish_context_key;

/// Default NodeGetInfo volume limit.
pub const DEFAULT_MAX_VOLUMES_PER_NODE: i64 = 256;

/// Volume context annotation suffix that skips formatting at stage time.
const NO_FORMAT_ANNOTATION: &str = "noformat";

/// CSI Node Service
///
/// Implements the CSI Node service which handles:
/// - Volume staging (format if needed, mount to staging path, grow the filesystem)
/// - Volume unstaging (unmount from staging path)
/// - Volume publishing (bind mount of the staging path, or of the raw device)
/// - Volume unpublishing (unmount from target path)
/// - Volume statistics and node information
pub struct NodeService<M: Mounter> {
    /// The VM ID this node reports
    node_id: String,
    max_volumes_per_node: i64,
    publish_info_key: String,
    validate_attachment: bool,
    mounter: M,
}

impl<M: Mounter> NodeService<M> {
    pub fn new(node_id: impl Into<String>, driver_name: &str, mounter: M) -> Self {
        Self {
            node_id: node_id.into(),
            max_volumes_per_node: DEFAULT_MAX_VOLUMES_PER_NODE,
            publish_info_key: publish_context_key(driver_name),
            validate_attachment: false,
            mounter,
        }
    }

    pub fn with_max_volumes_per_node(mut self, max_volumes_per_node: i64) -> Self {
        self.max_volumes_per_node = max_volumes_per_node;
        self
    }

    /// Check the kernel's view of the disk before formatting it.
    pub fn with_attachment_validation(mut self, validate: bool) -> Self {
        self.validate_attachment = validate;
        self
    }

    /// Validate that a path is safe to hand to mount tools.
    fn validate_path(path: &str) -> Result<(), Status> {
        if path.is_empty() {
            return Err(Status::invalid_argument("Path cannot be empty"));
        }

        if !path.starts_with('/') {
            return Err(Status::invalid_argument("Path must be absolute"));
        }

        let dangerous_chars = [
            ';', '|', '&', '$', '`', '(', ')', '{', '}', '<', '>', '\n', '\r',
        ];
        for c in dangerous_chars {
            if path.contains(c) {
                return Err(Status::invalid_argument(format!(
                    "Path contains dangerous character: '{}'",
                    c
                )));
            }
        }

        if path.contains("..") {
            return Err(Status::invalid_argument(
                "Path cannot contain '..' (path traversal)",
            ));
        }

        Ok(())
    }

    fn device_path(volume_id: &str) -> Result<String, Status> {
        disk_id::device_path(volume_id)
            .map(|p| p.to_string_lossy().into_owned())
            .map_err(|e| {
                Status::internal(format!(
                    "Failed to find device path for volume {}: {}",
                    volume_id, e
                ))
            })
    }

    #[instrument(skip(self, request))]
    async fn stage(
        &self,
        request: Request<csi::NodeStageVolumeRequest>,
    ) -> Result<Response<csi::NodeStageVolumeResponse>, Status> {
        let req = request.into_inner();

        if req.volume_id.is_empty() {
            return Err(Status::invalid_argument(
                "NodeStageVolume Volume ID must be provided",
            ));
        }
        if req.staging_target_path.is_empty() {
            return Err(Status::invalid_argument(
                "NodeStageVolume Staging Target Path must be provided",
            ));
        }
        let Some(capability) = req.volume_capability.as_ref() else {
            return Err(Status::invalid_argument(
                "NodeStageVolume Volume Capability must be provided",
            ));
        };

        Self::validate_path(&req.staging_target_path)?;

        if !req.publish_context.contains_key(&self.publish_info_key) {
            return Err(Status::invalid_argument("Could not find the volume by name"));
        }

        info!(
            volume_id = %req.volume_id,
            staging_target_path = %req.staging_target_path,
            method = "node_stage_volume",
            "node stage volume called"
        );

        let mount = match &capability.access_type {
            Some(AccessType::Mount(mount)) => mount,
            // Block volumes are bind-mounted straight from the device at publish time
            _ => {
                info!(volume_id = %req.volume_id, "raw block volume, skipping staging");
                return Ok(Response::new(csi::NodeStageVolumeResponse {}));
            }
        };

        let fs_type = platform::validate_fs_type(&mount.fs_type)?;
        let source = Self::device_path(&req.volume_id)?;
        let target = &req.staging_target_path;

        let no_format = [DEFAULT_DRIVER_NAME, LEGACY_DRIVER_NAME]
            .iter()
            .any(|name| {
                req.volume_context
                    .contains_key(&format!("{}/{}", name, NO_FORMAT_ANNOTATION))
            });

        if no_format {
            info!(volume_id = %req.volume_id, "skipping formatting the source device");
        } else {
            if self.validate_attachment {
                self.mounter.is_attached(&source).map_err(|e| {
                    Status::internal(format!(
                        "error retrieving the attachment status for volume {}: {}",
                        req.volume_id,
                        e.message()
                    ))
                })?;
            }

            if self.mounter.is_formatted(&source)? {
                debug!(source = %source, "source device is already formatted");
            } else {
                self.mounter.format(&source, fs_type)?;
            }
        }

        if self.mounter.is_mounted(target)? {
            info!(target = %target, "source device is already mounted to the target path");
        } else {
            self.mounter
                .mount(&source, target, Some(fs_type), &mount.mount_flags)?;
        }

        // Picks up a controller-side expansion done since the last stage
        if Path::new(&source).exists() {
            let needs_resize = self.mounter.needs_resize(&source, target).map_err(|e| {
                Status::internal(format!(
                    "Could not determine if volume {:?} need to be resized: {}",
                    req.volume_id,
                    e.message()
                ))
            })?;

            if needs_resize {
                info!(volume_id = %req.volume_id, "resizing volume");
                self.mounter.resize(&source, target, fs_type).map_err(|e| {
                    Status::internal(format!(
                        "Could not resize volume {:?}: {}",
                        req.volume_id,
                        e.message()
                    ))
                })?;
            }
        }

        info!(
            volume_id = %req.volume_id,
            staging_target_path = %target,
            source = %source,
            "Volume staged successfully"
        );

        Ok(Response::new(csi::NodeStageVolumeResponse {}))
    }

    async fn unstage(
        &self,
        request: Request<csi::NodeUnstageVolumeRequest>,
    ) -> Result<Response<csi::NodeUnstageVolumeResponse>, Status> {
        let req = request.into_inner();

        if req.volume_id.is_empty() {
            return Err(Status::invalid_argument(
                "NodeUnstageVolume Volume ID must be provided",
            ));
        }
        if req.staging_target_path.is_empty() {
            return Err(Status::invalid_argument(
                "NodeUnstageVolume Staging Target Path must be provided",
            ));
        }

        Self::validate_path(&req.staging_target_path)?;

        info!(
            volume_id = %req.volume_id,
            staging_target_path = %req.staging_target_path,
            method = "node_unstage_volume",
            "node unstage volume called"
        );

        if self.mounter.is_mounted(&req.staging_target_path)? {
            self.mounter.unmount(&req.staging_target_path)?;
        } else {
            info!(
                staging_target_path = %req.staging_target_path,
                "staging target path is already unmounted"
            );
        }

        info!(volume_id = %req.volume_id, "Volume unstaged successfully");
        Ok(Response::new(csi::NodeUnstageVolumeResponse {}))
    }

    async fn publish(
        &self,
        request: Request<csi::NodePublishVolumeRequest>,
    ) -> Result<Response<csi::NodePublishVolumeResponse>, Status> {
        let req = request.into_inner();

        if req.volume_id.is_empty() {
            return Err(Status::invalid_argument(
                "NodePublishVolume Volume ID must be provided",
            ));
        }
        if req.staging_target_path.is_empty() {
            return Err(Status::invalid_argument(
                "NodePublishVolume Staging Target Path must be provided",
            ));
        }
        if req.target_path.is_empty() {
            return Err(Status::invalid_argument(
                "NodePublishVolume Target Path must be provided",
            ));
        }
        let Some(capability) = req.volume_capability.as_ref() else {
            return Err(Status::invalid_argument(
                "NodePublishVolume Volume Capability must be provided",
            ));
        };

        Self::validate_path(&req.staging_target_path)?;
        Self::validate_path(&req.target_path)?;

        info!(
            volume_id = %req.volume_id,
            staging_target_path = %req.staging_target_path,
            target_path = %req.target_path,
            readonly = req.readonly,
            method = "node_publish_volume",
            "node publish volume called"
        );

        let mut options = vec!["bind".to_string()];
        if req.readonly {
            options.push("ro".to_string());
        }

        match &capability.access_type {
            Some(AccessType::Block(_)) => {
                if !req.publish_context.contains_key(&self.publish_info_key) {
                    return Err(Status::invalid_argument(format!(
                        "Could not find the volume name from the publish context {:?}",
                        self.publish_info_key
                    )));
                }

                let link = Self::device_path(&req.volume_id)?;
                let source = self.mounter.resolve_device(&link)?;

                self.publish_mount(&source, &req.target_path, None, &options)?;
            }
            Some(AccessType::Mount(mount)) => {
                options.extend(mount.mount_flags.iter().cloned());
                let fs_type = platform::validate_fs_type(&mount.fs_type)?;

                self.publish_mount(
                    &req.staging_target_path,
                    &req.target_path,
                    Some(fs_type),
                    &options,
                )?;
            }
            None => return Err(Status::invalid_argument("Unknown access type")),
        }

        info!(
            volume_id = %req.volume_id,
            target_path = %req.target_path,
            "Volume published successfully"
        );

        Ok(Response::new(csi::NodePublishVolumeResponse {}))
    }

    fn publish_mount(
        &self,
        source: &str,
        target: &str,
        fs_type: Option<&str>,
        options: &[String],
    ) -> Result<(), Status> {
        if self.mounter.is_mounted(target)? {
            info!(target = %target, "Volume already published");
            return Ok(());
        }
        self.mounter.mount(source, target, fs_type, options)
    }

    async fn unpublish(
        &self,
        request: Request<csi::NodeUnpublishVolumeRequest>,
    ) -> Result<Response<csi::NodeUnpublishVolumeResponse>, Status> {
        let req = request.into_inner();

        if req.volume_id.is_empty() {
            return Err(Status::invalid_argument(
                "NodeUnpublishVolume Volume ID must be provided",
            ));
        }
        if req.target_path.is_empty() {
            return Err(Status::invalid_argument(
                "NodeUnpublishVolume Target Path must be provided",
            ));
        }

        Self::validate_path(&req.target_path)?;

        info!(
            volume_id = %req.volume_id,
            target_path = %req.target_path,
            method = "node_unpublish_volume",
            "node unpublish volume called"
        );

        self.mounter.unmount(&req.target_path)?;

        // Block publishes leave a file behind, filesystem publishes a directory
        let target = Path::new(&req.target_path);
        let removed = if target.is_dir() {
            std::fs::remove_dir(target)
        } else if target.exists() {
            std::fs::remove_file(target)
        } else {
            Ok(())
        };
        if let Err(e) = removed {
            warn!(error = %e, target_path = %req.target_path, "Could not remove target path");
        }

        info!(
            volume_id = %req.volume_id,
            target_path = %req.target_path,
            "Volume unpublished successfully"
        );

        Ok(Response::new(csi::NodeUnpublishVolumeResponse {}))
    }

    async fn stats(
        &self,
        request: Request<csi::NodeGetVolumeStatsRequest>,
    ) -> Result<Response<csi::NodeGetVolumeStatsResponse>, Status> {
        let req = request.into_inner();

        if req.volume_id.is_empty() {
            return Err(Status::invalid_argument(
                "NodeGetVolumeStats Volume ID must be provided",
            ));
        }
        if req.volume_path.is_empty() {
            return Err(Status::invalid_argument(
                "NodeGetVolumeStats Volume Path must be provided",
            ));
        }

        Self::validate_path(&req.volume_path)?;

        debug!(
            volume_id = %req.volume_id,
            volume_path = %req.volume_path,
            method = "node_get_volume_stats",
            "node get volume stats called"
        );

        if !self.mounter.is_mounted(&req.volume_path)? {
            return Err(Status::not_found(format!(
                "volume path {:?} is not mounted",
                req.volume_path
            )));
        }

        use csi::volume_usage::Unit;

        let usage = if self.mounter.is_block_device(&req.volume_path)? {
            let total = self.mounter.device_size(&req.volume_path)?;
            vec![csi::VolumeUsage {
                total,
                unit: Unit::Bytes as i32,
                ..Default::default()
            }]
        } else {
            let stats = self.mounter.statistics(&req.volume_path)?;
            vec![
                csi::VolumeUsage {
                    available: stats.available_bytes,
                    total: stats.total_bytes,
                    used: stats.used_bytes,
                    unit: Unit::Bytes as i32,
                },
                csi::VolumeUsage {
                    available: stats.available_inodes,
                    total: stats.total_inodes,
                    used: stats.used_inodes,
                    unit: Unit::Inodes as i32,
                },
            ]
        };

        Ok(Response::new(csi::NodeGetVolumeStatsResponse {
            usage,
            volume_condition: None,
        }))
    }

    #[instrument(skip(self, request))]
    async fn expand(
        &self,
        request: Request<csi::NodeExpandVolumeRequest>,
    ) -> Result<Response<csi::NodeExpandVolumeResponse>, Status> {
        let req = request.into_inner();

        if req.volume_id.is_empty() {
            return Err(Status::invalid_argument(
                "NodeExpandVolume Volume ID must be provided",
            ));
        }
        if req.volume_path.is_empty() {
            return Err(Status::invalid_argument(
                "NodeExpandVolume Volume Path must be provided",
            ));
        }

        Self::validate_path(&req.volume_path)?;

        info!(
            volume_id = %req.volume_id,
            volume_path = %req.volume_path,
            method = "node_expand_volume",
            "node expand volume called"
        );

        let source = Self::device_path(&req.volume_id)?;

        let fs_type = match req
            .volume_capability
            .as_ref()
            .and_then(|c| c.access_type.as_ref())
        {
            Some(AccessType::Block(_)) => None,
            Some(AccessType::Mount(mount)) => Some(platform::validate_fs_type(&mount.fs_type)?),
            None => Some(platform::DEFAULT_FS_TYPE),
        };

        if let Some(fs_type) = fs_type {
            self.mounter.resize(&source, &req.volume_path, fs_type)?;
        }

        let capacity_bytes = self.mounter.device_size(&source)?;

        info!(
            volume_id = %req.volume_id,
            capacity_bytes = capacity_bytes,
            "Volume expansion completed"
        );

        Ok(Response::new(csi::NodeExpandVolumeResponse { capacity_bytes }))
    }
}

fn node_capability(
    rpc: csi::node_service_capability::rpc::Type,
) -> csi::NodeServiceCapability {
    csi::NodeServiceCapability {
        r#type: Some(csi::node_service_capability::Type::Rpc(
            csi::node_service_capability::Rpc { r#type: rpc as i32 },
        )),
    }
}

#[tonic::async_trait]
impl<M: Mounter> csi::node_server::Node for NodeService<M> {
    async fn node_stage_volume(
        &self,
        request: Request<csi::NodeStageVolumeRequest>,
    ) -> Result<Response<csi::NodeStageVolumeResponse>, Status> {
        let timer = OperationTimer::new("node_stage_volume");
        let result = self.stage(request).await;
        timer.finish(&result);
        result
    }

    async fn node_unstage_volume(
        &self,
        request: Request<csi::NodeUnstageVolumeRequest>,
    ) -> Result<Response<csi::NodeUnstageVolumeResponse>, Status> {
        let timer = OperationTimer::new("node_unstage_volume");
        let result = self.unstage(request).await;
        timer.finish(&result);
        result
    }

    async fn node_publish_volume(
        &self,
        request: Request<csi::NodePublishVolumeRequest>,
    ) -> Result<Response<csi::NodePublishVolumeResponse>, Status> {
        let timer = OperationTimer::new("node_publish_volume");
        let result = self.publish(request).await;
        timer.finish(&result);
        result
    }

    async fn node_unpublish_volume(
        &self,
        request: Request<csi::NodeUnpublishVolumeRequest>,
    ) -> Result<Response<csi::NodeUnpublishVolumeResponse>, Status> {
        let timer = OperationTimer::new("node_unpublish_volume");
        let result = self.unpublish(request).await;
        timer.finish(&result);
        result
    }

    async fn node_get_volume_stats(
        &self,
        request: Request<csi::NodeGetVolumeStatsRequest>,
    ) -> Result<Response<csi::NodeGetVolumeStatsResponse>, Status> {
        let timer = OperationTimer::new("node_get_volume_stats");
        let result = self.stats(request).await;
        timer.finish(&result);
        result
    }

    /// Grow the filesystem after a controller-side expansion. Served but not
    /// advertised.
    async fn node_expand_volume(
        &self,
        request: Request<csi::NodeExpandVolumeRequest>,
    ) -> Result<Response<csi::NodeExpandVolumeResponse>, Status> {
        let timer = OperationTimer::new("node_expand_volume");
        let result = self.expand(request).await;
        timer.finish(&result);
        result
    }

    async fn node_get_capabilities(
        &self,
        _request: Request<csi::NodeGetCapabilitiesRequest>,
    ) -> Result<Response<csi::NodeGetCapabilitiesResponse>, Status> {
        use csi::node_service_capability::rpc::Type;

        Ok(Response::new(csi::NodeGetCapabilitiesResponse {
            capabilities: vec![
                node_capability(Type::StageUnstageVolume),
                node_capability(Type::GetVolumeStats),
            ],
        }))
    }

    async fn node_get_info(
        &self,
        _request: Request<csi::NodeGetInfoRequest>,
    ) -> Result<Response<csi::NodeGetInfoResponse>, Status> {
        info!(node_id = %self.node_id, method = "node_get_info", "node get info called");

        Ok(Response::new(csi::NodeGetInfoResponse {
            node_id: self.node_id.clone(),
            max_volumes_per_node: self.max_volumes_per_node,
            accessible_topology: None,
        }))
    }
}
