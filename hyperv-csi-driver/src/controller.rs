//! CSI Controller Service Implementation
//!
//! Handles the cluster-level volume lifecycle by calling the Hyper-V
//! provider's REST API. The provider owns idempotency; this layer validates
//! requests, negotiates sizes and translates errors into gRPC statuses.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use hyperv_api::units::{
    DEFAULT_VOLUME_SIZE, GIB, MAXIMUM_VOLUME_SIZE, MINIMUM_VOLUME_SIZE, format_bytes,
};
use tonic::{Code, Request, Response, Status};
use tracing::{error, info, instrument, warn};

use crate::csi;
use crate::csi::volume_capability::access_mode::Mode;
use crate::metrics::OperationTimer;
use crate::publish_context_key;
use crate::rest_client::{ClientError, HyperVApi, request_deadline};

/// The only access mode a Hyper-V disk supports.
const SUPPORTED_ACCESS_MODE: Mode = Mode::SingleNodeWriter;

/// Default ListVolumes page size when the caller sends `max_entries == 0`.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// CSI Controller Service
///
/// Implements:
/// - Volume creation, deletion and expansion
/// - Publishing volumes to, and unpublishing them from, nodes (VMs)
/// - Volume listing, capacity reporting and capability validation
pub struct ControllerService<C: HyperVApi> {
    client: Arc<C>,
    /// Key under which the volume ID is handed to the node service
    publish_info_key: String,
    default_page_size: i32,
}

impl<C: HyperVApi> ControllerService<C> {
    pub fn new(client: Arc<C>, driver_name: &str, default_page_size: u32) -> Self {
        let default_page_size = match default_page_size {
            0 => DEFAULT_PAGE_SIZE,
            n => n,
        };

        Self {
            client,
            publish_info_key: publish_context_key(driver_name),
            default_page_size: i32::try_from(default_page_size).unwrap_or(i32::MAX),
        }
    }

    #[instrument(skip(self, request))]
    async fn create(
        &self,
        request: Request<csi::CreateVolumeRequest>,
    ) -> Result<Response<csi::CreateVolumeResponse>, Status> {
        let deadline = request_deadline(request.metadata());
        let req = request.into_inner();

        if req.name.is_empty() {
            return Err(Status::invalid_argument("CreateVolume Name must be provided"));
        }
        if req.volume_capabilities.is_empty() {
            return Err(Status::invalid_argument(
                "CreateVolume Volume capabilities must be provided",
            ));
        }

        let violations = validate_capabilities(&req.volume_capabilities);
        if !violations.is_empty() {
            return Err(Status::invalid_argument(format!(
                "volume capabilities cannot be satisified: {}",
                violations.join("; ")
            )));
        }

        let size = extract_storage(req.capacity_range.as_ref())
            .map_err(|e| Status::out_of_range(format!("invalid capacity range: {}", e)))?;

        info!(
            volume_name = %req.name,
            storage_size_giga_bytes = size / GIB,
            method = "create_volume",
            "create volume called"
        );

        let volume = self
            .client
            .create_volume(&req.name, size, deadline)
            .await
            .map_err(|e| process_error_return("create volume", e))?;

        info!(
            volume_name = %req.name,
            volume_id = %volume.id,
            size = volume.size,
            "volume created successfully"
        );

        Ok(Response::new(csi::CreateVolumeResponse {
            volume: Some(csi::Volume {
                capacity_bytes: volume.size,
                volume_id: volume.id,
                ..Default::default()
            }),
        }))
    }

    async fn delete(
        &self,
        request: Request<csi::DeleteVolumeRequest>,
    ) -> Result<Response<csi::DeleteVolumeResponse>, Status> {
        let deadline = request_deadline(request.metadata());
        let req = request.into_inner();

        if req.volume_id.is_empty() {
            return Err(Status::invalid_argument(
                "DeleteVolume Volume ID must be provided",
            ));
        }

        info!(volume_id = %req.volume_id, method = "delete_volume", "delete volume called");

        match self.client.delete_volume(&req.volume_id, deadline).await {
            Ok(()) => info!(volume_id = %req.volume_id, "volume was deleted"),
            Err(e) if e.code() == Code::NotFound => {
                warn!(volume_id = %req.volume_id, "Volume not found, treating as already deleted");
            }
            Err(e) => return Err(process_error_return("delete volume", e)),
        }

        Ok(Response::new(csi::DeleteVolumeResponse {}))
    }

    async fn publish(
        &self,
        request: Request<csi::ControllerPublishVolumeRequest>,
    ) -> Result<Response<csi::ControllerPublishVolumeResponse>, Status> {
        let deadline = request_deadline(request.metadata());
        let req = request.into_inner();

        validate_ids("ControllerPublishVolume", &req.volume_id, Some(&req.node_id))?;

        if req.volume_capability.is_none() {
            return Err(Status::invalid_argument(
                "ControllerPublishVolume Volume capability must be provided",
            ));
        }

        // Read-only attachment is reported as a conflict
        if req.readonly {
            return Err(Status::already_exists("read only Volumes are not supported"));
        }

        info!(
            volume_id = %req.volume_id,
            node_id = %req.node_id,
            method = "controller_publish_volume",
            "controller publish volume called"
        );

        self.client
            .get_volume(&req.volume_id, deadline)
            .await
            .map_err(|e| process_error_return("publish volume - volume does not exist", e))?;

        self.client
            .get_vm(&req.node_id, deadline)
            .await
            .map_err(|e| process_error_return("publish volume - node does not exist", e))?;

        self.client
            .publish_volume(&req.volume_id, &req.node_id, deadline)
            .await
            .map_err(|e| process_error_return("publish volume", e))?;

        info!(volume_id = %req.volume_id, node_id = %req.node_id, "volume was published");

        Ok(Response::new(csi::ControllerPublishVolumeResponse {
            publish_context: HashMap::from([(self.publish_info_key.clone(), req.volume_id)]),
        }))
    }

    async fn unpublish(
        &self,
        request: Request<csi::ControllerUnpublishVolumeRequest>,
    ) -> Result<Response<csi::ControllerUnpublishVolumeResponse>, Status> {
        let deadline = request_deadline(request.metadata());
        let req = request.into_inner();

        validate_ids("ControllerUnpublishVolume", &req.volume_id, Some(&req.node_id))?;

        info!(
            volume_id = %req.volume_id,
            node_id = %req.node_id,
            method = "controller_unpublish_volume",
            "controller unpublish volume called"
        );

        match self
            .client
            .unpublish_volume(&req.volume_id, &req.node_id, deadline)
            .await
        {
            Ok(()) => info!(volume_id = %req.volume_id, "volume was unpublished"),
            Err(e) if e.code() == Code::NotFound => {
                warn!(volume_id = %req.volume_id, "Volume not found, treating as already unpublished");
            }
            Err(e) => return Err(process_error_return("unpublish volume", e)),
        }

        Ok(Response::new(csi::ControllerUnpublishVolumeResponse {}))
    }

    async fn validate(
        &self,
        request: Request<csi::ValidateVolumeCapabilitiesRequest>,
    ) -> Result<Response<csi::ValidateVolumeCapabilitiesResponse>, Status> {
        let deadline = request_deadline(request.metadata());
        let req = request.into_inner();

        validate_ids("ValidateVolumeCapabilities", &req.volume_id, None)?;

        if req.volume_capabilities.is_empty() {
            return Err(Status::invalid_argument(
                "ValidateVolumeCapabilities Volume Capabilities must be provided",
            ));
        }

        info!(
            volume_id = %req.volume_id,
            method = "validate_volume_capabilities",
            "validate volume capabilities called"
        );

        self.client
            .get_volume(&req.volume_id, deadline)
            .await
            .map_err(|e| process_error_return("get volume", e))?;

        Ok(Response::new(csi::ValidateVolumeCapabilitiesResponse {
            confirmed: Some(csi::validate_volume_capabilities_response::Confirmed {
                volume_capabilities: vec![csi::VolumeCapability {
                    access_type: None,
                    access_mode: Some(csi::volume_capability::AccessMode {
                        mode: SUPPORTED_ACCESS_MODE as i32,
                    }),
                }],
                ..Default::default()
            }),
            message: String::new(),
        }))
    }

    async fn list(
        &self,
        request: Request<csi::ListVolumesRequest>,
    ) -> Result<Response<csi::ListVolumesResponse>, Status> {
        let deadline = request_deadline(request.metadata());
        let req = request.into_inner();

        if req.max_entries < 0 {
            return Err(Status::invalid_argument(
                "ListVolumes max_entries cannot be negative",
            ));
        }
        let max_entries = match req.max_entries {
            0 => self.default_page_size,
            n => n,
        };

        info!(
            max_entries = req.max_entries,
            effective_max_entries = max_entries,
            starting_token = %req.starting_token,
            method = "list_volumes",
            "list volumes called"
        );

        let page = self
            .client
            .list_volumes(max_entries, &req.starting_token, deadline)
            .await
            .map_err(|e| process_error_return("list volumes", e))?;

        let entries: Vec<csi::list_volumes_response::Entry> = page
            .volumes
            .into_iter()
            .map(|v| {
                let published_node_ids = v.host.into_iter().filter(|h| !h.is_empty()).collect();
                csi::list_volumes_response::Entry {
                    volume: Some(csi::Volume {
                        capacity_bytes: v.size,
                        volume_id: v.disk_identifier,
                        ..Default::default()
                    }),
                    status: Some(csi::list_volumes_response::VolumeStatus {
                        published_node_ids,
                        volume_condition: None,
                    }),
                }
            })
            .collect();

        info!(num_volume_entries = entries.len(), "volumes listed");

        Ok(Response::new(csi::ListVolumesResponse {
            entries,
            next_token: page.next_token.unwrap_or_default(),
        }))
    }

    async fn capacity(
        &self,
        request: Request<csi::GetCapacityRequest>,
    ) -> Result<Response<csi::GetCapacityResponse>, Status> {
        let deadline = request_deadline(request.metadata());

        info!(method = "get_capacity", "get capacity called");

        let capacity = self
            .client
            .get_capacity(deadline)
            .await
            .map_err(|e| process_error_return("get capacity", e))?;

        info!(
            available_capacity_bytes = capacity.available_capacity,
            "capacity retrieved"
        );

        Ok(Response::new(csi::GetCapacityResponse {
            available_capacity: capacity.available_capacity,
            maximum_volume_size: Some(MAXIMUM_VOLUME_SIZE),
            minimum_volume_size: Some(capacity.minimum_volume_size),
        }))
    }

    #[instrument(skip(self, request))]
    async fn expand(
        &self,
        request: Request<csi::ControllerExpandVolumeRequest>,
    ) -> Result<Response<csi::ControllerExpandVolumeResponse>, Status> {
        let deadline = request_deadline(request.metadata());
        let req = request.into_inner();

        if req.volume_id.is_empty() {
            return Err(Status::invalid_argument(
                "ControllerExpandVolume Volume ID must be provided",
            ));
        }
        let Some(range) = req.capacity_range.as_ref() else {
            return Err(Status::invalid_argument(
                "ControllerExpandVolume Capacity range must be provided",
            ));
        };

        let size = extract_storage(Some(range))
            .map_err(|e| Status::out_of_range(format!("invalid capacity range: {}", e)))?;

        info!(
            volume_id = %req.volume_id,
            size = %format_bytes(size),
            method = "controller_expand_volume",
            "controller expand volume called"
        );

        let expanded = self
            .client
            .expand_volume(&req.volume_id, size, deadline)
            .await
            .map_err(|e| process_error_return("expand volume", e))?;

        info!(
            volume_id = %req.volume_id,
            capacity_bytes = expanded.capacity_bytes,
            node_expansion_required = expanded.node_expansion_required,
            "volume was expanded"
        );

        Ok(Response::new(csi::ControllerExpandVolumeResponse {
            capacity_bytes: expanded.capacity_bytes,
            node_expansion_required: expanded.node_expansion_required,
        }))
    }
}

/// Wrap `inner` in an [`OperationTimer`] named `operation`.
async fn timed<T, F>(operation: &str, inner: F) -> Result<T, Status>
where
    F: Future<Output = Result<T, Status>>,
{
    let timer = OperationTimer::new(operation);
    let result = inner.await;
    timer.finish(&result);
    result
}

#[tonic::async_trait]
impl<C: HyperVApi> csi::controller_server::Controller for ControllerService<C> {
    async fn create_volume(
        &self,
        request: Request<csi::CreateVolumeRequest>,
    ) -> Result<Response<csi::CreateVolumeResponse>, Status> {
        timed("create_volume", self.create(request)).await
    }

    async fn delete_volume(
        &self,
        request: Request<csi::DeleteVolumeRequest>,
    ) -> Result<Response<csi::DeleteVolumeResponse>, Status> {
        timed("delete_volume", self.delete(request)).await
    }

    async fn controller_publish_volume(
        &self,
        request: Request<csi::ControllerPublishVolumeRequest>,
    ) -> Result<Response<csi::ControllerPublishVolumeResponse>, Status> {
        timed("controller_publish_volume", self.publish(request)).await
    }

    async fn controller_unpublish_volume(
        &self,
        request: Request<csi::ControllerUnpublishVolumeRequest>,
    ) -> Result<Response<csi::ControllerUnpublishVolumeResponse>, Status> {
        timed("controller_unpublish_volume", self.unpublish(request)).await
    }

    async fn validate_volume_capabilities(
        &self,
        request: Request<csi::ValidateVolumeCapabilitiesRequest>,
    ) -> Result<Response<csi::ValidateVolumeCapabilitiesResponse>, Status> {
        timed("validate_volume_capabilities", self.validate(request)).await
    }

    async fn list_volumes(
        &self,
        request: Request<csi::ListVolumesRequest>,
    ) -> Result<Response<csi::ListVolumesResponse>, Status> {
        timed("list_volumes", self.list(request)).await
    }

    async fn get_capacity(
        &self,
        request: Request<csi::GetCapacityRequest>,
    ) -> Result<Response<csi::GetCapacityResponse>, Status> {
        timed("get_capacity", self.capacity(request)).await
    }

    /// Report controller capabilities.
    ///
    /// Expansion is served but deliberately not advertised.
    async fn controller_get_capabilities(
        &self,
        _request: Request<csi::ControllerGetCapabilitiesRequest>,
    ) -> Result<Response<csi::ControllerGetCapabilitiesResponse>, Status> {
        use csi::controller_service_capability::rpc::Type;

        let timer = OperationTimer::new("controller_get_capabilities");
        let capabilities = [
            Type::CreateDeleteVolume,
            Type::PublishUnpublishVolume,
            Type::ListVolumes,
            Type::ListVolumesPublishedNodes,
        ]
        .into_iter()
        .map(|t| csi::ControllerServiceCapability {
            r#type: Some(csi::controller_service_capability::Type::Rpc(
                csi::controller_service_capability::Rpc { r#type: t as i32 },
            )),
        })
        .collect();

        timer.success();
        Ok(Response::new(csi::ControllerGetCapabilitiesResponse {
            capabilities,
        }))
    }

    async fn controller_expand_volume(
        &self,
        request: Request<csi::ControllerExpandVolumeRequest>,
    ) -> Result<Response<csi::ControllerExpandVolumeResponse>, Status> {
        timed("controller_expand_volume", self.expand(request)).await
    }

    async fn create_snapshot(
        &self,
        _request: Request<csi::CreateSnapshotRequest>,
    ) -> Result<Response<csi::CreateSnapshotResponse>, Status> {
        Err(Status::unimplemented("CreateSnapshot is not supported"))
    }

    async fn delete_snapshot(
        &self,
        _request: Request<csi::DeleteSnapshotRequest>,
    ) -> Result<Response<csi::DeleteSnapshotResponse>, Status> {
        Err(Status::unimplemented("DeleteSnapshot is not supported"))
    }

    async fn list_snapshots(
        &self,
        _request: Request<csi::ListSnapshotsRequest>,
    ) -> Result<Response<csi::ListSnapshotsResponse>, Status> {
        Err(Status::unimplemented("ListSnapshots is not supported"))
    }

    async fn controller_get_volume(
        &self,
        _request: Request<csi::ControllerGetVolumeRequest>,
    ) -> Result<Response<csi::ControllerGetVolumeResponse>, Status> {
        Err(Status::unimplemented("ControllerGetVolume is not supported"))
    }
}

/// Log a failed provider call and turn it into the status returned to the
/// CSI caller.
fn process_error_return(action: &str, err: ClientError) -> Status {
    let message = match err.api_error() {
        Some(api) => api.message.clone(),
        None => err.to_string(),
    };
    error!(error = %err, code = ?err.code(), "{} failed", action);
    Status::new(err.code(), format!("{} failed: {}", action, message))
}

/// Sorted, de-duplicated reasons the capabilities cannot be met.
pub fn validate_capabilities(capabilities: &[csi::VolumeCapability]) -> Vec<String> {
    let mut violations = BTreeSet::new();

    for capability in capabilities {
        let mode = capability.access_mode.as_ref().map_or(0, |m| m.mode);
        if mode != SUPPORTED_ACCESS_MODE as i32 {
            let name = Mode::try_from(mode)
                .map(|m| m.as_str_name().to_string())
                .unwrap_or_else(|_| mode.to_string());
            violations.insert(format!("unsupported access mode {}", name));
        }

        if capability.access_type.is_none() {
            violations.insert("unsupported access type".to_string());
        }
    }

    violations.into_iter().collect()
}

/// Check that IDs are present and look like Hyper-V GUIDs. A malformed ID
/// cannot name an existing volume or VM, so it is reported as not found.
pub fn validate_ids(op: &str, volume_id: &str, node_id: Option<&str>) -> Result<(), Status> {
    let ids = std::iter::once(("volume", volume_id)).chain(node_id.map(|n| ("node", n)));

    for (kind, value) in ids {
        if value.is_empty() {
            return Err(Status::invalid_argument(format!(
                "{} {} ID must be provided",
                op, kind
            )));
        }
        if uuid::Uuid::parse_str(value).is_err() {
            return Err(Status::not_found(format!("{} invalid {} ID", op, kind)));
        }
    }

    Ok(())
}

/// Resolve a capacity range to a volume size.
///
/// Rule order is significant: a `required` below the minimum is clamped up
/// only when no limit is set, while a `limit` below the minimum is always
/// rejected.
pub fn extract_storage(range: Option<&csi::CapacityRange>) -> Result<i64, String> {
    let Some(range) = range else {
        return Ok(DEFAULT_VOLUME_SIZE);
    };

    let required = range.required_bytes;
    let limit = range.limit_bytes;
    let required_set = required > 0;
    let limit_set = limit > 0;

    if !required_set && !limit_set {
        return Ok(DEFAULT_VOLUME_SIZE);
    }

    if required_set && limit_set && limit < required {
        return Err(format!(
            "limit ({}) can not be less than required ({}) size",
            format_bytes(limit),
            format_bytes(required)
        ));
    }

    if required_set && !limit_set && required < MINIMUM_VOLUME_SIZE {
        warn!(
            required_bytes = %format_bytes(required),
            minimum_volume_size = %format_bytes(MINIMUM_VOLUME_SIZE),
            "requiredBytes is less than minimum volume size, using the minimum volume size"
        );
        return Ok(MINIMUM_VOLUME_SIZE);
    }

    if limit_set && limit < MINIMUM_VOLUME_SIZE {
        return Err(format!(
            "limit ({}) can not be less than minimum supported volume size ({})",
            format_bytes(limit),
            format_bytes(MINIMUM_VOLUME_SIZE)
        ));
    }

    if required_set && required > MAXIMUM_VOLUME_SIZE {
        return Err(format!(
            "required ({}) can not exceed maximum supported volume size ({})",
            format_bytes(required),
            format_bytes(MAXIMUM_VOLUME_SIZE)
        ));
    }

    if !required_set && limit_set && limit > MAXIMUM_VOLUME_SIZE {
        return Err(format!(
            "limit ({}) can not exceed maximum supported volume size ({})",
            format_bytes(limit),
            format_bytes(MAXIMUM_VOLUME_SIZE)
        ));
    }

    if required_set {
        return Ok(required);
    }
    if limit_set {
        return Ok(limit);
    }

    Ok(DEFAULT_VOLUME_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyperv_api::units::MIB;

    fn range(required_bytes: i64, limit_bytes: i64) -> csi::CapacityRange {
        csi::CapacityRange {
            required_bytes,
            limit_bytes,
        }
    }

    fn capability(mode: Mode, block: bool) -> csi::VolumeCapability {
        csi::VolumeCapability {
            access_type: Some(if block {
                csi::volume_capability::AccessType::Block(csi::volume_capability::BlockVolume {})
            } else {
                csi::volume_capability::AccessType::Mount(csi::volume_capability::MountVolume {
                    fs_type: "ext4".into(),
                    ..Default::default()
                })
            }),
            access_mode: Some(csi::volume_capability::AccessMode { mode: mode as i32 }),
        }
    }

    #[test]
    fn test_extract_storage_defaults() {
        assert_eq!(extract_storage(None).unwrap(), DEFAULT_VOLUME_SIZE);
        assert_eq!(extract_storage(Some(&range(0, 0))).unwrap(), DEFAULT_VOLUME_SIZE);
    }

    #[test]
    fn test_extract_storage_required_within_limit() {
        assert_eq!(
            extract_storage(Some(&range(25 * MIB, MAXIMUM_VOLUME_SIZE))).unwrap(),
            25 * MIB
        );
        assert_eq!(extract_storage(Some(&range(GIB, GIB))).unwrap(), GIB);
    }

    #[test]
    fn test_extract_storage_limit_below_required() {
        let err = extract_storage(Some(&range(2 * GIB, GIB))).unwrap_err();
        assert_eq!(err, "limit (1Gi) can not be less than required (2Gi) size");
    }

    #[test]
    fn test_extract_storage_clamps_small_required_without_limit() {
        assert_eq!(
            extract_storage(Some(&range(MIB, 0))).unwrap(),
            MINIMUM_VOLUME_SIZE
        );
    }

    #[test]
    fn test_extract_storage_small_limit_is_error() {
        // Never clamped, even when required is also small
        assert!(extract_storage(Some(&range(0, MIB))).is_err());
        assert!(extract_storage(Some(&range(MIB, 2 * MIB))).is_err());
    }

    #[test]
    fn test_extract_storage_above_maximum() {
        let err = extract_storage(Some(&range(3 * MAXIMUM_VOLUME_SIZE, 0))).unwrap_err();
        assert!(err.starts_with("required (6Ti)"));

        let err = extract_storage(Some(&range(0, 3 * MAXIMUM_VOLUME_SIZE))).unwrap_err();
        assert!(err.starts_with("limit (6Ti)"));
    }

    #[test]
    fn test_extract_storage_only_limit() {
        assert_eq!(extract_storage(Some(&range(0, 10 * GIB))).unwrap(), 10 * GIB);
    }

    #[test]
    fn test_validate_capabilities() {
        assert!(validate_capabilities(&[capability(Mode::SingleNodeWriter, false)]).is_empty());
        assert!(validate_capabilities(&[capability(Mode::SingleNodeWriter, true)]).is_empty());

        let violations = validate_capabilities(&[
            capability(Mode::MultiNodeMultiWriter, false),
            capability(Mode::MultiNodeMultiWriter, true),
            csi::VolumeCapability {
                access_type: None,
                access_mode: None,
            },
        ]);
        assert_eq!(
            violations,
            vec![
                "unsupported access mode MULTI_NODE_MULTI_WRITER",
                "unsupported access mode UNKNOWN",
                "unsupported access type",
            ]
        );
    }

    #[test]
    fn test_validate_ids() {
        const ID: &str = "53b8f8d8-38b2-4479-8ca5-842c2cd44861";

        assert!(validate_ids("ControllerPublishVolume", ID, Some(ID)).is_ok());
        assert!(validate_ids("ValidateVolumeCapabilities", ID, None).is_ok());

        let err = validate_ids("ControllerPublishVolume", "", Some(ID)).unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
        assert_eq!(err.message(), "ControllerPublishVolume volume ID must be provided");

        let err = validate_ids("ControllerPublishVolume", ID, Some("")).unwrap_err();
        assert_eq!(err.message(), "ControllerPublishVolume node ID must be provided");

        let err = validate_ids("ControllerUnpublishVolume", ID, Some("worker-1")).unwrap_err();
        assert_eq!(err.code(), Code::NotFound);
        assert_eq!(err.message(), "ControllerUnpublishVolume invalid node ID");
    }

    #[test]
    fn test_process_error_return_keeps_provider_code() {
        let status = process_error_return(
            "create volume",
            ClientError::Api(hyperv_api::ApiError::already_exists(
                "invalid option requested size: 10",
            )),
        );
        assert_eq!(status.code(), Code::AlreadyExists);
        assert_eq!(
            status.message(),
            "create volume failed: invalid option requested size: 10"
        );

        let status = process_error_return("get capacity", ClientError::NegativeValue);
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(
            status.message(),
            "get capacity failed: argument value cannot be negative"
        );
    }
}
