//! The backend orchestrator.
//!
//! Enforces the idempotency rules the CSI sidecars rely on (create with the
//! same name and size, delete of a missing volume, repeated attach) and
//! translates every failure into an [`ApiError`].

use hyperv_api::models::{
    ExpandVolumeResponse, GetCapacityResponse, GetVmResponse, GetVolumeResponse, HealthyResponse,
    ListVmResponse, ListVolumesResponse, VhdInfo,
};
use hyperv_api::units::{MINIMUM_VOLUME_SIZE, format_bytes};
use hyperv_api::{ApiError, code_name};
use tonic::Code;
use tracing::{error, info, instrument, warn};

use crate::metrics::OperationTimer;
use crate::powershell::{Cmdlet, Runner, Shell};
use crate::vhd;

/// Convert any backend error into the wire envelope, logging it unless its
/// code is one the caller expects.
pub fn process_error(err: impl Into<ApiError>, message: &str, quiet: &[Code]) -> ApiError {
    let err = err.into();
    if !quiet.contains(&err.code) {
        error!(code = code_name(err.code), error = %err.message, "{}", message);
    }
    err
}

fn finish<T>(timer: OperationTimer, result: Result<T, ApiError>) -> Result<T, ApiError> {
    match &result {
        Ok(_) => timer.success(),
        Err(e) => timer.failure(&code_name(e.code).to_lowercase()),
    }
    result
}

pub struct VolumeService<S: Shell> {
    runner: Runner<S>,
    store: String,
}

impl<S: Shell> VolumeService<S> {
    /// Wrap `runner`, resolving the PV store through the shell when
    /// `directory` is empty.
    pub async fn open(runner: Runner<S>, directory: &str) -> Result<Self, ApiError> {
        let store = if directory.is_empty() {
            vhd::store_path(&runner)
                .await
                .map_err(|e| process_error(e, "unable to determine PV store", &[]))?
        } else {
            directory.to_string()
        };

        info!(store = %store, "Selected PV store directory");
        Ok(Self { runner, store })
    }

    pub fn store(&self) -> &str {
        &self.store
    }

    #[instrument(skip(self), fields(storage_size = %format_bytes(size)))]
    pub async fn create_volume(&self, name: &str, size: i64) -> Result<GetVolumeResponse, ApiError> {
        let timer = OperationTimer::new("create_volume");
        info!("create volume called");
        finish(timer, self.do_create_volume(name, size).await)
    }

    async fn do_create_volume(&self, name: &str, size: i64) -> Result<GetVolumeResponse, ApiError> {
        match vhd::get_by_name(&self.runner, &self.store, name).await {
            Ok(existing) => {
                if existing.size != size {
                    error!(existing_size = existing.size, "volume exists with different size");
                    return Err(ApiError::already_exists(format!(
                        "invalid option requested size: {}",
                        size
                    )));
                }
                info!("volume already created");
                return Ok(GetVolumeResponse::from(&existing));
            }
            Err(e) => {
                let err = process_error(e, "unable to create volume", &[Code::NotFound]);
                if err.code != Code::NotFound {
                    return Err(err);
                }
            }
        }

        let vol = vhd::new(&self.runner, name, &self.store, size)
            .await
            .map_err(|e| {
                let err = ApiError::from(e);
                error!(error = %err.message, "unable to create volume");
                if err.code == Code::ResourceExhausted {
                    error!("storage space full");
                    err
                } else {
                    ApiError::internal(err.message)
                }
            })?;

        info!(volume_id = %vol.disk_identifier, size = vol.size, "volume was created");
        Ok(GetVolumeResponse::from(&vol))
    }

    /// Look a volume up by id, then by name.
    #[instrument(skip(self))]
    pub async fn get_volume(&self, name_or_id: &str) -> Result<GetVolumeResponse, ApiError> {
        let timer = OperationTimer::new("get_volume");
        info!("get volume called");

        let result = match vhd::get_by_id(&self.runner, &self.store, name_or_id).await {
            Ok(vol) => Ok(vol),
            Err(e) => {
                let err = process_error(e, "unable to get volume", &[Code::NotFound]);
                if err.code == Code::NotFound {
                    vhd::get_by_name(&self.runner, &self.store, name_or_id)
                        .await
                        .map_err(|e| process_error(e, "unable to get volume", &[]))
                } else {
                    Err(err)
                }
            }
        };

        let result = result.map(|vol| {
            info!(volume_id = %vol.disk_identifier, "volume was found");
            GetVolumeResponse::from(&vol)
        });
        finish(timer, result)
    }

    /// Delete a volume. A volume that does not exist is already deleted.
    #[instrument(skip(self))]
    pub async fn delete_volume(&self, id: &str) -> Result<(), ApiError> {
        let timer = OperationTimer::new("delete_volume");
        info!("delete volume called");

        if id.is_empty() {
            return finish(
                timer,
                Err(ApiError::invalid_argument(
                    "DeleteVolume Volume ID must be provided",
                )),
            );
        }

        let result = match vhd::delete(&self.runner, &self.store, id).await {
            Ok(()) => {
                info!("volume was deleted");
                Ok(())
            }
            Err(e) => {
                let err = process_error(e, "unable to delete volume", &[Code::NotFound]);
                if err.code == Code::NotFound {
                    info!("volume already deleted");
                    Ok(())
                } else {
                    Err(err)
                }
            }
        };
        finish(timer, result)
    }

    #[instrument(skip(self), fields(new_size = %format_bytes(size)))]
    pub async fn expand_volume(&self, id: &str, size: i64) -> Result<ExpandVolumeResponse, ApiError> {
        let timer = OperationTimer::new("expand_volume");
        info!("expand volume called");
        finish(timer, self.do_expand_volume(id, size).await)
    }

    async fn do_expand_volume(&self, id: &str, size: i64) -> Result<ExpandVolumeResponse, ApiError> {
        let original = vhd::get_by_id(&self.runner, &self.store, id)
            .await
            .map_err(|e| process_error(e, "unable to expand volume", &[]))?;

        let resized = vhd::resize(&self.runner, &self.store, id, size)
            .await
            .map_err(|e| process_error(e, "unable to expand volume", &[]))?;

        info!(capacity = %format_bytes(resized.size), "volume was expanded");
        Ok(ExpandVolumeResponse {
            capacity_bytes: resized.size,
            node_expansion_required: resized.size > original.size,
        })
    }

    #[instrument(skip(self))]
    pub async fn list_volumes(
        &self,
        max_entries: i32,
        next_token: &str,
    ) -> Result<ListVolumesResponse, ApiError> {
        let timer = OperationTimer::new("list_volumes");
        info!("list volumes called");

        let result = vhd::list(&self.runner, &self.store, max_entries, next_token)
            .await
            .map(|page| {
                info!(count = page.vhds.len(), "volumes were listed");
                ListVolumesResponse::from(page)
            })
            .map_err(|e| process_error(e, "cannot list volumes", &[]));
        finish(timer, result)
    }

    pub async fn get_capacity(&self) -> Result<GetCapacityResponse, ApiError> {
        let timer = OperationTimer::new("get_capacity");
        info!("get capacity called");

        let result = vhd::capacity(&self.runner, &self.store)
            .await
            .map(|free| {
                info!(available = %format_bytes(free), "got storage capacity");
                GetCapacityResponse {
                    available_capacity: free,
                    minimum_volume_size: MINIMUM_VOLUME_SIZE,
                }
            })
            .map_err(|e| process_error(e, "cannot get capacity", &[]));
        finish(timer, result)
    }

    /// Attach a volume to a node. Already attached to that node is success;
    /// attached anywhere else is a conflict.
    #[instrument(skip(self))]
    pub async fn publish_volume(&self, volume_id: &str, node_id: &str) -> Result<(), ApiError> {
        let timer = OperationTimer::new("publish_volume");
        info!("publish volume called");
        finish(timer, self.do_publish_volume(volume_id, node_id).await)
    }

    async fn do_publish_volume(&self, volume_id: &str, node_id: &str) -> Result<(), ApiError> {
        let disk = vhd::get_by_id(&self.runner, &self.store, volume_id)
            .await
            .map_err(|e| process_error(e, "unable to publish volume", &[]))?;

        match attached_host(&disk) {
            Some(host) if host.eq_ignore_ascii_case(node_id) => {
                info!("volume already published");
                return Ok(());
            }
            Some(host) => {
                warn!(host = %host, "volume is attached to another node");
                return Err(ApiError::failed_precondition(format!(
                    "volume {} is attached to node {}",
                    volume_id, host
                )));
            }
            None => {}
        }

        vhd::attach(&self.runner, &self.store, volume_id, node_id)
            .await
            .map_err(|e| process_error(e, "unable to publish volume", &[]))?;

        info!("volume was published");
        Ok(())
    }

    /// Detach a volume. A missing volume, or one not attached to this node,
    /// needs no work.
    #[instrument(skip(self))]
    pub async fn unpublish_volume(&self, volume_id: &str, node_id: &str) -> Result<(), ApiError> {
        let timer = OperationTimer::new("unpublish_volume");
        info!("unpublish volume called");
        finish(timer, self.do_unpublish_volume(volume_id, node_id).await)
    }

    async fn do_unpublish_volume(&self, volume_id: &str, node_id: &str) -> Result<(), ApiError> {
        let disk = match vhd::get_by_id(&self.runner, &self.store, volume_id).await {
            Ok(disk) => disk,
            Err(e) => {
                let err = process_error(e, "unable to unpublish volume", &[Code::NotFound]);
                if err.code == Code::NotFound {
                    info!("volume does not exist");
                    return Ok(());
                }
                return Err(err);
            }
        };

        match attached_host(&disk) {
            Some(host) if host.eq_ignore_ascii_case(node_id) => {}
            _ => {
                info!("volume is not attached to node");
                return Ok(());
            }
        }

        vhd::detach(&self.runner, &self.store, volume_id, node_id)
            .await
            .map_err(|e| process_error(e, "unable to unpublish volume", &[]))?;

        info!("volume was unpublished");
        Ok(())
    }

    pub async fn list_vms(&self) -> Result<ListVmResponse, ApiError> {
        let timer = OperationTimer::new("list_vms");
        info!("list VMs called");

        let result = vhd::list_vms(&self.runner)
            .await
            .map(|vms| {
                info!(count = vms.vms.len(), "VMs were listed");
                vms
            })
            .map_err(|e| process_error(e, "list VMs failed", &[]));
        finish(timer, result)
    }

    #[instrument(skip(self))]
    pub async fn get_vm(&self, id: &str) -> Result<GetVmResponse, ApiError> {
        let timer = OperationTimer::new("get_vm");
        info!("get VM called");

        let result = vhd::get_vm(&self.runner, id)
            .await
            .map(|vm| {
                info!(name = %vm.name, "got VM");
                vm
            })
            .map_err(|e| process_error(e, "get VM failed", &[Code::NotFound]));
        finish(timer, result)
    }

    /// Verify the shell still answers.
    pub async fn health_check(&self) -> Result<HealthyResponse, ApiError> {
        let healthy = match self
            .runner
            .run_with_result(&[Cmdlet::new("$PSVersionTable.PSVersion.Major")])
            .await
        {
            Ok(out) => out.parse::<i32>().is_ok_and(|major| major >= 0),
            Err(e) => {
                warn!(error = %e, "Health check failed");
                false
            }
        };

        if healthy {
            Ok(HealthyResponse::ok())
        } else {
            Err(ApiError::internal("Hyper-V backend unhealthy"))
        }
    }

    /// Release the shell.
    pub async fn close(&self) {
        self.runner.close().await;
    }
}

fn attached_host(disk: &VhdInfo) -> Option<&str> {
    disk.host.as_deref().filter(|h| !h.is_empty())
}
