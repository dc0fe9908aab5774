//! REST handlers. Each one parses its inputs, calls the orchestrator and
//! renders the result or the error envelope.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use hyperv_api::ApiError;
use serde::{Deserialize, Serialize};

use crate::powershell::Shell;
use crate::service::VolumeService;

type Service<S> = State<Arc<VolumeService<S>>>;

#[derive(Debug, Deserialize)]
pub struct CreateParams {
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    maxentries: Option<String>,
    nexttoken: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VmParams {
    id: Option<String>,
}

fn error_response(err: ApiError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(err)).into_response()
}

fn json_response<T: Serialize>(result: Result<T, ApiError>, ok: StatusCode) -> Response {
    match result {
        Ok(body) => (ok, Json(body)).into_response(),
        Err(err) => error_response(err),
    }
}

fn empty_response(result: Result<(), ApiError>) -> Response {
    match result {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => error_response(err),
    }
}

fn parse_size(raw: &str) -> Result<i64, ApiError> {
    let size = raw
        .parse::<i64>()
        .map_err(|e| ApiError::invalid_argument(format!("invalid volume size: {}", e)))?;
    if size < 0 {
        return Err(ApiError::invalid_argument("volume size cannot be negative"));
    }
    Ok(size)
}

/// Negative page sizes are taken by magnitude and clamped to `i32`.
fn parse_max_entries(raw: Option<&str>) -> Result<i32, ApiError> {
    let Some(raw) = raw.filter(|r| !r.is_empty()) else {
        return Ok(0);
    };
    let value = raw
        .parse::<i64>()
        .map_err(|e| ApiError::invalid_argument(format!("invalid maxentries: {}", e)))?;
    Ok(value.unsigned_abs().min(i32::MAX as u64) as i32)
}

pub async fn create_volume<S: Shell>(
    State(svc): Service<S>,
    Path(name): Path<String>,
    Query(params): Query<CreateParams>,
) -> Response {
    if name.is_empty() {
        return error_response(ApiError::invalid_argument("missing volume name"));
    }
    let Some(raw) = params.size.filter(|s| !s.is_empty()) else {
        return error_response(ApiError::invalid_argument("missing volume size"));
    };
    let size = match parse_size(&raw) {
        Ok(size) => size,
        Err(err) => return error_response(err),
    };

    json_response(svc.create_volume(&name, size).await, StatusCode::CREATED)
}

pub async fn get_volume<S: Shell>(State(svc): Service<S>, Path(name): Path<String>) -> Response {
    json_response(svc.get_volume(&name).await, StatusCode::OK)
}

pub async fn delete_volume<S: Shell>(State(svc): Service<S>, Path(id): Path<String>) -> Response {
    empty_response(svc.delete_volume(&id).await)
}

pub async fn expand_volume<S: Shell>(
    State(svc): Service<S>,
    Path((id, size)): Path<(String, String)>,
) -> Response {
    let size = match parse_size(&size) {
        Ok(size) => size,
        Err(err) => return error_response(err),
    };
    json_response(svc.expand_volume(&id, size).await, StatusCode::OK)
}

pub async fn list_volumes<S: Shell>(
    State(svc): Service<S>,
    Query(params): Query<ListParams>,
) -> Response {
    let max_entries = match parse_max_entries(params.maxentries.as_deref()) {
        Ok(n) => n,
        Err(err) => return error_response(err),
    };
    let next_token = params.nexttoken.unwrap_or_default();
    json_response(svc.list_volumes(max_entries, &next_token).await, StatusCode::OK)
}

pub async fn get_capacity<S: Shell>(State(svc): Service<S>) -> Response {
    json_response(svc.get_capacity().await, StatusCode::OK)
}

pub async fn publish_volume<S: Shell>(
    State(svc): Service<S>,
    Path((node_id, volume_id)): Path<(String, String)>,
) -> Response {
    empty_response(svc.publish_volume(&volume_id, &node_id).await)
}

pub async fn unpublish_volume<S: Shell>(
    State(svc): Service<S>,
    Path((node_id, volume_id)): Path<(String, String)>,
) -> Response {
    empty_response(svc.unpublish_volume(&volume_id, &node_id).await)
}

/// `GET /vms` lists every VM; `GET /vms?id=` returns one.
pub async fn vms<S: Shell>(State(svc): Service<S>, Query(params): Query<VmParams>) -> Response {
    match params.id.filter(|id| !id.is_empty()) {
        Some(id) => json_response(svc.get_vm(&id).await, StatusCode::OK),
        None => json_response(svc.list_vms().await, StatusCode::OK),
    }
}

pub async fn health_check<S: Shell>(State(svc): Service<S>) -> Response {
    json_response(svc.health_check().await, StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("0").unwrap(), 0);

        let err = parse_size("-1").unwrap_err();
        assert_eq!(err.message, "volume size cannot be negative");

        let err = parse_size("ten").unwrap_err();
        assert_eq!(err.code, Code::InvalidArgument);
        assert!(err.message.starts_with("invalid volume size: "));
    }

    #[test]
    fn test_parse_max_entries() {
        assert_eq!(parse_max_entries(None).unwrap(), 0);
        assert_eq!(parse_max_entries(Some("")).unwrap(), 0);
        assert_eq!(parse_max_entries(Some("5")).unwrap(), 5);
        assert_eq!(parse_max_entries(Some("-7")).unwrap(), 7);
        assert_eq!(parse_max_entries(Some("99999999999")).unwrap(), i32::MAX);

        let err = parse_max_entries(Some("lots")).unwrap_err();
        assert!(err.message.starts_with("invalid maxentries: "));
    }
}
