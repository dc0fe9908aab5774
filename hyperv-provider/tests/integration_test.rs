//! Integration tests for hyperv-provider
//!
//! These tests drive the REST router in-process against a scripted shell,
//! so no PowerShell or Hyper-V host is needed. They cover routing, argument
//! parsing, authentication and the mapping of backend errors onto HTTP.

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use hyperv_api::API_KEY_HEADER;
use hyperv_api::models::{GetVolumeResponse, ListVolumesResponse};
use hyperv_provider::powershell::ShellOutput;
use hyperv_provider::powershell::testing::ScriptedShell;
use hyperv_provider::{Runner, VolumeService, server};

const KEY: &str = "s3cret-key";
const STORE: &str = "C:\\pv";
const ID: &str = "53b8f8d8-38b2-4479-8ca5-842c2cd44861";
const NODE: &str = "f37e8c32-8063-4027-974f-43b258c5f9e2";

async fn app(shell: &ScriptedShell) -> Router {
    let service = VolumeService::open(Runner::new(shell.clone()), STORE)
        .await
        .unwrap();
    server::router(Arc::new(service), KEY)
}

async fn call(app: Router, method: Method, uri: &str, key: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(key) = key {
        builder = builder.header(API_KEY_HEADER, key);
    }
    let response = app.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn disk(name: &str, id: &str, size: i64) -> serde_json::Value {
    serde_json::json!({
        "Path": format!("{STORE}\\{name};{id}.vhdx"),
        "Name": name,
        "Size": size,
        "DiskIdentifier": id,
    })
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_missing_api_key_is_forbidden() {
    let shell = ScriptedShell::new();
    let (status, body) = call(app(&shell).await, Method::GET, "/capacity", None).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], 7);
    assert_eq!(body["message"], "Invalid API key");
    assert!(shell.commands().is_empty());
}

#[tokio::test]
async fn test_wrong_api_key_is_forbidden() {
    let shell = ScriptedShell::new();
    let (status, _) = call(app(&shell).await, Method::GET, "/volumes", Some("nope")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_api_key_comparison_ignores_case() {
    let shell = ScriptedShell::new();
    shell.expect("Get-PVCapacity", ShellOutput::ok(r#"{"FreeSpaceBytes":100}"#));
    let (status, body) = call(
        app(&shell).await,
        Method::GET,
        "/capacity",
        Some(&KEY.to_uppercase()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["AvailableCapacity"], 100);
}

#[tokio::test]
async fn test_healthz_needs_no_key() {
    let shell = ScriptedShell::new();
    shell.expect("$PSVersionTable", ShellOutput::ok("7"));
    let (status, body) = call(app(&shell).await, Method::GET, "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_unhealthy_backend_is_500() {
    let shell = ScriptedShell::new();
    shell.expect("$PSVersionTable", ShellOutput::failed("pwsh crashed"));
    let (status, body) = call(app(&shell).await, Method::GET, "/healthz", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "Hyper-V backend unhealthy");
}

// ============================================================================
// Create / Get / Delete
// ============================================================================

#[tokio::test]
async fn test_create_volume_returns_201() {
    let shell = ScriptedShell::new();
    shell
        .expect("Get-PVDisk", ShellOutput::ok(""))
        .expect("New-PVDisk", ShellOutput::ok(disk("pvc-1", ID, 5242880).to_string()));

    let (status, body) = call(
        app(&shell).await,
        Method::POST,
        "/volume/pvc-1?size=5242880",
        Some(KEY),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    let vol: GetVolumeResponse = serde_json::from_value(body).unwrap();
    assert_eq!(vol.id, ID);
    assert_eq!(vol.size, 5242880);
    assert_eq!(vol.name, "pvc-1");
}

#[tokio::test]
async fn test_create_volume_argument_errors() {
    let shell = ScriptedShell::new();
    let router = app(&shell).await;

    let (status, body) = call(router.clone(), Method::POST, "/volume/pvc-1", Some(KEY)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "missing volume size");
    assert_eq!(body["code"], 3);

    let (status, body) = call(router.clone(), Method::POST, "/volume/pvc-1?size=big", Some(KEY)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().starts_with("invalid volume size: "));

    let (status, body) = call(router, Method::POST, "/volume/pvc-1?size=-5", Some(KEY)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "volume size cannot be negative");

    assert!(shell.commands().is_empty());
}

#[tokio::test]
async fn test_create_volume_size_conflict_is_409() {
    let shell = ScriptedShell::new();
    shell.expect("Get-PVDisk", ShellOutput::ok(disk("pvc-1", ID, 1024).to_string()));

    let (status, body) = call(
        app(&shell).await,
        Method::POST,
        "/volume/pvc-1?size=2048",
        Some(KEY),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], 6);
    assert_eq!(body["message"], "invalid option requested size: 2048");
}

#[tokio::test]
async fn test_get_missing_volume_is_404() {
    let shell = ScriptedShell::new();
    shell
        .expect("Get-PVDisk", ShellOutput::ok(""))
        .expect("Get-PVDisk", ShellOutput::failed("NOT_FOUND: no such disk"));

    let (status, body) = call(
        app(&shell).await,
        Method::GET,
        &format!("/volume/{ID}"),
        Some(KEY),
    )
    .await;
    // Only the by-name fallback failure is reported.
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 5);
    assert_eq!(shell.remaining(), 0);
}

#[tokio::test]
async fn test_delete_volume_is_idempotent() {
    let shell = ScriptedShell::new();
    shell
        .expect("Remove-PVDisk", ShellOutput::ok(""))
        .expect("Remove-PVDisk", ShellOutput::failed("NOT_FOUND: already gone"));
    let router = app(&shell).await;

    for _ in 0..2 {
        let (status, body) = call(router.clone(), Method::DELETE, &format!("/volume/{ID}"), Some(KEY)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_null());
    }
}

// ============================================================================
// Expand / List / Capacity
// ============================================================================

#[tokio::test]
async fn test_expand_volume() {
    let shell = ScriptedShell::new();
    shell
        .expect("Get-PVDisk", ShellOutput::ok(disk("pvc-1", ID, 1024).to_string()))
        .expect("Resize-PVDisk", ShellOutput::ok(disk("pvc-1", ID, 8192).to_string()));

    let (status, body) = call(
        app(&shell).await,
        Method::PUT,
        &format!("/volume/{ID}/size/8192"),
        Some(KEY),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["CapacityBytes"], 8192);
    assert_eq!(body["NodeExpansionRequired"], true);
    assert!(shell.commands()[1].ends_with("-Size 8192"));
}

#[tokio::test]
async fn test_list_volumes_pages_are_disjoint() {
    let ids: Vec<String> = (0..10)
        .map(|i| format!("53b8f8d8-38b2-4479-8ca5-842c2cd448{:02}", i))
        .collect();
    let page = |range: std::ops::Range<usize>, token: Option<&str>| {
        let vhds: Vec<_> = ids[range]
            .iter()
            .enumerate()
            .map(|(i, id)| disk(&format!("vol-{i}"), id, 1024))
            .collect();
        let mut json = serde_json::json!({ "VHDs": vhds });
        if let Some(token) = token {
            json["NextToken"] = token.into();
        }
        ShellOutput::ok(json.to_string())
    };

    let shell = ScriptedShell::new();
    shell
        .expect("Get-PVDisks", page(0..5, Some("5")))
        .expect("Get-PVDisks", page(5..10, None));
    let router = app(&shell).await;

    let (status, first) = call(router.clone(), Method::GET, "/volumes?maxentries=5", Some(KEY)).await;
    assert_eq!(status, StatusCode::OK);
    let first: ListVolumesResponse = serde_json::from_value(first).unwrap();
    let token = first.next_token.clone().unwrap();

    let (_, second) = call(
        router,
        Method::GET,
        &format!("/volumes?maxentries=5&nexttoken={token}"),
        Some(KEY),
    )
    .await;
    let second: ListVolumesResponse = serde_json::from_value(second).unwrap();
    assert!(second.next_token.is_none());

    let mut all: Vec<String> = first
        .volumes
        .iter()
        .chain(second.volumes.iter())
        .map(|v| v.disk_identifier.clone())
        .collect();
    assert_eq!(first.volumes.len(), 5);
    assert_eq!(second.volumes.len(), 5);
    all.sort();
    all.dedup();
    assert_eq!(all.len(), 10);

    let commands = shell.commands();
    assert!(commands[0].contains("-MaxEntries 5 -NextToken ''"));
    assert!(commands[1].contains("-NextToken '5'"));
}

#[tokio::test]
async fn test_list_volumes_rejects_bad_maxentries() {
    let shell = ScriptedShell::new();
    let (status, body) = call(app(&shell).await, Method::GET, "/volumes?maxentries=x", Some(KEY)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().starts_with("invalid maxentries: "));
}

#[tokio::test]
async fn test_list_volumes_rejects_non_numeric_token() {
    let shell = ScriptedShell::new();
    let router = app(&shell).await;
    let before = shell.commands().len();

    let (status, body) = call(
        router,
        Method::GET,
        "/volumes?maxentries=5&nexttoken=%24(Remove-Item%20C%3A%5Cpv)",
        Some(KEY),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "invalid next token: $(Remove-Item C:\\pv)");
    assert_eq!(shell.commands().len(), before);
}

// ============================================================================
// Attachments and VMs
// ============================================================================

#[tokio::test]
async fn test_publish_accepts_put_and_post() {
    let shell = ScriptedShell::new();
    shell
        .expect("Get-PVDisk", ShellOutput::ok(disk("pvc-1", ID, 1024).to_string()))
        .expect("Get-PVDisk", ShellOutput::ok(disk("pvc-1", ID, 1024).to_string()))
        .expect("Mount-PVDisk", ShellOutput::ok("{}"));
    let mut attached = disk("pvc-1", ID, 1024);
    attached["Host"] = NODE.into();
    shell.expect("Get-PVDisk", ShellOutput::ok(attached.to_string()));
    let router = app(&shell).await;

    let uri = format!("/attachment/{NODE}/volume/{ID}");
    let (status, _) = call(router.clone(), Method::PUT, &uri, Some(KEY)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(router, Method::POST, &uri, Some(KEY)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(shell.remaining(), 0);
}

#[tokio::test]
async fn test_publish_to_second_node_is_412() {
    let shell = ScriptedShell::new();
    let mut attached = disk("pvc-1", ID, 1024);
    attached["Host"] = "0d0f7d5a-1111-4c2e-9a55-0123456789ab".into();
    shell.expect("Get-PVDisk", ShellOutput::ok(attached.to_string()));

    let (status, body) = call(
        app(&shell).await,
        Method::PUT,
        &format!("/attachment/{NODE}/volume/{ID}"),
        Some(KEY),
    )
    .await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(body["code"], 9);
}

#[tokio::test]
async fn test_unpublish_detaches() {
    let shell = ScriptedShell::new();
    let mut attached = disk("pvc-1", ID, 1024);
    attached["Host"] = NODE.into();
    shell
        .expect("Get-PVDisk", ShellOutput::ok(attached.to_string()))
        .expect("Get-PVDisk", ShellOutput::ok(attached.to_string()))
        .expect("Dismount-PVDisk", ShellOutput::ok(""));

    let (status, _) = call(
        app(&shell).await,
        Method::DELETE,
        &format!("/attachment/{NODE}/volume/{ID}"),
        Some(KEY),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(shell.remaining(), 0);
}

#[tokio::test]
async fn test_vms_list_and_lookup() {
    let listing = serde_json::json!({
        "VMs": [
            {"Name": "node-1", "Id": NODE, "Path": "C:\\vms", "Generation": 2},
        ]
    })
    .to_string();
    let shell = ScriptedShell::new();
    shell
        .expect("Get-PVVirtualMachines", ShellOutput::ok(listing.clone()))
        .expect("Get-PVVirtualMachines", ShellOutput::ok(listing.clone()))
        .expect("Get-PVVirtualMachines", ShellOutput::ok(listing));
    let router = app(&shell).await;

    let (status, body) = call(router.clone(), Method::GET, "/vms", Some(KEY)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["VMs"][0]["Name"], "node-1");

    let (status, body) = call(
        router.clone(),
        Method::GET,
        &format!("/vms?id={}", NODE.to_uppercase()),
        Some(KEY),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Generation"], 2);

    let (status, body) = call(router, Method::GET, "/vms?id=missing", Some(KEY)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "VM missing not found");
}

// ============================================================================
// Serving
// ============================================================================

#[tokio::test]
async fn test_serve_stops_on_shutdown() {
    let shell = ScriptedShell::new();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let result = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        server::serve(listener, app(&shell).await, async {}),
    )
    .await
    .expect("serve did not stop");
    assert!(result.is_ok());
}
