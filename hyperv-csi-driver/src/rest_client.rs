//! REST client for the Hyper-V provider
//!
//! Wraps the provider's HTTP surface behind the [`HyperVApi`] trait so the
//! CSI services can be exercised against an in-memory fake. Every call takes
//! an optional deadline: `None` applies [`DEFAULT_TIMEOUT`], while a deadline
//! propagated from the inbound gRPC request is used unchanged.

use std::time::Duration;

use hyperv_api::models::{
    ExpandVolumeResponse, GetCapacityResponse, GetVmResponse, GetVolumeResponse,
    HealthyResponse, ListVmResponse, ListVolumesResponse,
};
use hyperv_api::{API_KEY_HEADER, ApiError};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tonic::metadata::MetadataMap;
use tonic::{Code, Status};
use tracing::debug;

/// Applied when the caller supplies no deadline of its own.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const REDACTED: &str = "{REDACTED}";

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("argument value cannot be negative")]
    NegativeValue,

    #[error("cannot parse base URL {url:?}: {reason}")]
    Url { url: String, reason: String },

    #[error("invalid path segment {0:?}")]
    PathSegment(String),

    #[error("{operation}: error making request: {source}")]
    Request {
        operation: String,
        #[source]
        source: reqwest::Error,
    },

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("{operation}: error unmarshaling error response: {source}")]
    UnparsableErrorBody {
        operation: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{operation}: error unmarshaling response data: {source}")]
    Decode {
        operation: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{operation}: deadline exceeded")]
    Timeout { operation: String },
}

impl ClientError {
    /// gRPC code this error is reported to the CSI caller with.
    pub fn code(&self) -> Code {
        match self {
            ClientError::Api(e) => e.code,
            ClientError::Timeout { .. } => Code::DeadlineExceeded,
            ClientError::Request { .. } => Code::Unavailable,
            ClientError::PathSegment(_) => Code::InvalidArgument,
            _ => Code::Internal,
        }
    }

    /// The provider's error, when the call reached it.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            ClientError::Api(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ClientError> for Status {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Api(e) => e.into(),
            other => Status::new(other.code(), other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Operations the CSI services need from the provider.
#[tonic::async_trait]
pub trait HyperVApi: Send + Sync + 'static {
    async fn create_volume(
        &self,
        name: &str,
        size: i64,
        deadline: Option<Duration>,
    ) -> Result<GetVolumeResponse>;

    async fn delete_volume(&self, volume_id: &str, deadline: Option<Duration>) -> Result<()>;

    async fn get_volume(
        &self,
        volume_id: &str,
        deadline: Option<Duration>,
    ) -> Result<GetVolumeResponse>;

    async fn list_volumes(
        &self,
        max_entries: i32,
        next_token: &str,
        deadline: Option<Duration>,
    ) -> Result<ListVolumesResponse>;

    async fn get_capacity(&self, deadline: Option<Duration>) -> Result<GetCapacityResponse>;

    async fn publish_volume(
        &self,
        volume_id: &str,
        node_id: &str,
        deadline: Option<Duration>,
    ) -> Result<()>;

    async fn unpublish_volume(
        &self,
        volume_id: &str,
        node_id: &str,
        deadline: Option<Duration>,
    ) -> Result<()>;

    async fn expand_volume(
        &self,
        volume_id: &str,
        size: i64,
        deadline: Option<Duration>,
    ) -> Result<ExpandVolumeResponse>;

    async fn list_vms(&self, deadline: Option<Duration>) -> Result<ListVmResponse>;

    async fn get_vm(&self, node_id: &str, deadline: Option<Duration>) -> Result<GetVmResponse>;

    async fn health_check(&self, deadline: Option<Duration>) -> Result<HealthyResponse>;
}

/// [`HyperVApi`] over HTTP.
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base: Url,
    api_key: String,
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("base", &self.base.as_str())
            .field("api_key", &redact(&self.api_key))
            .finish()
    }
}

impl RestClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        Self::with_client(reqwest::Client::new(), base_url, api_key)
    }

    pub fn with_client(http: reqwest::Client, base_url: &str, api_key: &str) -> Result<Self> {
        let base = Url::parse(base_url).map_err(|e| ClientError::Url {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            http,
            base,
            api_key: api_key.to_string(),
        })
    }

    /// Resource URL below the base. Each segment is percent-encoded, so an
    /// id can never reach another route.
    fn target(&self, segments: &[&str]) -> Result<Url> {
        if let Some(bad) = segments
            .iter()
            .find(|s| s.is_empty() || **s == "." || **s == "..")
        {
            return Err(ClientError::PathSegment(bad.to_string()));
        }

        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::Url {
                url: self.base.to_string(),
                reason: "URL cannot be a base".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Issue one request and decode the response. An empty success body
    /// decodes to `T::default()`.
    async fn call<T>(
        &self,
        operation: &str,
        method: Method,
        url: Url,
        deadline: Option<Duration>,
    ) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        debug!(
            curl = %format!(
                "curl -X {} -H '{}: {}' {}",
                method,
                API_KEY_HEADER,
                redact(&self.api_key),
                url
            ),
            operation = %operation,
            "Sending request"
        );

        let response = self
            .http
            .request(method, url)
            .header(API_KEY_HEADER, &self.api_key)
            .timeout(deadline.unwrap_or(DEFAULT_TIMEOUT))
            .send()
            .await
            .map_err(|e| request_error(operation, e))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| request_error(operation, e))?;

        if status.as_u16() >= 400 {
            let err: ApiError = serde_json::from_slice(&body).map_err(|source| {
                ClientError::UnparsableErrorBody {
                    operation: operation.to_string(),
                    source,
                }
            })?;
            return Err(ClientError::Api(err));
        }

        if body.is_empty() {
            return Ok(T::default());
        }

        serde_json::from_slice(&body).map_err(|source| ClientError::Decode {
            operation: operation.to_string(),
            source,
        })
    }
}

fn request_error(operation: &str, source: reqwest::Error) -> ClientError {
    if source.is_timeout() {
        ClientError::Timeout {
            operation: operation.to_string(),
        }
    } else {
        ClientError::Request {
            operation: operation.to_string(),
            source,
        }
    }
}

#[tonic::async_trait]
impl HyperVApi for RestClient {
    async fn create_volume(
        &self,
        name: &str,
        size: i64,
        deadline: Option<Duration>,
    ) -> Result<GetVolumeResponse> {
        if size < 0 {
            return Err(ClientError::NegativeValue);
        }
        let mut url = self.target(&["volume", name])?;
        url.query_pairs_mut().append_pair("size", &size.to_string());
        self.call("create volume", Method::POST, url, deadline).await
    }

    async fn delete_volume(&self, volume_id: &str, deadline: Option<Duration>) -> Result<()> {
        let url = self.target(&["volume", volume_id])?;
        self.call("delete volume", Method::DELETE, url, deadline).await
    }

    async fn get_volume(
        &self,
        volume_id: &str,
        deadline: Option<Duration>,
    ) -> Result<GetVolumeResponse> {
        let url = self.target(&["volume", volume_id])?;
        self.call("get volume", Method::GET, url, deadline).await
    }

    async fn list_volumes(
        &self,
        max_entries: i32,
        next_token: &str,
        deadline: Option<Duration>,
    ) -> Result<ListVolumesResponse> {
        if max_entries < 0 {
            return Err(ClientError::NegativeValue);
        }
        let mut url = self.target(&["volumes"])?;
        url.query_pairs_mut()
            .append_pair("maxentries", &max_entries.to_string())
            .append_pair("nexttoken", next_token);
        self.call("list volumes", Method::GET, url, deadline).await
    }

    async fn get_capacity(&self, deadline: Option<Duration>) -> Result<GetCapacityResponse> {
        let url = self.target(&["capacity"])?;
        self.call("get capacity", Method::GET, url, deadline).await
    }

    async fn publish_volume(
        &self,
        volume_id: &str,
        node_id: &str,
        deadline: Option<Duration>,
    ) -> Result<()> {
        let url = self.target(&["attachment", node_id, "volume", volume_id])?;
        self.call("publish volume", Method::PUT, url, deadline).await
    }

    async fn unpublish_volume(
        &self,
        volume_id: &str,
        node_id: &str,
        deadline: Option<Duration>,
    ) -> Result<()> {
        let url = self.target(&["attachment", node_id, "volume", volume_id])?;
        self.call("unpublish volume", Method::DELETE, url, deadline)
            .await
    }

    async fn expand_volume(
        &self,
        volume_id: &str,
        size: i64,
        deadline: Option<Duration>,
    ) -> Result<ExpandVolumeResponse> {
        if size < 0 {
            return Err(ClientError::NegativeValue);
        }
        let url = self.target(&["volume", volume_id, "size", size.to_string().as_str()])?;
        self.call("expand volume", Method::PUT, url, deadline).await
    }

    async fn list_vms(&self, deadline: Option<Duration>) -> Result<ListVmResponse> {
        let url = self.target(&["vms"])?;
        self.call("list vms", Method::GET, url, deadline).await
    }

    async fn get_vm(&self, node_id: &str, deadline: Option<Duration>) -> Result<GetVmResponse> {
        let mut url = self.target(&["vms"])?;
        url.query_pairs_mut().append_pair("id", node_id);
        self.call("get vm", Method::GET, url, deadline).await
    }

    async fn health_check(&self, deadline: Option<Duration>) -> Result<HealthyResponse> {
        let url = self.target(&["healthz"])?;
        self.call("health check", Method::GET, url, deadline).await
    }
}

/// Mask the middle of a secret for logging.
pub fn redact(secret: &str) -> String {
    const MIN_LEN: usize = 6;
    const MAX_LEN: usize = 60;

    if secret.is_empty() {
        return String::new();
    }

    if uuid::Uuid::parse_str(secret).is_ok() && secret.len() >= 23 {
        return format!("{}{}{}", &secret[..9], REDACTED, &secret[23..]);
    }

    let chars: Vec<char> = secret.chars().collect();
    let len = chars.len();

    if len < MIN_LEN {
        return REDACTED.to_string();
    }

    let keep = |range: &[char]| range.iter().collect::<String>();
    if len > MAX_LEN {
        return format!("{}{}{}", keep(&chars[..20]), REDACTED, keep(&chars[len - 20..]));
    }

    let third = len / 3;
    format!(
        "{}{}{}",
        keep(&chars[..third]),
        REDACTED,
        keep(&chars[third * 2..])
    )
}

/// The deadline carried by an inbound gRPC request's `grpc-timeout` header.
pub fn request_deadline(metadata: &MetadataMap) -> Option<Duration> {
    let raw = metadata.get("grpc-timeout")?.to_str().ok()?;
    if raw.len() < 2 {
        return None;
    }
    let (value, unit) = raw.split_at(raw.len() - 1);
    let value: u64 = value.parse().ok()?;

    match unit {
        "H" => Some(Duration::from_secs(value.saturating_mul(3600))),
        "M" => Some(Duration::from_secs(value.saturating_mul(60))),
        "S" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_millis(value)),
        "u" => Some(Duration::from_micros(value)),
        "n" => Some(Duration::from_nanos(value)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact() {
        assert_eq!(redact(""), "");
        assert_eq!(redact("abc"), "{REDACTED}");
        assert_eq!(redact("abcdefghi"), "abc{REDACTED}ghi");
        assert_eq!(
            redact("53b8f8d8-38b2-4479-8ca5-842c2cd44861"),
            "53b8f8d8-{REDACTED}-842c2cd44861"
        );

        let long = "x".repeat(30) + &"y".repeat(40);
        assert_eq!(
            redact(&long),
            format!("{}{{REDACTED}}{}", "x".repeat(20), "y".repeat(20))
        );
    }

    #[test]
    fn test_redact_is_character_based() {
        assert_eq!(redact("ééééééééé"), "ééé{REDACTED}ééé");
    }

    #[test]
    fn test_request_deadline() {
        let mut metadata = MetadataMap::new();
        assert_eq!(request_deadline(&metadata), None);

        metadata.insert("grpc-timeout", "1500m".parse().unwrap());
        assert_eq!(request_deadline(&metadata), Some(Duration::from_millis(1500)));

        metadata.insert("grpc-timeout", "2S".parse().unwrap());
        assert_eq!(request_deadline(&metadata), Some(Duration::from_secs(2)));

        metadata.insert("grpc-timeout", "1H".parse().unwrap());
        assert_eq!(request_deadline(&metadata), Some(Duration::from_secs(3600)));

        metadata.insert("grpc-timeout", "bogus".parse().unwrap());
        assert_eq!(request_deadline(&metadata), None);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ClientError::NegativeValue.code(), Code::Internal);
        assert_eq!(
            ClientError::Timeout {
                operation: "get volume".into()
            }
            .code(),
            Code::DeadlineExceeded
        );

        let status: Status = ClientError::Api(ApiError::not_found("disk x not found")).into();
        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(status.message(), "disk x not found");
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            RestClient::new("not a url", "key"),
            Err(ClientError::Url { .. })
        ));
    }

    #[test]
    fn test_ids_are_encoded_as_single_segments() {
        let client = RestClient::new("http://localhost:8080", "key").unwrap();
        let url = client.target(&["volume", "../capacity"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/volume/..%2Fcapacity");

        let url = client.target(&["volume", "a?b#c"]).unwrap();
        assert_eq!(url.path(), "/volume/a%3Fb%23c");
        assert_eq!(url.query(), None);

        let url = client
            .target(&["attachment", "node-1", "volume", "vol-1"])
            .unwrap();
        assert_eq!(url.path(), "/attachment/node-1/volume/vol-1");

        for bad in ["", ".", ".."] {
            let err = client.target(&["volume", bad]).unwrap_err();
            assert!(matches!(err, ClientError::PathSegment(_)));
            assert_eq!(err.code(), Code::InvalidArgument);
        }
    }

    #[test]
    fn test_base_path_is_kept() {
        for base in ["http://localhost:8080/api", "http://localhost:8080/api/"] {
            let client = RestClient::new(base, "key").unwrap();
            let url = client.target(&["volumes"]).unwrap();
            assert_eq!(url.path(), "/api/volumes");
        }
    }

    #[test]
    fn test_debug_redacts_key() {
        let client = RestClient::new("http://localhost:8080", "super-secret-key").unwrap();
        let debug = format!("{:?}", client);
        assert!(!debug.contains("super-secret-key"));
    }
}
