//! HTTP client for the service's CLI API.
//!
//! All paths are relative to `<endpoint>/api/cli/`. Requests carry the API key
//! as a bearer token. Connect errors, timeouts and 5xx responses are retried
//! with linear back-off; authentication and other 4xx failures surface at once.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ApiSettings;
use crate::locator::Locator;
use crate::models::BuildStatus;

pub mod types;

pub use types::{Issue, SourceUnit, UploadOptions};
use types::{BuildResponse, IssuesResponse, Organization, UploadResponse};

const API_ROOT: &str = "api/cli/";
const USER_AGENT: &str = concat!("graphcheckr/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid request path `{path}`: {reason}")]
    InvalidUrl { path: String, reason: String },
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} rejected the API key (HTTP {status})")]
    Unauthorized { url: String, status: u16 },
    #[error("{url} returned HTTP {status}: {body}")]
    Status { url: String, status: u16, body: String },
    #[error("could not decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("upload was rejected: {0}")]
    Rejected(String),
}

impl ApiError {
    /// Worth another attempt: the request may succeed unchanged.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Transport { source, .. } => source.is_connect() || source.is_timeout(),
            ApiError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// The calls the verification state machine needs from the service.
#[async_trait]
pub trait VerificationApi: Send + Sync {
    /// Organization the API key belongs to.
    async fn organization(&self) -> Result<u64, ApiError>;

    async fn latest_build(&self, locator: &Locator) -> Result<BuildStatus, ApiError>;

    async fn issues(&self, locator: &Locator) -> Result<Vec<Issue>, ApiError>;

    /// Upload analyzed modules; returns the locator the service assigned.
    async fn upload(
        &self,
        locator: &Locator,
        options: &UploadOptions,
        units: &[SourceUnit],
    ) -> Result<String, ApiError>;
}

/// How often and how patiently transient failures are retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Attempt `n` waits `n * backoff` before retrying.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

pub struct ApiClient {
    http: Client,
    root: Url,
    api_key: String,
    retry: RetryPolicy,
}

impl ApiClient {
    pub fn new(settings: &ApiSettings) -> Result<Self, ApiError> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| ApiError::Transport {
                url: settings.endpoint.to_string(),
                source,
            })?;
        Self::with_client(http, settings, RetryPolicy::default())
    }

    pub fn with_client(http: Client, settings: &ApiSettings, retry: RetryPolicy) -> Result<Self, ApiError> {
        let root = settings.endpoint.join(API_ROOT).map_err(|e| ApiError::InvalidUrl {
            path: API_ROOT.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            http,
            root,
            api_key: settings.api_key.clone(),
            retry,
        })
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.root.join(path).map_err(|e| ApiError::InvalidUrl {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Send the request built by `build`, retrying transient failures.
    async fn send(&self, url: &Url, build: impl Fn() -> RequestBuilder) -> Result<Response, ApiError> {
        let mut attempt = 1;
        loop {
            debug!(url = %url, attempt, "sending request");
            let result = match build().bearer_auth(&self.api_key).send().await {
                Ok(response) => check_status(url, response).await,
                Err(source) => Err(ApiError::Transport {
                    url: url.to_string(),
                    source,
                }),
            };
            match result {
                Err(e) if e.is_transient() && attempt < self.retry.attempts => {
                    warn!(url = %url, attempt, error = %e, "request failed; retrying");
                    tokio::time::sleep(self.retry.backoff * attempt).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.url(path)?;
        let response = self.send(&url, || self.http.get(url.clone())).await?;
        decode(&url, response).await
    }
}

async fn check_status(url: &Url, response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return Err(ApiError::Unauthorized {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        url: url.to_string(),
        status: status.as_u16(),
        body: body.trim().to_string(),
    })
}

async fn decode<T: DeserializeOwned>(url: &Url, response: Response) -> Result<T, ApiError> {
    response.json().await.map_err(|source| ApiError::Decode {
        url: url.to_string(),
        source,
    })
}

fn build_path(locator: &Locator, endpoint: &str) -> String {
    format!("builds/{locator}/{endpoint}")
}

#[async_trait]
impl VerificationApi for ApiClient {
    async fn organization(&self) -> Result<u64, ApiError> {
        let org: Organization = self.get_json("organization").await?;
        Ok(org.organization_id)
    }

    async fn latest_build(&self, locator: &Locator) -> Result<BuildStatus, ApiError> {
        let build: BuildResponse = self.get_json(&build_path(locator, "latest_build")).await?;
        let status = build.task.map(|t| t.status).unwrap_or_default();
        Ok(BuildStatus::from_task_status(&status))
    }

    async fn issues(&self, locator: &Locator) -> Result<Vec<Issue>, ApiError> {
        let issues: IssuesResponse = self.get_json(&build_path(locator, "issues")).await?;
        Ok(issues.issues)
    }

    async fn upload(
        &self,
        locator: &Locator,
        options: &UploadOptions,
        units: &[SourceUnit],
    ) -> Result<String, ApiError> {
        let mut url = self.url("builds/custom")?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("locator", &locator.to_string())
                .append_pair("v", env!("CARGO_PKG_VERSION"));
            if let Some(title) = &options.title {
                query.append_pair("title", title);
            }
            if let Some(branch) = &options.branch {
                query.append_pair("branch", branch);
            }
        }

        let response = self.send(&url, || self.http.post(url.clone()).json(units)).await?;
        let uploaded: UploadResponse = decode(&url, response).await?;
        if let Some(error) = uploaded.error.filter(|e| !e.is_empty()) {
            return Err(ApiError::Rejected(error));
        }
        uploaded
            .locator
            .ok_or_else(|| ApiError::Rejected("response did not include a locator".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::Fetcher;
    use axum::extract::State;
    use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
    use axum::http::{HeaderMap, Method, StatusCode, Uri};
    use axum::response::IntoResponse;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    type Routes = Arc<dyn Fn(&str, &str) -> (u16, String) + Send + Sync>;

    #[derive(Clone)]
    struct StubState {
        routes: Routes,
        requests: Arc<Mutex<Vec<String>>>,
    }

    /// A local stand-in for the service. Records `METHOD target` for every request.
    struct TestServer {
        endpoint: Url,
        requests: Arc<Mutex<Vec<String>>>,
    }

    impl TestServer {
        async fn start(routes: impl Fn(&str, &str) -> (u16, String) + Send + Sync + 'static) -> Self {
            let requests = Arc::new(Mutex::new(Vec::new()));
            let state = StubState {
                routes: Arc::new(routes),
                requests: requests.clone(),
            };
            let app = Router::new().fallback(respond).with_state(state);

            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let endpoint = Url::parse(&format!("http://{}/", listener.local_addr().unwrap())).unwrap();
            tokio::spawn(async move { axum::serve(listener, app).await });
            Self { endpoint, requests }
        }

        fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }

        fn client(&self) -> ApiClient {
            let settings = ApiSettings {
                endpoint: self.endpoint.clone(),
                api_key: "test-key".to_string(),
            };
            let http = Client::builder().no_proxy().build().unwrap();
            let retry = RetryPolicy {
                attempts: 3,
                backoff: Duration::from_millis(10),
            };
            ApiClient::with_client(http, &settings, retry).unwrap()
        }
    }

    /// Answers every path from the test's routes, or 401 without the right bearer token.
    async fn respond(State(stub): State<StubState>, method: Method, uri: Uri, headers: HeaderMap) -> impl IntoResponse {
        let target = uri.path_and_query().map_or(uri.path(), |pq| pq.as_str());
        stub.requests.lock().unwrap().push(format!("{method} {target}"));

        let authorized = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) == Some("Bearer test-key");
        let (status, body) = if authorized {
            (stub.routes)(method.as_str(), uri.path())
        } else {
            (401, r#"{"error":"unauthorized"}"#.to_string())
        };
        (
            StatusCode::from_u16(status).unwrap(),
            [(CONTENT_TYPE, "application/json")],
            body,
        )
    }

    fn custom_locator() -> Locator {
        Locator::new(Fetcher::Custom, Some(3), "testRun", "1000").unwrap()
    }

    #[tokio::test]
    async fn test_latest_build_path_and_status() {
        let server = TestServer::start(|_, path| match path {
            "/api/cli/builds/custom+3%2FtestRun$1000/latest_build" => {
                (200, r#"{"ID":7,"Task":{"Status":"SUCCEEDED"}}"#.to_string())
            }
            _ => (404, "{}".to_string()),
        })
        .await;

        let status = server.client().latest_build(&custom_locator()).await.unwrap();
        assert_eq!(status, BuildStatus::Succeeded);
        assert_eq!(
            server.requests(),
            vec!["GET /api/cli/builds/custom+3%2FtestRun$1000/latest_build".to_string()]
        );
    }

    #[tokio::test]
    async fn test_endpoint_with_path_prefix() {
        let server = TestServer::start(|_, path| match path {
            "/onprem/api/cli/organization" => (200, r#"{"organizationId": 12}"#.to_string()),
            _ => (404, "{}".to_string()),
        })
        .await;
        let settings = ApiSettings {
            endpoint: server.endpoint.join("onprem/").unwrap(),
            api_key: "test-key".to_string(),
        };
        let http = Client::builder().no_proxy().build().unwrap();
        let client = ApiClient::with_client(http, &settings, RetryPolicy::default()).unwrap();

        assert_eq!(client.organization().await.unwrap(), 12);
    }

    #[tokio::test]
    async fn test_issues() {
        let server = TestServer::start(|_, _| {
            (
                200,
                r#"{"count":1,"issues":[{"id":9,"type":"policy_flag","revisionId":"npm+left-pad$1.3.0","resolved":false}]}"#
                    .to_string(),
            )
        })
        .await;

        let issues = server.client().issues(&custom_locator()).await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, "policy_flag");
        assert!(issues[0].is_blocking());
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let server = TestServer::start(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                (503, r#"{"error":"busy"}"#.to_string())
            } else {
                (200, r#"{"task":{"status":"RUNNING"}}"#.to_string())
            }
        })
        .await;

        let status = server.client().latest_build(&custom_locator()).await.unwrap();
        assert_eq!(status, BuildStatus::Running);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let server = TestServer::start(|_, _| (500, "oops".to_string())).await;

        let err = server.client().latest_build(&custom_locator()).await.unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 500, ref body, .. } if body == "oops"));
        assert_eq!(server.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = TestServer::start(|_, _| (404, r#"{"error":"no such build"}"#.to_string())).await;

        let err = server.client().latest_build(&custom_locator()).await.unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 404, .. }));
        assert_eq!(server.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_key() {
        let server = TestServer::start(|_, _| (200, "{}".to_string())).await;
        let settings = ApiSettings {
            endpoint: server.endpoint.clone(),
            api_key: "wrong".to_string(),
        };
        let http = Client::builder().no_proxy().build().unwrap();
        let client = ApiClient::with_client(http, &settings, RetryPolicy::default()).unwrap();

        let err = client.organization().await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized { status: 401, .. }));
        assert_eq!(server.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_upload() {
        let server = TestServer::start(|method, path| match (method, path) {
            ("POST", "/api/cli/builds/custom") => {
                (200, r#"{"locator":"custom+3/testRun$1000"}"#.to_string())
            }
            _ => (404, "{}".to_string()),
        })
        .await;
        let options = UploadOptions {
            title: Some("Test Run".to_string()),
            branch: Some("main".to_string()),
        };

        let assigned = server
            .client()
            .upload(&custom_locator(), &options, &[])
            .await
            .unwrap();
        assert_eq!(assigned, "custom+3/testRun$1000");

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].starts_with("POST /api/cli/builds/custom?locator=custom%2B3%252FtestRun%241000&v="));
        assert!(requests[0].ends_with("&title=Test+Run&branch=main"));
    }

    #[tokio::test]
    async fn test_upload_error_field() {
        let server = TestServer::start(|_, _| (200, r#"{"error":"quota exceeded"}"#.to_string())).await;

        let err = server
            .client()
            .upload(&custom_locator(), &UploadOptions::default(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Rejected(msg) if msg == "quota exceeded"));
    }
}
