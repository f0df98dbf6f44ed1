//! src/services/cold_storage.rs
//!
//! ColdStorageClient — everything that talks to the external resumable-upload
//! API lives here, so the rest of the service depends only on a narrow
//! init → put(range) → verify contract.
//!
//! Remote protocol:
//! - `POST {base}/upload/files?uploadType=resumable` with JSON file metadata
//!   returns a time-limited upload URL in the `Location` header.
//! - `PUT {upload_url}` with a `Content-Range: bytes {start}-{end}/{total}`
//!   header transfers one slice; 308 means "resume incomplete" (the `Range`
//!   response header carries the server-confirmed bytes), 200/201 means the
//!   transfer is complete and the body carries the file id.
//! - `GET {base}/files?parent=...` lists a destination folder, used for the
//!   name+size dedupe check and as a permission probe.
//!
//! Transient failures (5xx, 429, network errors) are retried with capped
//! exponential backoff; all other errors surface immediately.

use crate::config::ColdStorageConfig;
use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ColdStorageError {
    #[error("no credential strategy produced a usable bearer token")]
    AuthFailure,
    #[error("resumable session init failed with status {status}: {body}")]
    InitFailure { status: u16, body: String },
    #[error("remote rejected the call with status {status}: {body}")]
    PermanentFailure { status: u16, body: String },
    #[error("remote still failing after {attempts} attempts: {last_error}")]
    TransientExhausted { attempts: u32, last_error: String },
    #[error("unexpected remote response: {0}")]
    UnexpectedResponse(String),
}

pub type ColdStorageResult<T> = Result<T, ColdStorageError>;

/// Outcome of one ranged PUT.
#[derive(Clone, Debug)]
pub enum PutOutcome {
    /// 308 — the slice was accepted but the transfer continues. Carries the
    /// server-confirmed received range, so the caller knows where to resume.
    Continued { confirmed_range: Option<String> },
    /// 200/201 — the transfer is complete.
    Completed { file_id: String },
}

/// A `PutOutcome` plus how many attempts the call took (retries included).
#[derive(Clone, Debug)]
pub struct PutResult {
    pub outcome: PutOutcome,
    pub attempts: u32,
}

/// Result of a destination-folder check.
#[derive(Clone, Debug)]
pub enum VerifyOutcome {
    /// A file with the requested name and exact byte size already exists.
    Existing { file_id: String },
    /// No matching file in the destination folder.
    Absent,
    /// Probe mode (no name given): the folder is listable.
    ListOk { file_count: usize },
}

/// Per-file transfer lifecycle. `Completed` and `Failed` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferState {
    NotStarted,
    SessionInitiating,
    Transferring,
    Completed,
    Failed,
}

/// Ordered credential-resolution strategies. Each may yield a token; the
/// first non-empty result wins, and exhausting the chain is itself a
/// distinct failure (`AuthFailure`).
#[derive(Clone, Debug)]
enum CredentialStrategy {
    /// Bearer token forwarded from the incoming request.
    RequestBearer(Option<String>),
    /// Statically configured service token.
    ConfigToken(Option<String>),
    /// Refresh-token exchange against the configured token endpoint.
    TokenExchange,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct FileResource {
    id: String,
    name: String,
    #[serde(default)]
    size: Option<i64>,
}

#[derive(Deserialize)]
struct FileListResponse {
    #[serde(default)]
    files: Vec<FileResource>,
}

#[derive(Deserialize)]
struct UploadedFileResponse {
    id: String,
}

/// Async client for the cold-storage API.
#[derive(Clone)]
pub struct ColdStorageClient {
    http: reqwest::Client,
    cfg: ColdStorageConfig,
}

impl ColdStorageClient {
    pub fn new(cfg: ColdStorageConfig) -> ColdStorageResult<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ColdStorageError::UnexpectedResponse(format!("http client: {e}")))?;
        Ok(Self { http, cfg })
    }

    /// Backoff delay before retrying `attempt` (1-based): the initial delay
    /// doubling per attempt, capped at the configured maximum.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let base = self.cfg.initial_backoff.as_millis() as u64;
        let delay = base.saturating_mul(1u64 << exp);
        Duration::from_millis(delay).min(self.cfg.max_backoff)
    }

    /// Walk the credential chain in order; first token wins.
    async fn resolve_token(&self, request_bearer: Option<&str>) -> ColdStorageResult<String> {
        let chain = [
            CredentialStrategy::RequestBearer(request_bearer.map(str::to_owned)),
            CredentialStrategy::ConfigToken(self.cfg.access_token.clone()),
            CredentialStrategy::TokenExchange,
        ];

        for strategy in &chain {
            if let Some(token) = self.try_strategy(strategy).await {
                return Ok(token);
            }
        }
        Err(ColdStorageError::AuthFailure)
    }

    async fn try_strategy(&self, strategy: &CredentialStrategy) -> Option<String> {
        match strategy {
            CredentialStrategy::RequestBearer(token) | CredentialStrategy::ConfigToken(token) => {
                token.as_deref().filter(|t| !t.is_empty()).map(str::to_owned)
            }
            CredentialStrategy::TokenExchange => self.exchange_token().await,
        }
    }

    /// Exchange the configured refresh token for an access token. Any
    /// missing piece of configuration or remote failure yields `None` so the
    /// chain can report exhaustion uniformly.
    async fn exchange_token(&self) -> Option<String> {
        let token_url = self.cfg.token_url.as_deref()?;
        let client_id = self.cfg.client_id.as_deref()?;
        let client_secret = self.cfg.client_secret.as_deref()?;
        let refresh_token = self.cfg.refresh_token.as_deref()?;

        let result = self
            .http
            .post(token_url)
            .timeout(self.cfg.request_timeout)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                resp.json::<TokenResponse>().await.ok().map(|t| t.access_token)
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "token exchange rejected");
                None
            }
            Err(err) => {
                warn!("token exchange failed: {err}");
                None
            }
        }
    }

    /// Send a request, retrying transient failures (5xx, 429, network) with
    /// capped exponential backoff. Returns the first non-transient response
    /// along with the attempt count.
    async fn send_with_retry<F>(&self, mut build: F) -> ColdStorageResult<(reqwest::Response, u32)>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let max = self.cfg.max_attempts;
        let mut last_error = String::new();

        for attempt in 1..=max {
            match build().send().await {
                Ok(resp) if is_transient(resp.status()) => {
                    last_error = format!("status {}", resp.status());
                    warn!(attempt, max, %last_error, "transient remote failure");
                }
                Ok(resp) => return Ok((resp, attempt)),
                Err(err) => {
                    last_error = err.to_string();
                    warn!(attempt, max, %last_error, "remote call failed");
                }
            }

            if attempt < max {
                tokio::time::sleep(self.delay_for_attempt(attempt)).await;
            }
        }

        Err(ColdStorageError::TransientExhausted {
            attempts: max,
            last_error,
        })
    }

    /// Initiate a resumable session; returns the opaque upload URL.
    pub async fn init_session(
        &self,
        file_name: &str,
        mime: &str,
        size_bytes: u64,
        dest_folder_id: &str,
        request_bearer: Option<&str>,
    ) -> ColdStorageResult<String> {
        let token = self.resolve_token(request_bearer).await?;
        let url = format!("{}/upload/files?uploadType=resumable", self.cfg.base_url);
        let body = serde_json::json!({
            "name": file_name,
            "mimeType": mime,
            "parents": [dest_folder_id],
        });

        let (resp, _) = self
            .send_with_retry(|| {
                self.http
                    .post(&url)
                    .timeout(self.cfg.request_timeout)
                    .header(AUTHORIZATION, format!("Bearer {token}"))
                    .header("X-Upload-Content-Type", mime)
                    .header("X-Upload-Content-Length", size_bytes)
                    .json(&body)
            })
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ColdStorageError::InitFailure {
                status: status.as_u16(),
                body,
            });
        }

        resp.headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| {
                ColdStorageError::UnexpectedResponse(
                    "init response missing Location header".into(),
                )
            })
    }

    /// Transfer one byte range to a previously initiated upload URL.
    ///
    /// The upload URL itself carries the session's authorization, so no
    /// bearer token is attached here.
    pub async fn put(
        &self,
        upload_url: &str,
        start: u64,
        end: u64,
        total: u64,
        payload: Bytes,
        mime: &str,
    ) -> ColdStorageResult<PutResult> {
        let content_range = format!("bytes {start}-{end}/{total}");

        let (resp, attempts) = self
            .send_with_retry(|| {
                self.http
                    .put(upload_url)
                    .timeout(self.cfg.put_timeout)
                    .header(CONTENT_RANGE, content_range.clone())
                    .header(CONTENT_TYPE, mime)
                    .body(payload.clone())
            })
            .await?;

        let status = resp.status();
        if status == StatusCode::PERMANENT_REDIRECT {
            let confirmed_range = resp
                .headers()
                .get(RANGE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            debug!(?confirmed_range, "slice accepted, transfer continues");
            return Ok(PutResult {
                outcome: PutOutcome::Continued { confirmed_range },
                attempts,
            });
        }

        if status.is_success() {
            let file: UploadedFileResponse = resp.json().await.map_err(|e| {
                ColdStorageError::UnexpectedResponse(format!("completion body: {e}"))
            })?;
            return Ok(PutResult {
                outcome: PutOutcome::Completed { file_id: file.id },
                attempts,
            });
        }

        let body = resp.text().await.unwrap_or_default();
        Err(ColdStorageError::PermanentFailure {
            status: status.as_u16(),
            body,
        })
    }

    /// Check the destination folder. With a name (and optionally a size),
    /// this is the dedupe lookup; without one it is a permission probe.
    pub async fn verify(
        &self,
        dest_folder_id: &str,
        file_name: Option<&str>,
        size_bytes: Option<i64>,
        request_bearer: Option<&str>,
    ) -> ColdStorageResult<VerifyOutcome> {
        let token = self.resolve_token(request_bearer).await?;
        let url = format!("{}/files", self.cfg.base_url);

        let mut query: Vec<(&str, String)> = vec![("parent", dest_folder_id.to_string())];
        if let Some(name) = file_name {
            query.push(("name", name.to_string()));
        }

        let (resp, _) = self
            .send_with_retry(|| {
                self.http
                    .get(&url)
                    .timeout(self.cfg.request_timeout)
                    .header(AUTHORIZATION, format!("Bearer {token}"))
                    .query(&query)
            })
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ColdStorageError::PermanentFailure {
                status: status.as_u16(),
                body,
            });
        }

        let listing: FileListResponse = resp
            .json()
            .await
            .map_err(|e| ColdStorageError::UnexpectedResponse(format!("listing body: {e}")))?;

        let Some(name) = file_name else {
            return Ok(VerifyOutcome::ListOk {
                file_count: listing.files.len(),
            });
        };

        let found = listing.files.iter().find(|f| {
            f.name == name && size_bytes.map_or(true, |want| f.size == Some(want))
        });

        Ok(match found {
            Some(file) => VerifyOutcome::Existing {
                file_id: file.id.clone(),
            },
            None => VerifyOutcome::Absent,
        })
    }

    /// Drive a whole transfer: init, then the slices in order as sequential
    /// ranged PUTs. Used for promotion of buffered sessions and for the
    /// manifest write, where the server already holds every byte.
    pub async fn transfer_whole(
        &self,
        file_name: &str,
        mime: &str,
        slices: &[Bytes],
        dest_folder_id: &str,
        request_bearer: Option<&str>,
    ) -> ColdStorageResult<String> {
        let total: u64 = slices.iter().map(|s| s.len() as u64).sum();
        let mut transfer = ResumableTransfer::new(total);

        transfer.state = TransferState::SessionInitiating;
        let upload_url = match self
            .init_session(file_name, mime, total, dest_folder_id, request_bearer)
            .await
        {
            Ok(url) => url,
            Err(err) => {
                transfer.state = TransferState::Failed;
                return Err(err);
            }
        };

        transfer.state = TransferState::Transferring;
        let mut offset: u64 = 0;
        for (i, slice) in slices.iter().enumerate() {
            let start = offset;
            let end = offset + slice.len() as u64 - 1;
            offset = end + 1;

            let result = match self
                .put(&upload_url, start, end, total, slice.clone(), mime)
                .await
            {
                Ok(result) => result,
                Err(err) => {
                    transfer.state = TransferState::Failed;
                    return Err(err);
                }
            };

            match result.outcome {
                PutOutcome::Continued { confirmed_range } => {
                    let confirmed = confirmed_range
                        .as_deref()
                        .and_then(parse_confirmed_end)
                        .map(|e| e + 1)
                        .unwrap_or(offset);
                    transfer.record_confirmed(confirmed);
                    if i + 1 == slices.len() {
                        transfer.state = TransferState::Failed;
                        return Err(ColdStorageError::UnexpectedResponse(format!(
                            "remote still incomplete after final slice (confirmed {} of {} bytes)",
                            transfer.confirmed, transfer.total
                        )));
                    }
                }
                PutOutcome::Completed { file_id } => {
                    transfer.record_confirmed(total);
                    transfer.state = TransferState::Completed;
                    if i + 1 != slices.len() {
                        warn!(
                            file_name,
                            slice = i,
                            "remote reported completion before the final slice"
                        );
                    }
                    return Ok(file_id);
                }
            }
        }

        transfer.state = TransferState::Failed;
        debug!(state = ?transfer.state, "transfer ended without completion");
        Err(ColdStorageError::UnexpectedResponse(
            "transfer ended without completion".into(),
        ))
    }
}

/// Tracks one file transfer's lifecycle and confirmed-byte high-water mark.
#[derive(Debug)]
pub struct ResumableTransfer {
    pub total: u64,
    /// Bytes the remote has confirmed; monotonically non-decreasing.
    pub confirmed: u64,
    pub state: TransferState,
}

impl ResumableTransfer {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            confirmed: 0,
            state: TransferState::NotStarted,
        }
    }

    /// Raise the confirmed-byte mark; the remote can only ever confirm more.
    pub fn record_confirmed(&mut self, confirmed: u64) {
        self.confirmed = self.confirmed.max(confirmed);
    }
}

/// Server errors and 429 are retryable; everything else is not.
fn is_transient(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Parse the last confirmed byte out of a `Range: bytes=0-N` header value.
pub fn parse_confirmed_end(range: &str) -> Option<u64> {
    range
        .trim()
        .strip_prefix("bytes=")?
        .split('-')
        .next_back()?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ColdStorageConfig;

    fn test_config() -> ColdStorageConfig {
        ColdStorageConfig {
            base_url: "http://127.0.0.1:1".into(),
            access_token: Some("tok".into()),
            token_url: None,
            client_id: None,
            client_secret: None,
            refresh_token: None,
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            put_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let client = ColdStorageClient::new(test_config()).unwrap();
        assert_eq!(client.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(client.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(client.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(client.delay_for_attempt(4), Duration::from_millis(800));
        // 100ms * 2^9 = 51.2s, above the 2s cap.
        assert_eq!(client.delay_for_attempt(10), Duration::from_secs(2));
    }

    #[test]
    fn backoff_is_strictly_increasing_until_cap() {
        let client = ColdStorageClient::new(test_config()).unwrap();
        let mut prev = Duration::ZERO;
        for attempt in 1..=4 {
            let delay = client.delay_for_attempt(attempt);
            assert!(delay > prev, "attempt {attempt} did not grow");
            prev = delay;
        }
    }

    #[test]
    fn confirmed_end_parses_range_header() {
        assert_eq!(parse_confirmed_end("bytes=0-12345"), Some(12345));
        assert_eq!(parse_confirmed_end(" bytes=0-0"), Some(0));
        assert_eq!(parse_confirmed_end("bytes=garbage"), None);
        assert_eq!(parse_confirmed_end("0-12345"), None);
    }

    #[test]
    fn transient_statuses() {
        assert!(is_transient(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_transient(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_transient(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_transient(StatusCode::NOT_FOUND));
        assert!(!is_transient(StatusCode::PERMANENT_REDIRECT));
        assert!(!is_transient(StatusCode::OK));
    }

    #[test]
    fn confirmed_bytes_are_monotonic() {
        let mut transfer = ResumableTransfer::new(100);
        transfer.record_confirmed(40);
        transfer.record_confirmed(20);
        assert_eq!(transfer.confirmed, 40);
        transfer.record_confirmed(100);
        assert_eq!(transfer.confirmed, 100);
    }

    mod remote {
        use super::*;
        use httpmock::Method::{GET, POST, PUT};
        use httpmock::MockServer;
        use serde_json::json;
        use std::net::TcpListener;

        fn can_bind_localhost() -> bool {
            TcpListener::bind("127.0.0.1:0").is_ok()
        }

        fn client_for(base_url: String) -> ColdStorageClient {
            let mut cfg = test_config();
            cfg.base_url = base_url;
            cfg.initial_backoff = Duration::from_millis(50);
            cfg.max_backoff = Duration::from_millis(400);
            ColdStorageClient::new(cfg).unwrap()
        }

        #[tokio::test]
        async fn init_session_returns_location_header() {
            if !can_bind_localhost() {
                eprintln!("Skipping httpmock tests: cannot bind to localhost");
                return;
            }
            let server = MockServer::start();
            let init = server.mock(|when, then| {
                when.method(POST)
                    .path("/upload/files")
                    .query_param("uploadType", "resumable")
                    .header("authorization", "Bearer tok")
                    .header("x-upload-content-type", "video/mp4")
                    .header("x-upload-content-length", "1024");
                then.status(200)
                    .header("Location", server.url("/upload/u1"));
            });

            let client = client_for(server.base_url());
            let url = client
                .init_session("workout.mp4", "video/mp4", 1024, "folder-1", None)
                .await
                .unwrap();

            init.assert();
            assert_eq!(url, server.url("/upload/u1"));
        }

        #[tokio::test]
        async fn init_session_surfaces_remote_rejection() {
            if !can_bind_localhost() {
                eprintln!("Skipping httpmock tests: cannot bind to localhost");
                return;
            }
            let server = MockServer::start();
            server.mock(|when, then| {
                when.method(POST).path("/upload/files");
                then.status(403).body("quota exceeded");
            });

            let client = client_for(server.base_url());
            let err = client
                .init_session("workout.mp4", "video/mp4", 1024, "folder-1", None)
                .await
                .unwrap_err();

            match err {
                ColdStorageError::InitFailure { status, body } => {
                    assert_eq!(status, 403);
                    assert_eq!(body, "quota exceeded");
                }
                other => panic!("expected InitFailure, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn put_continues_on_308_with_confirmed_range() {
            if !can_bind_localhost() {
                eprintln!("Skipping httpmock tests: cannot bind to localhost");
                return;
            }
            let server = MockServer::start();
            server.mock(|when, then| {
                when.method(PUT)
                    .path("/upload/u1")
                    .header("content-range", "bytes 0-99/500");
                then.status(308).header("Range", "bytes=0-99");
            });

            let client = client_for(server.base_url());
            let result = client
                .put(
                    &server.url("/upload/u1"),
                    0,
                    99,
                    500,
                    Bytes::from(vec![0u8; 100]),
                    "video/mp4",
                )
                .await
                .unwrap();

            assert_eq!(result.attempts, 1);
            match result.outcome {
                PutOutcome::Continued { confirmed_range } => {
                    assert_eq!(confirmed_range.as_deref(), Some("bytes=0-99"));
                }
                other => panic!("expected Continued, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn put_fails_fast_on_permanent_4xx() {
            if !can_bind_localhost() {
                eprintln!("Skipping httpmock tests: cannot bind to localhost");
                return;
            }
            let server = MockServer::start();
            let put = server.mock(|when, then| {
                when.method(PUT).path("/upload/gone");
                then.status(404).body("no such session");
            });

            let client = client_for(server.base_url());
            let err = client
                .put(
                    &server.url("/upload/gone"),
                    0,
                    4,
                    5,
                    Bytes::from_static(b"hello"),
                    "text/plain",
                )
                .await
                .unwrap_err();

            // Exactly one attempt: non-429 4xx is never retried.
            put.assert_hits(1);
            match err {
                ColdStorageError::PermanentFailure { status, .. } => assert_eq!(status, 404),
                other => panic!("expected PermanentFailure, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn transient_503s_retry_with_growing_delays_until_success() {
            if !can_bind_localhost() {
                eprintln!("Skipping httpmock tests: cannot bind to localhost");
                return;
            }
            use axum::{Json, Router, extract::State, http::StatusCode, routing::put};
            use std::sync::Mutex;
            use std::sync::atomic::{AtomicU32, Ordering};
            use std::time::Instant;

            #[derive(Clone)]
            struct Remote {
                hits: std::sync::Arc<AtomicU32>,
                times: std::sync::Arc<Mutex<Vec<Instant>>>,
            }

            async fn flaky(
                State(remote): State<Remote>,
            ) -> (StatusCode, Json<serde_json::Value>) {
                remote.times.lock().unwrap().push(Instant::now());
                let n = remote.hits.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    (StatusCode::SERVICE_UNAVAILABLE, Json(json!({})))
                } else {
                    (StatusCode::OK, Json(json!({ "id": "file-123" })))
                }
            }

            let remote = Remote {
                hits: std::sync::Arc::new(AtomicU32::new(0)),
                times: std::sync::Arc::new(Mutex::new(Vec::new())),
            };
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let app = Router::new()
                .route("/upload/u1", put(flaky))
                .with_state(remote.clone());
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });

            let client = client_for(format!("http://{addr}"));
            let result = client
                .put(
                    &format!("http://{addr}/upload/u1"),
                    0,
                    4,
                    5,
                    Bytes::from_static(b"hello"),
                    "text/plain",
                )
                .await
                .unwrap();

            assert_eq!(result.attempts, 3);
            match result.outcome {
                PutOutcome::Completed { file_id } => assert_eq!(file_id, "file-123"),
                other => panic!("expected Completed, got {other:?}"),
            }

            let times = remote.times.lock().unwrap();
            assert_eq!(times.len(), 3);
            let first_gap = times[1] - times[0];
            let second_gap = times[2] - times[1];
            assert!(
                second_gap > first_gap,
                "backoff did not grow: {first_gap:?} then {second_gap:?}"
            );
        }

        #[tokio::test]
        async fn transient_failures_exhaust_after_attempt_ceiling() {
            if !can_bind_localhost() {
                eprintln!("Skipping httpmock tests: cannot bind to localhost");
                return;
            }
            let server = MockServer::start();
            let put = server.mock(|when, then| {
                when.method(PUT).path("/upload/u1");
                then.status(503);
            });

            let mut cfg = test_config();
            cfg.base_url = server.base_url();
            cfg.max_attempts = 3;
            cfg.initial_backoff = Duration::from_millis(10);
            let client = ColdStorageClient::new(cfg).unwrap();

            let err = client
                .put(
                    &server.url("/upload/u1"),
                    0,
                    4,
                    5,
                    Bytes::from_static(b"hello"),
                    "text/plain",
                )
                .await
                .unwrap_err();

            put.assert_hits(3);
            match err {
                ColdStorageError::TransientExhausted { attempts, .. } => assert_eq!(attempts, 3),
                other => panic!("expected TransientExhausted, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn verify_matches_on_name_and_exact_size() {
            if !can_bind_localhost() {
                eprintln!("Skipping httpmock tests: cannot bind to localhost");
                return;
            }
            let server = MockServer::start();
            server.mock(|when, then| {
                when.method(GET)
                    .path("/files")
                    .query_param("parent", "folder-1")
                    .query_param("name", "video.mp4");
                then.status(200).json_body(json!({
                    "files": [{ "id": "f1", "name": "video.mp4", "size": 1_048_576 }]
                }));
            });

            let client = client_for(server.base_url());

            let hit = client
                .verify("folder-1", Some("video.mp4"), Some(1_048_576), None)
                .await
                .unwrap();
            assert!(matches!(
                hit,
                VerifyOutcome::Existing { ref file_id } if file_id == "f1"
            ));

            // Same name, different size: not a duplicate.
            let miss = client
                .verify("folder-1", Some("video.mp4"), Some(999), None)
                .await
                .unwrap();
            assert!(matches!(miss, VerifyOutcome::Absent));
        }

        #[tokio::test]
        async fn verify_without_name_is_a_list_probe() {
            if !can_bind_localhost() {
                eprintln!("Skipping httpmock tests: cannot bind to localhost");
                return;
            }
            let server = MockServer::start();
            server.mock(|when, then| {
                when.method(GET).path("/files").query_param("parent", "folder-1");
                then.status(200).json_body(json!({
                    "files": [
                        { "id": "f1", "name": "a.mp4" },
                        { "id": "f2", "name": "b.mp4" }
                    ]
                }));
            });

            let client = client_for(server.base_url());
            let outcome = client.verify("folder-1", None, None, None).await.unwrap();
            assert!(matches!(outcome, VerifyOutcome::ListOk { file_count: 2 }));
        }

        #[tokio::test]
        async fn request_bearer_outranks_configured_token() {
            if !can_bind_localhost() {
                eprintln!("Skipping httpmock tests: cannot bind to localhost");
                return;
            }
            let server = MockServer::start();
            let listing = server.mock(|when, then| {
                when.method(GET)
                    .path("/files")
                    .header("authorization", "Bearer request-tok");
                then.status(200).json_body(json!({ "files": [] }));
            });

            // Config carries its own token, but the request-supplied one wins.
            let client = client_for(server.base_url());
            client
                .verify("folder-1", None, None, Some("request-tok"))
                .await
                .unwrap();
            listing.assert();
        }

        #[tokio::test]
        async fn token_exchange_is_the_last_strategy() {
            if !can_bind_localhost() {
                eprintln!("Skipping httpmock tests: cannot bind to localhost");
                return;
            }
            let server = MockServer::start();
            let exchange = server.mock(|when, then| {
                when.method(POST).path("/token");
                then.status(200)
                    .json_body(json!({ "access_token": "exchanged-tok" }));
            });
            let listing = server.mock(|when, then| {
                when.method(GET)
                    .path("/files")
                    .header("authorization", "Bearer exchanged-tok");
                then.status(200).json_body(json!({ "files": [] }));
            });

            let mut cfg = test_config();
            cfg.base_url = server.base_url();
            cfg.access_token = None;
            cfg.token_url = Some(server.url("/token"));
            cfg.client_id = Some("client".into());
            cfg.client_secret = Some("secret".into());
            cfg.refresh_token = Some("refresh".into());
            let client = ColdStorageClient::new(cfg).unwrap();

            client.verify("folder-1", None, None, None).await.unwrap();
            exchange.assert();
            listing.assert();
        }

        #[tokio::test]
        async fn exhausted_credential_chain_is_auth_failure() {
            let mut cfg = test_config();
            cfg.access_token = None;
            let client = ColdStorageClient::new(cfg).unwrap();

            let err = client
                .init_session("a.mp4", "video/mp4", 10, "folder-1", None)
                .await
                .unwrap_err();
            assert!(matches!(err, ColdStorageError::AuthFailure));
        }

        #[tokio::test]
        async fn transfer_whole_drives_sequential_ranges() {
            if !can_bind_localhost() {
                eprintln!("Skipping httpmock tests: cannot bind to localhost");
                return;
            }
            let server = MockServer::start();
            server.mock(|when, then| {
                when.method(POST)
                    .path("/upload/files")
                    .query_param("uploadType", "resumable");
                then.status(200)
                    .header("Location", server.url("/upload/w1"));
            });
            let first = server.mock(|when, then| {
                when.method(PUT)
                    .path("/upload/w1")
                    .header("content-range", "bytes 0-2/5");
                then.status(308).header("Range", "bytes=0-2");
            });
            let last = server.mock(|when, then| {
                when.method(PUT)
                    .path("/upload/w1")
                    .header("content-range", "bytes 3-4/5");
                then.status(200).json_body(json!({ "id": "whole-1" }));
            });

            let client = client_for(server.base_url());
            let file_id = client
                .transfer_whole(
                    "clip.bin",
                    "application/octet-stream",
                    &[Bytes::from_static(b"abc"), Bytes::from_static(b"de")],
                    "folder-1",
                    None,
                )
                .await
                .unwrap();

            assert_eq!(file_id, "whole-1");
            first.assert();
            last.assert();
        }
    }
}
