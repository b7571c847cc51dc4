//! Deduplicating, cancellable HTTP client for the dashboard API.
//!
//! # Design
//! `ApiClient` owns two tracking tables behind one mutex:
//!
//! - the pending table maps a read's `RequestKey` to its shared in-flight
//!   response, so concurrent identical reads join one network call;
//! - the cancellation registry maps every in-flight key (reads and writes)
//!   to the tokens that abort it.
//!
//! Registration happens synchronously in `send`, before the caller can
//! await anything. Removal happens in a drop guard owned by the network
//! future, so it runs whether the call succeeds, fails, is cancelled, or is
//! abandoned by every caller. Each registration carries a unique id and a
//! guard only removes its own entries, which keeps a request issued after
//! `cancel_all_requests` safe from the cleanup of the one it replaced.
//!
//! The lock is never held across an `.await` or while the transport is
//! building its call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, Shared, WeakShared};
use futures::{FutureExt, TryStreamExt};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, ConfigError};
use crate::error::{ApiError, BuildError, TransportError};
use crate::http::{FormPart, HttpBody, HttpMethod, HttpRequest, HttpResponse, RequestOptions};
use crate::key::RequestKey;
use crate::sse::EventStream;
use crate::transport::{ReqwestTransport, Transport};
use crate::types::HealthStatus;

/// Fixed path of the health endpoint, resolved against the API origin.
pub const HEALTH_PATH: &str = "/health";

/// A response that may be awaited by several callers at once.
pub type PendingResponse = Shared<BoxFuture<'static, Result<Value, ApiError>>>;

struct PendingEntry {
    id: u64,
    response: WeakShared<BoxFuture<'static, Result<Value, ApiError>>>,
}

#[derive(Default)]
struct Tracking {
    pending: HashMap<RequestKey, PendingEntry>,
    cancellations: HashMap<RequestKey, HashMap<u64, CancellationToken>>,
}

/// Removes one request's entries from both tables when dropped.
struct Registration {
    tracking: Arc<Mutex<Tracking>>,
    key: RequestKey,
    id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut tracking = self.tracking.lock();
        if tracking.pending.get(&self.key).is_some_and(|entry| entry.id == self.id) {
            tracking.pending.remove(&self.key);
        }
        if let Some(tokens) = tracking.cancellations.get_mut(&self.key) {
            tokens.remove(&self.id);
            if tokens.is_empty() {
                tracking.cancellations.remove(&self.key);
            }
        }
        debug!(key = %self.key, id = self.id, "request settled");
    }
}

pub struct ApiClient<T: Transport = ReqwestTransport> {
    base_url: String,
    origin: String,
    dedupe_reads: bool,
    transport: T,
    access_token: RwLock<Option<String>>,
    tracking: Arc<Mutex<Tracking>>,
    next_id: AtomicU64,
}

impl<T: Transport> std::fmt::Debug for ApiClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tracking = self.tracking.lock();
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("dedupe_reads", &self.dedupe_reads)
            .field("has_access_token", &self.access_token.read().is_some())
            .field("pending", &tracking.pending.len())
            .field("tracked", &tracking.cancellations.len())
            .finish_non_exhaustive()
    }
}

impl ApiClient<ReqwestTransport> {
    /// Client with default settings against `base_url`.
    pub fn new(base_url: &str) -> Result<Self, BuildError> {
        Self::from_config(ClientConfig::new(base_url))
    }

    pub fn from_config(config: ClientConfig) -> Result<Self, BuildError> {
        config.validate()?;
        let transport = ReqwestTransport::new(config.timeout)?;
        Ok(Self::with_transport(config, transport)?)
    }
}

impl<T: Transport> ApiClient<T> {
    /// Fails when the base URL is not an absolute http(s) URL.
    pub fn with_transport(config: ClientConfig, transport: T) -> Result<Self, ConfigError> {
        config.validate()?;
        let origin = config.origin();
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            origin,
            dedupe_reads: config.dedupe_reads,
            transport,
            access_token: RwLock::new(config.access_token),
            tracking: Arc::new(Mutex::new(Tracking::default())),
            next_id: AtomicU64::new(0),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Replace or clear the bearer token. Requests already handed to the
    /// transport keep the headers they were built with.
    pub fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write() = token;
    }

    pub fn access_token(&self) -> Option<String> {
        self.access_token.read().clone()
    }

    /// Issue a request and wait for its decoded JSON body.
    ///
    /// Empty bodies decode to `Value::Null`.
    pub async fn request(&self, endpoint: &str, options: RequestOptions) -> Result<Value, ApiError> {
        self.send(endpoint, options).await
    }

    /// `request` followed by a typed decode.
    pub async fn request_json<R: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<R, ApiError> {
        let value = self.request(endpoint, options).await?;
        serde_json::from_value(value).map_err(|e| ApiError::Deserialization(e.to_string()))
    }

    /// Register a request and return its response future without awaiting.
    ///
    /// A read whose key is already in flight gets a handle to that call
    /// instead of a new one. Everything else starts a new network call.
    pub fn send(&self, endpoint: &str, options: RequestOptions) -> PendingResponse {
        let method = options.method();
        let key = RequestKey::new(method, endpoint, options.body.as_ref());
        let dedupe = method.is_read() && options.dedupe && self.dedupe_reads;
        let body = options.body.as_ref().map(|body| HttpBody::Json(body.to_string()));
        self.dispatch(key, method, self.url(endpoint), body, &options.headers, dedupe)
    }

    /// Submit a multipart form. Never deduplicated; still cancellable.
    pub async fn upload(&self, endpoint: &str, parts: Vec<FormPart>) -> Result<Value, ApiError> {
        let key = RequestKey::new(HttpMethod::Post, endpoint, None);
        let body = Some(HttpBody::Multipart(parts));
        self.dispatch(key, HttpMethod::Post, self.url(endpoint), body, &[], false)
            .await
    }

    /// Open a server-sent event stream. Streams are not tracked: they are
    /// neither deduplicated nor aborted by `cancel_all_requests`.
    pub async fn events(&self, endpoint: &str) -> Result<EventStream, ApiError> {
        let accept = [("accept".to_string(), "text/event-stream".to_string())];
        let request = self.build_request(HttpMethod::Get, self.url(endpoint), None, &accept);
        debug!(url = %request.url, "opening event stream");
        let stream = self
            .transport
            .open_stream(request)
            .await
            .map_err(ApiError::transport)?;
        if !(200..300).contains(&stream.status) {
            let chunks: Vec<bytes::Bytes> = stream.body.try_collect().await.unwrap_or_else(|err| {
                warn!(status = stream.status, error = %err, "failed to read error body");
                Vec::new()
            });
            let body: Vec<u8> = chunks.concat();
            return Err(http_error(stream.status, &String::from_utf8_lossy(&body)));
        }
        Ok(EventStream::new(stream.body))
    }

    /// Probe the API origin at the fixed health path, ignoring any path
    /// prefix in the base URL.
    pub async fn health(&self) -> Result<HealthStatus, ApiError> {
        let url = format!("{}{HEALTH_PATH}", self.origin);
        let key = RequestKey::new(HttpMethod::Get, &url, None);
        let value = self
            .dispatch(key, HttpMethod::Get, url, None, &[], self.dedupe_reads)
            .await?;
        serde_json::from_value(value).map_err(|e| ApiError::Deserialization(e.to_string()))
    }

    /// Abort every tracked request and clear both tables. Every caller
    /// awaiting one of them gets `ApiError::Cancelled`.
    pub fn cancel_all_requests(&self) {
        let mut tracking = self.tracking.lock();
        let mut cancelled = 0usize;
        for token in tracking.cancellations.values().flat_map(HashMap::values) {
            token.cancel();
            cancelled += 1;
        }
        tracking.cancellations.clear();
        tracking.pending.clear();
        info!(cancelled, "cancelled all in-flight requests");
    }

    /// Number of reads that can currently be joined.
    pub fn pending_count(&self) -> usize {
        self.tracking.lock().pending.len()
    }

    /// Number of distinct keys with at least one cancellable request.
    pub fn tracked_count(&self) -> usize {
        self.tracking.lock().cancellations.len()
    }

    pub fn is_pending(&self, key: &RequestKey) -> bool {
        self.tracking.lock().pending.contains_key(key)
    }

    pub fn is_tracked(&self, key: &RequestKey) -> bool {
        self.tracking.lock().cancellations.contains_key(key)
    }

    fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with('/') {
            format!("{}{endpoint}", self.base_url)
        } else {
            format!("{}/{endpoint}", self.base_url)
        }
    }

    fn dispatch(
        &self,
        key: RequestKey,
        method: HttpMethod,
        url: String,
        body: Option<HttpBody>,
        headers: &[(String, String)],
        dedupe: bool,
    ) -> PendingResponse {
        if dedupe {
            if let Some(response) = joinable(&self.tracking.lock(), &key) {
                debug!(%key, "joining in-flight request");
                return response;
            }
        }

        // Built outside the lock: neither step may run under it, since the
        // transport is free to call back into the client.
        let request = self.build_request(method, url, body, headers);
        let url = request.url.clone();
        let call = self.transport.execute(request);

        let mut tracking = self.tracking.lock();
        if dedupe {
            // Another caller may have registered the same read meanwhile.
            // `call` has not been polled, so dropping it sends nothing.
            if let Some(response) = joinable(&tracking, &key) {
                drop(tracking);
                debug!(%key, "joining in-flight request");
                return response;
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        tracking
            .cancellations
            .entry(key.clone())
            .or_default()
            .insert(id, token.clone());
        debug!(%key, id, %url, "issuing request");
        let registration = Registration {
            tracking: Arc::clone(&self.tracking),
            key: key.clone(),
            id,
        };

        let response: PendingResponse = async move {
            let _registration = registration;
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(ApiError::Cancelled),
                result = call => check_response(result),
            }
        }
        .boxed()
        .shared();

        if dedupe {
            if let Some(weak) = response.downgrade() {
                tracking.pending.insert(key, PendingEntry { id, response: weak });
            }
        }
        response
    }

    /// Snapshot the session into concrete headers. Caller headers replace
    /// defaults with the same name.
    fn build_request(
        &self,
        method: HttpMethod,
        url: String,
        body: Option<HttpBody>,
        extra: &[(String, String)],
    ) -> HttpRequest {
        let mut headers = Vec::new();
        if matches!(body, Some(HttpBody::Json(_))) {
            headers.push(("content-type".to_string(), "application/json".to_string()));
        }
        if let Some(token) = self.access_token.read().as_deref() {
            headers.push(("authorization".to_string(), format!("Bearer {token}")));
        }
        for (name, value) in extra {
            headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
            headers.push((name.clone(), value.clone()));
        }
        HttpRequest {
            method,
            url,
            headers,
            body,
        }
    }
}

fn joinable(tracking: &Tracking, key: &RequestKey) -> Option<PendingResponse> {
    tracking.pending.get(key).and_then(|entry| entry.response.upgrade())
}

/// Map a transport outcome to the client's result shape.
fn check_response(result: Result<HttpResponse, TransportError>) -> Result<Value, ApiError> {
    let response = result.map_err(|err| {
        warn!(error = %err, "transport failure");
        ApiError::transport(err)
    })?;
    if !response.is_success() {
        return Err(http_error(response.status, &response.body));
    }
    if response.body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&response.body).map_err(|e| ApiError::Deserialization(e.to_string()))
}

/// Prefer the server's `detail` field, the shape FastAPI error bodies use.
fn http_error(status: u16, body: &str) -> ApiError {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| match value.get("detail") {
            Some(Value::String(detail)) => Some(detail.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        });
    ApiError::Http {
        status,
        message: detail.unwrap_or_else(|| format!("HTTP error! status: {status}")),
    }
}
