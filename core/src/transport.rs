//! The I/O seam between `ApiClient` and the network.
//!
//! # Design
//! `ApiClient` never talks to a socket directly. It hands fully-built
//! `HttpRequest` values to a `Transport` and gets `HttpResponse` values back.
//! Non-2xx statuses are data, not errors: a `TransportError` means no response
//! arrived at all. Status interpretation stays in the client.
//!
//! Futures are boxed and `'static` so the client can race them against a
//! cancellation token and share them between callers.

use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt, TryStreamExt};

use crate::error::TransportError;
use crate::http::{HttpBody, HttpMethod, HttpRequest, HttpResponse};

pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Response whose body is consumed incrementally.
pub struct HttpStream {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: ByteStream,
}

impl std::fmt::Debug for HttpStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpStream")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

pub trait Transport: Send + Sync + 'static {
    /// Perform a request and buffer the whole response body.
    ///
    /// The network call must not start before the first poll of the returned
    /// future: the client may drop a future it never polls. Dropping the
    /// future aborts the call. The client holds no locks while calling this,
    /// so implementations may read client state.
    fn execute(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpResponse, TransportError>>;

    /// Perform a request and hand back the body as a byte stream.
    fn open_stream(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpStream, TransportError>>;
}

/// `Transport` backed by a pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestTransport {
    /// `timeout` bounds buffered requests end to end; streams only get it as
    /// a connect timeout so long-lived event streams stay open.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().connect_timeout(timeout).build()?;
        Ok(Self { client, timeout })
    }

    fn prepare(&self, request: HttpRequest) -> Result<reqwest::RequestBuilder, TransportError> {
        let mut builder = self.client.request(to_reqwest_method(request.method), request.url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        match request.body {
            None => {}
            Some(HttpBody::Json(body)) => builder = builder.body(body),
            Some(HttpBody::Multipart(parts)) => {
                let mut form = reqwest::multipart::Form::new();
                for part in parts {
                    let mut field = reqwest::multipart::Part::bytes(part.data);
                    if let Some(file_name) = part.file_name {
                        field = field.file_name(file_name);
                    }
                    if let Some(content_type) = part.content_type {
                        field = field.mime_str(&content_type)?;
                    }
                    form = form.part(part.name, field);
                }
                builder = builder.multipart(form);
            }
        }
        Ok(builder)
    }
}

impl Transport for ReqwestTransport {
    fn execute(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpResponse, TransportError>> {
        let prepared = self.prepare(request).map(|builder| builder.timeout(self.timeout));
        async move {
            let response = prepared?.send().await?;
            let status = response.status().as_u16();
            let headers = collect_headers(response.headers());
            let body = response.text().await?;
            Ok(HttpResponse { status, headers, body })
        }
        .boxed()
    }

    fn open_stream(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpStream, TransportError>> {
        let prepared = self.prepare(request);
        async move {
            let response = prepared?.send().await?;
            let status = response.status().as_u16();
            let headers = collect_headers(response.headers());
            let body = response.bytes_stream().map_err(TransportError::from).boxed();
            Ok(HttpStream { status, headers, body })
        }
        .boxed()
    }
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

/// Headers with non-UTF-8 values are skipped.
fn collect_headers(headers: &reqwest::header::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}
