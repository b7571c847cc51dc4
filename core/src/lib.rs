//! Async API client for the simulation dashboard backend.
//!
//! # Overview
//! `ApiClient` issues JSON requests against the dashboard's REST API
//! (projects, scenarios, simulations, personas, organizations, marketplace
//! templates). Concurrent identical reads share one network call, every
//! tracked request can be aborted with `cancel_all_requests`, and all
//! failures surface as one `ApiError` shape carrying a status and message.
//!
//! # Design
//! - Requests and responses are plain data (`http`); the network sits behind
//!   the `Transport` trait, with `ReqwestTransport` as the default.
//! - `client` owns the dedup and cancellation tables; `resources` layers the
//!   typed CRUD calls on top of it.
//! - Multipart uploads skip deduplication. Event streams (`sse`) skip both
//!   deduplication and cancellation tracking.
//! - DTOs are defined independently from the mock-server crate; integration
//!   tests catch schema drift.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod key;
pub mod resources;
pub mod sse;
pub mod transport;
pub mod types;

pub use client::{ApiClient, PendingResponse, HEALTH_PATH};
pub use config::{ClientConfig, ConfigError};
pub use error::{ApiError, BuildError, TransportError};
pub use http::{FormPart, HttpBody, HttpMethod, HttpRequest, HttpResponse, RequestOptions};
pub use key::RequestKey;
pub use resources::Resource;
pub use sse::{EventStream, ServerEvent, SseDecoder};
pub use transport::{ByteStream, HttpStream, ReqwestTransport, Transport};
pub use types::*;
