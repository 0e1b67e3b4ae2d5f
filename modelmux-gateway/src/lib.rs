//! # Modelmux Gateway
//!
//! The serving shell around [`modelmux_core`]: an axum HTTP server that
//! accepts completion requests, hands them to the orchestration core and
//! returns normalized replies, with server-sent events for streaming.
//!
//! ## Endpoints
//!
//! - `POST /v1/completions`: unary completion
//! - `POST /v1/completions/stream`: streamed completion (`text/event-stream`)
//! - `GET /health`: liveness probe
//! - `GET /metrics`: Prometheus text exposition
//! - `GET /admin/providers`: descriptor table and circuit snapshot
//!
//! ## Modules
//!
//! - [`config`]: TOML configuration with environment overrides
//! - [`server`]: application assembly: adapters, cache, health, metrics
//! - [`handlers`]: endpoint handlers and error mapping
//! - [`redis_cache`]: remote cache backend
//!
//! Transport-level concerns beyond this surface (token verification, user
//! persistence, rate limiting, dashboards) live in their own services and
//! call this one.

pub mod config;
pub mod handlers;
pub mod redis_cache;
pub mod server;
