//! Campaign Messaging API Library
//!
//! This library provides the outbound campaign pipeline of the CRM: lead
//! ingestion with deduplication, rate limiting of external endpoints,
//! campaign scheduling, dispatch through the WhatsApp gateway, and inbound
//! reply correlation.
//!
//! # Modules
//!
//! - `api`: Routes and HTTP handlers.
//! - `core`: Pipeline components.
//! - `data`: Data access layer.
//! - `integrations`: External service integrations.
//! - `auth`: API token and JWT authentication, client IP resolution.
//! - `config`: Configuration management.
//! - `db`: Database connection, pool and migrations.
//! - `db_storage`: Postgres implementation of the store.
//! - `dedup`: Lead deduplication gate.
//! - `dispatch`: Per-message send and record.
//! - `errors`: Error handling types.
//! - `gateway_client`: WhatsApp gateway client.
//! - `handlers`: HTTP request handlers and shared state.
//! - `inbound`: Webhook reply correlation.
//! - `ingestion`: Single and bulk lead ingestion.
//! - `models`: Core data models.
//! - `poller`: Background dispatch loop.
//! - `rate_limiter`: Sliding-window request gate.
//! - `sanitize`: Message content checks and HTML encoding.
//! - `scheduler`: Campaign send plans.
//! - `store`: Storage trait shared by all components.
//! - `validation`: Lead field validation and phone normalization.
//! - `webhook_handler`: Gateway webhook endpoint.
//! - `webhook_models`: Gateway webhook payload models.

pub mod api;
pub mod core;
pub mod data;
pub mod integrations;

// Re-export primary modules for shared use in tests and the binary
pub mod auth;
pub mod config;
pub mod db;
pub mod db_storage;
pub mod dedup;
pub mod dispatch;
pub mod errors;
pub mod gateway_client;
pub mod handlers;
pub mod inbound;
pub mod ingestion;
pub mod models;
pub mod poller;
pub mod rate_limiter;
pub mod sanitize;
pub mod scheduler;
pub mod store;
pub mod validation;
pub mod webhook_handler;
pub mod webhook_models;
