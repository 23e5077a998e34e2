//! HTTP API module.
//!
//! # Purpose
//! First-party login and session endpoints, the admin API, system probes
//! and the OpenAPI document. OAuth protocol endpoints live in
//! `crate::oauth`.
pub mod admin;
pub mod auth;
pub mod error;
pub mod openapi;
pub mod system;
pub mod types;
