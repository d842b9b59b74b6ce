//! Remote API layer: the typed client for the ProxLock backend.
//!
//! This module is organized into:
//!
//! - **[`client`]**: The [`ProxyApi`] trait and its reqwest implementation
//! - **[`models`]**: Request/response data structures for the `/me/...` endpoints
//! - **[`proxy`]**: Relaying requests through the proxy with a partial key
//!
//! # Endpoints
//!
//! - **User** (`/me`): the signed-in user and usage counters
//! - **Projects** (`/me/projects[/:id]`): project CRUD
//! - **Keys** (`/me/projects/:id/keys[/:key]`): split API key CRUD
//! - **DeviceCheck** (`/me/projects/:id/device-check`, `/me/device-check/`): credential upload,
//!   linking and the reusable pool
//!
//! Every call obtains a fresh bearer token first. Nothing is retried: a failed call is reported
//! and the user re-triggers the action.

pub mod client;
pub mod models;
pub mod proxy;

pub use client::{ProxyApi, ReqwestProxyApi};
