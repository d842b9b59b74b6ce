//! # proxlock: client for the ProxLock key-management proxy
//!
//! `proxlock` manages *projects* and their API-key credentials behind the ProxLock proxy. Keys are
//! never stored whole: when a key is created the backend splits it and returns one half, the
//! *partial key*, exactly once. Clients then send requests through the proxy with that partial key,
//! and the backend recombines the key before forwarding. Projects can also carry an Apple
//! DeviceCheck credential so only attested app installs can use their keys.
//!
//! ## Overview
//!
//! The crate keeps an in-memory view model consistent with the backend, which is the only source
//! of truth. There is no local cache and no persistence: every view fetches on load, every
//! mutation refetches what it changed, and dependent views refetch when told their data is stale.
//! Nothing is retried automatically; a failed call is reported and the user acts again.
//!
//! ### Control Flow
//!
//! A user intent (create a key, rename a project, link a credential) goes through a repository in
//! [`store`], which calls the backend through the [`api::ProxyApi`] trait. On success the
//! repository refetches the affected section and replaces it wholesale, then publishes one or more
//! [`invalidation::Topic`]s on the [`invalidation::InvalidationBus`]. Repositories subscribed to
//! those topics refetch in turn, so deleting a project on its detail page also removes it from the
//! project list without a manual refresh.
//!
//! ### Core Components
//!
//! The **API layer** ([`api`]) performs authenticated JSON calls under `/me/...`. Each call first
//! asks the [`auth::TokenProvider`] for a bearer token; the identity provider that issues it is an
//! external collaborator and the token is opaque here. Collections are decoded leniently (a body
//! that is not an array becomes an empty list) while single entities must decode exactly.
//!
//! The **store** ([`store`]) holds one repository per displayed collection. Each piece of a view is
//! a [`store::Section`] with its own data, error and loading flag, so the project page can show
//! its keys even when the project header failed to load.
//!
//! The **reveal flow** ([`reveal`]) is the only place a partial key lives after creation. It moves
//! from hidden to revealed once and to dismissed on copy or close, dropping the secret.
//!
//! The **presentation layer** ([`cli`]) renders views as terminal output, turns failures into
//! [`notices`] and shows the low request limit banner from [`usage`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use proxlock::{Config, cli::App, config::Args};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = Args::parse();
//!     let config = Config::load(&args)?;
//!     proxlock::telemetry::init_telemetry()?;
//!
//!     let app = App::new(config)?;
//!     if let Some(command) = args.command {
//!         app.execute(command).await;
//!     }
//!     proxlock::cli::print_notices(app.notices());
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod errors;
pub mod forms;
pub mod invalidation;
pub mod notices;
pub mod reveal;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod usage;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::Config;

#[cfg(test)]
mod test;
