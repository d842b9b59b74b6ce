//! Request and response data models for the ProxLock backend.
//!
//! These structures mirror the JSON bodies of the `/me/...` endpoints. Field names on the wire
//! are camelCase, except the DeviceCheck identifiers which the backend spells `teamID` and
//! `keyID`.
//!
//! # Model Categories
//!
//! - [`users`]: The signed-in user and their usage counters
//! - [`projects`]: Projects and their create/update requests
//! - [`api_keys`]: Split API keys; the one-time partial key only appears in [`api_keys::CreatedKey`]
//! - [`device_check`]: Apple DeviceCheck credentials, uploads and links
//!
//! Secret material (full API keys, partial keys, DeviceCheck private keys) is held in
//! [`secrecy::SecretString`] and only exposed while a request body is being serialized.

pub mod api_keys;
pub mod device_check;
pub mod projects;
pub mod users;
