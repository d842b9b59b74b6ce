//! Common type definitions.
//!
//! # ID Types
//!
//! Entity IDs are wrapped in type aliases:
//!
//! - [`UserId`]: User account identifier (issued by the identity provider, not a UUID)
//! - [`ProjectId`]: Project identifier
//! - [`ApiKeyId`]: Split API key identifier
//!
//! # Utility Functions
//!
//! - [`abbrev_uuid`]: Abbreviate UUIDs to first 8 chars for logging

use uuid::Uuid;

// Type aliases for IDs
/// User ids come from the identity provider and are opaque strings
pub type UserId = String;
pub type ProjectId = Uuid;
pub type ApiKeyId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}
