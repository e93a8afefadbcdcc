//! AdLink Models - Shared domain types for the connection lifecycle
//!
//! This crate defines the pure data vocabulary used across AdLink:
//! - Platforms and digital-asset kinds
//! - Persisted connection records with health telemetry
//! - Ephemeral credential bundles and the per-run working set
//! - Validation results returned to the agent layer
//!
//! No I/O lives here; higher layers (storage, connect) depend on these types.

pub mod connection;
pub mod credentials;
pub mod platform;
pub mod time;
pub mod validation;
pub mod working_set;

pub use connection::{Connection, DigitalAsset};
pub use credentials::{CredentialBundle, PlatformCredentials};
pub use platform::{AssetType, Platform};
pub use time::{is_token_expired, is_token_expired_with_buffer, parse_expiry, EXPIRY_BUFFER_MINUTES};
pub use validation::{ValidationResult, ValidationStatus, ValidationSummary};
pub use working_set::WorkingSet;
