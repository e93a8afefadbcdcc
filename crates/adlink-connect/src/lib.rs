//! AdLink Connect - Connection lifecycle core
//!
//! This crate provides:
//! - OAuth token refresh against the Google and Facebook endpoints
//! - Transport negotiation (HTTP microservice sessions, subprocess fallback)
//! - A transport-agnostic unified client for tool listing and invocation
//! - Live tool validation with silent-credential-death detection
//! - Connection health telemetry and best-effort incident alerting
//!
//! The entry point is [`ConnectionOrchestrator::initialize`], which runs the
//! four-stage pipeline over a per-run working set and returns a
//! [`UnifiedClient`] plus per-platform [`ValidationResult`]s.

#![allow(dead_code)]

pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod notify;
pub mod oauth;
pub mod orchestrator;
pub mod transport;
pub mod validate;

// Re-export commonly used types
pub use adlink_models::{
    Connection, CredentialBundle, DigitalAsset, Platform, PlatformCredentials, ValidationResult,
    ValidationStatus, ValidationSummary, WorkingSet,
};
pub use client::{ToolHandle, UnifiedClient};
pub use config::{ConnectConfig, OAuthAppConfig};
pub use error::{ConnectError, RefreshFailureKind, Result};
pub use health::{should_retry, ConnectionHealth, DEFAULT_MAX_FAILURES};
pub use notify::{AlertSink, HttpAlertSink, Notifier, NullAlertSink};
pub use oauth::{RefreshOutcome, RefreshRemoval, TokenRefresher};
pub use orchestrator::{ConnectOutcome, ConnectionOrchestrator};
pub use transport::stdio::{StdioClient, StdioMultiClient, StdioServerSpec};
pub use transport::{
    NegotiatedTransport, Negotiation, ToolDescriptor, TransportFailure, TransportMode,
    TransportNegotiator,
};
pub use validate::{ToolValidator, ValidationRemoval, ValidationReport};
