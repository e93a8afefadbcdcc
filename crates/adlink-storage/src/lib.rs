//! AdLink Storage - Credential store layer
//!
//! Persists connection and digital-asset rows in an embedded redb database
//! and exposes the narrow `ConnectionStore` trait the lifecycle core depends
//! on. Token blobs are sealed with AES-256-GCM before they reach disk.
//!
//! # Tables
//!
//! - `connections` - Connection rows (uuid → JSON bytes)
//! - `digital_assets` - DigitalAsset rows (uuid → JSON bytes)

pub mod encryption;
pub mod memory;
pub mod redb_store;
pub mod store;

pub use encryption::TokenCipher;
pub use memory::MemoryConnectionStore;
pub use redb_store::RedbConnectionStore;
pub use store::ConnectionStore;
