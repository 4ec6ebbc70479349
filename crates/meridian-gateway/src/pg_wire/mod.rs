//! PostgreSQL wire protocol bridge.
//!
//! ## Module structure
//!
//! - `config` - server configuration (environment-driven)
//! - `protocol` - wire messages, type OID mappings, constants
//! - `metadata` - catalog introspection dialect
//! - `server` - listener and session handling
//!
//! ## Statement lifecycle
//!
//! 1. Connection arrives, `database` startup parameter names the tenant
//! 2. Query arrives, classified as metadata or data
//! 3. Metadata: answered from the catalog snapshot, fully materialized
//! 4. Data: resolved through the generic resolver, rows streamed one at a
//!    time after the column list
//! 5. Completion marker, or the distinct empty-result marker

pub mod config;
pub mod metadata;
pub mod protocol;

mod server;

pub use config::PgServerConfig;
pub use server::PgServer;
