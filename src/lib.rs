//! Hemmer provider for ClickHouse
//!
//! Manages ClickHouse databases and users, and lists the databases, users
//! and roles that exist on a server.
//!
//! # Overview
//!
//! | Type | Kind | Attributes |
//! |---|---|---|
//! | `clickhouse_database` | resource | `database` |
//! | `clickhouse_user` | resource | `username`, `password` (sensitive) |
//! | `clickhouse_databases` | data source | `databases` (computed list) |
//! | `clickhouse_users` | data source | `users` (computed list) |
//! | `clickhouse_roles` | data source | `roles` (computed list) |
//!
//! The provider block takes `host`, `username` and `password`. Any of them
//! may be left out and supplied through `CLICKHOUSE_HOST`,
//! `CLICKHOUSE_USERNAME` or `CLICKHOUSE_PASSWORD` instead.
//!
//! # Handshake Protocol
//!
//! When the binary starts via [`serve`], it outputs a handshake string to stdout:
//!
//! ```text
//! HEMMER_PROVIDER|1|127.0.0.1:50051
//! ```
//!
//! Format: `HEMMER_PROVIDER|<protocol_version>|<address>`
//!
//! Hemmer spawns the provider as a subprocess and connects to that address
//! over gRPC.
//!
//! # Embedding
//!
//! ```ignore
//! use hemmer_provider_clickhouse::{init_logging, serve, ClickHouseProvider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging();
//!     serve(ClickHouseProvider::new()).await
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod connection;
pub mod data_sources;
pub mod error;
pub mod logging;
pub mod plan;
pub mod provider;
pub mod resources;
pub mod schema;
pub mod server;
pub mod testing;
pub mod types;
pub mod validation;

#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod generated;

// Re-export main types at crate root
pub use config::{ConnectionParams, ProviderConfig};
pub use connection::{ClickHouseConnector, Connection, Connector, Statement};
pub use error::ProviderError;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::ClickHouseProvider;
pub use schema::ProviderSchema;
pub use server::{serve, serve_with_options, ProviderService, ServeOptions};
pub use types::{
    AttributeChange, ImportedResource, PlanResult, ProviderMetadata, ServerCapabilities,
    HANDSHAKE_PREFIX, PROTOCOL_VERSION,
};
pub use validation::validate;

pub use async_trait::async_trait;
pub use serde_json;
