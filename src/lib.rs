//! # Graph Migration Engine
//!
//! Moves buffered time-series samples and RRD files between the nodes of a
//! consistently hashed graph storage cluster when ownership of a series changes.
//!
//! ## Crate Structure
//!
//! - **`ring`**: consistent-hash ring locating the owner of a cache key.
//! - **`store`**: buffered-sample store interface, per-key flag register and an
//!   in-memory implementation.
//! - **`model`**: samples, cache keys, RRD file naming and RPC payloads.
//! - **`rpc`**: line-delimited JSON-RPC client, timeout gateway and the `Graph.*`
//!   peer server.
//! - **`migrate`**: tasks, per-node pools, workers and the `ClusterDirectory`.
//! - **`error_recovery`**: retry policy used to redial broken connections.
//! - **`flush`**: replay of drained samples into fetched RRD files.
//! - **`config`** / **`logging`** / **`error`**: ambient plumbing.

pub mod config;
pub mod error;
pub mod error_recovery;
pub mod flush;
pub mod logging;
pub mod migrate;
pub mod model;
pub mod ring;
pub mod rpc;
pub mod store;

pub use error::{MigrateError, Result};
pub use migrate::{ClusterDirectory, MigrationContext, MigrationMode, Task, TaskMethod};
pub use ring::ClusterRing;
pub use store::{GraphFlags, GraphItemStore, MemoryGraphItems};
