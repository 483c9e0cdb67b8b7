//! Cross-node migration of buffered samples and RRD files.
//!
//! A [`ClusterDirectory`] is built once at startup. For every configured node it opens
//! a [`NodePool`]: `concurrency` persistent connections, each driven by one
//! [`MigrationWorker`], all fed from a single capacity-1 queue. Callers route a
//! [`Task`] by key and wait on its completion slot if they care about the outcome.

pub mod directory;
pub mod mode;
pub mod pool;
pub mod task;
pub mod worker;

pub use directory::ClusterDirectory;
pub use mode::MigrationMode;
pub use pool::NodePool;
pub use task::{Task, TaskMethod};
pub use worker::{MigrationContext, MigrationWorker, PeerConnection};
