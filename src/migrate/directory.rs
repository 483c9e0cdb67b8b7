//! Startup-built registry of the cluster: ring, node pools and mode flag.

use crate::config::MigrateConfig;
use crate::error::{MigrateError, Result};
use crate::migrate::mode::MigrationMode;
use crate::migrate::pool::NodePool;
use crate::migrate::task::Task;
use crate::migrate::worker::MigrationContext;
use crate::ring::ClusterRing;
use crate::rpc::client::Dialer;
use crate::store::GraphFlags;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Everything the dispatch side needs to route and enqueue migration work.
///
/// Membership is fixed after [`ClusterDirectory::start`]; draining queues before a ring
/// change is left to whoever orchestrates the cluster.
pub struct ClusterDirectory {
    ring: ClusterRing,
    pools: BTreeMap<String, NodePool>,
    ctx: Arc<MigrationContext>,
}

impl ClusterDirectory {
    /// Builds the ring and opens a pool for every node in `config.cluster`.
    ///
    /// Any failed initial dial aborts startup; pools opened so far are shut down.
    pub async fn start(
        config: &MigrateConfig,
        ctx: Arc<MigrationContext>,
        dialer: Arc<dyn Dialer>,
    ) -> Result<Self> {
        let ring = ClusterRing::new(config.replicas);
        let mut pools = BTreeMap::new();

        for (node, addr) in &config.cluster {
            match NodePool::open(node, addr, config.concurrency, dialer.clone(), ctx.clone()).await {
                Ok(pool) => {
                    ring.add_node(node);
                    pools.insert(node.clone(), pool);
                }
                Err(e) => {
                    for (_, pool) in pools {
                        pool.shutdown().await;
                    }
                    return Err(e);
                }
            }
        }

        info!(nodes = pools.len(), replicas = config.replicas, "Cluster directory ready");
        Ok(Self { ring, pools, ctx })
    }

    /// The consistent-hash ring.
    pub fn ring(&self) -> &ClusterRing {
        &self.ring
    }

    /// Shared push-vs-fetch flag.
    pub fn mode(&self) -> &Arc<MigrationMode> {
        &self.ctx.mode
    }

    /// Shared worker context.
    pub fn context(&self) -> &Arc<MigrationContext> {
        &self.ctx
    }

    /// Owner of `key`.
    pub fn locate_node(&self, key: &str) -> Option<String> {
        self.ring.locate_node(key)
    }

    /// Address of `node`.
    pub fn address(&self, node: &str) -> Option<&str> {
        self.pools.get(node).map(NodePool::addr)
    }

    /// Enqueues `task` on `node`, waiting while the queue is full.
    pub async fn submit(&self, node: &str, task: Task) -> Result<()> {
        let pool = self
            .pools
            .get(node)
            .ok_or_else(|| MigrateError::UnknownNode(node.to_string()))?;
        debug!(node, key = %task.key, op = task.method.name(), "Submitting task");
        pool.submit(task).await
    }

    /// Routes `task` by its key and enqueues it; returns the chosen node.
    pub async fn dispatch(&self, task: Task) -> Result<String> {
        let node = self
            .locate_node(&task.key)
            .ok_or_else(|| MigrateError::UnknownNode(format!("no owner for {}", task.key)))?;
        self.submit(&node, task).await?;
        Ok(node)
    }

    /// Queues a background migration for every key that is `MISSING`, idle, and holds
    /// buffered samples. Returns how many tasks were queued.
    pub async fn migrate_pending(&self) -> Result<usize> {
        let store = self.ctx.store.clone();
        let mut queued = 0;
        for key in store.keys() {
            let Ok(flags) = store.get_flag(&key) else {
                continue;
            };
            if !flags.contains(GraphFlags::MISSING) || flags.intersects(GraphFlags::IN_FLIGHT) {
                continue;
            }
            if store.snapshot(&key).is_empty() {
                continue;
            }
            self.dispatch(Task::migrate(key)).await?;
            queued += 1;
        }
        if queued > 0 {
            debug!(queued, "Queued pending migrations");
        }
        Ok(queued)
    }

    /// Closes every queue and waits for the workers.
    pub async fn shutdown(self) {
        for (_, pool) in self.pools {
            pool.shutdown().await;
        }
    }
}
