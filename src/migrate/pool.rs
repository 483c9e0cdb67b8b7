//! Connections and queue of one cluster node.

use crate::error::{MigrateError, Result};
use crate::migrate::task::Task;
use crate::migrate::worker::{MigrationContext, MigrationWorker, PeerConnection};
use crate::rpc::client::Dialer;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::info;

/// Tasks a node's queue holds beyond the ones its workers are executing.
pub const NODE_QUEUE_CAPACITY: usize = 1;

/// `concurrency` workers of one node sharing a single bounded queue.
pub struct NodePool {
    node: String,
    addr: String,
    queue: mpsc::Sender<Task>,
    workers: Vec<JoinHandle<()>>,
}

impl NodePool {
    /// Dials every connection first, then starts one worker per connection.
    ///
    /// Fails without starting anything if any dial fails.
    pub async fn open(
        node: &str,
        addr: &str,
        concurrency: usize,
        dialer: Arc<dyn Dialer>,
        ctx: Arc<MigrationContext>,
    ) -> Result<Self> {
        let mut peers = Vec::with_capacity(concurrency);
        for _ in 0..concurrency {
            peers.push(PeerConnection::open(node, addr, dialer.clone()).await?);
        }

        let (queue, rx) = mpsc::channel(NODE_QUEUE_CAPACITY);
        let rx = Arc::new(Mutex::new(rx));
        let workers = peers
            .into_iter()
            .enumerate()
            .map(|(index, peer)| {
                let worker = MigrationWorker::new(index, peer, ctx.clone());
                tokio::spawn(worker.run(rx.clone()))
            })
            .collect();

        info!(node, addr, concurrency, "Node pool started");
        Ok(Self {
            node: node.to_string(),
            addr: addr.to_string(),
            queue,
            workers,
        })
    }

    /// Node name.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Node address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Number of workers.
    pub fn concurrency(&self) -> usize {
        self.workers.len()
    }

    /// Waits until the queue accepts `task`.
    pub async fn submit(&self, task: Task) -> Result<()> {
        self.queue
            .send(task)
            .await
            .map_err(|_| MigrateError::QueueClosed(self.node.clone()))
    }

    /// Closes the queue and waits for the workers to drain it.
    pub async fn shutdown(self) {
        let Self {
            node,
            queue,
            workers,
            ..
        } = self;
        drop(queue);
        for worker in workers {
            let _ = worker.await;
        }
        info!(node = %node, "Node pool stopped");
    }
}
