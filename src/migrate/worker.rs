//! Per-connection migration worker.
//!
//! Each worker owns one [`PeerConnection`] for its whole life and executes tasks from
//! its node's queue one at a time: `Idle -> Executing -> Idle`. A failed task never
//! stops the loop; the error goes to the task's completion slot or to the log.

use crate::error::{MigrateError, Result};
use crate::error_recovery::{handle_recoverable_error, Recoverable, RetryPolicy};
use crate::flush::RrdFlusher;
use crate::migrate::mode::MigrationMode;
use crate::migrate::task::{Task, TaskMethod};
use crate::model::{File64, QueryArgs, QueryResponse, RrdKey, SimpleRpcResponse};
use crate::rpc::client::{Dialer, RpcConnection};
use crate::rpc::gateway::call;
use crate::rpc::protocol::{METHOD_GET_RRD, METHOD_QUERY, METHOD_SEND};
use crate::store::{FlagGuard, GraphFlags, GraphItemStore};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

/// Collaborators and settings shared by every worker of a directory.
pub struct MigrationContext {
    /// Local buffered samples and flags.
    pub store: Arc<dyn GraphItemStore>,
    /// Replays samples into fetched RRD files.
    pub flusher: Arc<dyn RrdFlusher>,
    /// Push-vs-fetch signal for the default path.
    pub mode: Arc<MigrationMode>,
    /// Root directory of local RRD files.
    pub storage: PathBuf,
    /// Timeout applied to every remote call.
    pub call_timeout: Duration,
    /// How broken connections are redialed.
    pub reconnect: RetryPolicy,
}

/// A worker's dedicated connection to its node, with what it needs to redial.
pub struct PeerConnection {
    node: String,
    addr: String,
    dialer: Arc<dyn Dialer>,
    conn: Box<dyn RpcConnection>,
}

impl PeerConnection {
    /// Dials `addr` once; the error is returned as is.
    pub async fn open(node: &str, addr: &str, dialer: Arc<dyn Dialer>) -> Result<Self> {
        let conn = dialer.dial(addr).await?;
        Ok(Self {
            node: node.to_string(),
            addr: addr.to_string(),
            dialer,
            conn,
        })
    }

    /// Node this connection talks to.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Peer address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// The live connection.
    pub fn connection(&self) -> &dyn RpcConnection {
        self.conn.as_ref()
    }

    /// Closes the connection and redials it according to `policy`.
    ///
    /// With an unbounded policy this only returns once the peer accepts a new
    /// connection, blocking the calling worker until then.
    pub async fn reconnect(&mut self, policy: &RetryPolicy) -> Result<()> {
        self.conn.close();
        let attempts = handle_recoverable_error(self, policy).await?;
        info!(node = %self.node, addr = %self.addr, attempts, "Reconnected");
        Ok(())
    }

    /// Closes the connection.
    pub fn close(&self) {
        self.conn.close();
    }
}

#[async_trait]
impl Recoverable<MigrateError> for PeerConnection {
    async fn recover(&mut self) -> Result<()> {
        self.conn = self.dialer.dial(&self.addr).await?;
        Ok(())
    }
}

/// Executes migration tasks over one connection.
pub struct MigrationWorker {
    index: usize,
    peer: PeerConnection,
    ctx: Arc<MigrationContext>,
}

impl MigrationWorker {
    /// Creates worker `index` of `peer`'s node.
    pub fn new(index: usize, peer: PeerConnection, ctx: Arc<MigrationContext>) -> Self {
        Self { index, peer, ctx }
    }

    /// The worker's connection.
    pub fn peer(&self) -> &PeerConnection {
        &self.peer
    }

    /// Serves `queue` until every sender is dropped.
    pub async fn run(mut self, queue: Arc<Mutex<mpsc::Receiver<Task>>>) {
        debug!(node = %self.peer.node, worker = self.index, "Migration worker started");
        loop {
            let next = queue.lock().await.recv().await;
            let Some(Task { method, key, done }) = next else {
                break;
            };

            let op = method.name();
            let result = self.execute(method, &key).await;
            if let Err(e) = &result {
                warn!(
                    node = %self.peer.node,
                    worker = self.index,
                    key = %key,
                    op,
                    error = %e,
                    "Migration task failed"
                );
            }
            if let Some(done) = done {
                let _ = done.send(result);
            }
        }
        self.peer.close();
        debug!(node = %self.peer.node, worker = self.index, "Migration worker stopped");
    }

    /// Runs one task to completion.
    pub async fn execute(&mut self, method: TaskMethod, key: &str) -> Result<()> {
        match method {
            TaskMethod::Send => self.send_data(key).await,
            TaskMethod::Query { args, reply } => self.query_data(&args, reply).await,
            TaskMethod::Migrate => {
                if self.ctx.mode.prefer_push() {
                    self.send_data(key).await
                } else {
                    self.fetch_rrd(key).await
                }
            }
        }
    }

    /// Pushes the key's buffered samples to the peer.
    async fn send_data(&mut self, key: &str) -> Result<()> {
        let ctx = self.ctx.clone();
        let store = ctx.store.as_ref();

        let mut guard = FlagGuard::acquire(store, key, GraphFlags::SENDING)?;
        let items = store.pop_all(key);
        if items.is_empty() {
            return Ok(());
        }

        let sent = items.len();
        let result: Result<SimpleRpcResponse> =
            call(self.peer.connection(), METHOD_SEND, &items, ctx.call_timeout).await;
        match result {
            Ok(_) => {
                debug!(node = %self.peer.node, key, sent, "Sent buffered samples");
                Ok(())
            }
            Err(e) => {
                store.push_all(key, items);
                self.reconnect_after(&e).await;
                guard.fail();
                Err(e)
            }
        }
    }

    /// Forwards a query; no flag interaction.
    async fn query_data(
        &mut self,
        args: &QueryArgs,
        reply: oneshot::Sender<QueryResponse>,
    ) -> Result<()> {
        let timeout = self.ctx.call_timeout;
        let result: Result<QueryResponse> =
            call(self.peer.connection(), METHOD_QUERY, args, timeout).await;
        match result {
            Ok(response) => {
                let _ = reply.send(response);
                Ok(())
            }
            Err(e) => {
                self.reconnect_after(&e).await;
                Err(e)
            }
        }
    }

    /// Downloads the key's RRD file from the peer, then replays the buffered samples.
    async fn fetch_rrd(&mut self, key: &str) -> Result<()> {
        let ctx = self.ctx.clone();
        let store = ctx.store.as_ref();

        store.get_flag(key)?;
        let path = key.parse::<RrdKey>()?.file_name(&ctx.storage);

        let mut guard = FlagGuard::acquire(store, key, GraphFlags::FETCHING)?;
        let items = store.pop_all(key);
        if items.is_empty() {
            return Ok(());
        }

        let fetched: Result<File64> =
            call(self.peer.connection(), METHOD_GET_RRD, key, ctx.call_timeout).await;
        let file = match fetched {
            Ok(file) => file,
            Err(e) => {
                store.push_all(key, items);
                self.reconnect_after(&e).await;
                guard.fail();
                return Err(e);
            }
        };

        let outcome = match general_purpose::STANDARD.decode(file.body64.as_bytes()) {
            Ok(body) => write_rrd(&path, &body).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = outcome {
            store.push_all(key, items);
            guard.fail();
            return Err(e);
        }

        guard.clear_on_release(GraphFlags::MISSING);
        if let Err(e) = ctx.flusher.flush(&path, &items).await {
            store.push_all(key, items);
            guard.fail();
            return Err(e);
        }

        debug!(node = %self.peer.node, key, path = %path.display(), replayed = items.len(), "Fetched RRD file");
        Ok(())
    }

    /// Redials after a connection fault; local errors leave the connection alone.
    async fn reconnect_after(&mut self, err: &MigrateError) {
        if !err.is_connection_fault() {
            return;
        }
        let policy = self.ctx.reconnect.clone();
        if let Err(e) = self.peer.reconnect(&policy).await {
            warn!(node = %self.peer.node, worker = self.index, error = %e, "Reconnect gave up");
        }
    }
}

async fn write_rrd(path: &Path, body: &[u8]) -> Result<()> {
    let to_err = |source| MigrateError::RrdWrite {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(to_err)?;
    }
    tokio::fs::write(path, body).await.map_err(to_err)
}
