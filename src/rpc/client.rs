//! Multiplexed JSON-RPC client and the dialing seam used by workers.

use crate::error::{MigrateError, Result};
use crate::rpc::protocol::{encode_line, RpcRequest, RpcResponse};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Outcome of one remote call as delivered to its waiter.
pub type CallResult = Result<Value>;

/// A persistent connection able to issue calls asynchronously.
///
/// `go` must not block: it queues the request and hands back a receiver that resolves
/// once the peer answers or the connection dies.
pub trait RpcConnection: Send + Sync {
    /// Starts a call and returns the slot its result will be delivered to.
    fn go(&self, method: &str, params: Value) -> oneshot::Receiver<CallResult>;

    /// Shuts the connection down, failing every pending call.
    fn close(&self);
}

/// Opens connections to peer addresses.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Dials `addr` and returns a ready connection.
    async fn dial(&self, addr: &str) -> Result<Box<dyn RpcConnection>>;
}

/// Dials plain TCP JSON-RPC connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, addr: &str) -> Result<Box<dyn RpcConnection>> {
        let client = JsonRpcClient::connect(addr).await?;
        Ok(Box::new(client))
    }
}

struct ClientShared {
    addr: String,
    next_id: AtomicU64,
    closed: AtomicBool,
    pending: Mutex<HashMap<u64, oneshot::Sender<CallResult>>>,
}

impl ClientShared {
    fn shutdown(&self, reason: &str) {
        self.closed.store(true, Ordering::SeqCst);
        let pending: Vec<_> = self.pending.lock().drain().collect();
        if !pending.is_empty() {
            debug!(addr = %self.addr, pending = pending.len(), reason, "Failing pending calls");
        }
        for (_, waiter) in pending {
            let _ = waiter.send(Err(MigrateError::Transport(format!(
                "connection to {} shut down: {reason}",
                self.addr
            ))));
        }
    }

    fn complete(&self, response: RpcResponse) {
        let waiter = self.pending.lock().remove(&response.id);
        match waiter {
            // The waiter may already have given up on a timeout; the result is dropped.
            Some(waiter) => {
                let _ = waiter.send(response.into_result());
            }
            None => debug!(addr = %self.addr, id = response.id, "Response for unknown call"),
        }
    }
}

/// One TCP connection carrying any number of concurrent calls, matched by id.
pub struct JsonRpcClient {
    shared: Arc<ClientShared>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl JsonRpcClient {
    /// Connects to `addr` and starts the reader and writer tasks.
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| MigrateError::Dial {
                addr: addr.to_string(),
                source,
            })?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let shared = Arc::new(ClientShared {
            addr: addr.to_string(),
            next_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            pending: Mutex::new(HashMap::new()),
        });
        let (outbound, rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_loop(read_half, shared.clone()));
        let writer = tokio::spawn(write_loop(write_half, rx, shared.clone()));

        debug!(addr, "Connected JSON-RPC client");
        Ok(Self {
            shared,
            outbound,
            reader,
            writer,
        })
    }

    /// Address this client was dialed with.
    pub fn addr(&self) -> &str {
        &self.shared.addr
    }

    /// True once the connection has been closed or lost.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    fn fail_now(&self, err: MigrateError) -> oneshot::Receiver<CallResult> {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(err));
        rx
    }
}

impl RpcConnection for JsonRpcClient {
    fn go(&self, method: &str, params: Value) -> oneshot::Receiver<CallResult> {
        if self.is_closed() {
            return self.fail_now(MigrateError::Transport(format!(
                "connection to {} is shut down",
                self.shared.addr
            )));
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = match encode_line(&RpcRequest::new(id, method, params)) {
            Ok(frame) => frame,
            Err(err) => return self.fail_now(err),
        };

        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, tx);

        if self.outbound.send(frame).is_err() || self.is_closed() {
            if let Some(waiter) = self.shared.pending.lock().remove(&id) {
                let _ = waiter.send(Err(MigrateError::Transport(format!(
                    "connection to {} is shut down",
                    self.shared.addr
                ))));
            }
        }
        rx
    }

    fn close(&self) {
        self.reader.abort();
        self.writer.abort();
        self.shared.shutdown("closed by client");
    }
}

impl Drop for JsonRpcClient {
    fn drop(&mut self) {
        self.close();
    }
}

async fn read_loop(read_half: OwnedReadHalf, shared: Arc<ClientShared>) {
    let mut lines = BufReader::new(read_half).lines();
    let reason = loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match serde_json::from_str::<RpcResponse>(&line) {
                Ok(response) => shared.complete(response),
                Err(err) => {
                    warn!(addr = %shared.addr, error = %err, "Malformed response frame");
                    break "malformed response";
                }
            },
            Ok(None) => break "peer closed connection",
            Err(err) => {
                warn!(addr = %shared.addr, error = %err, "Read failed");
                break "read failed";
            }
        }
    };
    shared.shutdown(reason);
}

async fn write_loop(
    mut write_half: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    shared: Arc<ClientShared>,
) {
    while let Some(frame) = rx.recv().await {
        if let Err(err) = write_half.write_all(&frame).await {
            warn!(addr = %shared.addr, error = %err, "Write failed");
            shared.shutdown("write failed");
            return;
        }
    }
}
