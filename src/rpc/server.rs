//! Graph RPC server: the peer side of a migration.
//!
//! Answers `Graph.Send`, `Graph.Query` and `Graph.GetRrd` from the local
//! buffered-sample store and RRD directory. One task per client connection; requests
//! on a connection are served in order.

use crate::error::{MigrateError, Result};
use crate::model::{checksum, File64, GraphItem, QueryArgs, QueryResponse, RrdData, RrdKey, SimpleRpcResponse};
use crate::rpc::protocol::{encode_line, RpcRequest, RpcResponse, METHOD_GET_RRD, METHOD_QUERY, METHOD_SEND};
use crate::store::{GraphFlags, GraphItemStore};
use base64::{engine::general_purpose, Engine as _};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

#[derive(Clone)]
struct GraphService {
    store: Arc<dyn GraphItemStore>,
    storage: PathBuf,
    mark_missing: bool,
}

/// TCP server exposing the `Graph.*` methods.
pub struct GraphRpcServer {
    listener: TcpListener,
    service: GraphService,
}

impl GraphRpcServer {
    /// Binds `addr`; serving starts with [`GraphRpcServer::run`].
    pub async fn bind(
        addr: &str,
        store: Arc<dyn GraphItemStore>,
        storage: impl Into<PathBuf>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "Graph RPC server listening");
        Ok(Self {
            listener,
            service: GraphService {
                store,
                storage: storage.into(),
                mark_missing: false,
            },
        })
    }

    /// When enabled, a series first seen through `Graph.Send` whose RRD file does not
    /// exist locally is registered as `MISSING`, so a migration sweep fetches it.
    pub fn with_missing_detection(mut self, enabled: bool) -> Self {
        self.service.mark_missing = enabled;
        self
    }

    /// Address actually bound, useful with port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts clients until the task is dropped.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((socket, addr)) => {
                    let service = self.service.clone();
                    tokio::spawn(async move {
                        if let Err(e) = service.handle_client(socket, addr).await {
                            warn!(%addr, error = %e, "Client error");
                        }
                    });
                }
                Err(e) => error!(error = %e, "Accept error"),
            }
        }
    }
}

impl GraphService {
    async fn handle_client(&self, socket: TcpStream, addr: SocketAddr) -> Result<()> {
        debug!(%addr, "Client connected");
        let (read_half, mut write_half) = socket.into_split();
        let mut lines = BufReader::new(read_half).lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let response = match serde_json::from_str::<RpcRequest>(&line) {
                Ok(request) => self.dispatch(request).await,
                Err(e) => RpcResponse::err(0, format!("invalid request: {e}")),
            };
            write_half.write_all(&encode_line(&response)?).await?;
        }

        debug!(%addr, "Client disconnected");
        Ok(())
    }

    async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        let id = request.id;
        let param = request.param();
        let outcome = match request.method.as_str() {
            METHOD_SEND => self.send(param).await,
            METHOD_QUERY => self.query(param).await,
            METHOD_GET_RRD => self.get_rrd(param).await,
            other => Err(MigrateError::Remote(format!("rpc: can't find method {other}"))),
        };
        match outcome {
            Ok(result) => RpcResponse::ok(id, result),
            Err(e) => {
                debug!(id, method = %request.method, error = %e, "Call failed");
                RpcResponse::err(id, e.to_string())
            }
        }
    }

    async fn send(&self, param: Value) -> Result<Value> {
        let items: Vec<GraphItem> = serde_json::from_value(param)?;
        let mut by_key: HashMap<String, Vec<GraphItem>> = HashMap::new();
        for item in items {
            by_key.entry(item.cache_key()).or_default().push(item);
        }
        for (key, items) in by_key {
            debug!(%key, count = items.len(), "Received migrated samples");
            if self.mark_missing && self.store.get_flag(&key).is_err() && !self.rrd_exists(&key).await {
                self.store.ensure_key(&key, GraphFlags::MISSING);
            }
            self.store.push_all(&key, items);
        }
        Ok(serde_json::to_value(SimpleRpcResponse { code: 0 })?)
    }

    async fn query(&self, param: Value) -> Result<Value> {
        let args: QueryArgs = serde_json::from_value(param)?;
        let prefix = format!("{}_", checksum(&args.endpoint, &args.counter));
        let mut response = QueryResponse {
            endpoint: args.endpoint.clone(),
            counter: args.counter.clone(),
            ..Default::default()
        };

        if let Some(key) = self.store.keys().into_iter().find(|k| k.starts_with(&prefix)) {
            let rrd_key: RrdKey = key.parse()?;
            response.ds_type = rrd_key.ds_type;
            response.step = rrd_key.step;
            response.values = self
                .store
                .snapshot(&key)
                .into_iter()
                .filter(|item| item.timestamp >= args.start && item.timestamp <= args.end)
                .map(|item| RrdData {
                    timestamp: item.timestamp,
                    value: item.value,
                })
                .collect();
        }
        Ok(serde_json::to_value(response)?)
    }

    async fn rrd_exists(&self, key: &str) -> bool {
        match key.parse::<RrdKey>() {
            Ok(rrd_key) => tokio::fs::try_exists(rrd_key.file_name(&self.storage))
                .await
                .unwrap_or(false),
            // Never registered as MISSING; a fetch could not name a file for it.
            Err(_) => true,
        }
    }

    async fn get_rrd(&self, param: Value) -> Result<Value> {
        let key: String = serde_json::from_value(param)?;
        let path = key.parse::<RrdKey>()?.file_name(&self.storage);
        let body = tokio::fs::read(&path).await?;
        Ok(serde_json::to_value(File64 {
            filename: path.display().to_string(),
            body64: general_purpose::STANDARD.encode(body),
        })?)
    }
}
