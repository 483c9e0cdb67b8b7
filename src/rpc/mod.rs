//! JSON-RPC plumbing between graph nodes.
//!
//! - [`protocol`]: wire frames and method names
//! - [`client`]: multiplexed connection plus the [`Dialer`] seam
//! - [`gateway`]: timeout-bounded calls
//! - [`server`]: the peer side answering `Graph.*` methods

pub mod client;
pub mod gateway;
pub mod protocol;
pub mod server;

pub use client::{CallResult, Dialer, JsonRpcClient, RpcConnection, TcpDialer};
pub use gateway::call;
pub use protocol::{RpcRequest, RpcResponse, METHOD_GET_RRD, METHOD_QUERY, METHOD_SEND};
pub use server::GraphRpcServer;
