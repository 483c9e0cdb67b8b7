//! Timeout-bounded remote calls.
//!
//! [`call`] starts the request on the connection and races its reply slot against a
//! timer. When the timer wins, the call is abandoned rather than cancelled: the request
//! stays in flight on the connection and its late reply is discarded by the client.

use crate::error::{MigrateError, Result};
use crate::rpc::client::RpcConnection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::trace;

/// Invokes `method` with `args` and decodes the reply, failing after `timeout`.
///
/// Remote errors are returned verbatim as [`MigrateError::Remote`]; a timer expiry
/// yields [`MigrateError::Timeout`].
pub async fn call<A, R>(
    conn: &dyn RpcConnection,
    method: &str,
    args: &A,
    timeout: Duration,
) -> Result<R>
where
    A: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let params = serde_json::to_value(args)?;
    let reply = conn.go(method, params);

    match tokio::time::timeout(timeout, reply).await {
        Err(_) => {
            trace!(method, ?timeout, "Call abandoned on timeout");
            Err(MigrateError::Timeout(timeout))
        }
        Ok(Err(_)) => Err(MigrateError::Transport(format!(
            "{method}: reply dropped by connection"
        ))),
        Ok(Ok(result)) => Ok(serde_json::from_value(result?)?),
    }
}
