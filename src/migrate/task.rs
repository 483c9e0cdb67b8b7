//! Units of migration work.

use crate::error::Result;
use crate::model::{QueryArgs, QueryResponse};
use tokio::sync::oneshot;

/// Operation requested by a [`Task`].
#[derive(Debug, Default)]
pub enum TaskMethod {
    /// Push the key's buffered samples to the owner (`Graph.Send`).
    Send,
    /// Forward a query to the owner (`Graph.Query`); the answer goes to `reply`.
    Query {
        /// Query forwarded verbatim.
        args: QueryArgs,
        /// Slot receiving the remote answer on success.
        reply: oneshot::Sender<QueryResponse>,
    },
    /// Background migration: Send or Fetch depending on the [`MigrationMode`].
    ///
    /// [`MigrationMode`]: crate::migrate::MigrationMode
    #[default]
    Migrate,
}

impl TaskMethod {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            TaskMethod::Send => "send",
            TaskMethod::Query { .. } => "query",
            TaskMethod::Migrate => "migrate",
        }
    }
}

/// A migration request for one cache key, consumed exactly once by a worker.
#[derive(Debug)]
pub struct Task {
    /// What to do.
    pub method: TaskMethod,
    /// Cache key of the series.
    pub key: String,
    /// Receives the outcome exactly once, if present.
    pub done: Option<oneshot::Sender<Result<()>>>,
}

impl Task {
    /// Background migration of `key`.
    pub fn migrate(key: impl Into<String>) -> Self {
        Self {
            method: TaskMethod::Migrate,
            key: key.into(),
            done: None,
        }
    }

    /// Push `key`'s buffered samples.
    pub fn send(key: impl Into<String>) -> Self {
        Self {
            method: TaskMethod::Send,
            key: key.into(),
            done: None,
        }
    }

    /// Query routed by `key`; the receiver yields the answer on success.
    pub fn query(key: impl Into<String>, args: QueryArgs) -> (Self, oneshot::Receiver<QueryResponse>) {
        let (reply, rx) = oneshot::channel();
        let task = Self {
            method: TaskMethod::Query { args, reply },
            key: key.into(),
            done: None,
        };
        (task, rx)
    }

    /// Attaches a completion slot and returns its receiver.
    pub fn with_done(mut self) -> (Self, oneshot::Receiver<Result<()>>) {
        let (tx, rx) = oneshot::channel();
        self.done = Some(tx);
        (self, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_method_is_migrate() {
        assert_eq!(TaskMethod::default().name(), "migrate");
        let (task, _rx) = Task::send("k").with_done();
        assert!(task.done.is_some());
        assert_eq!(task.method.name(), "send");
    }
}
