//! End-to-end migration over loopback TCP against a live graph RPC server.

use graph_migrate::config::MigrateConfig;
use graph_migrate::error_recovery::RetryPolicy;
use graph_migrate::flush::JournalFlusher;
use graph_migrate::migrate::{ClusterDirectory, MigrationContext, MigrationMode, Task};
use graph_migrate::model::{File64, GraphItem, QueryArgs, RrdKey, SimpleRpcResponse};
use graph_migrate::rpc::{self, GraphRpcServer, JsonRpcClient, RpcConnection, TcpDialer};
use graph_migrate::store::{GraphFlags, GraphItemStore, MemoryGraphItems};
use graph_migrate::MigrateError;
use serde_json::json;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;

struct Peer {
    addr: SocketAddr,
    store: Arc<MemoryGraphItems>,
    storage: tempfile::TempDir,
}

async fn spawn_peer() -> Peer {
    spawn_peer_with(false).await
}

async fn spawn_peer_with(missing_detection: bool) -> Peer {
    let storage = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryGraphItems::new());
    let server = GraphRpcServer::bind("127.0.0.1:0", store.clone(), storage.path())
        .await
        .unwrap()
        .with_missing_detection(missing_detection);
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    Peer {
        addr,
        store,
        storage,
    }
}

struct Local {
    store: Arc<MemoryGraphItems>,
    storage: tempfile::TempDir,
    directory: ClusterDirectory,
}

async fn start_local(peer: &Peer) -> Local {
    let storage = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryGraphItems::new());
    let ctx = Arc::new(MigrationContext {
        store: store.clone(),
        flusher: Arc::new(JournalFlusher),
        mode: Arc::new(MigrationMode::new()),
        storage: storage.path().to_path_buf(),
        call_timeout: Duration::from_secs(2),
        reconnect: RetryPolicy::unbounded(Duration::from_millis(50)),
    });
    let mut config = MigrateConfig {
        enabled: true,
        concurrency: 2,
        replicas: 50,
        ..Default::default()
    };
    config
        .cluster
        .insert("graph-00".to_string(), peer.addr.to_string());
    let directory = ClusterDirectory::start(&config, ctx, Arc::new(TcpDialer))
        .await
        .unwrap();
    Local {
        store,
        storage,
        directory,
    }
}

fn sample(ts: i64) -> GraphItem {
    GraphItem::new("host1", "cpu.busy", "GAUGE", 60, ts, ts as f64)
}

fn seed(store: &MemoryGraphItems, flags: GraphFlags, timestamps: &[i64]) -> String {
    let key = sample(0).cache_key();
    store.ensure_key(&key, flags);
    for ts in timestamps {
        store.push(&key, sample(*ts));
    }
    key
}

fn write_peer_rrd(storage: &Path, key: &str, body: &[u8]) {
    let path = key.parse::<RrdKey>().unwrap().file_name(storage);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}

#[tokio::test]
async fn test_fetch_migrates_rrd_file() {
    let peer = spawn_peer().await;
    let local = start_local(&peer).await;
    let key = seed(&local.store, GraphFlags::MISSING, &[60, 120, 180]);
    write_peer_rrd(peer.storage.path(), &key, b"remote rrd contents");

    let (task, done) = Task::migrate(key.clone()).with_done();
    let node = local.directory.dispatch(task).await.unwrap();
    done.await.unwrap().unwrap();

    assert_eq!(node, "graph-00");
    let path = key.parse::<RrdKey>().unwrap().file_name(local.storage.path());
    assert_eq!(std::fs::read(&path).unwrap(), b"remote rrd contents");
    assert_eq!(local.store.get_flag(&key).unwrap(), GraphFlags::NONE);
    assert_eq!(local.store.len(&key), 0);
    let journal = std::fs::read_to_string(JournalFlusher::journal_path(&path)).unwrap();
    assert_eq!(journal.lines().count(), 3);

    local.directory.shutdown().await;
}

#[tokio::test]
async fn test_fetch_of_absent_remote_file_restores_samples() {
    let peer = spawn_peer().await;
    let local = start_local(&peer).await;
    let key = seed(&local.store, GraphFlags::MISSING, &[60, 120]);

    let (task, done) = Task::migrate(key.clone()).with_done();
    local.directory.dispatch(task).await.unwrap();
    let err = done.await.unwrap().unwrap_err();

    assert!(matches!(err, MigrateError::Remote(_)), "{err:?}");
    assert_eq!(local.store.len(&key), 2);
    assert_eq!(
        local.store.get_flag(&key).unwrap(),
        GraphFlags::MISSING | GraphFlags::ERROR
    );

    // the worker reconnected and keeps serving
    write_peer_rrd(peer.storage.path(), &key, b"late");
    let (task, done) = Task::migrate(key.clone()).with_done();
    local.directory.dispatch(task).await.unwrap();
    done.await.unwrap().unwrap();
    assert!(!local.store.get_flag(&key).unwrap().contains(GraphFlags::MISSING));

    local.directory.shutdown().await;
}

#[tokio::test]
async fn test_send_pushes_samples_to_peer() {
    let peer = spawn_peer().await;
    let local = start_local(&peer).await;
    local.directory.mode().set_prefer_push(true);
    let key = seed(&local.store, GraphFlags::NONE, &[60, 120, 180]);

    let (task, done) = Task::migrate(key.clone()).with_done();
    local.directory.dispatch(task).await.unwrap();
    done.await.unwrap().unwrap();

    assert_eq!(local.store.len(&key), 0);
    let mut received: Vec<i64> = peer.store.snapshot(&key).iter().map(|i| i.timestamp).collect();
    received.sort_unstable();
    assert_eq!(received, vec![60, 120, 180]);

    local.directory.shutdown().await;
}

#[tokio::test]
async fn test_query_returns_peer_samples_in_range() {
    let peer = spawn_peer().await;
    let local = start_local(&peer).await;
    seed(&peer.store, GraphFlags::NONE, &[60, 120, 180, 240]);

    let args = QueryArgs {
        start: 100,
        end: 200,
        consol_fun: "AVERAGE".to_string(),
        endpoint: "host1".to_string(),
        counter: "cpu.busy".to_string(),
    };
    let (task, reply) = Task::query(sample(0).cache_key(), args);
    let (task, done) = task.with_done();
    local.directory.dispatch(task).await.unwrap();
    done.await.unwrap().unwrap();

    let response = reply.await.unwrap();
    assert_eq!(response.ds_type, "GAUGE");
    assert_eq!(response.step, 60);
    let timestamps: Vec<i64> = response.values.iter().map(|v| v.timestamp).collect();
    assert_eq!(timestamps, vec![120, 180]);

    local.directory.shutdown().await;
}

#[tokio::test]
async fn test_startup_fails_on_unreachable_node() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = listener.local_addr().unwrap();
    drop(listener);

    let ctx = Arc::new(MigrationContext {
        store: Arc::new(MemoryGraphItems::new()),
        flusher: Arc::new(JournalFlusher),
        mode: Arc::new(MigrationMode::new()),
        storage: std::env::temp_dir(),
        call_timeout: Duration::from_secs(1),
        reconnect: RetryPolicy::default(),
    });
    let mut config = MigrateConfig {
        enabled: true,
        ..Default::default()
    };
    config.cluster.insert("graph-00".to_string(), dead.to_string());

    let result = ClusterDirectory::start(&config, ctx, Arc::new(TcpDialer)).await;
    assert!(matches!(result, Err(MigrateError::Dial { .. })));
}

#[tokio::test]
async fn test_unknown_method_error_is_verbatim() {
    let peer = spawn_peer().await;
    let client = JsonRpcClient::connect(&peer.addr.to_string()).await.unwrap();

    let result: graph_migrate::Result<SimpleRpcResponse> =
        rpc::call(&client, "Graph.Nope", &json!(null), Duration::from_secs(2)).await;

    match result {
        Err(MigrateError::Remote(msg)) => assert_eq!(msg, "rpc: can't find method Graph.Nope"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_silent_peer_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        // hold the socket open without answering
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(socket);
    });
    let client = JsonRpcClient::connect(&addr.to_string()).await.unwrap();
    let timeout = Duration::from_millis(150);

    let started = Instant::now();
    let result: graph_migrate::Result<SimpleRpcResponse> =
        rpc::call(&client, "Graph.Send", &json!([]), timeout).await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(MigrateError::Timeout(t)) if t == timeout));
    assert!(elapsed >= timeout);
    assert!(elapsed < timeout + Duration::from_secs(2));
    assert!(!client.is_closed());
}

#[tokio::test]
async fn test_peer_hangup_fails_pending_call() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut lines = BufReader::new(socket).lines();
        let _ = lines.next_line().await;
    });
    let client = JsonRpcClient::connect(&addr.to_string()).await.unwrap();

    let reply = client.go("Graph.Send", json!([]));
    let result = tokio::time::timeout(Duration::from_secs(5), reply)
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(result, Err(MigrateError::Transport(_))));
    assert!(client.is_closed());
}

#[tokio::test]
async fn test_get_rrd_refuses_paths_outside_storage() {
    let outer = tempfile::tempdir().unwrap();
    let storage = outer.path().join("root");
    std::fs::create_dir_all(&storage).unwrap();
    std::fs::write(outer.path().join("secret_GAUGE_60.rrd"), b"outside storage").unwrap();

    let server = GraphRpcServer::bind("127.0.0.1:0", Arc::new(MemoryGraphItems::new()), &storage)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    let client = JsonRpcClient::connect(&addr.to_string()).await.unwrap();

    for key in ["./../secret_GAUGE_60", "../../../../../tmp/secret_GAUGE_60"] {
        let result: graph_migrate::Result<File64> =
            rpc::call(&client, "Graph.GetRrd", key, Duration::from_secs(2)).await;
        match result {
            Err(MigrateError::Remote(msg)) => {
                assert!(msg.starts_with("Invalid cache key"), "{key}: {msg}")
            }
            other => panic!("{key}: unexpected {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_send_marks_series_without_rrd_as_missing() {
    let peer = spawn_peer_with(true).await;
    let client = JsonRpcClient::connect(&peer.addr.to_string()).await.unwrap();
    let fresh = sample(60);
    let known = GraphItem::new("host2", "mem.used", "GAUGE", 60, 60, 2.0);
    write_peer_rrd(peer.storage.path(), &known.cache_key(), b"present");

    let reply: SimpleRpcResponse = rpc::call(
        &client,
        "Graph.Send",
        &vec![fresh.clone(), known.clone()],
        Duration::from_secs(2),
    )
    .await
    .unwrap();

    assert_eq!(reply.code, 0);
    assert_eq!(peer.store.get_flag(&fresh.cache_key()).unwrap(), GraphFlags::MISSING);
    assert_eq!(peer.store.get_flag(&known.cache_key()).unwrap(), GraphFlags::NONE);
    assert_eq!(peer.store.len(&fresh.cache_key()), 1);
}

#[tokio::test]
async fn test_migrate_pending_fetches_missing_series() {
    let peer = spawn_peer().await;
    let local = start_local(&peer).await;
    let missing = seed(&local.store, GraphFlags::MISSING, &[60, 120]);
    write_peer_rrd(peer.storage.path(), &missing, b"owned elsewhere");
    let settled = GraphItem::new("host2", "mem.used", "GAUGE", 60, 60, 1.0).cache_key();
    local.store.ensure_key(&settled, GraphFlags::NONE);
    local.store.push(&settled, GraphItem::new("host2", "mem.used", "GAUGE", 60, 60, 1.0));
    local.store.ensure_key("idle_GAUGE_60", GraphFlags::MISSING);

    let queued = local.directory.migrate_pending().await.unwrap();
    assert_eq!(queued, 1);

    local.directory.shutdown().await;
    let path = missing.parse::<RrdKey>().unwrap().file_name(local.storage.path());
    assert_eq!(std::fs::read(path).unwrap(), b"owned elsewhere");
    assert_eq!(local.store.get_flag(&missing).unwrap(), GraphFlags::NONE);
    assert_eq!(local.store.len(&settled), 1);
}
