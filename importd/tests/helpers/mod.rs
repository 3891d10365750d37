//! Shared test fixtures
//!
//! Each test gets its own temp folder holding a fresh database, a temp
//! folder for downloads and any source files it writes.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::Request;
use http_body_util::BodyExt;
use importd::services::{
    Coordinator, FileSourceOpener, FsMaintenance, SqliteRecordSink, Validator,
};
use importd::store::{CoordinationStore, SqliteStore};
use importd::types::{
    MaintenanceHooks, RecordSink, RecordSource, RowOutcome, SourceOpener, SourceRecord,
};
use importd::ImportError;
use importd_common::api::auth::{now_millis, sign_request};
use importd_common::events::EventBus;
use importd_common::{ImportConfig, SourceKind};
use serde_json::Value;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

pub struct TestEnv {
    /// Keeps the folder alive for the duration of the test
    pub dir: TempDir,
    pub pool: SqlitePool,
    pub store: Arc<dyn CoordinationStore>,
    pub event_bus: EventBus,
}

impl TestEnv {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn temp_path(&self) -> PathBuf {
        self.dir.path().join("tmp")
    }
}

pub async fn setup() -> TestEnv {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("tmp")).unwrap();
    let pool = importd::db::init_database_pool(&dir.path().join("importd.db"))
        .await
        .unwrap();
    let store: Arc<dyn CoordinationStore> = Arc::new(SqliteStore::new(pool.clone(), 2000));

    TestEnv {
        dir,
        pool,
        store,
        event_bus: EventBus::new(256),
    }
}

/// Write a `sku,name` file with `rows` data rows
pub fn write_csv(dir: &Path, name: &str, rows: usize) -> PathBuf {
    let mut content = String::from("sku,name\n");
    for i in 1..=rows {
        content.push_str(&format!("SKU-{},Item {}\n", i, i));
    }
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

pub fn local_config(path: &Path, batch_size: usize) -> ImportConfig {
    ImportConfig {
        local_path: Some(path.to_path_buf()),
        batch_size,
        ..ImportConfig::default()
    }
}

/// Sink that waits before accepting every row; counts batches
pub struct SlowSink {
    pub delay: Duration,
    pub batches: AtomicUsize,
}

impl SlowSink {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            batches: AtomicUsize::new(0),
        })
    }

    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl RecordSink for SlowSink {
    async fn write_batch(
        &self,
        _session_id: Uuid,
        _config: &ImportConfig,
        records: &[SourceRecord],
    ) -> Result<Vec<RowOutcome>, ImportError> {
        tokio::time::sleep(self.delay).await;
        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(records.iter().map(|_| RowOutcome::Imported).collect())
    }
}

/// Sink that rejects every row
pub struct RejectingSink;

#[async_trait::async_trait]
impl RecordSink for RejectingSink {
    async fn write_batch(
        &self,
        _session_id: Uuid,
        _config: &ImportConfig,
        records: &[SourceRecord],
    ) -> Result<Vec<RowOutcome>, ImportError> {
        Ok(records
            .iter()
            .map(|_| RowOutcome::Rejected("malformed row".to_string()))
            .collect())
    }
}

/// Opener that waits before handing over the file source
pub struct SlowOpener {
    pub inner: FileSourceOpener,
    pub delay: Duration,
}

#[async_trait::async_trait]
impl SourceOpener for SlowOpener {
    async fn open(
        &self,
        kind: SourceKind,
        config: &ImportConfig,
    ) -> Result<Box<dyn RecordSource>, ImportError> {
        tokio::time::sleep(self.delay).await;
        self.inner.open(kind, config).await
    }
}

/// Coordinator whose sources open after `open_delay`, heartbeating every
/// `heartbeat` meanwhile
pub fn coordinator_with_slow_open(
    env: &TestEnv,
    open_delay: Duration,
    heartbeat: Duration,
    stuck_threshold_secs: u64,
) -> Coordinator {
    let client = reqwest::Client::new();
    let sources = SlowOpener {
        inner: FileSourceOpener::new(client.clone(), env.temp_path()),
        delay: open_delay,
    };

    Coordinator::builder()
        .db(env.pool.clone())
        .store(env.store.clone())
        .validator(Validator::new(client).with_probe_timeout(Duration::from_secs(2)))
        .sources(Arc::new(sources))
        .sink(Arc::new(SqliteRecordSink::new(env.pool.clone())))
        .maintenance(Arc::new(FsMaintenance::new(env.temp_path(), env.store.clone())))
        .event_bus(env.event_bus.clone())
        .data_dir(env.root().to_path_buf())
        .stuck_threshold_secs(stuck_threshold_secs)
        .open_heartbeat_interval(heartbeat)
        .build()
        .unwrap()
}

/// Coordinator over the test database with the default sink
pub fn coordinator(env: &TestEnv) -> Coordinator {
    coordinator_with_sink(env, Arc::new(SqliteRecordSink::new(env.pool.clone())))
}

pub fn coordinator_with_sink(env: &TestEnv, sink: Arc<dyn RecordSink>) -> Coordinator {
    coordinator_with(env, env.store.clone(), sink)
}

/// Coordinator over a wrapped store
pub fn coordinator_with(
    env: &TestEnv,
    store: Arc<dyn CoordinationStore>,
    sink: Arc<dyn RecordSink>,
) -> Coordinator {
    let client = reqwest::Client::new();
    let maintenance: Arc<dyn MaintenanceHooks> =
        Arc::new(FsMaintenance::new(env.temp_path(), store.clone()));

    Coordinator::builder()
        .db(env.pool.clone())
        .store(store)
        .validator(Validator::new(client.clone()).with_probe_timeout(Duration::from_secs(2)))
        .sources(Arc::new(FileSourceOpener::new(client, env.temp_path())))
        .sink(sink)
        .maintenance(maintenance)
        .event_bus(env.event_bus.clone())
        .data_dir(env.root().to_path_buf())
        .stuck_threshold_secs(300)
        .build()
        .unwrap()
}

/// JSON POST signed with `secret` at the current time
pub fn signed_post(uri: &str, mut body: Value, secret: i64) -> Request<Body> {
    sign_request(&mut body, secret, now_millis());
    json_post(uri, body)
}

pub fn json_post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn extract_json(body: Body) -> Value {
    let bytes = body.collect().await.expect("Should read body").to_bytes();
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}
