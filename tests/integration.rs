//! Integration tests for the appstats service
//!
//! These drive the public [`AppStats`] handle end to end against a scripted
//! transport and a real on-disk database, verifying the full record → resolve
//! → upload flow and durability across service restarts.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use tempfile::TempDir;

use appstats::collector::{ProfileRequest, Transport, UploadBatch};
use appstats::config::StorageConfig;
use appstats::{
    AppStats, Config, Database, DeviceProfile, Error, RemoteProfile, Result, StaticDeviceInfo,
    StatKind,
};

const ENDPOINT: &str = "https://stats.example.com";
const APP_KEY: &str = "abc123";

fn test_profile() -> DeviceProfile {
    DeviceProfile {
        platform: "iOS".to_string(),
        system_version: "17.2".to_string(),
        device_model: "iPhone15,2".to_string(),
        app_version: "1.4.0".to_string(),
        app_build: "140".to_string(),
        region: "US".to_string(),
    }
}

fn remote_profile(user_id: i64) -> RemoteProfile {
    let p = test_profile();
    RemoteProfile {
        user_id,
        system_version: p.system_version,
        device_model: p.device_model,
        app_version: p.app_version,
        app_build: p.app_build,
        region: p.region,
    }
}

/// Config pointing the database at a temp directory
fn test_config(dir: &TempDir) -> (Config, PathBuf) {
    let db_path = dir.path().join("stats.db");
    let config = Config {
        storage: StorageConfig {
            database_path: Some(db_path.clone()),
        },
        ..Default::default()
    };
    (config, db_path)
}

/// Open a second connection to the service's database for assertions
fn inspect(db_path: &PathBuf) -> Database {
    Database::open(db_path).expect("open inspection connection")
}

/// Scripted transport: each call pops the next queued response, and anything
/// unscripted fails as a transport error.
#[derive(Default)]
struct ScriptedTransport {
    account_ids: Mutex<VecDeque<Result<i64>>>,
    profiles: Mutex<VecDeque<Result<RemoteProfile>>>,
    uploads: Mutex<VecDeque<Result<()>>>,
    upload_calls: AtomicUsize,
}

impl ScriptedTransport {
    fn happy_path(account_id: i64, user_id: i64, upload_count: usize) -> Self {
        Self {
            account_ids: Mutex::new(VecDeque::from([Ok(account_id)])),
            profiles: Mutex::new(VecDeque::from([Ok(remote_profile(user_id))])),
            uploads: Mutex::new((0..upload_count).map(|_| Ok(())).collect()),
            upload_calls: AtomicUsize::new(0),
        }
    }

    fn pop<T>(queue: &Mutex<VecDeque<Result<T>>>) -> Result<T> {
        queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Transport("no scripted response".to_string())))
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn fetch_account_id(&self, _: &str, _: &str, _: &str) -> Result<i64> {
        Self::pop(&self.account_ids)
    }

    async fn sync_profile(&self, _: &str, _: &ProfileRequest) -> Result<RemoteProfile> {
        Self::pop(&self.profiles)
    }

    async fn upload(&self, _: &str, _: &UploadBatch) -> Result<()> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        Self::pop(&self.uploads)
    }
}

fn start(config: Config, transport: Arc<ScriptedTransport>) -> AppStats {
    let device = Arc::new(StaticDeviceInfo::new(test_profile(), "com.example.app"));
    AppStats::spawn_with_transport(config, device, transport)
}

/// Poll until `check` passes or three seconds elapse
async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for: {}", what);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ============================================
// Fresh install flow
// ============================================

#[tokio::test]
async fn test_fresh_install_resolves_and_uploads() {
    let dir = TempDir::new().unwrap();
    let (config, db_path) = test_config(&dir);
    let transport = Arc::new(ScriptedTransport::happy_path(42, 7, 1));

    let stats = start(config, transport.clone());
    assert_eq!(stats.account_id(), 0);
    assert!(stats.client_uuid().is_empty());

    stats.register(APP_KEY, ENDPOINT);
    stats.settle().await;

    // Registration created the identity and its download stat immediately
    assert!(!stats.client_uuid().is_empty());

    // Resolution and the first upload complete in the background
    wait_until("identity resolution", || stats.user_id() == 7).await;
    assert_eq!(stats.account_id(), 42);

    let db = inspect(&db_path);
    wait_until("download stat upload", || {
        db.unsent_stats(APP_KEY).unwrap().is_empty()
    })
    .await;
    assert_eq!(transport.upload_calls.load(Ordering::SeqCst), 1);

    // The uploaded row carries the backfilled account id
    let today = Local::now().date_naive();
    let stat = db
        .get_daily_stat(APP_KEY, StatKind::Download, today)
        .unwrap()
        .expect("download stat exists");
    assert_eq!(stat.account_id, 42);
    assert_eq!(stat.count, 1);
    assert!(stat.uploaded);
}

#[tokio::test]
async fn test_identity_survives_restart() {
    let dir = TempDir::new().unwrap();
    let (config, db_path) = test_config(&dir);

    // No endpoint: identity is created locally, nothing leaves the device
    let stats = start(config.clone(), Arc::new(ScriptedTransport::default()));
    stats.register(APP_KEY, "");
    stats.settle().await;
    let first_uuid = stats.client_uuid();
    assert!(!first_uuid.is_empty());
    drop(stats);

    let stats = start(config, Arc::new(ScriptedTransport::default()));
    stats.register(APP_KEY, "");
    stats.settle().await;

    // Same install, same UUID, still exactly one download stat
    assert_eq!(stats.client_uuid(), first_uuid);
    let db = inspect(&db_path);
    let pending = db.unsent_stats(APP_KEY).unwrap();
    let downloads: Vec<_> = pending
        .iter()
        .filter(|s| s.kind == StatKind::Download)
        .collect();
    assert_eq!(downloads.len(), 1);
    assert_eq!(downloads[0].count, 1);
}

// ============================================
// Offline buffering
// ============================================

#[tokio::test]
async fn test_signals_buffer_locally_without_endpoint() {
    let dir = TempDir::new().unwrap();
    let (config, db_path) = test_config(&dir);
    let transport = Arc::new(ScriptedTransport::default());

    let stats = start(config, transport.clone());
    stats.register(APP_KEY, "");
    stats.on_first_launch();
    stats.on_become_active();
    stats.on_become_active(); // deduplicated
    stats.record_event("purchase", Some(serde_json::json!({"sku": "pro"})));
    stats.settle().await;

    let db = inspect(&db_path);
    let today = Local::now().date_naive();

    let launch = db
        .get_daily_stat(APP_KEY, StatKind::Launch, today)
        .unwrap()
        .unwrap();
    assert_eq!(launch.count, 1);

    let activate = db
        .get_daily_stat(APP_KEY, StatKind::Activate, today)
        .unwrap()
        .unwrap();
    assert_eq!(activate.count, 1);

    let events = db.unsent_events(APP_KEY).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name, "purchase");
    assert_eq!(events[0].attrs.as_deref(), Some(r#"{"sku":"pro"}"#));

    // Nothing was sent anywhere
    assert_eq!(transport.upload_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_upload_failure_keeps_rows_pending() {
    let dir = TempDir::new().unwrap();
    let (config, db_path) = test_config(&dir);
    // Identity resolves but every upload fails
    let transport = Arc::new(ScriptedTransport {
        account_ids: Mutex::new(VecDeque::from([Ok(42)])),
        profiles: Mutex::new(VecDeque::from([Ok(remote_profile(7))])),
        ..Default::default()
    });

    let stats = start(config, transport.clone());
    stats.register(APP_KEY, ENDPOINT);

    wait_until("identity resolution", || stats.user_id() == 7).await;
    wait_until("upload attempt", || {
        transport.upload_calls.load(Ordering::SeqCst) >= 1
    })
    .await;
    stats.settle().await;

    // The download stat is still buffered for a later attempt
    let db = inspect(&db_path);
    let pending = db.unsent_stats(APP_KEY).unwrap();
    assert_eq!(pending.len(), 1);
    assert!(!pending[0].uploaded);
}

// ============================================
// Event-triggered upload
// ============================================

#[tokio::test]
async fn test_event_bypasses_upload_cooldown() {
    let dir = TempDir::new().unwrap();
    let (config, db_path) = test_config(&dir);
    let transport = Arc::new(ScriptedTransport::happy_path(42, 7, 2));

    let stats = start(config, transport.clone());
    stats.register(APP_KEY, ENDPOINT);

    let db = inspect(&db_path);
    wait_until("first upload", || {
        db.unsent_stats(APP_KEY).unwrap().is_empty()
    })
    .await;

    // The default cooldown is 30 minutes; an event must not wait for it
    stats.record_event("purchase", None);
    wait_until("event upload", || {
        db.unsent_events(APP_KEY).unwrap().is_empty()
    })
    .await;
    assert_eq!(transport.upload_calls.load(Ordering::SeqCst), 2);
}
