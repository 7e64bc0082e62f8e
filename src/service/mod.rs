//! Public service handle and worker plumbing
//!
//! [`AppStats`] is the host-facing surface: every method enqueues a command
//! and returns immediately, and a single worker task applies them in arrival
//! order. Nothing here ever surfaces an error to the caller; failures are
//! logged and absorbed so host code paths stay unconditional.

mod retry;
mod worker;

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};

use crate::collector::{CollectorClient, Transport};
use crate::config::Config;
use crate::db::Database;
use crate::device::DeviceInfo;
use crate::error::{Error, Result};

use worker::Worker;

/// Commands applied by the worker in strict arrival order.
///
/// Host calls map to the first group; the second group carries network
/// completions and timer fires looped back by detached tasks.
pub(crate) enum Command {
    Register { app_key: String, endpoint: String },
    FirstLaunch,
    EnterBackground,
    BecomeActive,
    RecordEvent {
        name: String,
        attrs: Option<serde_json::Value>,
    },

    AccountIdResolved(Result<i64>),
    ProfileSynced(Result<crate::types::RemoteProfile>),
    UploadFinished {
        result: Result<()>,
        stat_ids: Vec<i64>,
        event_ids: Vec<i64>,
    },
    RetryFired,

    /// Test/shutdown aid: acknowledged once every earlier command is applied
    Barrier(oneshot::Sender<()>),
}

/// Snapshot of the resolved identifiers, shared with the handle accessors.
#[derive(Debug, Default, Clone)]
pub(crate) struct ResolvedIds {
    pub client_uuid: String,
    pub account_id: i64,
    pub user_id: i64,
}

/// Handle to a running stats service.
///
/// Cheap to clone; all clones feed the same worker. The worker stops once
/// every handle is dropped and in-flight commands have drained.
#[derive(Clone)]
pub struct AppStats {
    tx: mpsc::UnboundedSender<Command>,
    shared: Arc<Mutex<ResolvedIds>>,
}

impl AppStats {
    /// Start the service with the production HTTP transport.
    ///
    /// Opening the database may fail (missing permissions, corrupt file); the
    /// service still starts and every operation becomes a no-op, matching the
    /// contract that stats collection never takes the host down.
    pub fn spawn(config: Config, device: Arc<dyn DeviceInfo>) -> Result<Self> {
        let transport: Arc<dyn Transport> = Arc::new(CollectorClient::new(&config.collector)?);
        Ok(Self::spawn_with_transport(config, device, transport))
    }

    /// Start the service with a caller-supplied transport.
    pub fn spawn_with_transport(
        config: Config,
        device: Arc<dyn DeviceInfo>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let db = match open_database(&config) {
            Ok(db) => Some(db),
            Err(e) => {
                tracing::error!(error = %e, "Failed to open stats database, disabling collection");
                None
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Mutex::new(ResolvedIds::default()));

        let worker = Worker::new(
            db,
            transport,
            device,
            config.collector.clone(),
            tx.clone(),
            Arc::clone(&shared),
        );
        tokio::spawn(worker.run(rx));

        Self { tx, shared }
    }

    /// Register the application key and collector endpoint.
    ///
    /// Loads or creates the local identity and kicks off resolution against
    /// the collector. Must be called before recorded data can be attributed.
    pub fn register(&self, app_key: impl Into<String>, endpoint: impl Into<String>) {
        self.send(Command::Register {
            app_key: app_key.into(),
            endpoint: endpoint.into(),
        });
    }

    /// Record that the application finished launching.
    pub fn on_first_launch(&self) {
        self.send(Command::FirstLaunch);
    }

    /// Record that the application moved to the background.
    pub fn on_enter_background(&self) {
        self.send(Command::EnterBackground);
    }

    /// Record that the application became active.
    ///
    /// Consecutive calls without an intervening background transition count
    /// one activation.
    pub fn on_become_active(&self) {
        self.send(Command::BecomeActive);
    }

    /// Record a named event with optional structured attributes.
    ///
    /// Events with an empty name, or recorded before [`register`] has loaded
    /// an identity, are dropped.
    ///
    /// [`register`]: AppStats::register
    pub fn record_event(&self, name: impl Into<String>, attrs: Option<serde_json::Value>) {
        self.send(Command::RecordEvent {
            name: name.into(),
            attrs,
        });
    }

    /// The durable per-install client UUID, or empty before registration.
    pub fn client_uuid(&self) -> String {
        self.shared.lock().unwrap().client_uuid.clone()
    }

    /// The resolved remote account id, or 0 while unresolved.
    pub fn account_id(&self) -> i64 {
        self.shared.lock().unwrap().account_id
    }

    /// The resolved remote user id, or 0 while unresolved.
    pub fn user_id(&self) -> i64 {
        self.shared.lock().unwrap().user_id
    }

    /// Wait until every command sent before this call has been applied.
    ///
    /// Detached network tasks may still be in flight afterwards; this only
    /// flushes the serialized queue.
    pub async fn settle(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        self.send(Command::Barrier(done_tx));
        let _ = done_rx.await;
    }

    fn send(&self, command: Command) {
        // Fails only when the worker is gone, which means shutdown
        if self.tx.send(command).is_err() {
            tracing::debug!("Stats service worker is no longer running");
        }
    }
}

fn open_database(config: &Config) -> Result<Database> {
    let path = config.database_path();
    let db = Database::open(&path)
        .map_err(|e| Error::Config(format!("failed to open database {:?}: {}", path, e)))?;
    db.migrate()?;
    Ok(db)
}
