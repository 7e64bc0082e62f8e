//! Serialized service worker
//!
//! All store mutations and coordinator state transitions happen here, on one
//! task draining the command channel. Network calls run as detached tasks and
//! re-dispatch their results as commands, so completion handling always sees
//! the live state rather than a snapshot captured when the call started.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::collector::{ProfileRequest, Transport, UploadBatch};
use crate::config::CollectorConfig;
use crate::db::Database;
use crate::device::DeviceInfo;
use crate::types::{needs_profile_sync, Identity, StatKind};

use super::retry::RetrySlot;
use super::{Command, ResolvedIds};

/// Decide whether a non-forced upload may proceed relative to the last
/// successful one. Pure so the cooldown policy is testable without a clock.
pub(crate) fn upload_allowed(
    last_upload: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    cooldown: Duration,
    force: bool,
) -> bool {
    if force {
        return true;
    }
    match last_upload {
        None => true,
        Some(last) => match chrono::Duration::from_std(cooldown) {
            Ok(cooldown) => now.signed_duration_since(last) >= cooldown,
            Err(_) => false,
        },
    }
}

/// Owns the database handle and every piece of mutable coordinator state.
pub(crate) struct Worker {
    /// None when the backing file could not be opened; every operation
    /// becomes a no-op for the rest of the process lifetime.
    db: Option<Database>,
    transport: Arc<dyn Transport>,
    device: Arc<dyn DeviceInfo>,
    config: CollectorConfig,
    /// Loop-back sender for network completions and retry fires
    tx: UnboundedSender<Command>,
    shared: Arc<Mutex<ResolvedIds>>,

    identity: Option<Identity>,
    endpoint: String,

    retry: RetrySlot,
    retry_attempts: u32,

    became_active: bool,
    entered_background: bool,

    uploading: bool,
    last_upload: Option<DateTime<Utc>>,
}

impl Worker {
    pub fn new(
        db: Option<Database>,
        transport: Arc<dyn Transport>,
        device: Arc<dyn DeviceInfo>,
        config: CollectorConfig,
        tx: UnboundedSender<Command>,
        shared: Arc<Mutex<ResolvedIds>>,
    ) -> Self {
        Self {
            db,
            transport,
            device,
            config,
            tx,
            shared,
            identity: None,
            endpoint: String::new(),
            retry: RetrySlot::new(),
            retry_attempts: 0,
            became_active: false,
            entered_background: false,
            uploading: false,
            last_upload: None,
        }
    }

    /// Drain the command channel until every handle is dropped.
    pub async fn run(mut self, mut rx: UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            self.handle(command);
        }
        tracing::debug!("Service worker stopped");
    }

    pub fn handle(&mut self, command: Command) {
        match command {
            Command::Register { app_key, endpoint } => self.on_register(app_key, endpoint),
            Command::FirstLaunch => self.record_stat(StatKind::Launch),
            Command::EnterBackground => {
                self.entered_background = true;
            }
            Command::BecomeActive => self.on_become_active(),
            Command::RecordEvent { name, attrs } => self.on_record_event(name, attrs),
            Command::AccountIdResolved(result) => self.on_account_id(result),
            Command::ProfileSynced(result) => self.on_profile_synced(result),
            Command::UploadFinished {
                result,
                stat_ids,
                event_ids,
            } => self.on_upload_finished(result, stat_ids, event_ids),
            Command::RetryFired => self.on_retry_fired(),
            Command::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }

    /// Publish the resolved ids for the host-facing accessors.
    fn publish_shared(&self) {
        if let Some(identity) = &self.identity {
            let mut shared = self.shared.lock().unwrap();
            shared.client_uuid = identity.client_uuid.clone();
            shared.account_id = identity.account_id;
            shared.user_id = identity.user_id;
        }
    }

    // ============================================
    // Registration and identity resolution
    // ============================================

    fn on_register(&mut self, app_key: String, endpoint: String) {
        if app_key.is_empty() {
            tracing::warn!("Ignoring register call with empty app key");
            return;
        }
        self.endpoint = endpoint;

        let Some(db) = &self.db else {
            tracing::warn!("Storage unavailable, register is a no-op");
            return;
        };

        let profile = self.device.profile();
        let today = Local::now().date_naive();
        match db.get_or_create_identity(&app_key, &profile, today) {
            Ok(identity) => {
                self.identity = Some(identity);
                self.publish_shared();
                self.step_identity();
            }
            Err(e) => {
                tracing::error!(app_key, error = %e, "Failed to load or create identity");
            }
        }
    }

    /// Run the identity state machine one step from its current live state.
    ///
    /// Retry fires re-enter here, so a retry scheduled for account-id
    /// resolution naturally continues with profile sync once the account id
    /// has landed in the meantime.
    fn step_identity(&mut self) {
        let Some(identity) = &self.identity else {
            return;
        };

        if identity.account_id > 0 {
            self.sync_profile_if_needed();
        } else {
            self.request_account_id();
        }
    }

    fn request_account_id(&mut self) {
        if self.endpoint.is_empty() {
            tracing::debug!("No endpoint configured, skipping account id request");
            return;
        }
        let Some(identity) = &self.identity else {
            return;
        };

        let transport = Arc::clone(&self.transport);
        let tx = self.tx.clone();
        let endpoint = self.endpoint.clone();
        let app_key = identity.app_key.clone();
        let bundle_id = self.device.bundle_id();

        tokio::spawn(async move {
            let result = transport
                .fetch_account_id(&endpoint, &app_key, &bundle_id)
                .await;
            let _ = tx.send(Command::AccountIdResolved(result));
        });
    }

    fn on_account_id(&mut self, result: crate::error::Result<i64>) {
        match result {
            Ok(account_id) if account_id > 0 => {
                let Some(mut identity) = self.identity.clone() else {
                    return;
                };
                let Some(db) = &self.db else {
                    return;
                };

                match db.assign_account_id(&identity, account_id) {
                    Ok(()) => {
                        identity.account_id = account_id;
                        self.identity = Some(identity);
                        self.publish_shared();
                        self.sync_profile_if_needed();
                    }
                    Err(e) => {
                        // Treated as not having happened; next cold start
                        // resolves again.
                        tracing::error!(account_id, error = %e, "Failed to store account id");
                    }
                }
            }
            Ok(account_id) => {
                tracing::warn!(account_id, "Collector returned a non-positive account id");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Account id request failed");
                self.schedule_retry();
            }
        }
    }

    fn sync_profile_if_needed(&mut self) {
        let Some(identity) = &self.identity else {
            return;
        };

        let profile = self.device.profile();
        if !needs_profile_sync(identity, &profile) {
            self.retry.cancel();
            return;
        }

        if self.endpoint.is_empty() {
            tracing::debug!("No endpoint configured, skipping profile sync");
            return;
        }

        let request = ProfileRequest {
            account_id: identity.account_id,
            user_id: identity.user_id,
            client_uuid: identity.client_uuid.clone(),
            profile,
        };
        let transport = Arc::clone(&self.transport);
        let tx = self.tx.clone();
        let endpoint = self.endpoint.clone();

        tokio::spawn(async move {
            let result = transport.sync_profile(&endpoint, &request).await;
            let _ = tx.send(Command::ProfileSynced(result));
        });
    }

    fn on_profile_synced(&mut self, result: crate::error::Result<crate::types::RemoteProfile>) {
        match result {
            Ok(remote) => {
                let Some(mut identity) = self.identity.clone() else {
                    return;
                };
                let Some(db) = &self.db else {
                    return;
                };

                match db.sync_profile(&identity, &remote) {
                    Ok(()) => {
                        identity.user_id = remote.user_id;
                        identity.system_version = remote.system_version;
                        identity.device_model = remote.device_model;
                        identity.app_version = remote.app_version;
                        identity.app_build = remote.app_build;
                        identity.region = remote.region;
                        self.identity = Some(identity);
                        self.publish_shared();
                        self.retry.cancel();
                        self.maybe_upload(false);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to store synced profile");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Profile sync failed");
                self.schedule_retry();
            }
        }
    }

    fn schedule_retry(&mut self) {
        let tx = self.tx.clone();
        self.retry.schedule(self.config.retry_delay(), move || {
            let _ = tx.send(Command::RetryFired);
        });
    }

    fn on_retry_fired(&mut self) {
        if self.retry_attempts >= self.config.retry_max_attempts {
            tracing::warn!(
                attempts = self.retry_attempts,
                "Identity resolution retries exhausted until next start"
            );
            self.retry.cancel();
            return;
        }

        self.retry_attempts += 1;
        tracing::debug!(attempt = self.retry_attempts, "Retrying identity resolution");
        self.step_identity();
    }

    // ============================================
    // Recording
    // ============================================

    fn on_become_active(&mut self) {
        // Repeated activations without an intervening background transition
        // must not double-count.
        if self.became_active && !self.entered_background {
            return;
        }
        self.became_active = true;

        self.record_stat(StatKind::Activate);
        self.maybe_upload(false);

        self.entered_background = false;
    }

    fn record_stat(&mut self, kind: StatKind) {
        let Some(db) = &self.db else {
            return;
        };
        let Some(identity) = &self.identity else {
            tracing::debug!(kind = kind.as_str(), "Dropping stat, identity not loaded");
            return;
        };

        let today = Local::now().date_naive();
        if let Err(e) = db.record_daily_stat(&identity.app_key, identity.account_id, kind, today) {
            tracing::error!(kind = kind.as_str(), error = %e, "Failed to record daily stat");
        }
    }

    fn on_record_event(&mut self, name: String, attrs: Option<serde_json::Value>) {
        if name.is_empty() {
            tracing::debug!("Dropping event with empty name");
            return;
        }

        {
            let Some(db) = &self.db else {
                return;
            };
            let Some(identity) = &self.identity else {
                tracing::debug!(name, "Dropping event, identity not loaded");
                return;
            };

            let attrs = attrs.map(|value| value.to_string());
            if let Err(e) = db.record_event(
                &identity.app_key,
                identity.account_id,
                &name,
                attrs,
                Utc::now(),
            ) {
                tracing::error!(name, error = %e, "Failed to record event");
                return;
            }
        }

        // Events bypass the cooldown
        self.maybe_upload(true);
    }

    // ============================================
    // Upload coordination
    // ============================================

    fn maybe_upload(&mut self, force: bool) {
        let Some(db) = &self.db else {
            return;
        };
        let Some(identity) = &self.identity else {
            return;
        };
        if !identity.is_resolved() {
            return;
        }
        if self.uploading {
            tracing::debug!("Upload already in flight, skipping");
            return;
        }
        if self.endpoint.is_empty() {
            tracing::debug!("No endpoint configured, skipping upload");
            return;
        }
        if !upload_allowed(self.last_upload, Utc::now(), self.config.cooldown(), force) {
            tracing::debug!("Within upload cooldown, skipping");
            return;
        }

        let stats = match db.unsent_stats(&identity.app_key) {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read unsent stats");
                return;
            }
        };
        let events = match db.unsent_events(&identity.app_key) {
            Ok(events) => events,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read unsent events");
                return;
            }
        };

        let batch = UploadBatch {
            account_id: identity.account_id,
            user_id: identity.user_id,
            stats,
            events,
        };
        if batch.is_empty() {
            return;
        }

        let stat_ids: Vec<i64> = batch.stats.iter().map(|s| s.id).collect();
        let event_ids: Vec<i64> = batch.events.iter().map(|e| e.id).collect();
        tracing::debug!(
            stats = stat_ids.len(),
            events = event_ids.len(),
            "Submitting upload batch"
        );

        self.uploading = true;

        let transport = Arc::clone(&self.transport);
        let tx = self.tx.clone();
        let endpoint = self.endpoint.clone();

        tokio::spawn(async move {
            let result = transport.upload(&endpoint, &batch).await;
            let _ = tx.send(Command::UploadFinished {
                result,
                stat_ids,
                event_ids,
            });
        });
    }

    fn on_upload_finished(
        &mut self,
        result: crate::error::Result<()>,
        stat_ids: Vec<i64>,
        event_ids: Vec<i64>,
    ) {
        self.uploading = false;

        match result {
            Ok(()) => {
                let Some(db) = &self.db else {
                    return;
                };
                match db.mark_uploaded(&stat_ids, &event_ids) {
                    Ok(()) => {
                        self.last_upload = Some(Utc::now());
                        tracing::info!(
                            stats = stat_ids.len(),
                            events = event_ids.len(),
                            "Upload acknowledged"
                        );
                    }
                    Err(e) => {
                        // Rows stay pending; the collector tolerates
                        // at-least-once delivery.
                        tracing::error!(error = %e, "Failed to mark batch uploaded");
                    }
                }
            }
            Err(e) => {
                // Rows remain unsent; the next eligible trigger retries.
                tracing::warn!(error = %e, "Upload failed");
            }
        }
    }

    #[cfg(test)]
    fn database(&self) -> &Database {
        self.db.as_ref().expect("test worker has a database")
    }
}
