//! Collector transport layer
//!
//! The upload coordinator hands batches to a [`Transport`]; the reqwest-based
//! [`CollectorClient`] is the production implementation. Keeping the seam as a
//! trait lets tests inject a scripted transport and keeps the core free of
//! wire-format concerns.
//!
//! The transport never blocks local operation: the service issues calls as
//! detached tasks and absorbs every failure into retry/cooldown policy.

mod client;
mod sign;

pub use client::CollectorClient;
pub use sign::{sign_now, sign_timestamp, Signature};

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{DailyStat, DeviceProfile, EventRecord, RemoteProfile};

/// Profile-sync request payload
#[derive(Debug, Clone)]
pub struct ProfileRequest {
    /// Resolved remote account id
    pub account_id: i64,
    /// Remote user id; 0 means not yet assigned and is omitted on the wire
    pub user_id: i64,
    /// Immutable client UUID
    pub client_uuid: String,
    /// Live device metadata snapshot
    pub profile: DeviceProfile,
}

/// One upload batch: the unsent rows snapshotted at eligibility time
#[derive(Debug, Clone)]
pub struct UploadBatch {
    /// Resolved remote account id
    pub account_id: i64,
    /// Resolved remote user id
    pub user_id: i64,
    /// Unsent daily stats, oldest first
    pub stats: Vec<DailyStat>,
    /// Unsent events, oldest first
    pub events: Vec<EventRecord>,
}

impl UploadBatch {
    /// Whether there is anything to send
    pub fn is_empty(&self) -> bool {
        self.stats.is_empty() && self.events.is_empty()
    }
}

/// Remote collector endpoints consumed by the service.
///
/// The endpoint base URL is runtime data (it arrives with `register`), so it
/// is passed per call rather than baked into the transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Request a remote account id for an application key.
    async fn fetch_account_id(
        &self,
        endpoint: &str,
        app_key: &str,
        bundle_id: &str,
    ) -> Result<i64>;

    /// Push the current device profile and receive the remote view back.
    async fn sync_profile(&self, endpoint: &str, request: &ProfileRequest)
        -> Result<RemoteProfile>;

    /// Submit one batch of unsent stats and events.
    async fn upload(&self, endpoint: &str, batch: &UploadBatch) -> Result<()>;
}
