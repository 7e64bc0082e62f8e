//! Core domain types for appstats
//!
//! These types mirror the three durable record kinds held in the local
//! database, plus the transient device/profile snapshots exchanged with the
//! collector.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Identity** | The durable record binding a local install to a remote account once resolved |
//! | **DailyStat** | A per-day, per-kind counter (download/launch/activate) |
//! | **EventRecord** | An append-only custom occurrence with optional structured attributes |
//! | **Unsent row** | A DailyStat or EventRecord with `uploaded == false`, eligible for the next batch |
//! | **DeviceProfile** | A live snapshot of host/device metadata, queried fresh at evaluation time |
//! | **RemoteProfile** | The collector's view of this install, returned by a profile sync |

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Identity
// ============================================

/// One row per installed app/device, keyed by an opaque application key.
///
/// `account_id == 0` means the identity has not yet been registered with the
/// remote collector; `client_uuid` is generated once and never changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    /// Locally assigned row id
    pub id: i64,
    /// Opaque application key (unique across all identities)
    pub app_key: String,
    /// Remote numeric account id (0 until resolved)
    pub account_id: i64,
    /// Remote numeric user id (0 until the first profile sync)
    pub user_id: i64,
    /// Immutable client UUID, generated at creation
    pub client_uuid: String,
    /// OS version at the last profile sync
    pub system_version: String,
    /// Device model string at the last profile sync
    pub device_model: String,
    /// App version at the last profile sync
    pub app_version: String,
    /// App build at the last profile sync
    pub app_build: String,
    /// Region code at the last profile sync
    pub region: String,
    /// Optional coarse location description
    pub location: Option<String>,
    /// Optional address string
    pub address: Option<String>,
    /// Optional latitude
    pub latitude: Option<String>,
    /// Optional longitude
    pub longitude: Option<String>,
}

impl Identity {
    /// Whether the identity is fully resolved against the collector.
    pub fn is_resolved(&self) -> bool {
        !self.app_key.is_empty() && self.account_id > 0 && self.user_id > 0
    }
}

/// Pure drift check: does the stored identity need a profile sync?
///
/// True when the remote user id is still unassigned, or any of the tracked
/// device metadata fields differs from the live snapshot. `platform` is sent
/// on sync but not drift-compared.
pub fn needs_profile_sync(identity: &Identity, current: &DeviceProfile) -> bool {
    identity.user_id == 0
        || identity.system_version != current.system_version
        || identity.device_model != current.device_model
        || identity.app_version != current.app_version
        || identity.region != current.region
        || identity.app_build != current.app_build
}

// ============================================
// Daily stats
// ============================================

/// Kind of daily usage counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatKind {
    /// First install (recorded once, paired with identity creation)
    Download,
    /// App launch
    Launch,
    /// Background-to-foreground activation
    Activate,
}

impl StatKind {
    /// Stable integer code used in storage and on the wire
    pub fn code(&self) -> i64 {
        match self {
            StatKind::Download => 0,
            StatKind::Launch => 1,
            StatKind::Activate => 2,
        }
    }

    /// Decode a stored integer code
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(StatKind::Download),
            1 => Some(StatKind::Launch),
            2 => Some(StatKind::Activate),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatKind::Download => "download",
            StatKind::Launch => "launch",
            StatKind::Activate => "activate",
        }
    }
}

/// One row per (app_key, kind, calendar date): counter semantics, not an
/// append-only log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyStat {
    /// Locally assigned row id
    pub id: i64,
    /// Owning application key
    pub app_key: String,
    /// Remote account id (0 until identity resolution backfills it)
    pub account_id: i64,
    /// Counter kind
    pub kind: StatKind,
    /// Trigger count for the day (>= 1)
    pub count: i64,
    /// Local calendar day
    pub date: NaiveDate,
    /// Whether the row has been acknowledged by the collector
    pub uploaded: bool,
}

// ============================================
// Events
// ============================================

/// Append-only custom event row; every call produces a new row, never merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Locally assigned row id
    pub id: i64,
    /// Owning application key
    pub app_key: String,
    /// Remote account id (0 until backfilled)
    pub account_id: i64,
    /// Event name
    pub name: String,
    /// Serialized JSON attribute payload, if any
    pub attrs: Option<String>,
    /// When the event was recorded
    pub timestamp: DateTime<Utc>,
    /// Whether the row has been acknowledged by the collector
    pub uploaded: bool,
}

// ============================================
// Device / remote profiles
// ============================================

/// Live snapshot of host/device metadata.
///
/// Queried fresh from the [`crate::device::DeviceInfo`] provider whenever
/// drift is evaluated or a profile sync request is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// Platform name (e.g. "iOS", "macOS", "linux"); sent on sync, not drift-compared
    pub platform: String,
    /// OS version string
    pub system_version: String,
    /// Device model identifier
    pub device_model: String,
    /// Host app version
    pub app_version: String,
    /// Host app build
    pub app_build: String,
    /// Region code
    pub region: String,
}

/// Profile object returned by the collector's profile-sync endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteProfile {
    /// Remote user id assigned by the collector
    #[serde(rename = "id")]
    pub user_id: i64,
    #[serde(rename = "systemVersion")]
    pub system_version: String,
    #[serde(rename = "deviceModel")]
    pub device_model: String,
    #[serde(rename = "appVersion")]
    pub app_version: String,
    #[serde(rename = "appBuild")]
    pub app_build: String,
    pub region: String,
}
