//! Device metadata provider
//!
//! The host application supplies current device/app metadata through the
//! [`DeviceInfo`] trait. The service queries it fresh whenever profile drift
//! is evaluated, so providers should return live values rather than a cached
//! startup snapshot when the host can observe changes.

use crate::types::DeviceProfile;

/// Source of current device/app metadata.
pub trait DeviceInfo: Send + Sync {
    /// Return the current device profile.
    fn profile(&self) -> DeviceProfile;

    /// Host application bundle identifier, sent with account-id requests.
    fn bundle_id(&self) -> String;
}

/// Fixed metadata provider for hosts whose device info cannot change within
/// one process lifetime (the common case).
#[derive(Debug, Clone)]
pub struct StaticDeviceInfo {
    profile: DeviceProfile,
    bundle_id: String,
}

impl StaticDeviceInfo {
    pub fn new(profile: DeviceProfile, bundle_id: impl Into<String>) -> Self {
        Self {
            profile,
            bundle_id: bundle_id.into(),
        }
    }
}

impl DeviceInfo for StaticDeviceInfo {
    fn profile(&self) -> DeviceProfile {
        self.profile.clone()
    }

    fn bundle_id(&self) -> String {
        self.bundle_id.clone()
    }
}
