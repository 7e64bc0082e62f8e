//! # appstats
//!
//! Embedded usage-stats buffer with background upload.
//!
//! This library provides:
//! - A durable SQLite buffer for daily usage counters and custom events
//! - Identity resolution against a remote stats collector
//! - An upload coordinator with cooldown, retry, and single-flight guarantees
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Every recorded signal lands in the local database first and is uploaded
//! opportunistically later. Host-facing calls on [`AppStats`] enqueue work and
//! return immediately; one worker task applies all state transitions in
//! order, and no failure anywhere in the pipeline ever reaches host code.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use appstats::{AppStats, Config, DeviceProfile, StaticDeviceInfo};
//!
//! # async fn run() {
//! let config = Config::load().expect("failed to load config");
//! let device = Arc::new(StaticDeviceInfo::new(
//!     DeviceProfile {
//!         platform: "linux".to_string(),
//!         system_version: "6.1".to_string(),
//!         device_model: "generic".to_string(),
//!         app_version: "1.0.0".to_string(),
//!         app_build: "1".to_string(),
//!         region: "US".to_string(),
//!     },
//!     "com.example.app",
//! ));
//!
//! let stats = AppStats::spawn(config, device).expect("failed to start stats service");
//! stats.register("my-app-key", "https://stats.example.com");
//! stats.on_first_launch();
//! stats.record_event("purchase", Some(serde_json::json!({"sku": "pro"})));
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::Database;
pub use device::{DeviceInfo, StaticDeviceInfo};
pub use error::{Error, Result};
pub use service::AppStats;
pub use types::*;

// Public modules
pub mod collector;
pub mod config;
pub mod db;
pub mod device;
pub mod error;
pub mod logging;
pub mod service;
pub mod types;
