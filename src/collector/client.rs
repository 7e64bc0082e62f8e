//! HTTP client for the stats collector API
//!
//! Implements the collector wire protocol: an `/api/v1/stats` base path,
//! signed `sign`/`ts` headers on every request, and a `{code, msg, data}`
//! response envelope where code 200 means success.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::CollectorConfig;
use crate::error::{Error, Result};
use crate::types::{DailyStat, EventRecord, RemoteProfile};

use super::sign::sign_now;
use super::{ProfileRequest, Transport, UploadBatch};

/// Envelope return code signalling success
const SUCCESS_CODE: i32 = 200;

/// Common response envelope wrapping every collector reply
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct Envelope<T> {
    code: i32,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<T>,
}

/// Unwrap an envelope into its payload, mapping non-success codes to errors
fn envelope_data<T>(envelope: Envelope<T>) -> Result<Option<T>> {
    if envelope.code == SUCCESS_CODE {
        Ok(envelope.data)
    } else {
        Err(Error::Transport(format!(
            "collector error ({}): {}",
            envelope.code,
            envelope.msg.as_deref().unwrap_or("unknown")
        )))
    }
}

/// HTTP client for the collector API
pub struct CollectorClient {
    http_client: reqwest::Client,
    sign_secret: String,
}

impl CollectorClient {
    /// Create a new collector client from configuration
    ///
    /// Requests carry a bounded timeout; a hung request resolves as a
    /// transport error instead of stalling the upload coordinator forever.
    pub fn new(config: &CollectorConfig) -> Result<Self> {
        config.validate()?;

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            sign_secret: config.sign_secret.clone(),
        })
    }

    fn base_url(endpoint: &str) -> String {
        format!("{}/api/v1/stats", endpoint.trim_end_matches('/'))
    }

    /// Attach the signed header pair to a request
    fn signed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let sig = sign_now(&self.sign_secret);
        request.header("sign", sig.sign).header("ts", sig.ts)
    }

    /// Read a response body into the common envelope
    async fn read_envelope<T: DeserializeOwned>(response: reqwest::Response) -> Result<Envelope<T>> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(Error::Transport(format!(
                "API error ({}): {}",
                status, error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Decode(format!("failed to parse response: {}", e)))
    }
}

#[async_trait]
impl Transport for CollectorClient {
    async fn fetch_account_id(
        &self,
        endpoint: &str,
        app_key: &str,
        bundle_id: &str,
    ) -> Result<i64> {
        let url = format!("{}/app/id", Self::base_url(endpoint));

        let response = self
            .signed(self.http_client.get(&url))
            .query(&[("key", app_key), ("bundleId", bundle_id)])
            .send()
            .await
            .map_err(|e| Error::Transport(format!("HTTP request failed: {}", e)))?;

        let envelope: Envelope<i64> = Self::read_envelope(response).await?;
        Ok(envelope_data(envelope)?.unwrap_or(0))
    }

    async fn sync_profile(
        &self,
        endpoint: &str,
        request: &ProfileRequest,
    ) -> Result<RemoteProfile> {
        let url = format!("{}/app/user", Self::base_url(endpoint));

        let mut body = serde_json::json!({
            "appId": request.account_id,
            "uuid": request.client_uuid,
            "platform": request.profile.platform,
            "systemVersion": request.profile.system_version,
            "deviceModel": request.profile.device_model,
            "appVersion": request.profile.app_version,
            "appBuild": request.profile.app_build,
            "region": request.profile.region,
        });
        if request.user_id > 0 {
            body["id"] = serde_json::json!(request.user_id);
        }

        let response = self
            .signed(self.http_client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("HTTP request failed: {}", e)))?;

        let envelope: Envelope<RemoteProfile> = Self::read_envelope(response).await?;
        envelope_data(envelope)?
            .ok_or_else(|| Error::Decode("profile sync response missing data".to_string()))
    }

    async fn upload(&self, endpoint: &str, batch: &UploadBatch) -> Result<()> {
        let url = format!("{}/clc/{}", Self::base_url(endpoint), batch.account_id);
        let body = wire_batch(batch);

        let response = self
            .signed(self.http_client.post(&url))
            .header("auid", batch.user_id.to_string())
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("HTTP request failed: {}", e)))?;

        let envelope: Envelope<serde_json::Value> = Self::read_envelope(response).await?;
        envelope_data(envelope)?;
        Ok(())
    }
}

// ============================================
// Wire encoding
// ============================================

/// Encode a batch into the collector's abbreviated body format
fn wire_batch(batch: &UploadBatch) -> serde_json::Value {
    serde_json::json!({
        "stats": batch.stats.iter().map(wire_stat).collect::<Vec<_>>(),
        "events": batch.events.iter().map(wire_event).collect::<Vec<_>>(),
    })
}

/// A DailyStat serializes as {kind, count, date}
fn wire_stat(stat: &DailyStat) -> serde_json::Value {
    serde_json::json!({
        "t": stat.kind.code(),
        "c": stat.count,
        "d": stat.date.to_string(),
    })
}

/// An EventRecord serializes as {name, attrs-or-empty, timestamp}
fn wire_event(event: &EventRecord) -> serde_json::Value {
    serde_json::json!({
        "e": event.name,
        "a": event.attrs.clone().unwrap_or_default(),
        "t": event.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
    })
}
