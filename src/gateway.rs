//! Ground-control link for critical issue alerts.
//!
//! The monitor posts each newly raised or escalated issue to the ground
//! station relay. Delivery is best effort: the relay owns retries, and a
//! failed post leaves the issue unreported in the session.

use crate::alert::{ReportSink, SinkError};
use crate::core::issue::CriticalIssue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Ground-control relay configuration.
#[derive(Debug, Clone)]
pub struct GroundControlConfig {
    /// Relay host (default: 127.0.0.1)
    pub host: String,
    pub port: u16,
    /// Bearer authentication token
    pub token: String,
}

impl GroundControlConfig {
    pub fn new(host: impl Into<String>, port: u16, token: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            token: token.into(),
        }
    }

    /// Load the relay port and token written by the station runtime.
    ///
    /// Reads `<data dir>/maitri/runtime/groundcontrol.port` and
    /// `<data dir>/maitri/runtime/groundcontrol.token`.
    pub fn from_runtime_dir() -> Result<Self, GatewayError> {
        let runtime_dir = Self::default_runtime_dir()?;
        Self::from_dir(&runtime_dir)
    }

    /// Load port and token files from `runtime_dir`.
    pub fn from_dir(runtime_dir: &std::path::Path) -> Result<Self, GatewayError> {
        let port_path = runtime_dir.join("groundcontrol.port");
        let token_path = runtime_dir.join("groundcontrol.token");

        let port_str = std::fs::read_to_string(&port_path).map_err(|e| {
            GatewayError::Config(format!("failed to read relay port from {port_path:?}: {e}"))
        })?;
        let port: u16 = port_str.trim().parse().map_err(|e| {
            GatewayError::Config(format!("invalid port number '{}': {e}", port_str.trim()))
        })?;

        let token = std::fs::read_to_string(&token_path)
            .map_err(|e| {
                GatewayError::Config(format!("failed to read relay token from {token_path:?}: {e}"))
            })?
            .trim()
            .to_string();

        Ok(Self {
            host: "127.0.0.1".to_string(),
            port,
            token,
        })
    }

    fn default_runtime_dir() -> Result<PathBuf, GatewayError> {
        dirs::data_dir()
            .map(|dir| dir.join("maitri").join("runtime"))
            .ok_or_else(|| GatewayError::Config("could not determine data directory".to_string()))
    }

    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn alert_url(&self) -> String {
        format!("{}/v1/alerts", self.url())
    }

    pub fn health_url(&self) -> String {
        format!("{}/health", self.url())
    }
}

/// Ground-control client errors.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("ground control config error: {0}")]
    Config(String),

    #[error("ground control network error: {0}")]
    Network(String),

    #[error("ground control server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("ground control serialization error: {0}")]
    Serialization(String),
}

impl From<GatewayError> for SinkError {
    fn from(error: GatewayError) -> Self {
        match error {
            GatewayError::Server { .. } => SinkError::Rejected(error.to_string()),
            other => SinkError::Unavailable(other.to_string()),
        }
    }
}

/// Envelope posted to the relay for one issue.
#[derive(Debug, Clone, Serialize)]
pub struct AlertEnvelope {
    pub station_id: String,
    /// Timezone ground control reads timestamps in
    pub timezone: String,
    pub sent_at: DateTime<Utc>,
    pub issue: CriticalIssue,
    pub meta: AlertMeta,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertMeta {
    pub source: String,
    pub version: String,
}

/// Relay acknowledgement.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayResponse {
    #[serde(default)]
    pub accepted: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Async client for the ground-control relay.
pub struct GroundControlClient {
    config: GroundControlConfig,
    client: reqwest::Client,
    station_id: String,
    timezone: chrono_tz::Tz,
}

impl GroundControlClient {
    pub fn new(config: GroundControlConfig, timezone: chrono_tz::Tz) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to create HTTP client: {e}")))?;

        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let station_id = format!("maitri-{}-{}", hostname, &uuid::Uuid::new_v4().to_string()[..8]);

        Ok(Self {
            config,
            client,
            station_id,
            timezone,
        })
    }

    pub fn from_runtime(timezone: chrono_tz::Tz) -> Result<Self, GatewayError> {
        Self::new(GroundControlConfig::from_runtime_dir()?, timezone)
    }

    pub async fn test_connection(&self) -> Result<bool, GatewayError> {
        let response = self
            .client
            .get(self.config.health_url())
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }

    pub fn envelope(&self, issue: &CriticalIssue) -> AlertEnvelope {
        AlertEnvelope {
            station_id: self.station_id.clone(),
            timezone: self.timezone.to_string(),
            sent_at: Utc::now(),
            issue: issue.clone(),
            meta: AlertMeta {
                source: crate::core::report::PRODUCER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }

    /// Post one issue to the relay.
    pub async fn send_alert(&self, issue: &CriticalIssue) -> Result<GatewayResponse, GatewayError> {
        let response = self
            .client
            .post(self.config.alert_url())
            .header("Authorization", format!("Bearer {}", self.config.token))
            .json(&self.envelope(issue))
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(GatewayError::Server {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| GatewayError::Serialization(e.to_string()))
    }

    pub fn station_id(&self) -> &str {
        &self.station_id
    }
}

/// Blocking relay client; the alert worker thread uses this as its sink.
pub struct BlockingGroundControlClient {
    inner: GroundControlClient,
    runtime: tokio::runtime::Runtime,
}

impl BlockingGroundControlClient {
    pub fn new(config: GroundControlConfig, timezone: chrono_tz::Tz) -> Result<Self, GatewayError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to create runtime: {e}")))?;

        Ok(Self {
            inner: GroundControlClient::new(config, timezone)?,
            runtime,
        })
    }

    pub fn from_runtime(timezone: chrono_tz::Tz) -> Result<Self, GatewayError> {
        Self::new(GroundControlConfig::from_runtime_dir()?, timezone)
    }

    pub fn test_connection(&self) -> Result<bool, GatewayError> {
        self.runtime.block_on(self.inner.test_connection())
    }

    pub fn send_alert(&self, issue: &CriticalIssue) -> Result<GatewayResponse, GatewayError> {
        self.runtime.block_on(self.inner.send_alert(issue))
    }

    pub fn station_id(&self) -> &str {
        self.inner.station_id()
    }
}

impl ReportSink for BlockingGroundControlClient {
    fn report(&self, issue: &CriticalIssue) -> Result<(), SinkError> {
        let response = self.send_alert(issue)?;
        if response.accepted {
            Ok(())
        } else {
            Err(SinkError::Rejected(
                response.message.unwrap_or_else(|| "relay did not accept alert".to_string()),
            ))
        }
    }
}
