// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Device management kit configuration

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

#[cfg(feature = "transport_tcp")]
use crate::transport::TcpOptions;
use crate::Error;

/// Default session polling interval
pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 1000;

/// Default reconnection window
pub const DEFAULT_RECONNECT_TIMEOUT_MS: u64 = 5000;

/// Per-session options
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Interval between device state refreshes
    pub polling_interval_ms: u64,
    /// Window for a lost link to reconnect before the session terminates
    pub reconnect_timeout_ms: u64,
    /// Disable periodic refresh (the device is pinged once on connect)
    pub refresher_disabled: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            polling_interval_ms: DEFAULT_POLLING_INTERVAL_MS,
            reconnect_timeout_ms: DEFAULT_RECONNECT_TIMEOUT_MS,
            refresher_disabled: false,
        }
    }
}

impl SessionOptions {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnect_timeout_ms)
    }
}

/// Device management kit configuration
#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DmkConfig {
    /// Session options applied to new connections
    pub session: SessionOptions,

    /// TCP proxy used for device discovery
    #[cfg(feature = "transport_tcp")]
    pub tcp: TcpOptions,
}

impl DmkConfig {
    /// Load configuration from a JSON file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let s = tokio::fs::read_to_string(path).await?;
        let c = serde_json::from_str(&s)?;
        Ok(c)
    }
}
