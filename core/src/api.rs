// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Session capabilities exposed to device actions

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use strum::{Display, EnumString};

use ledger_dmk_apdu::{
    app_info::AppAndVersion, model::DeviceModelId, os_version::OsVersion, Apdu, ApduResponse,
    Command,
};

use crate::Error;

/// Device status as tracked by a session
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display, EnumString)]
pub enum DeviceStatus {
    /// Connected and responsive
    Connected,
    /// Connected but locked
    Locked,
    /// Executing an action
    Busy,
    /// Disconnected
    NotConnected,
}

/// Session state snapshot, populated lazily as commands succeed
#[derive(Clone, PartialEq, Debug)]
pub struct SessionState {
    pub status: DeviceStatus,
    pub device_model: DeviceModelId,
    pub current_app: Option<AppAndVersion>,
    /// Applications observed running on the device
    pub installed_apps: Vec<String>,
    /// OS version, available once fetched from the dashboard
    pub firmware_version: Option<OsVersion>,
}

impl SessionState {
    /// Create a new session state for a freshly connected device
    pub fn new(device_model: DeviceModelId) -> Self {
        Self {
            status: DeviceStatus::Connected,
            device_model,
            current_app: None,
            installed_apps: vec![],
            firmware_version: None,
        }
    }

    /// Record the running application
    pub fn observe_app(&mut self, app: &AppAndVersion) {
        if !app.is_dashboard() && !self.installed_apps.contains(&app.name) {
            self.installed_apps.push(app.name.clone());
        }

        self.current_app = Some(app.clone());
    }
}

/// Per-exchange options
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct SendOptions {
    /// Await link re-enumeration after a successful response
    pub triggers_disconnection: bool,
    /// Abort the exchange if no response is received in time
    pub abort_timeout: Option<Duration>,
}

/// Capabilities a session exposes to running actions
#[async_trait]
pub trait InternalApi: Send + Sync {
    /// Exchange a raw APDU with the device
    async fn send_apdu(&self, apdu: &Apdu, opts: SendOptions) -> Result<ApduResponse, Error>;

    /// Fetch the current session state
    fn session_state(&self) -> SessionState;

    /// Replace the session state
    fn set_session_state(&self, state: SessionState);

    /// Fetch the connected device model
    fn device_model(&self) -> DeviceModelId;
}

/// [Command] helpers for [InternalApi] implementers
#[async_trait]
pub trait InternalApiExt: InternalApi {
    /// Send a command and parse its response
    async fn send_command<C: Command>(&self, cmd: &C) -> Result<C::Response, Error> {
        self.send_command_with(cmd, None).await
    }

    /// Send a command with an optional abort timeout and parse its response
    async fn send_command_with<C: Command>(
        &self,
        cmd: &C,
        abort_timeout: Option<Duration>,
    ) -> Result<C::Response, Error>;
}

#[async_trait]
impl<T: InternalApi + ?Sized> InternalApiExt for T {
    async fn send_command_with<C: Command>(
        &self,
        cmd: &C,
        abort_timeout: Option<Duration>,
    ) -> Result<C::Response, Error> {
        let apdu = cmd.apdu()?;

        debug!("Sending command {}: {}", cmd.name(), apdu);

        let opts = SendOptions {
            triggers_disconnection: cmd.triggers_disconnection(),
            abort_timeout,
        };

        let resp = self.send_apdu(&apdu, opts).await?;

        Ok(cmd.parse_response(&resp)?)
    }
}
