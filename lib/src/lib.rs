// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Ledger Device Management Kit (and CLI)
//!
//! This provides device discovery, connection and session management for
//! Ledger devices, along with built-in [actions] executed via the
//! [ledger_dmk_core] engine.
//!
//! ## Usage
//!
//! A [DeviceManager] lists available devices and connects to them,
//! returning a session id. Commands and actions are then executed
//! against the session:
//!
//! ```no_run
//! # async fn example() -> Result<(), ledger_dmk::Error> {
//! use ledger_dmk::{actions::OpenAppFlow, DeviceManager, DmkConfig, Filter};
//!
//! let m = DeviceManager::new(DmkConfig::default())?;
//!
//! let devices = m.list_devices(Filter::Any).await;
//! let id = m.connect(&devices[0]).await?;
//!
//! let h = m.execute(id, OpenAppFlow::new("Bitcoin"))?;
//! let r = h.result().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use log::debug;

use ledger_dmk_core::engine::{Flow, FlowHandle};

/// Re-export `ledger-dmk-core` for consumers
pub use ledger_dmk_core::{self as dmk_core, apdu};

pub mod actions;

pub mod config;
pub use config::{DmkConfig, SessionOptions};

pub mod connection;
pub use connection::{ConnectionState, PhysicalConnection};

mod error;
pub use error::Error;

pub mod session;
use session::{registry::SessionStream, Session, SessionId, SessionRegistry};

pub mod transport;

use apdu::{model::DeviceModelId, Command};

/// Device discovery filter
#[derive(Copy, Clone, Debug, PartialEq, clap::ValueEnum, strum::Display)]
#[non_exhaustive]
pub enum Filter {
    /// List all devices available using supported transport
    Any,
    /// List only HID devices
    Hid,
    /// List only TCP devices
    Tcp,
}

/// Ledger device information for listing, used by connect
#[derive(Clone, Debug)]
pub enum LedgerInfo {
    #[cfg(feature = "transport_hid")]
    Hid(hidapi::DeviceInfo),
    #[cfg(feature = "transport_tcp")]
    Tcp(transport::TcpOptions),
}

impl LedgerInfo {
    /// Stable device identifier used to group sessions
    pub fn device_id(&self) -> String {
        match self {
            #[cfg(feature = "transport_hid")]
            LedgerInfo::Hid(i) => format!(
                "usb:{}",
                i.serial_number()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| i.path().to_string_lossy().to_string())
            ),
            #[cfg(feature = "transport_tcp")]
            LedgerInfo::Tcp(o) => format!("tcp:{}", o.socket_addr()),
        }
    }

    /// Resolve the device model where known
    pub fn model(&self) -> Option<DeviceModelId> {
        match self {
            #[cfg(feature = "transport_hid")]
            LedgerInfo::Hid(i) => DeviceModelId::from_usb_product_id(i.product_id()),
            #[cfg(feature = "transport_tcp")]
            LedgerInfo::Tcp(_) => None,
        }
    }
}

impl std::fmt::Display for LedgerInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "transport_hid")]
            LedgerInfo::Hid(hid_info) => {
                write!(
                    f,
                    "{:16} (USB, {:04x}:{:04x}, {})",
                    hid_info.product_string().unwrap_or("UNKNOWN"),
                    hid_info.vendor_id(),
                    hid_info.product_id(),
                    hid_info.serial_number().unwrap_or("UNKNOWN"),
                )
            }
            #[cfg(feature = "transport_tcp")]
            LedgerInfo::Tcp(tcp_info) => {
                write!(
                    f,
                    "{:16} (TCP, {}:{})",
                    "Proxy", tcp_info.addr, tcp_info.port
                )
            }
        }
    }
}

/// Device manager, owns sessions for connected devices
pub struct DeviceManager {
    config: DmkConfig,
    registry: Arc<SessionRegistry>,
    #[cfg(feature = "transport_hid")]
    hid_api: Arc<std::sync::Mutex<hidapi::HidApi>>,
}

impl DeviceManager {
    /// Create a new device manager
    /// NOTE: only one manager should exist at a time with HID enabled (workaround for global HID context errors on macos/m1)
    pub fn new(config: DmkConfig) -> Result<Self, Error> {
        Ok(Self {
            config,
            registry: Arc::new(SessionRegistry::new()),
            #[cfg(feature = "transport_hid")]
            hid_api: Arc::new(std::sync::Mutex::new(
                hidapi::HidApi::new().map_err(|_| Error::HidInit)?,
            )),
        })
    }

    /// Manager configuration
    pub fn config(&self) -> &DmkConfig {
        &self.config
    }

    /// Session registry
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// List available ledger devices
    pub async fn list_devices(&self, filter: Filter) -> Vec<LedgerInfo> {
        #[allow(unused_mut)]
        let mut devices = vec![];

        #[cfg(feature = "transport_hid")]
        if filter == Filter::Any || filter == Filter::Hid {
            let mut api = self.hid_api.lock().unwrap_or_else(|e| e.into_inner());

            if let Err(e) = api.refresh_devices() {
                log::warn!("Failed to refresh HID devices: {}", e);
            }

            transport::hid::list_ledgers(&api)
                .cloned()
                .for_each(|d| devices.push(LedgerInfo::Hid(d)));
        }

        #[cfg(feature = "transport_tcp")]
        if filter == Filter::Any || filter == Filter::Tcp {
            // Try connecting to the configured proxy port
            let o = self.config.tcp.clone();
            if let Ok(_t) = tokio::net::TcpStream::connect(o.socket_addr()).await {
                // Return the proxy if connection succeeded
                devices.push(LedgerInfo::Tcp(o));
            };
        }

        #[cfg(not(any(feature = "transport_hid", feature = "transport_tcp")))]
        let _ = filter;

        debug!("Found {} devices: {:?}", devices.len(), devices);

        devices
    }

    /// Connect to a device, returning the new session id
    pub async fn connect(&self, info: &LedgerInfo) -> Result<SessionId, Error> {
        let opts = self.config.session.clone();
        let window = opts.reconnect_timeout();

        // Connect to device
        let (connection, model) = match info {
            #[cfg(feature = "transport_hid")]
            LedgerInfo::Hid(hid_info) => {
                let link = transport::HidLink::open(self.hid_api.clone(), hid_info)?;
                let c = PhysicalConnection::new(link.clone(), window);
                link.listen(Arc::new(c.clone()), window);

                (c, info.model().unwrap_or(DeviceModelId::NanoX))
            }
            #[cfg(feature = "transport_tcp")]
            LedgerInfo::Tcp(tcp_info) => {
                let link = transport::TcpLink::connect(tcp_info).await?;
                let c = PhysicalConnection::new(link.clone(), window);
                link.listen(Arc::new(c.clone()), window);

                (c, DeviceModelId::NanoSP)
            }
        };

        let session = Session::new(info.device_id(), model, connection, opts);
        let id = session.id();

        // Drop sessions for devices that fail to reconnect
        let registry = Arc::downgrade(&self.registry);
        session.on_terminated(move |id| {
            if let Some(r) = registry.upgrade() {
                tokio::spawn(async move { r.remove_session(id).await });
            }
        });

        self.registry.add_session(session.clone());

        if let Err(e) = session.initialise().await {
            self.registry.remove_session(id).await;
            return Err(e);
        }

        Ok(id)
    }

    /// Disconnect a session
    pub async fn disconnect(&self, id: SessionId) -> Result<(), Error> {
        // Check session exists
        let _ = self.registry.get_session_by_id(id)?;

        self.registry.remove_session(id).await;

        Ok(())
    }

    /// Fetch a session by id
    pub fn session(&self, id: SessionId) -> Result<Arc<Session>, Error> {
        self.registry.get_session_by_id(id)
    }

    /// Stream of connected sessions, replaying sessions connected so far
    pub fn sessions(&self) -> SessionStream {
        self.registry.sessions()
    }

    /// Execute an action on a session
    pub fn execute<F: Flow>(&self, id: SessionId, flow: F) -> Result<FlowHandle<F>, Error> {
        let s = self.registry.get_session_by_id(id)?;
        Ok(s.execute(flow))
    }

    /// Send a command on a session
    pub async fn send_command<C: Command>(
        &self,
        id: SessionId,
        cmd: &C,
    ) -> Result<C::Response, Error> {
        let s = self.registry.get_session_by_id(id)?;
        s.send_command(cmd, None).await
    }

    /// Close all sessions
    pub async fn close(&self) {
        self.registry.close().await;
    }
}
