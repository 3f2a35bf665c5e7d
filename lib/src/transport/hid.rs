// Copyright (c) 2022-2023 The MobileCoin Foundation

//! USB HID transport
//!
//! HID devices are accessed via blocking [hidapi] calls, run on the tokio
//! blocking pool. Received reports are read by a blocking task and bridged
//! into the async runtime.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use hidapi::{DeviceInfo, HidApi, HidDevice};
use log::{debug, trace, warn};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

use ledger_dmk_apdu::{frame::FrameConfig, model::LEDGER_VID};
use ledger_dmk_core::TransportError;

use super::{FrameLink, LinkEvents};
use crate::Error;

/// Ledger HID usage page
pub const LEDGER_USAGE_PAGE: u16 = 0xffa0;

/// Read timeout for the reader thread, bounds close latency
const READ_TIMEOUT_MS: i32 = 100;

/// Interval between reconnection attempts
const RECONNECT_INTERVAL: Duration = Duration::from_millis(500);

/// Check whether a HID device is a Ledger APDU interface
pub fn is_ledger(d: &DeviceInfo) -> bool {
    d.vendor_id() == LEDGER_VID && (d.usage_page() == LEDGER_USAGE_PAGE || d.interface_number() == 0)
}

/// List Ledger devices known to the provided [HidApi] context
pub fn list_ledgers(api: &HidApi) -> impl Iterator<Item = &DeviceInfo> {
    api.device_list().filter(|d| is_ledger(d))
}

enum ReaderEvent {
    Frame(Vec<u8>),
    Lost,
}

/// USB HID [FrameLink]
pub struct HidLink {
    api: Arc<Mutex<HidApi>>,
    info: DeviceInfo,
    device: Arc<Mutex<HidDevice>>,
    cfg: FrameConfig,
    closed: Arc<AtomicBool>,
}

impl HidLink {
    /// Open a HID device
    pub fn open(api: Arc<Mutex<HidApi>>, info: &DeviceInfo) -> Result<Arc<Self>, Error> {
        let device = {
            let api = api.lock().unwrap_or_else(|e| e.into_inner());
            info.open_device(&api)?
        };

        debug!(
            "Opened HID device {:04x}:{:04x} ({})",
            info.vendor_id(),
            info.product_id(),
            info.path().to_string_lossy()
        );

        Ok(Arc::new(Self {
            api,
            info: info.clone(),
            device: Arc::new(Mutex::new(device)),
            cfg: FrameConfig::hid(),
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }

    /// Start forwarding received reports to the provided listener.
    ///
    /// On link loss the listener is notified and the device is re-opened
    /// by serial number until `reconnect_timeout` elapses.
    pub fn listen(self: &Arc<Self>, events: Arc<dyn LinkEvents>, reconnect_timeout: Duration) {
        let (tx, mut rx) = unbounded_channel();

        let device = self.device.clone();
        let closed = self.closed.clone();
        let frame_size = self.cfg.frame_size;

        tokio::task::spawn_blocking(move || read_reports(device, closed, frame_size, tx));

        let link = self.clone();

        tokio::spawn(async move {
            while let Some(e) = rx.recv().await {
                match e {
                    ReaderEvent::Frame(f) => events.on_frame(&f),
                    ReaderEvent::Lost => {
                        events.on_lost();
                        link.reconnect(events, reconnect_timeout).await;
                        return;
                    }
                }
            }
        });
    }

    async fn reconnect(&self, events: Arc<dyn LinkEvents>, reconnect_timeout: Duration) {
        let deadline = tokio::time::Instant::now() + reconnect_timeout;

        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(RECONNECT_INTERVAL).await;

            if self.closed.load(Ordering::SeqCst) {
                return;
            }

            match self.reopen() {
                Ok(Some(l)) => {
                    l.listen(events.clone(), reconnect_timeout);
                    events.on_reconnected(l);
                    return;
                }
                Ok(None) => trace!("HID device not yet available"),
                Err(e) => trace!("HID reopen failed: {}", e),
            }
        }

        debug!("HID reconnection attempts exhausted");
    }

    /// Re-enumerate devices and re-open the device with a matching serial number
    fn reopen(&self) -> Result<Option<Arc<Self>>, Error> {
        let info = {
            let mut api = self.api.lock().unwrap_or_else(|e| e.into_inner());
            api.refresh_devices()?;

            let serial = self.info.serial_number();

            // Devices re-enumerate with a new product id when switching apps
            list_ledgers(&api)
                .find(|d| serial.is_none() || d.serial_number() == serial)
                .cloned()
        };

        match info {
            Some(i) => Self::open(self.api.clone(), &i).map(Some),
            None => Ok(None),
        }
    }
}

/// Blocking report reader, exits on error or close
fn read_reports(
    device: Arc<Mutex<HidDevice>>,
    closed: Arc<AtomicBool>,
    frame_size: usize,
    tx: UnboundedSender<ReaderEvent>,
) {
    let mut buff = vec![0u8; frame_size];

    while !closed.load(Ordering::SeqCst) {
        let r = {
            let d = device.lock().unwrap_or_else(|e| e.into_inner());
            d.read_timeout(&mut buff, READ_TIMEOUT_MS)
        };

        match r {
            Ok(0) => continue,
            Ok(n) => {
                if tx.send(ReaderEvent::Frame(buff[..n].to_vec())).is_err() {
                    return;
                }
            }
            Err(e) => {
                if !closed.load(Ordering::SeqCst) {
                    warn!("HID read failed: {}", e);
                    let _ = tx.send(ReaderEvent::Lost);
                }
                return;
            }
        }
    }
}

#[async_trait]
impl FrameLink for HidLink {
    fn frame_config(&self) -> FrameConfig {
        self.cfg
    }

    async fn write_frame(&self, frame: &[u8]) -> Result<(), TransportError> {
        // Prefix HID report id
        let mut report = Vec::with_capacity(frame.len() + 1);
        report.push(0x00);
        report.extend_from_slice(frame);

        let device = self.device.clone();
        let r = tokio::task::spawn_blocking(move || {
            let d = device.lock().unwrap_or_else(|e| e.into_inner());
            d.write(&report).map(|n| (n, report.len()))
        })
        .await
        .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

        match r {
            Ok((n, _)) if n >= frame.len() => Ok(()),
            Ok((n, len)) => Err(TransportError::WriteFailed(format!(
                "short write ({} of {} bytes)",
                n, len
            ))),
            Err(e) => Err(TransportError::WriteFailed(e.to_string())),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
