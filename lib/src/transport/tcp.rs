// Copyright (c) 2022-2023 The MobileCoin Foundation

//! TCP frame proxy transport
//!
//! Frames are exchanged as fixed-size HID-style reports over a TCP stream,
//! as exposed by device simulators and USB-over-TCP proxies.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::Mutex,
    task::JoinHandle,
};

use ledger_dmk_apdu::frame::FrameConfig;
use ledger_dmk_core::TransportError;

use super::{FrameLink, LinkEvents};
use crate::Error;

/// Default TCP proxy port
pub const DEFAULT_TCP_PORT: u16 = 9999;

/// Interval between reconnection attempts
pub const RECONNECT_INTERVAL: Duration = Duration::from_millis(250);

/// TCP transport options
#[derive(Clone, PartialEq, Debug, clap::Args, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpOptions {
    /// Proxy address
    #[clap(long = "tcp-addr", default_value = "127.0.0.1")]
    pub addr: IpAddr,

    /// Proxy port
    #[clap(long = "tcp-port", default_value_t = DEFAULT_TCP_PORT)]
    pub port: u16,
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self {
            addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_TCP_PORT,
        }
    }
}

impl TcpOptions {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }
}

/// TCP [FrameLink]
pub struct TcpLink {
    opts: TcpOptions,
    cfg: FrameConfig,
    writer: Mutex<OwnedWriteHalf>,
    reader: std::sync::Mutex<Option<OwnedReadHalf>>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl TcpLink {
    /// Connect to a TCP frame proxy
    pub async fn connect(opts: &TcpOptions) -> Result<Arc<Self>, Error> {
        debug!("Connecting to {}", opts.socket_addr());

        let s = TcpStream::connect(opts.socket_addr()).await?;
        s.set_nodelay(true)?;

        let (r, w) = s.into_split();

        Ok(Arc::new(Self {
            opts: opts.clone(),
            cfg: FrameConfig::hid(),
            writer: Mutex::new(w),
            reader: std::sync::Mutex::new(Some(r)),
            task: std::sync::Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }

    /// Start forwarding received frames to the provided listener.
    ///
    /// On link loss the listener is notified and reconnection is attempted
    /// until `reconnect_timeout` elapses.
    pub fn listen(self: &Arc<Self>, events: Arc<dyn LinkEvents>, reconnect_timeout: Duration) {
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        let mut reader = match reader {
            Some(r) => r,
            None => {
                warn!("TCP link already listening");
                return;
            }
        };

        let link = self.clone();

        let task = tokio::spawn(async move {
            let mut buff = vec![0u8; link.cfg.frame_size];

            loop {
                match reader.read_exact(&mut buff).await {
                    Ok(_) => events.on_frame(&buff),
                    Err(e) => {
                        if link.closed.load(Ordering::SeqCst) {
                            trace!("TCP link closed");
                            return;
                        }

                        debug!("TCP link lost: {}", e);
                        break;
                    }
                }
            }

            events.on_lost();

            link.reconnect(events, reconnect_timeout).await;
        });

        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
    }

    async fn reconnect(&self, events: Arc<dyn LinkEvents>, reconnect_timeout: Duration) {
        let deadline = tokio::time::Instant::now() + reconnect_timeout;

        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(RECONNECT_INTERVAL).await;

            if self.closed.load(Ordering::SeqCst) {
                return;
            }

            match TcpLink::connect(&self.opts).await {
                Ok(l) => {
                    l.listen(events.clone(), reconnect_timeout);
                    events.on_reconnected(l);
                    return;
                }
                Err(e) => trace!("TCP reconnect failed: {}", e),
            }
        }

        debug!("TCP reconnection attempts exhausted");
    }
}

#[async_trait]
impl FrameLink for TcpLink {
    fn frame_config(&self) -> FrameConfig {
        self.cfg
    }

    async fn write_frame(&self, frame: &[u8]) -> Result<(), TransportError> {
        let mut w = self.writer.lock().await;

        w.write_all(frame)
            .await
            .map_err(|e| TransportError::WriteFailed(e.to_string()))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);

        if let Some(t) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            t.abort();
        }

        let mut w = self.writer.lock().await;
        if let Err(e) = w.shutdown().await {
            trace!("TCP shutdown: {}", e);
        }
    }
}
