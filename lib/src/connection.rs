// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Physical connection to a device
//!
//! A [PhysicalConnection] carries APDU exchanges over a [FrameLink],
//! splitting requests into frames and reassembling responses. Only one
//! exchange may be in flight at a time.
//!
//! When the link is lost the connection waits a bounded window for the
//! transport to report a new link. Exchanges in flight or issued during
//! this window are parked and written to the new link once it is
//! available, and fail if the window expires.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use log::{debug, trace, warn};
use strum::Display;
use tokio::{
    sync::{oneshot, watch},
    task::JoinHandle,
    time::Instant,
};

use ledger_dmk_apdu::{
    frame::{FrameDecoder, FrameEncoder, FrameError},
    prelude::GetAppAndVersion,
    Apdu, ApduResponse, Command,
};
use ledger_dmk_core::{Error, SendOptions, TransportError};

use crate::transport::{FrameLink, LinkEvents};

/// Physical connection lifecycle state
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display)]
pub enum ConnectionState {
    /// Link established
    Open,
    /// Link lost, waiting for the transport to reconnect
    LostAwaitingReconnect,
    /// Link re-established after a loss
    Reconnected,
    /// Connection closed or reconnection window expired
    Terminated,
}

impl ConnectionState {
    fn is_usable(&self) -> bool {
        matches!(self, ConnectionState::Open | ConnectionState::Reconnected)
    }
}

/// Connection status published to waiting exchanges
#[derive(Copy, Clone, PartialEq, Debug)]
struct LinkStatus {
    state: ConnectionState,
    /// Incremented on each reconnection
    generation: u64,
    /// Set when terminated by [PhysicalConnection::close]
    closed: bool,
}

/// Owner callback invoked once if the reconnection window expires
pub type TerminationHook = Box<dyn FnOnce() + Send>;

/// Response channel for a single frame exchange
type ResponseTx = oneshot::Sender<Result<Vec<u8>, FrameError>>;

/// Single-flight exchange slot
struct Pending {
    id: u64,
    tx: Option<ResponseTx>,
}

struct Timer {
    id: u64,
    handle: JoinHandle<()>,
}

struct Inner {
    link: Arc<dyn FrameLink>,
    encoder: FrameEncoder,
    decoder: FrameDecoder,
    pending: Option<Pending>,
    timer: Option<Timer>,
    next_id: u64,
    on_terminated: Option<TerminationHook>,
}

struct Shared {
    inner: Mutex<Inner>,
    status: watch::Sender<LinkStatus>,
    reconnect_timeout: Duration,
}

/// Physical connection to a device, see [module docs][self]
#[derive(Clone)]
pub struct PhysicalConnection {
    shared: Arc<Shared>,
}

/// Outcome of writing a request and awaiting its response
enum Attempt {
    Response(Vec<u8>),
    Lost,
}

/// Clears the pending exchange slot when a send completes or is dropped
struct PendingGuard<'a> {
    conn: &'a PhysicalConnection,
    id: u64,
}

impl<'a> Drop for PendingGuard<'a> {
    fn drop(&mut self) {
        let mut inner = self.conn.lock();

        if matches!(&inner.pending, Some(p) if p.id == self.id) {
            inner.pending = None;
            inner.decoder.reset();
        }
    }
}

impl PhysicalConnection {
    /// Create a new connection over the provided link.
    ///
    /// `reconnect_timeout` bounds the wait for the transport to recover a lost link.
    pub fn new(link: Arc<dyn FrameLink>, reconnect_timeout: Duration) -> Self {
        let cfg = link.frame_config();

        let (status, _) = watch::channel(LinkStatus {
            state: ConnectionState::Open,
            generation: 0,
            closed: false,
        });

        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    link,
                    encoder: FrameEncoder::new(cfg),
                    decoder: FrameDecoder::new(cfg),
                    pending: None,
                    timer: None,
                    next_id: 0,
                    on_terminated: None,
                }),
                status,
                reconnect_timeout,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn status(&self) -> LinkStatus {
        *self.shared.status.borrow()
    }

    /// Fetch the current connection state
    pub fn state(&self) -> ConnectionState {
        self.status().state
    }

    /// Check whether an exchange is in flight
    pub fn is_sending(&self) -> bool {
        self.lock().pending.is_some()
    }

    /// Register a callback invoked once if the reconnection window expires.
    ///
    /// Not invoked when the connection is [closed][Self::close] by its owner.
    pub fn on_terminated(&self, f: impl FnOnce() + Send + 'static) {
        self.lock().on_terminated = Some(Box::new(f));
    }

    /// Exchange an APDU with the device
    pub async fn send(&self, apdu: &Apdu, opts: SendOptions) -> Result<ApduResponse, Error> {
        let request = apdu.to_bytes()?;

        // Claim the single-flight slot
        let id = {
            let mut inner = self.lock();

            if self.status().state == ConnectionState::Terminated {
                return Err(TransportError::Closed.into());
            }
            if inner.pending.is_some() {
                return Err(TransportError::AlreadySending.into());
            }

            let id = inner.next_id;
            inner.next_id += 1;
            inner.pending = Some(Pending { id, tx: None });

            id
        };
        let _guard = PendingGuard { conn: self, id };

        trace!("exchange {}: {}", id, hex::encode(&request));

        let raw = match opts.abort_timeout {
            Some(t) => tokio::time::timeout(t, self.exchange(&request))
                .await
                .map_err(|_| TransportError::SendTimeout)??,
            None => self.exchange(&request).await?,
        };

        let resp = ApduResponse::from_bytes(&raw)?;

        if (opts.triggers_disconnection || apdu.triggers_disconnection()) && resp.is_success() {
            debug!("{} acknowledged, awaiting disconnection", apdu);
            self.await_disconnection().await?;
        }

        Ok(resp)
    }

    /// Write a request and await its response, re-sending on the new link
    /// if the link is lost while waiting
    async fn exchange(&self, request: &[u8]) -> Result<Vec<u8>, Error> {
        let mut status_rx = self.shared.status.subscribe();
        let mut written = false;

        loop {
            let on_expiry = match written {
                false => TransportError::DisconnectedBeforeSending,
                true => TransportError::ReconnectionTimedOut,
            };
            self.wait_usable(&mut status_rx, on_expiry).await?;

            written = true;

            match self.attempt(request, &mut status_rx).await? {
                Attempt::Response(r) => return Ok(r),
                Attempt::Lost => debug!("link lost with exchange in flight"),
            }
        }
    }

    /// Write request frames and await a response or link loss
    async fn attempt(
        &self,
        request: &[u8],
        status_rx: &mut watch::Receiver<LinkStatus>,
    ) -> Result<Attempt, Error> {
        let (link, generation, frames, rx) = {
            let mut inner = self.lock();
            let inner = &mut *inner;

            let (tx, rx) = oneshot::channel();
            match inner.pending.as_mut() {
                Some(p) => p.tx = Some(tx),
                None => return Err(TransportError::Closed.into()),
            }
            inner.decoder.reset();

            (
                inner.link.clone(),
                self.status().generation,
                inner.encoder.encode_bytes(request)?,
                rx,
            )
        };

        for f in &frames {
            trace!("tx frame: {}", hex::encode(f));
            link.write_frame(f).await?;
        }

        tokio::select! {
            biased;

            r = rx => match r {
                Ok(r) => Ok(Attempt::Response(r?)),
                Err(_) => Ok(Attempt::Lost),
            },
            _ = wait_lost(status_rx, generation) => Ok(Attempt::Lost),
        }
    }

    /// Wait until the link is usable, failing if the connection terminates
    async fn wait_usable(
        &self,
        status_rx: &mut watch::Receiver<LinkStatus>,
        on_expiry: TransportError,
    ) -> Result<(), Error> {
        loop {
            let s = *status_rx.borrow_and_update();

            match s.state {
                ConnectionState::Open | ConnectionState::Reconnected => return Ok(()),
                ConnectionState::Terminated if s.closed => {
                    return Err(TransportError::DisconnectedWhileSending.into())
                }
                ConnectionState::Terminated => return Err(on_expiry.into()),
                ConnectionState::LostAwaitingReconnect => {
                    trace!("exchange parked awaiting reconnection");
                }
            }

            if status_rx.changed().await.is_err() {
                return Err(TransportError::Closed.into());
            }
        }
    }

    /// Wait for an app-switching command to complete its disconnect / reconnect cycle.
    ///
    /// The device is pinged with [GetAppAndVersion]: a response means the device
    /// stayed connected, a link loss means waiting for reconnection.
    async fn await_disconnection(&self) -> Result<(), Error> {
        let mut status_rx = self.shared.status.subscribe();
        let start = status_rx.borrow_and_update().generation;
        let deadline = Instant::now() + self.shared.reconnect_timeout;

        let ping = GetAppAndVersion.apdu()?.to_bytes()?;

        loop {
            let s = *status_rx.borrow_and_update();

            if s.generation > start && s.state.is_usable() {
                debug!("device reconnected");
                return Ok(());
            }

            match s.state {
                ConnectionState::Terminated if s.closed => {
                    return Err(TransportError::DisconnectedWhileSending.into())
                }
                ConnectionState::Terminated => {
                    return Err(TransportError::ReconnectionTimedOut.into())
                }
                ConnectionState::LostAwaitingReconnect => {
                    self.wait_usable(&mut status_rx, TransportError::ReconnectionTimedOut)
                        .await?;
                    debug!("device reconnected");
                    return Ok(());
                }
                ConnectionState::Open | ConnectionState::Reconnected => (),
            }

            let r = tokio::time::timeout_at(deadline, self.attempt(&ping, &mut status_rx)).await;

            match r {
                Err(_) => {
                    debug!("no disconnection observed");
                    return Ok(());
                }
                Ok(Ok(Attempt::Response(_))) => {
                    debug!("device still connected");
                    return Ok(());
                }
                Ok(Ok(Attempt::Lost)) => continue,
                Ok(Err(Error::Transport(TransportError::WriteFailed(e)))) => {
                    // Link going away, await the loss notification
                    trace!("ping write failed: {}", e);

                    match tokio::time::timeout_at(deadline, status_rx.changed()).await {
                        Ok(Ok(())) => continue,
                        Ok(Err(_)) => return Err(TransportError::Closed.into()),
                        Err(_) => return Err(TransportError::ReconnectionTimedOut.into()),
                    }
                }
                Ok(Err(e)) => return Err(e),
            }
        }
    }

    /// Close the connection, failing any in flight exchange
    pub async fn close(&self) {
        let link = {
            let mut inner = self.lock();

            if self.status().state == ConnectionState::Terminated {
                return;
            }

            if let Some(t) = inner.timer.take() {
                t.handle.abort();
            }
            if let Some(p) = inner.pending.as_mut() {
                p.tx = None;
            }

            self.shared.status.send_modify(|s| {
                s.state = ConnectionState::Terminated;
                s.closed = true;
            });

            inner.on_terminated = None;

            inner.link.clone()
        };

        debug!("closing connection");

        link.close().await;
    }

    /// Terminate the connection on reconnection window expiry, closing the link
    async fn on_timer_expired(&self, id: u64) {
        let (hook, link) = {
            let mut inner = self.lock();

            // Timer cancelled or replaced
            match &inner.timer {
                Some(t) if t.id == id => inner.timer = None,
                _ => return,
            }

            if self.status().state != ConnectionState::LostAwaitingReconnect {
                return;
            }

            warn!(
                "reconnection window ({:?}) expired, terminating connection",
                self.shared.reconnect_timeout
            );

            if let Some(p) = inner.pending.as_mut() {
                p.tx = None;
            }

            self.shared.status.send_modify(|s| {
                s.state = ConnectionState::Terminated;
            });

            (inner.on_terminated.take(), inner.link.clone())
        };

        if let Some(f) = hook {
            f();
        }

        link.close().await;
    }
}

impl LinkEvents for PhysicalConnection {
    fn on_frame(&self, frame: &[u8]) {
        let mut inner = self.lock();
        let inner = &mut *inner;

        let tx = match inner.pending.as_mut() {
            Some(Pending { tx: tx @ Some(_), .. }) => tx,
            _ => {
                trace!("dropping frame with no exchange pending: {}", hex::encode(frame));
                return;
            }
        };

        trace!("rx frame: {}", hex::encode(frame));

        let r = match inner.decoder.decode(frame) {
            Ok(None) => return,
            Ok(Some(m)) => Ok(m),
            Err(e) => {
                warn!("frame decode failed: {}", e);
                Err(e)
            }
        };

        if let Some(tx) = tx.take() {
            let _ = tx.send(r);
        }
    }

    fn on_lost(&self) {
        let mut inner = self.lock();

        if !self.status().state.is_usable() {
            return;
        }

        debug!(
            "link lost, awaiting reconnection for {:?}",
            self.shared.reconnect_timeout
        );

        inner.decoder.reset();

        let id = inner.next_id;
        inner.next_id += 1;

        let c = self.clone();
        let timeout = self.shared.reconnect_timeout;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            c.on_timer_expired(id).await;
        });

        if let Some(t) = inner.timer.replace(Timer { id, handle }) {
            t.handle.abort();
        }

        self.shared.status.send_modify(|s| {
            s.state = ConnectionState::LostAwaitingReconnect;
        });
    }

    fn on_reconnected(&self, link: Arc<dyn FrameLink>) {
        let mut inner = self.lock();

        match self.status().state {
            ConnectionState::Terminated => {
                warn!("reconnection after termination, ignoring");
                return;
            }
            ConnectionState::Open | ConnectionState::Reconnected => {
                debug!("link replaced without loss");
            }
            ConnectionState::LostAwaitingReconnect => {
                debug!("link reconnected");
            }
        }

        if let Some(t) = inner.timer.take() {
            t.handle.abort();
        }

        let cfg = link.frame_config();
        inner.encoder = FrameEncoder::new(cfg);
        inner.decoder = FrameDecoder::new(cfg);
        inner.link = link;

        self.shared.status.send_modify(|s| {
            s.state = ConnectionState::Reconnected;
            s.generation += 1;
        });
    }
}

/// Resolve once the link for `generation` is lost or replaced, or the connection terminates
async fn wait_lost(status_rx: &mut watch::Receiver<LinkStatus>, generation: u64) {
    loop {
        let s = *status_rx.borrow_and_update();
        if !s.state.is_usable() || s.generation != generation {
            return;
        }

        if status_rx.changed().await.is_err() {
            return;
        }
    }
}
