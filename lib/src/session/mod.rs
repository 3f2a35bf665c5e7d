// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Device sessions
//!
//! A [Session] binds a [PhysicalConnection] to its session state, liveness
//! poller and refresher. Session-level exchanges are serialised through a
//! FIFO intent queue, with a running action holding the queue from its
//! first exchange until it completes.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use log::{debug, error, warn};
use tokio::sync::{watch, OwnedMutexGuard};
use uuid::Uuid;

use ledger_dmk_core::{
    apdu::{
        app_info::AppAndVersion, model::DeviceModelId, status::is_locked, Apdu, ApduResponse,
        Command,
    },
    engine::{self, Flow, FlowHandle},
    DeviceStatus, InternalApi, InternalApiExt, SendOptions, SessionState, TransportError,
};

use crate::{config::SessionOptions, connection::PhysicalConnection, Error};

pub mod events;
use events::{SessionEvent, SessionEventDispatcher};

pub mod pinger;
use pinger::DevicePinger;

pub mod refresher;
use refresher::SessionRefresher;

pub mod registry;
pub use registry::SessionRegistry;

pub mod state_handler;
use state_handler::SessionStateHandler;

/// Session identifier
pub type SessionId = Uuid;

/// Hook invoked once when a session terminates
pub type SessionHook = Box<dyn FnOnce(SessionId) + Send>;

/// Background session services, released on close
struct Services {
    pinger: Option<Arc<DevicePinger>>,
    refresher: Option<SessionRefresher>,
    state_handler: Option<SessionStateHandler>,
    on_terminated: Option<SessionHook>,
}

/// Live binding to a connected device
pub struct Session {
    id: SessionId,
    device_id: String,
    model: DeviceModelId,
    opts: SessionOptions,
    connection: PhysicalConnection,
    state: Arc<watch::Sender<SessionState>>,
    events: SessionEventDispatcher,
    intents: Arc<tokio::sync::Mutex<()>>,
    services: Mutex<Services>,
}

impl Session {
    /// Create a new session over the provided connection
    pub fn new(
        device_id: impl Into<String>,
        model: DeviceModelId,
        connection: PhysicalConnection,
        opts: SessionOptions,
    ) -> Arc<Self> {
        let events = SessionEventDispatcher::new();
        let (state, _) = watch::channel(SessionState::new(model));
        let state = Arc::new(state);

        let s = Arc::new_cyclic(|weak: &std::sync::Weak<Session>| {
            let pinger = DevicePinger::new(
                weak.clone(),
                events.clone(),
                model,
                opts.polling_interval(),
            );

            Session {
                id: Uuid::new_v4(),
                device_id: device_id.into(),
                model,
                opts,
                connection,
                state: state.clone(),
                events: events.clone(),
                intents: Arc::new(tokio::sync::Mutex::new(())),
                services: Mutex::new(Services {
                    pinger: Some(pinger),
                    refresher: None,
                    state_handler: None,
                    on_terminated: None,
                }),
            }
        });

        // Reconcile session events into the session state
        s.services().state_handler = Some(SessionStateHandler::start(&events, state));

        let weak = Arc::downgrade(&s);
        s.connection.on_terminated(move || {
            if let Some(s) = weak.upgrade() {
                s.terminated();
            }
        });

        debug!("Created session {} for {} ({})", s.id, s.device_id, s.model);

        s
    }

    fn services(&self) -> MutexGuard<'_, Services> {
        self.services.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start liveness polling.
    ///
    /// With the refresher disabled the device is pinged once.
    pub async fn initialise(&self) -> Result<(), Error> {
        let pinger = match self.services().pinger.clone() {
            Some(p) => p,
            None => return Err(TransportError::Closed.into()),
        };

        if self.opts.refresher_disabled {
            if let Err(e) = pinger.ping().await {
                error!("Error while initialising session {}: {}", self.id, e);
                return Err(e);
            }
            return Ok(());
        }

        pinger.subscribe();

        let r = SessionRefresher::start(
            self.events.clone(),
            self.state.subscribe(),
            self.opts.polling_interval(),
        );
        self.services().refresher = Some(r);

        Ok(())
    }

    /// Session identifier
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Identifier of the connected device
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Connected device model
    pub fn model(&self) -> DeviceModelId {
        self.model
    }

    /// Session options
    pub fn options(&self) -> &SessionOptions {
        &self.opts
    }

    /// Underlying physical connection
    pub fn connection(&self) -> &PhysicalConnection {
        &self.connection
    }

    /// Session event bus
    pub fn events(&self) -> &SessionEventDispatcher {
        &self.events
    }

    /// Fetch the current session state
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Watch session state updates
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Register a hook invoked once when the session terminates
    pub fn on_terminated(&self, f: impl FnOnce(SessionId) + Send + 'static) {
        self.services().on_terminated = Some(Box::new(f));
    }

    /// Ping the device, see [DevicePinger::ping]
    pub async fn ping(&self) -> Result<Option<AppAndVersion>, Error> {
        let pinger = self.services().pinger.clone();

        match pinger {
            Some(p) => p.ping().await,
            None => Err(TransportError::Closed.into()),
        }
    }

    /// Send a command via the intent queue, with an optional timeout
    pub async fn send_command<C: Command>(
        &self,
        cmd: &C,
        timeout: Option<Duration>,
    ) -> Result<C::Response, Error> {
        let r = self.send_command_with(cmd, timeout).await?;
        Ok(r)
    }

    /// Execute a flow against this session
    pub fn execute<F: Flow>(self: &Arc<Self>, flow: F) -> FlowHandle<F> {
        let api = Arc::new(ActionApi {
            session: self.clone(),
            intent: tokio::sync::Mutex::new(None),
        });

        engine::execute(flow, api)
    }

    /// Exchange an APDU bypassing the intent queue
    async fn exchange(
        &self,
        apdu: &Apdu,
        opts: SendOptions,
    ) -> Result<ApduResponse, ledger_dmk_core::Error> {
        debug!("[{}] => {}", self.id, apdu);

        let r = self.connection.send(apdu, opts).await;

        match &r {
            Ok(resp) => {
                debug!("[{}] <= {}", self.id, hex::encode(resp.to_bytes()));

                match is_locked(&resp.status) {
                    true => self.events.dispatch(SessionEvent::LockedResponse),
                    false => self.events.dispatch(SessionEvent::ConnectedResponse),
                }
            }
            Err(e) => debug!("[{}] exchange failed: {}", self.id, e),
        }

        r
    }

    fn set_status(&self, status: DeviceStatus) {
        self.state.send_if_modified(|s| {
            let changed = s.status != status;
            s.status = status;
            changed
        });
    }

    /// Stop background services and mark the device as disconnected
    fn release(&self) -> Option<SessionHook> {
        let mut s = self.services();

        if let Some(p) = s.pinger.take() {
            p.unsubscribe();
        }
        if let Some(r) = s.refresher.take() {
            r.stop();
        }
        if let Some(h) = s.state_handler.take() {
            h.stop();
        }

        let hook = s.on_terminated.take();
        drop(s);

        self.set_status(DeviceStatus::NotConnected);

        hook
    }

    fn terminated(&self) {
        warn!("Session {} terminated", self.id);

        if let Some(f) = self.release() {
            f(self.id);
        }
    }

    /// Close the session, releasing poller subscriptions and closing the connection
    pub async fn close(&self) {
        debug!("Closing session {}", self.id);

        // Explicit close does not notify the termination hook
        drop(self.release());

        self.connection.close().await;
    }
}

#[async_trait]
impl InternalApi for Session {
    async fn send_apdu(
        &self,
        apdu: &Apdu,
        opts: SendOptions,
    ) -> Result<ApduResponse, ledger_dmk_core::Error> {
        let queued = async {
            let _intent = self.intents.lock().await;

            self.exchange(
                apdu,
                SendOptions {
                    abort_timeout: None,
                    ..opts
                },
            )
            .await
        };

        // Timeouts include time spent in the queue
        match opts.abort_timeout {
            Some(t) => tokio::time::timeout(t, queued)
                .await
                .map_err(|_| TransportError::SendTimeout)?,
            None => queued.await,
        }
    }

    fn session_state(&self) -> SessionState {
        self.state()
    }

    fn set_session_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    fn device_model(&self) -> DeviceModelId {
        self.model
    }
}

/// [InternalApi] for running actions.
///
/// Acquires the session intent queue on the first exchange and holds it
/// until the action completes, marking the device busy meanwhile.
struct ActionApi {
    session: Arc<Session>,
    intent: tokio::sync::Mutex<Option<OwnedMutexGuard<()>>>,
}

#[async_trait]
impl InternalApi for ActionApi {
    async fn send_apdu(
        &self,
        apdu: &Apdu,
        opts: SendOptions,
    ) -> Result<ApduResponse, ledger_dmk_core::Error> {
        let mut intent = self.intent.lock().await;

        if intent.is_none() {
            *intent = Some(self.session.intents.clone().lock_owned().await);
            self.session.set_status(DeviceStatus::Busy);
        }

        self.session.exchange(apdu, opts).await
    }

    fn session_state(&self) -> SessionState {
        self.session.state()
    }

    fn set_session_state(&self, state: SessionState) {
        self.session.set_session_state(state)
    }

    fn device_model(&self) -> DeviceModelId {
        self.session.model
    }
}

impl Drop for ActionApi {
    fn drop(&mut self) {
        if self.intent.get_mut().take().is_some() {
            self.session.state.send_if_modified(|s| match s.status {
                DeviceStatus::Busy => {
                    s.status = DeviceStatus::Connected;
                    true
                }
                _ => false,
            });
        }
    }
}
