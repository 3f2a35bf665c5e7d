// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Device liveness poller
//!
//! The pinger issues [GetAppAndVersion] when a refresh is requested.
//! Devices unable to push notifications (Nano S) stop responding while
//! locked, so for these models the command is raced against a timeout of
//! twice the polling interval and an unresponsive device is reported as
//! locked.

use std::{
    sync::{Arc, Mutex, Weak},
    time::Duration,
};

use log::{debug, trace, warn};
use tokio::sync::{broadcast::error::RecvError, oneshot};

use ledger_dmk_core::{
    apdu::{app_info::AppAndVersion, model::DeviceModelId, prelude::GetAppAndVersion},
    DeviceStatus, InternalApi, InternalApiExt, TransportError,
};

use super::events::{SessionEvent, SessionEventDispatcher};
use crate::Error;

/// Device liveness poller, see [module docs][self]
pub struct DevicePinger {
    api: Weak<dyn InternalApi>,
    events: SessionEventDispatcher,
    model: DeviceModelId,
    polling_interval: Duration,
    stop: Mutex<Option<oneshot::Sender<()>>>,
}

impl DevicePinger {
    /// Create a new pinger for the provided session api
    pub fn new(
        api: Weak<dyn InternalApi>,
        events: SessionEventDispatcher,
        model: DeviceModelId,
        polling_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            api,
            events,
            model,
            polling_interval,
            stop: Mutex::new(None),
        })
    }

    /// Ping the device, returning the current application.
    ///
    /// Returns `None` when a legacy device did not respond in time and has
    /// been reported as locked.
    pub async fn ping(&self) -> Result<Option<AppAndVersion>, Error> {
        let api = self.api.upgrade().ok_or(TransportError::Closed)?;

        let req = GetAppAndVersion;
        let cmd = api.send_command(&req);

        let r = match self.model.can_push_notifications() {
            true => cmd.await?,
            false => {
                let timeout = self.polling_interval * 2;

                // Biased so a response at the deadline counts as a response
                tokio::select! {
                    biased;

                    r = cmd => r?,
                    _ = tokio::time::sleep(timeout) => {
                        debug!("No response from {} within {:?}, assuming locked", self.model, timeout);
                        self.events.dispatch(SessionEvent::DeviceLocked);
                        return Ok(None);
                    }
                }
            }
        };

        trace!("ping: {}", r);

        self.events.dispatch(SessionEvent::CommandSucceeded(r.clone()));

        Ok(Some(r))
    }

    /// Check whether the session is running an action
    fn is_busy(&self) -> bool {
        self.api
            .upgrade()
            .map(|a| a.session_state().status == DeviceStatus::Busy)
            .unwrap_or(false)
    }

    /// Ping the device whenever a refresh is requested, until [unsubscribed][Self::unsubscribe].
    ///
    /// Refresh requests are ignored while the session is busy.
    pub fn subscribe(self: &Arc<Self>) {
        let mut rx = self.events.subscribe();
        let (stop_tx, mut stop_rx) = oneshot::channel();

        if let Some(s) = self
            .stop
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(stop_tx)
        {
            let _ = s.send(());
        }

        let p = self.clone();

        tokio::spawn(async move {
            loop {
                let e = tokio::select! {
                    biased;

                    _ = &mut stop_rx => break,
                    e = rx.recv() => e,
                };

                match e {
                    Ok(SessionEvent::RefreshNeeded) if p.is_busy() => {
                        trace!("session busy, skipping ping");
                    }
                    Ok(SessionEvent::RefreshNeeded) => {
                        if let Err(e) = p.ping().await {
                            debug!("ping failed: {}", e);
                        }
                    }
                    Ok(_) => (),
                    Err(RecvError::Lagged(n)) => warn!("pinger lagged {} events", n),
                    Err(RecvError::Closed) => break,
                }
            }

            trace!("pinger stopped");
        });
    }

    /// Stop responding to refresh requests, an in-flight ping may complete
    pub fn unsubscribe(&self) {
        if let Some(s) = self.stop.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = s.send(());
        }
    }
}
