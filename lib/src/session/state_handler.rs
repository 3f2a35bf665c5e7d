// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Session state reconciliation from session events

use std::sync::Arc;

use log::{debug, warn};
use tokio::{
    sync::{broadcast::error::RecvError, watch},
    task::JoinHandle,
};

use ledger_dmk_core::{DeviceStatus, SessionState};

use super::events::{SessionEvent, SessionEventDispatcher};

/// Apply a session event to the session state, returning true if the state changed
pub fn apply_event(state: &mut SessionState, event: &SessionEvent) -> bool {
    let prev = state.clone();

    match event {
        SessionEvent::CommandSucceeded(app) => {
            if state.status != DeviceStatus::Busy {
                state.status = DeviceStatus::Connected;
            }
            state.observe_app(app);
        }
        // Inferred from an unanswered ping, not applied while busy
        SessionEvent::DeviceLocked => {
            if state.status != DeviceStatus::Busy {
                state.status = DeviceStatus::Locked;
            }
        }
        SessionEvent::LockedResponse => {
            state.status = DeviceStatus::Locked;
        }
        SessionEvent::ConnectedResponse => {
            if state.status == DeviceStatus::Locked {
                state.status = DeviceStatus::Connected;
            }
        }
        SessionEvent::RefreshNeeded => (),
    }

    *state != prev
}

/// Reconciles [SessionEvent]s into the session state
pub struct SessionStateHandler {
    handle: JoinHandle<()>,
}

impl SessionStateHandler {
    pub fn start(events: &SessionEventDispatcher, state: Arc<watch::Sender<SessionState>>) -> Self {
        let mut rx = events.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                let e = match rx.recv().await {
                    Ok(e) => e,
                    Err(RecvError::Lagged(n)) => {
                        warn!("state handler lagged {} events", n);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                state.send_if_modified(|s| {
                    let changed = apply_event(s, &e);
                    if changed {
                        debug!("session state: {} ({:?})", s.status, s.current_app);
                    }
                    changed
                });
            }
        });

        Self { handle }
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for SessionStateHandler {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
