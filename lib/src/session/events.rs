// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Per-session event bus

use tokio::sync::broadcast;

use ledger_dmk_core::apdu::app_info::AppAndVersion;

/// Session event buffer depth
const EVENT_CAPACITY: usize = 32;

/// Events broadcast within a session
#[derive(Clone, PartialEq, Debug, strum::Display)]
pub enum SessionEvent {
    /// Device state should be refreshed
    RefreshNeeded,
    /// Status command succeeded with the current application
    CommandSucceeded(AppAndVersion),
    /// Device is locked or unresponsive
    DeviceLocked,
    /// Exchange succeeded with a locked status word
    LockedResponse,
    /// Exchange succeeded with a non-locked status word
    ConnectedResponse,
}

/// Broadcast dispatcher for [SessionEvent]s
///
/// Events are delivered to each subscriber in dispatch order.
#[derive(Clone, Debug)]
pub struct SessionEventDispatcher {
    tx: broadcast::Sender<SessionEvent>,
}

impl Default for SessionEventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionEventDispatcher {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Broadcast an event to current subscribers
    pub fn dispatch(&self, event: SessionEvent) {
        log::trace!("session event: {}", event);

        // No subscribers is not an error
        let _ = self.tx.send(event);
    }

    /// Subscribe to events dispatched from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}
