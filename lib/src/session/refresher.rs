// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Periodic session refresh

use std::time::Duration;

use log::trace;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::MissedTickBehavior,
};

use ledger_dmk_core::{DeviceStatus, SessionState};

use super::events::{SessionEvent, SessionEventDispatcher};

/// Broadcasts [SessionEvent::RefreshNeeded] at the polling interval while
/// the device is idle and connected
pub struct SessionRefresher {
    handle: JoinHandle<()>,
}

impl SessionRefresher {
    /// Start refreshing
    pub fn start(
        events: SessionEventDispatcher,
        state: watch::Receiver<SessionState>,
        polling_interval: Duration,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(polling_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                let status = state.borrow().status;
                match status {
                    DeviceStatus::Busy | DeviceStatus::NotConnected => {
                        trace!("skipping refresh, device {}", status);
                    }
                    _ => events.dispatch(SessionEvent::RefreshNeeded),
                }
            }
        });

        Self { handle }
    }

    /// Stop refreshing
    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for SessionRefresher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod test {
    use ledger_dmk_core::apdu::model::DeviceModelId;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn refresh_while_idle() {
        let events = SessionEventDispatcher::new();
        let mut rx = events.subscribe();

        let (state_tx, state_rx) = watch::channel(SessionState::new(DeviceModelId::NanoX));

        let r = SessionRefresher::start(events.clone(), state_rx, Duration::from_secs(1));

        // First tick fires immediately
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::RefreshNeeded);

        // Busy devices are not refreshed
        state_tx.send_modify(|s| s.status = DeviceStatus::Busy);
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert!(rx.try_recv().is_err());

        state_tx.send_modify(|s| s.status = DeviceStatus::Locked);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::RefreshNeeded);

        r.stop();
    }
}
