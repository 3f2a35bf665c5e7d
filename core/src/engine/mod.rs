// Copyright (c) 2022-2023 The MobileCoin Foundation

//! The action engine executes [Flow]s as cancellable, observable units of work.
//!
//! [execute] starts a flow against a session's [InternalApi] and returns an
//! [ActionHandle]. Subscribers observe one shared execution as a stream of
//! [ActionState]s, with the most recent state replayed to each new subscriber.
//! The execution is stopped when [ActionHandle::cancel] is called or when the
//! last subscriber detaches.

use std::{panic::AssertUnwindSafe, sync::Arc};

use futures::{FutureExt, StreamExt};
use log::{debug, warn};
use tokio::sync::watch;

use crate::{
    api::InternalApi,
    replay::{ReplayBus, ReplayPolicy, ReplayStream},
};

mod error;
pub use error::EngineFault;

mod flow;
pub use flow::{run_flow, Flow, FlowResult, StepContext, Transition};

mod state;
pub use state::{ActionState, MachineStatus};

/// Item type for action streams
pub type ActionItem<O, E, I> = Result<ActionState<O, E, I>, EngineFault>;

/// Stream of [ActionState]s for an executing action
pub type ActionStream<O, E, I> = ReplayStream<ActionItem<O, E, I>>;

/// Handle to an executing action
pub struct ActionHandle<O, E, I>
where
    O: Clone + Send + 'static,
    E: Clone + Send + 'static,
    I: Clone + Send + 'static,
{
    bus: ReplayBus<ActionItem<O, E, I>>,
    stop: Arc<watch::Sender<bool>>,
}

impl<O, E, I> Clone for ActionHandle<O, E, I>
where
    O: Clone + Send + 'static,
    E: Clone + Send + 'static,
    I: Clone + Send + 'static,
{
    fn clone(&self) -> Self {
        Self {
            bus: self.bus.clone(),
            stop: self.stop.clone(),
        }
    }
}

/// Handle type for a given [Flow]
pub type FlowHandle<F> =
    ActionHandle<<F as Flow>::Output, <F as Flow>::Error, <F as Flow>::Intermediate>;

/// Execute a flow against the provided session api
///
/// The flow starts immediately on the current tokio runtime.
pub fn execute<F: Flow>(flow: F, api: Arc<dyn InternalApi>) -> FlowHandle<F> {
    let bus = ReplayBus::new(ReplayPolicy::Latest);
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let stop = Arc::new(stop_tx);

    // Tear down once the last subscriber detaches
    let s = stop.clone();
    bus.on_idle(move |b| {
        debug!("Action has no subscribers, stopping");
        let _ = s.send(true);
        b.finish(Ok(ActionState::Stopped));
    });

    let b = bus.clone();
    tokio::spawn(async move {
        let emit = |i: F::Intermediate| {
            b.publish(Ok(ActionState::Pending(i)));
        };
        let ctx = StepContext::new(api.as_ref(), &emit);

        let run = AssertUnwindSafe(run_flow(&flow, &ctx)).catch_unwind();

        let r = tokio::select! {
            biased;

            Ok(()) = stop_rx.changed() => return,
            r = run => r,
        };

        let terminal = match r {
            Ok(Ok(Ok(o))) => Ok(ActionState::Completed(o)),
            Ok(Ok(Err(e))) => Ok(ActionState::Error(e)),
            Ok(Err(f)) => Err(f),
            Err(_) => {
                warn!("Flow execution panicked");
                Err(EngineFault::Panicked)
            }
        };

        b.finish(terminal);
    });

    ActionHandle { bus, stop }
}

impl<O, E, I> ActionHandle<O, E, I>
where
    O: Clone + Send + 'static,
    E: Clone + Send + 'static,
    I: Clone + Send + 'static,
{
    /// Subscribe to action states, replaying the most recent state
    pub fn subscribe(&self) -> ActionStream<O, E, I> {
        self.bus.subscribe()
    }

    /// Stop the action.
    ///
    /// Emits [ActionState::Stopped] unless a terminal state was already
    /// reached, then completes all subscriber streams. Idempotent.
    pub fn cancel(&self) {
        let _ = self.stop.send(true);

        if self.bus.finish(Ok(ActionState::Stopped)) {
            debug!("Action cancelled");
        }
    }

    /// Fetch the most recent action state
    pub fn latest(&self) -> Option<ActionItem<O, E, I>> {
        self.bus.latest()
    }

    /// Fetch the current machine status
    pub fn status(&self) -> MachineStatus {
        match self.bus.latest() {
            Some(r) => MachineStatus::from(&r),
            None => MachineStatus::Active,
        }
    }

    /// Await the terminal action state
    pub async fn result(&self) -> ActionItem<O, E, I> {
        let mut s = self.subscribe();
        let mut last = None;

        while let Some(v) = s.next().await {
            last = Some(v);
        }

        last.unwrap_or(Err(EngineFault::NoResult))
    }
}
