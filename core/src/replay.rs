// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Replaying publish / subscribe primitive
//!
//! A [ReplayBus] delivers every published value to live subscribers, and
//! replays either the most recent value or the full history to subscribers
//! joining late. Once [finished][ReplayBus::finish] the bus accepts no
//! further values and subscriber streams complete after draining.

use std::{
    collections::VecDeque,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard},
    task::{Context, Poll},
};

use futures::Stream;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Replay policy for late subscribers
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ReplayPolicy {
    /// Replay only the most recent value
    Latest,
    /// Replay every value published so far
    All,
}

type IdleHook<T> = Box<dyn FnOnce(&ReplayBus<T>) + Send>;

struct Inner<T> {
    log: VecDeque<T>,
    subscribers: Vec<UnboundedSender<T>>,
    active: usize,
    closed: bool,
    on_idle: Option<IdleHook<T>>,
}

/// Shared replaying broadcast bus
pub struct ReplayBus<T> {
    inner: Arc<Mutex<Inner<T>>>,
    policy: ReplayPolicy,
}

impl<T> Clone for ReplayBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            policy: self.policy,
        }
    }
}

impl<T: Clone + Send + 'static> ReplayBus<T> {
    /// Create a new bus with the provided replay policy
    pub fn new(policy: ReplayPolicy) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                log: VecDeque::new(),
                subscribers: vec![],
                active: 0,
                closed: false,
                on_idle: None,
            })),
            policy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a hook invoked once when the last subscriber detaches
    /// while the bus is still open
    pub fn on_idle(&self, f: impl FnOnce(&ReplayBus<T>) + Send + 'static) {
        self.lock().on_idle = Some(Box::new(f));
    }

    fn push(&self, inner: &mut Inner<T>, value: T) {
        if self.policy == ReplayPolicy::Latest {
            inner.log.clear();
        }
        inner.log.push_back(value.clone());

        inner.subscribers.retain(|s| s.send(value.clone()).is_ok());
    }

    /// Publish a value, returns false if the bus is closed
    pub fn publish(&self, value: T) -> bool {
        let mut inner = self.lock();
        if inner.closed {
            return false;
        }

        self.push(&mut inner, value);

        true
    }

    /// Publish a final value and close the bus.
    ///
    /// Only the first call takes effect, returns false if the bus was already closed.
    pub fn finish(&self, value: T) -> bool {
        let mut inner = self.lock();
        if inner.closed {
            return false;
        }

        self.push(&mut inner, value);

        inner.closed = true;
        inner.subscribers.clear();
        inner.on_idle = None;

        true
    }

    /// Close the bus without publishing a final value
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.subscribers.clear();
        inner.on_idle = None;
    }

    /// Check whether the bus has been closed
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Fetch the most recently published value
    pub fn latest(&self) -> Option<T> {
        self.lock().log.back().cloned()
    }

    /// Fetch the number of attached subscribers
    pub fn subscriber_count(&self) -> usize {
        self.lock().active
    }

    /// Subscribe to the bus, replaying history per the bus policy
    pub fn subscribe(&self) -> ReplayStream<T> {
        let mut inner = self.lock();

        let replay = inner.log.clone();

        let rx = match inner.closed {
            true => None,
            false => {
                let (tx, rx) = unbounded_channel();
                inner.subscribers.push(tx);
                Some(rx)
            }
        };

        inner.active += 1;

        ReplayStream {
            bus: self.clone(),
            replay,
            rx,
        }
    }

    fn detach(&self) {
        let hook = {
            let mut inner = self.lock();
            inner.active = inner.active.saturating_sub(1);

            match (inner.active, inner.closed) {
                (0, false) => inner.on_idle.take(),
                _ => None,
            }
        };

        // Run outside the lock, hooks commonly finish the bus
        if let Some(f) = hook {
            f(self);
        }
    }
}

/// Subscriber stream for a [ReplayBus]
pub struct ReplayStream<T: Clone + Send + 'static> {
    bus: ReplayBus<T>,
    replay: VecDeque<T>,
    rx: Option<UnboundedReceiver<T>>,
}

impl<T: Clone + Send + 'static> Stream for ReplayStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(v) = this.replay.pop_front() {
            return Poll::Ready(Some(v));
        }

        match this.rx.as_mut() {
            Some(rx) => rx.poll_recv(cx),
            None => Poll::Ready(None),
        }
    }
}

impl<T: Clone + Send + 'static> Unpin for ReplayStream<T> {}

impl<T: Clone + Send + 'static> Drop for ReplayStream<T> {
    fn drop(&mut self) {
        self.bus.detach();
    }
}
