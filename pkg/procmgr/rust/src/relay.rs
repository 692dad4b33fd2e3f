// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Fan-out of a single producer's messages to any number of live subscribers.
//!
//! Every subscriber owns a bounded queue. Publishing never waits: a subscriber
//! whose queue is full misses that message, and a subscriber that dropped its
//! [`Subscription`] is pruned on the next publish.

use bytes::Bytes;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::Stream;

pub const DEFAULT_RELAY_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
    Stdin,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdout => write!(f, "stdout"),
            StreamKind::Stderr => write!(f, "stderr"),
            StreamKind::Stdin => write!(f, "stdin"),
        }
    }
}

/// A chunk of bytes read from (or destined to) one of a process's standard streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StdStreamMessage {
    pub stream: StreamKind,
    pub data: Bytes,
}

impl StdStreamMessage {
    pub fn new(stream: StreamKind, data: impl Into<Bytes>) -> Self {
        Self {
            stream,
            data: data.into(),
        }
    }
}

struct Subscriber<T> {
    tx: mpsc::Sender<T>,
    dropped: u64,
}

struct RelayInner<T> {
    subscribers: Vec<Subscriber<T>>,
    closed: bool,
}

pub struct Relay<T> {
    inner: Arc<Mutex<RelayInner<T>>>,
    capacity: usize,
}

impl<T> Clone for Relay<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            capacity: self.capacity,
        }
    }
}

impl<T: Clone + Send> Relay<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RelayInner {
                subscribers: Vec::new(),
                closed: false,
            })),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RelayInner<T>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new subscriber. It sees every message published from now on.
    pub fn subscribe(&self) -> Subscription<T> {
        let mut inner = self.lock();
        let (tx, rx) = mpsc::channel(self.capacity);
        if !inner.closed {
            inner.subscribers.push(Subscriber { tx, dropped: 0 });
        }
        Subscription { rx }
    }

    /// Deliver `msg` to every current subscriber without waiting on any of them.
    pub fn publish(&self, msg: T) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        inner.subscribers.retain_mut(|sub| match sub.tx.try_send(msg.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                sub.dropped += 1;
                debug!(
                    "relay subscriber lagging, dropped {} message(s) so far",
                    sub.dropped
                );
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    /// End every subscription. Messages already queued are still delivered.
    pub fn close(&self) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        inner.subscribers.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock()
            .subscribers
            .iter()
            .filter(|sub| !sub.tx.is_closed())
            .count()
    }
}

/// One subscriber's view of a [`Relay`]. Dropping it unsubscribes.
pub struct Subscription<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> Subscription<T> {
    /// Next message, or `None` once the relay is closed and the queue drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

pub type StreamRelay = Relay<StdStreamMessage>;
