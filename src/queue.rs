// MIT License - Copyright (c) 2017 Doug Rathbone
// Rust translation of throttled-queue.js

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::Result;

/// Consumer side of a [`ThrottledQueue`].
pub trait QueueHandler<T>: Send {
    /// Dispatch one item. Errors are logged by the queue worker and the
    /// item is discarded; the queue keeps running.
    fn handle(&mut self, item: T) -> impl Future<Output = Result<()>> + Send;
}

struct Inner<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
    interval: Duration,
    label: &'static str,
}

/// FIFO queue whose single worker dispatches items no faster than a fixed
/// interval.
///
/// The first item after an idle period is dispatched as soon as the pacing
/// interval since the previous dispatch has lapsed (immediately on a fresh
/// queue); consecutive dispatch starts are always at least the interval
/// apart. `clear()` drops everything still pending.
pub struct ThrottledQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ThrottledQueue<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: Send + 'static> ThrottledQueue<T> {
    pub fn new(interval: Duration, label: &'static str) -> Self {
        Self {
            inner: Arc::new(Inner {
                items: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                interval,
                label,
            }),
        }
    }

    /// Append an item. May be called from any task.
    pub async fn push(&self, item: T) {
        self.inner.items.lock().await.push_back(item);
        self.inner.notify.notify_one();
    }

    pub async fn len(&self) -> usize {
        self.inner.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.items.lock().await.is_empty()
    }

    /// Pop the front item without pacing. Test-only inspection hook.
    #[cfg(test)]
    pub(crate) async fn pop_for_test(&self) -> Option<T> {
        self.inner.items.lock().await.pop_front()
    }

    /// Drop all pending items. Items already handed to the consumer are
    /// unaffected.
    pub async fn clear(&self) {
        let mut items = self.inner.items.lock().await;
        if !items.is_empty() {
            warn!("{}: clearing {} pending item(s)", self.inner.label, items.len());
            items.clear();
        }
    }

    /// Spawn the single dispatch worker. Abort the returned handle to stop
    /// the queue.
    pub fn spawn<H>(&self, mut handler: H) -> JoinHandle<()>
    where
        H: QueueHandler<T> + 'static,
    {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                let item = loop {
                    let maybe = inner.items.lock().await.pop_front();
                    match maybe {
                        Some(item) => break item,
                        None => inner.notify.notified().await,
                    }
                };

                if let Err(e) = handler.handle(item).await {
                    warn!("{}: dispatch failed, item dropped: {}", inner.label, e);
                }

                // Pacing: the next dispatch starts no sooner than this.
                tokio::time::sleep(inner.interval).await;
            }
        })
    }
}
