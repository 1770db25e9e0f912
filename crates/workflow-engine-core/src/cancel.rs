// Copyright (c) 2025 Workflow Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! The one-shot cancel signal (§6.3) threaded through every frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A single cancellation flag shared by every frame of one workflow
/// execution. Cloning shares the same underlying signal; there is no way to
/// un-cancel.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    cancelled: AtomicBool,
    reason: parking_lot::Mutex<Option<String>>,
    notify: Notify,
    /// A cancel signal also observes its parent: cancelling the parent
    /// cancels every child transitively, without the reverse holding.
    parent: Option<CancelSignal>,
}

impl CancelSignal {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                reason: parking_lot::Mutex::new(None),
                notify: Notify::new(),
                parent: None,
            }),
        }
    }

    /// A scoped signal for one nested frame (e.g. one `parallel` block):
    /// cancelling `self` never reaches back up to `parent`, but cancelling
    /// `parent` cancels this child too. Used to stop sibling branches on a
    /// `parallel.on_error: stop` failure without cancelling the whole
    /// workflow.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                reason: parking_lot::Mutex::new(None),
                notify: Notify::new(),
                parent: Some(self.clone()),
            }),
        }
    }

    /// Requests cancellation. Idempotent: the first call's reason sticks.
    pub fn cancel(&self, reason: impl Into<String>) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            *self.inner.reason.lock() = Some(reason.into());
        }
        self.inner.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
            || self.inner.parent.as_ref().is_some_and(CancelSignal::is_cancelled)
    }

    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.inner
            .reason
            .lock()
            .clone()
            .or_else(|| self.inner.parent.as_ref().and_then(CancelSignal::reason))
    }

    /// Resolves immediately if already cancelled; otherwise waits for the
    /// next [`CancelSignal::cancel`] call on `self` or any ancestor. Used to
    /// wake a retry sleep or a parallel-branch join early.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        match &self.inner.parent {
            Some(parent) => {
                tokio::select! {
                    _ = self.inner.notify.notified() => {}
                    _ = parent.cancelled() => {}
                }
            }
            None => self.inner.notify.notified().await,
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}
