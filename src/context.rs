//! Cancellation contexts
//!
//! A [`Context`] is passed to every operation that may block on storage,
//! channels or retry sleeps. Cancelling a context cancels all contexts
//! derived from it.
//!
//! The `done()` receiver never yields a message; it disconnects when the
//! context is cancelled, so it can sit in a `crossbeam::select!` next to a
//! data channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use parking_lot::Mutex;

use crate::error::{LakeError, Result};

struct Inner {
    cancelled: AtomicBool,
    /// Dropped on cancel to disconnect `done`
    signal: Mutex<Option<Sender<()>>>,
    done: Receiver<()>,
    children: Mutex<Vec<Weak<Inner>>>,
}

impl Inner {
    fn new() -> Arc<Self> {
        let (tx, rx) = channel::bounded(0);
        Arc::new(Self {
            cancelled: AtomicBool::new(false),
            signal: Mutex::new(Some(tx)),
            done: rx,
            children: Mutex::new(Vec::new()),
        })
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.signal.lock().take();
        let children = std::mem::take(&mut *self.children.lock());
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }
}

/// Cooperative cancellation signal
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    /// A context that is only cancelled explicitly
    pub fn background() -> Self {
        Self {
            inner: Inner::new(),
        }
    }

    /// Derive a child context, cancelled together with `self`
    pub fn with_cancel(&self) -> Self {
        let child = Inner::new();
        if self.is_cancelled() {
            child.cancel();
        } else {
            let mut children = self.inner.children.lock();
            children.retain(|c| c.strong_count() > 0);
            children.push(Arc::downgrade(&child));
        }
        Self { inner: child }
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the context has been cancelled
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(LakeError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Receiver that disconnects on cancellation
    pub fn done(&self) -> &Receiver<()> {
        &self.inner.done
    }

    /// Sleep for `d`, waking early with `Err(Cancelled)` on cancellation
    pub fn sleep(&self, d: Duration) -> Result<()> {
        self.check()?;
        select! {
            recv(self.inner.done) -> _ => Err(LakeError::Cancelled),
            default(d) => Ok(()),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
