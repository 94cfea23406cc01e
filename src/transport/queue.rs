//! Bounded inbound queue backing each readable endpoint.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use super::signal::WakeSignal;

/// A bounded FIFO of inbound payloads with drop-oldest overflow.
///
/// One queue exists per readable endpoint (subscription, client response
/// stream, service request stream). The routing side pushes, the owning
/// endpoint takes. Capacity is the endpoint's QoS history depth; pushing
/// into a full queue evicts the oldest entry, matching keep-last history.
///
/// A [`WakeSignal`] may be attached while a wait-set is blocked on the
/// endpoint; pushes notify it. Only one waiter may be attached at a time.
pub struct MessageQueue<T> {
    inner: Mutex<Inner<T>>,
    waker: Mutex<Option<Arc<WakeSignal>>>,
    depth: usize,
}

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

impl<T> MessageQueue<T> {
    /// Creates an open queue bounded to `depth` entries.
    #[must_use]
    pub fn new(depth: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                closed: false,
            }),
            waker: Mutex::new(None),
            depth: depth.max(1),
        }
    }

    /// Enqueues a payload, evicting the oldest entry when full.
    ///
    /// Returns `false` if the queue was closed and the payload dropped.
    pub fn push(&self, item: T) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return false;
            }
            if inner.items.len() == self.depth {
                inner.items.pop_front();
            }
            inner.items.push_back(item);
        }
        if let Some(waker) = self.waker.lock().as_ref() {
            waker.notify();
        }
        true
    }

    /// Takes the oldest payload, if any.
    pub fn take(&self) -> Option<T> {
        self.inner.lock().items.pop_front()
    }

    /// Whether a take would currently succeed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        let inner = self.inner.lock();
        !inner.closed && !inner.items.is_empty()
    }

    /// Number of buffered payloads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Whether no payloads are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes the queue, dropping buffered payloads and rejecting pushes.
    ///
    /// An attached waiter is notified so a blocked wait re-examines the
    /// endpoint instead of sleeping on a dead channel.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.items.clear();
        }
        if let Some(waker) = self.waker.lock().as_ref() {
            waker.notify();
        }
    }

    /// Whether the queue has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Attaches a wait signal to notify on pushes, replacing any previous one.
    pub fn attach_waker(&self, waker: &Arc<WakeSignal>) {
        *self.waker.lock() = Some(Arc::clone(waker));
    }

    /// Detaches the attached wait signal, if any.
    pub fn detach_waker(&self) {
        *self.waker.lock() = None;
    }
}
