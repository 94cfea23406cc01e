//! Guard conditions: payload-free wakeups for interrupting waits.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::transport::{TriggerLatch, WakeSignal};
use crate::waitable::{Disposable, Waitable};

/// A cross-thread wakeup source with no payload.
///
/// Triggering from any thread makes the condition ready; a wait cycle that
/// observes it consumes the trigger and invokes the fixed callback during
/// dispatch. Triggers between consumptions coalesce. The executor uses a
/// private guard condition to interrupt a blocked spin; applications can
/// create their own via [`Context::create_guard_condition`].
pub struct GuardCondition {
    latch: TriggerLatch,
    callback: Box<dyn Fn() + Send + Sync>,
    context: Weak<Context>,
    disposed: AtomicBool,
}

impl GuardCondition {
    pub(crate) fn new(
        context: &Arc<Context>,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            latch: TriggerLatch::new(),
            callback: Box::new(callback),
            context: Arc::downgrade(context),
            disposed: AtomicBool::new(false),
        })
    }

    /// Makes the condition ready, waking any wait currently blocked on it.
    ///
    /// Thread safe; idempotent between consumptions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ObjectDisposed`] if the condition was disposed.
    pub fn trigger(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::disposed("guard condition"));
        }
        self.latch.trigger();
        Ok(())
    }
}

impl Disposable for GuardCondition {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(context) = self.context.upgrade() {
            context.remove_guard_condition(self);
        }
        self.latch.detach_waker();
        Ok(())
    }
}

impl Waitable for GuardCondition {
    fn attach_waker(&self, waker: &Arc<WakeSignal>) {
        self.latch.attach_waker(waker);
    }

    fn detach_waker(&self) {
        self.latch.detach_waker();
    }

    fn poll_ready(&self) -> bool {
        self.latch.take()
    }

    fn try_process(&self) -> Result<bool> {
        (self.callback)();
        Ok(true)
    }
}

impl Drop for GuardCondition {
    fn drop(&mut self) {
        let _ = self.dispose();
    }
}
