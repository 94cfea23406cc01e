//! Wakeup primitives shared between channels and wait sets.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use minstant::Instant;
use parking_lot::{Condvar, Mutex};

/// A notify-one-shot signal a blocked wait sleeps on.
///
/// Channels that become ready while a signal is attached call [`notify`];
/// the waiter consumes the notification in [`wait_until`]. Notifications
/// are coalesced: any number of `notify` calls between two waits wake the
/// waiter exactly once.
///
/// [`notify`]: WakeSignal::notify
/// [`wait_until`]: WakeSignal::wait_until
#[derive(Default)]
pub struct WakeSignal {
    notified: Mutex<bool>,
    condvar: Condvar,
}

impl WakeSignal {
    /// Creates an unsignaled instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wakes the waiter, if any. Callable from any thread.
    pub fn notify(&self) {
        let mut notified = self.notified.lock();
        *notified = true;
        self.condvar.notify_all();
    }

    /// Discards any pending notification.
    pub fn clear(&self) {
        *self.notified.lock() = false;
    }

    /// Blocks until notified or until `deadline` passes.
    ///
    /// `None` waits indefinitely. Returns whether a notification was
    /// consumed (`false` means the deadline passed first).
    pub fn wait_until(&self, deadline: Option<Instant>) -> bool {
        let mut notified = self.notified.lock();
        loop {
            if *notified {
                *notified = false;
                return true;
            }
            match deadline {
                None => self.condvar.wait(&mut notified),
                Some(deadline) => {
                    let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                        return false;
                    };
                    let _ = self.condvar.wait_for(&mut notified, remaining);
                }
            }
        }
    }
}

/// A consumable trigger flag backing a guard condition.
///
/// `trigger` is idempotent between consumptions; `take` consumes the
/// trigger, so one trigger wakes exactly one wait cycle.
#[derive(Default)]
pub struct TriggerLatch {
    triggered: AtomicBool,
    waker: Mutex<Option<Arc<WakeSignal>>>,
}

impl TriggerLatch {
    /// Creates an untriggered instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the trigger and wakes an attached waiter. Callable from any thread.
    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::Release);
        if let Some(waker) = self.waker.lock().as_ref() {
            waker.notify();
        }
    }

    /// Consumes the trigger, returning whether it was set.
    pub fn take(&self) -> bool {
        self.triggered.swap(false, Ordering::AcqRel)
    }

    /// Returns whether the trigger is currently set, without consuming it.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    /// Attaches the signal to notify on future triggers.
    ///
    /// Only one waiter may be attached at a time; attaching replaces any
    /// previous signal.
    pub fn attach_waker(&self, waker: &Arc<WakeSignal>) {
        *self.waker.lock() = Some(Arc::clone(waker));
    }

    /// Detaches the currently attached signal, if any.
    pub fn detach_waker(&self) {
        *self.waker.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_notify_before_wait() {
        let signal = WakeSignal::new();
        signal.notify();
        assert!(signal.wait_until(Some(Instant::now() + Duration::from_millis(10))));
    }

    #[test]
    fn test_wait_times_out() {
        let signal = WakeSignal::new();
        let start = Instant::now();
        assert!(!signal.wait_until(Some(start + Duration::from_millis(20))));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_notify_from_other_thread() {
        let signal = Arc::new(WakeSignal::new());
        let notifier = Arc::clone(&signal);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            notifier.notify();
        });
        assert!(signal.wait_until(Some(Instant::now() + Duration::from_secs(5))));
        handle.join().unwrap();
    }

    #[test]
    fn test_notifications_coalesce() {
        let signal = WakeSignal::new();
        signal.notify();
        signal.notify();
        assert!(signal.wait_until(Some(Instant::now() + Duration::from_millis(10))));
        assert!(!signal.wait_until(Some(Instant::now() + Duration::from_millis(10))));
    }

    #[test]
    fn test_latch_take_consumes() {
        let latch = TriggerLatch::new();
        assert!(!latch.take());
        latch.trigger();
        latch.trigger();
        assert!(latch.take());
        assert!(!latch.take());
    }

    #[test]
    fn test_latch_wakes_attached_signal() {
        let latch = TriggerLatch::new();
        let signal = Arc::new(WakeSignal::new());
        latch.attach_waker(&signal);
        latch.trigger();
        assert!(signal.wait_until(Some(Instant::now() + Duration::from_millis(10))));
        latch.detach_waker();
    }
}
