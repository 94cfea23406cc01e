//! The manually driven executor.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::guard_condition::GuardCondition;
use crate::node::Node;
use crate::trace::debug;
use crate::wait_set::{Timeout, WaitSet};
use crate::waitable::Disposable;

/// An executor whose spin cycles are driven by the caller.
///
/// Owns a wait set plus a private interrupt guard condition, and tracks a
/// set of nodes. Wait-set membership is kept consistent with node topology
/// through a dirty flag: any change schedules a rescan, a pending rescan
/// makes [`try_spin`] bail out with `false`, and [`rescan`] rebuilds
/// membership from the owned nodes.
///
/// Exactly one thread may drive `try_spin`/`rescan` (the spin thread);
/// every other operation is thread safe and only touches atomic flags,
/// signals, or deferred membership. Driving from a second thread fails
/// with [`Error::InvalidOperation`] rather than racing.
///
/// [`try_spin`]: ManualExecutor::try_spin
/// [`rescan`]: ManualExecutor::rescan
pub struct ManualExecutor {
    context: Arc<Context>,
    wait_set: Mutex<WaitSet>,
    interrupt: Arc<GuardCondition>,
    nodes: Mutex<Vec<Arc<Node>>>,
    rescan_scheduled: AtomicBool,
    idle: IdleGate,
    disposed: AtomicBool,
}

impl ManualExecutor {
    /// Creates an executor attached to `context`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ObjectDisposed`] if the context was shut down.
    pub fn new(context: &Arc<Context>) -> Result<Arc<Self>> {
        let mut wait_set = context.create_wait_set()?;
        let interrupt = context.create_guard_condition(|| {})?;
        wait_set.add_guard_condition(Arc::clone(&interrupt))?;
        Ok(Arc::new(Self {
            context: Arc::clone(context),
            wait_set: Mutex::new(wait_set),
            interrupt,
            nodes: Mutex::new(Vec::new()),
            rescan_scheduled: AtomicBool::new(false),
            idle: IdleGate::new(),
            disposed: AtomicBool::new(false),
        }))
    }

    /// The context this executor was created on.
    #[must_use]
    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// Whether a spin cycle is currently in progress.
    #[must_use]
    pub fn is_spinning(&self) -> bool {
        !self.idle.is_set()
    }

    /// Whether a rescan is scheduled.
    #[must_use]
    pub fn rescan_scheduled(&self) -> bool {
        self.rescan_scheduled.load(Ordering::Acquire)
    }

    /// Number of nodes owned by this executor. Thread safe.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.lock().len()
    }

    /// Whether `node` is owned by this executor. Thread safe.
    #[must_use]
    pub fn contains(&self, node: &Arc<Node>) -> bool {
        let target = Arc::as_ptr(node);
        self.nodes
            .lock()
            .iter()
            .any(|member| Arc::as_ptr(member) == target)
    }

    /// Takes ownership of `node` and schedules a rescan. Thread safe.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidOperation`] if the node already has an executor;
    /// [`Error::ObjectDisposed`] if this executor was disposed.
    pub fn add(self: &Arc<Self>, node: &Arc<Node>) -> Result<()> {
        self.assert_ok()?;
        // The node must know its executor before a rescan can pick it up.
        node.bind_executor(self)?;
        self.nodes.lock().push(Arc::clone(node));
        self.schedule_rescan();
        Ok(())
    }

    /// Releases `node`, returning whether it was owned by this executor.
    ///
    /// Blocks until any in-flight spin completes, so the caller may dispose
    /// the node's endpoints immediately afterwards without racing the spin
    /// thread. Thread safe.
    ///
    /// # Errors
    ///
    /// Propagates failures from interrupting and waiting; the node's
    /// back-reference is cleared regardless.
    pub fn remove(&self, node: &Arc<Node>) -> Result<bool> {
        self.detach_node(node)
    }

    pub(crate) fn detach_node(&self, node: &Node) -> Result<bool> {
        let target = node as *const Node as *const ();
        let removed = {
            let mut nodes = self.nodes.lock();
            let before = nodes.len();
            nodes.retain(|member| Arc::as_ptr(member) as *const () != target);
            nodes.len() != before
        };
        if !removed {
            return Ok(false);
        }
        self.schedule_rescan();
        let result = self.wait();
        // Clear the back-reference only once it is safe to do so.
        node.clear_executor();
        result.map(|()| true)
    }

    /// Releases every owned node, waiting for the spin thread after each.
    ///
    /// # Errors
    ///
    /// As [`remove`](ManualExecutor::remove).
    pub fn clear(&self) -> Result<()> {
        let nodes: Vec<_> = self.nodes.lock().clone();
        for node in nodes {
            self.detach_node(&node)?;
        }
        Ok(())
    }

    /// Marks wait-set membership dirty. Thread safe and idempotent.
    pub fn schedule_rescan(&self) {
        self.rescan_scheduled.store(true, Ordering::Release);
    }

    /// Marks membership dirty on behalf of `node`. Always succeeds.
    pub fn try_schedule_rescan(&self, _node: &Node) -> bool {
        self.schedule_rescan();
        true
    }

    /// Interrupts the next or current [`try_spin`].
    ///
    /// Only the wait is skipped; work that is already ready still runs.
    /// Thread safe.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ObjectDisposed`] if the interrupt guard condition
    /// was disposed (context shut down).
    ///
    /// [`try_spin`]: ManualExecutor::try_spin
    pub fn interrupt(&self) -> Result<()> {
        self.interrupt.trigger()
    }

    /// Blocks until no spin with a pending rescan is in flight.
    ///
    /// # Errors
    ///
    /// As [`try_wait`](ManualExecutor::try_wait).
    pub fn wait(&self) -> Result<()> {
        let settled = self.try_wait(Timeout::Infinite)?;
        debug_assert!(settled, "infinite wait timed out");
        Ok(())
    }

    /// Waits until the executor is idle, if a rescan is pending while it
    /// spins. Returns whether the executor settled within `timeout`.
    ///
    /// After `Ok(true)` with a rescan pending, the spin thread cannot
    /// dispatch stale membership again until it rescans, so removed
    /// endpoints are safe to tear down. Thread safe.
    ///
    /// # Errors
    ///
    /// Propagates interrupt failures other than a disposed guard (which
    /// happens when the context is shut down while nodes still detach).
    pub fn try_wait(&self, timeout: Timeout) -> Result<bool> {
        if self.rescan_scheduled() && self.is_spinning() {
            match self.interrupt() {
                Err(Error::ObjectDisposed(_)) => {}
                other => other?,
            }
            return Ok(self.idle.wait(timeout));
        }
        Ok(true)
    }

    /// Performs one wait/dispatch cycle unless a rescan is pending.
    ///
    /// Returns `Ok(false)` immediately, without blocking for any timeout,
    /// when a rescan is scheduled, since waiting on stale membership could
    /// miss new endpoints. Otherwise blocks until work is
    /// ready or `timeout` passes, then calls `try_process` on every ready
    /// member in the documented group order. Callback and transport errors
    /// propagate to the caller.
    ///
    /// # Errors
    ///
    /// [`Error::ObjectDisposed`] if the executor was disposed;
    /// [`Error::InvalidOperation`] if another thread is spinning or
    /// rescanning; any error escaping a dispatched `try_process`.
    pub fn try_spin(&self, timeout: Timeout) -> Result<bool> {
        self.assert_ok()?;
        let _busy = self.idle.enter_busy();
        // Checked after going busy so a concurrent try_wait cannot miss us.
        if self.rescan_scheduled() {
            return Ok(false);
        }
        let Some(mut wait_set) = self.wait_set.try_lock() else {
            return Err(Error::InvalidOperation(
                "executor is already spinning or rescanning",
            ));
        };
        if let Some(ready) = wait_set.try_wait(timeout)? {
            ready.try_process_all()?;
        }
        Ok(true)
    }

    /// Rebuilds wait-set membership from the owned nodes and clears the
    /// dirty flag.
    ///
    /// Must not run concurrently with [`try_spin`]; doing so fails with
    /// [`Error::InvalidOperation`] instead of racing the blocked wait.
    ///
    /// # Errors
    ///
    /// On failure the rescan is re-scheduled (membership may be partial)
    /// and the error propagates.
    ///
    /// [`try_spin`]: ManualExecutor::try_spin
    pub fn rescan(&self) -> Result<()> {
        self.assert_ok()?;
        let Some(mut wait_set) = self.wait_set.try_lock() else {
            return Err(Error::InvalidOperation("cannot rescan while spinning"));
        };
        debug!("rescanning wait set membership");
        // Clear first so removed endpoints are safe to dispose even if the
        // refill below fails.
        wait_set.clear_subscriptions();
        wait_set.clear_services();
        wait_set.clear_clients();
        // Clearing the flag before refilling keeps rescans scheduled after
        // this point from being lost.
        self.rescan_scheduled.store(false, Ordering::Release);
        let nodes: Vec<_> = self.nodes.lock().clone();
        let result = (|| -> Result<()> {
            for node in &nodes {
                for subscription in node.subscriptions() {
                    wait_set.add_subscription(subscription)?;
                }
                for service in node.services() {
                    wait_set.add_service(service)?;
                }
                for client in node.clients() {
                    wait_set.add_client(client)?;
                }
            }
            Ok(())
        })();
        if result.is_err() {
            self.schedule_rescan();
        }
        result
    }

    /// Spins while `condition` holds, rescanning whenever one is pending.
    ///
    /// The condition is checked before each cycle.
    ///
    /// # Errors
    ///
    /// As [`try_spin`] and [`rescan`].
    ///
    /// [`try_spin`]: ManualExecutor::try_spin
    /// [`rescan`]: ManualExecutor::rescan
    pub fn spin_while(
        &self,
        mut condition: impl FnMut() -> bool,
        timeout: Timeout,
    ) -> Result<()> {
        while condition() {
            if !self.try_spin(timeout)? {
                self.rescan()?;
            }
        }
        Ok(())
    }

    fn assert_ok(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::disposed("executor"));
        }
        Ok(())
    }
}

impl Disposable for ManualExecutor {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire) || self.interrupt.is_disposed()
    }

    /// Disposes the executor. Not thread safe: may not be called while the
    /// executor is in use. Owned nodes are detached without waiting; they
    /// are not disposed.
    fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let nodes: Vec<_> = {
            let mut nodes = self.nodes.lock();
            nodes.drain(..).collect()
        };
        for node in nodes {
            // No waiting required since the executor is no longer running.
            node.clear_executor();
        }
        let Some(mut wait_set) = self.wait_set.try_lock() else {
            return Err(Error::InvalidOperation("cannot dispose while spinning"));
        };
        wait_set.dispose();
        drop(wait_set);
        self.interrupt.dispose()
    }
}

impl Drop for ManualExecutor {
    fn drop(&mut self) {
        let _ = self.dispose();
    }
}

/// Event signaling whether the executor is not spinning.
///
/// Tracks a busy count rather than a flag so a rejected concurrent
/// `try_spin` attempt cannot erase the legitimate spin thread's busy state.
struct IdleGate {
    busy: Mutex<usize>,
    condvar: Condvar,
}

impl IdleGate {
    fn new() -> Self {
        Self {
            busy: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }

    fn is_set(&self) -> bool {
        *self.busy.lock() == 0
    }

    fn enter_busy(&self) -> BusyGuard<'_> {
        *self.busy.lock() += 1;
        BusyGuard { gate: self }
    }

    fn wait(&self, timeout: Timeout) -> bool {
        let deadline = timeout.deadline();
        let mut busy = self.busy.lock();
        loop {
            if *busy == 0 {
                return true;
            }
            match deadline {
                None => self.condvar.wait(&mut busy),
                Some(deadline) => {
                    let Some(remaining) =
                        deadline.checked_duration_since(minstant::Instant::now())
                    else {
                        return false;
                    };
                    let _ = self.condvar.wait_for(&mut busy, remaining);
                }
            }
        }
    }
}

/// Restores the idle state on every exit path, including unwinds out of
/// user callbacks.
struct BusyGuard<'a> {
    gate: &'a IdleGate,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let mut busy = self.gate.busy.lock();
        *busy -= 1;
        if *busy == 0 {
            self.gate.condvar.notify_all();
        }
    }
}
