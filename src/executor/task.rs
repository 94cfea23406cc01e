//! The background-thread executor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::context::Context;
use crate::error::Result;
use crate::executor::ManualExecutor;
use crate::node::Node;
use crate::trace::{error, info};
use crate::wait_set::Timeout;
use crate::waitable::Disposable;

/// An executor that runs the spin loop on a dedicated background thread.
///
/// Wraps a [`ManualExecutor`] and repeatedly spins it, rescanning whenever
/// a rescan is pending. The thread stops cooperatively on [`dispose`] or on
/// the owning context's shutdown broadcast. Any error or panic escaping a
/// callback terminates the thread in a faulted state, observable via
/// [`fault`]; the wrapper never restarts it.
///
/// [`dispose`]: Disposable::dispose
/// [`fault`]: TaskExecutor::fault
pub struct TaskExecutor {
    executor: Arc<ManualExecutor>,
    context: Arc<Context>,
    stop: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<Result<()>>>>,
    fault: Mutex<Option<String>>,
    hook: Mutex<Option<u64>>,
    disposed: AtomicBool,
}

impl TaskExecutor {
    /// Creates the executor and starts its spin thread.
    ///
    /// `timeout` bounds each individual wait; shorter values make the
    /// thread notice a stop request sooner, interrupts make it immediate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ObjectDisposed`] if the context was shut down.
    ///
    /// # Panics
    ///
    /// Panics if thread spawning fails.
    ///
    /// [`Error::ObjectDisposed`]: crate::Error::ObjectDisposed
    pub fn new(context: &Arc<Context>, timeout: Timeout) -> Result<Arc<Self>> {
        let executor = ManualExecutor::new(context)?;
        let stop = Arc::new(AtomicBool::new(false));

        let spin_executor = Arc::clone(&executor);
        let spin_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("axon-spin".into())
            .spawn(move || {
                info!("spin thread started");
                let result = spin_loop(&spin_executor, &spin_stop, timeout);
                if result.is_err() {
                    error!("spin thread faulted");
                }
                info!("spin thread exiting");
                result
            })
            .expect("failed to spawn spin thread");

        let task = Arc::new(Self {
            executor,
            context: Arc::clone(context),
            stop,
            handle: Mutex::new(Some(handle)),
            fault: Mutex::new(None),
            hook: Mutex::new(None),
            disposed: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&task);
        let token = context.on_shutdown(move || {
            if let Some(task) = Weak::upgrade(&weak) {
                task.stop_spin_thread();
            }
        });
        *task.hook.lock() = Some(token);
        Ok(task)
    }

    /// The wrapped manual executor.
    #[must_use]
    pub fn manual(&self) -> &Arc<ManualExecutor> {
        &self.executor
    }

    /// Whether the spin thread is still alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// The error or panic that terminated the spin thread, if any.
    #[must_use]
    pub fn fault(&self) -> Option<String> {
        self.reap(false);
        self.fault.lock().clone()
    }

    /// Takes ownership of `node`. See [`ManualExecutor::add`].
    ///
    /// # Errors
    ///
    /// As [`ManualExecutor::add`].
    pub fn add(&self, node: &Arc<Node>) -> Result<()> {
        self.executor.add(node)
    }

    /// Releases `node`. See [`ManualExecutor::remove`].
    ///
    /// # Errors
    ///
    /// As [`ManualExecutor::remove`].
    pub fn remove(&self, node: &Arc<Node>) -> Result<bool> {
        self.executor.remove(node)
    }

    /// Releases every owned node. See [`ManualExecutor::clear`].
    ///
    /// # Errors
    ///
    /// As [`ManualExecutor::clear`].
    pub fn clear(&self) -> Result<()> {
        self.executor.clear()
    }

    /// Whether `node` is owned by this executor.
    #[must_use]
    pub fn contains(&self, node: &Arc<Node>) -> bool {
        self.executor.contains(node)
    }

    /// Number of owned nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.executor.node_count()
    }

    /// Marks wait-set membership dirty.
    pub fn schedule_rescan(&self) {
        self.executor.schedule_rescan();
    }

    /// Blocks until no spin with a pending rescan is in flight.
    ///
    /// # Errors
    ///
    /// As [`ManualExecutor::wait`].
    pub fn wait(&self) -> Result<()> {
        self.executor.wait()
    }

    /// Bounded variant of [`wait`](TaskExecutor::wait).
    ///
    /// # Errors
    ///
    /// As [`ManualExecutor::try_wait`].
    pub fn try_wait(&self, timeout: Timeout) -> Result<bool> {
        self.executor.try_wait(timeout)
    }

    /// Stops the spin thread and returns once it has exited.
    ///
    /// Idempotent; returns immediately if the thread already stopped.
    fn stop_spin_thread(&self) {
        self.stop.store(true, Ordering::Release);
        // A disposed interrupt guard here means the context is shutting
        // down; the stop flag still ends the loop at the next timeout.
        let _ = self.executor.interrupt();
        self.reap(true);
    }

    fn reap(&self, wait: bool) {
        let mut slot = self.handle.lock();
        match slot.take() {
            Some(handle) if wait || handle.is_finished() => match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => *self.fault.lock() = Some(err.to_string()),
                Err(_) => *self.fault.lock() = Some("spin thread panicked".to_owned()),
            },
            other => *slot = other,
        }
    }
}

fn spin_loop(executor: &Arc<ManualExecutor>, stop: &AtomicBool, timeout: Timeout) -> Result<()> {
    while !stop.load(Ordering::Acquire) {
        if !executor.try_spin(timeout)? {
            executor.rescan()?;
        }
    }
    Ok(())
}

impl Disposable for TaskExecutor {
    fn is_disposed(&self) -> bool {
        self.executor.is_disposed()
    }

    /// Stops the spin thread, unregisters the shutdown hook, and disposes
    /// the wrapped executor.
    fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.stop_spin_thread();
        if let Some(token) = self.hook.lock().take() {
            self.context.remove_shutdown_hook(token);
        }
        self.executor.dispose()
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        let _ = self.dispose();
    }
}
