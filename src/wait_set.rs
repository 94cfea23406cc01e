//! Wait sets: one blocking multiplexed wait over typed member groups.

use std::sync::Arc;
use std::time::Duration;

use minstant::Instant;

use crate::error::{Error, Result};
use crate::guard_condition::GuardCondition;
use crate::transport::WakeSignal;
use crate::waitable::Disposable;
use crate::waitable::{ClientBase, ServiceBase, SubscriptionBase, Waitable};

/// Bound on how long a blocking operation may wait.
#[derive(Debug, Clone, Copy)]
pub enum Timeout {
    /// Wait indefinitely.
    Infinite,
    /// Wait for at most the specified duration; zero polls without blocking.
    Duration(Duration),
}

impl Timeout {
    /// Converts to an absolute deadline; `None` means no deadline.
    pub(crate) fn deadline(self) -> Option<Instant> {
        match self {
            Self::Infinite => None,
            Self::Duration(duration) => Some(Instant::now() + duration),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Self::Duration(duration)
    }
}

/// Collects waitables into typed groups and performs one blocking wait.
///
/// Membership is mutated through `&mut self`, so the borrow checker already
/// rules out edits while a [`try_wait`] is in progress on another thread;
/// the executor additionally guards its wait set with a mutex and fails
/// fast on contention.
///
/// A wait runs three phases: attach the set's wake signal to every live
/// member, block until any member reports ready or the deadline passes,
/// then harvest a [`ReadySet`] snapshot and detach. Disposed members are
/// skipped silently.
///
/// [`try_wait`]: WaitSet::try_wait
pub struct WaitSet {
    subscriptions: Vec<Arc<dyn SubscriptionBase>>,
    clients: Vec<Arc<dyn ClientBase>>,
    services: Vec<Arc<dyn ServiceBase>>,
    guard_conditions: Vec<Arc<GuardCondition>>,
    waker: Arc<WakeSignal>,
    disposed: bool,
}

impl WaitSet {
    /// Creates an empty wait set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscriptions: Vec::new(),
            clients: Vec::new(),
            services: Vec::new(),
            guard_conditions: Vec::new(),
            waker: Arc::new(WakeSignal::new()),
            disposed: false,
        }
    }

    /// Adds a member to the subscription group.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ObjectDisposed`] if the wait set was disposed.
    pub fn add_subscription(&mut self, subscription: Arc<dyn SubscriptionBase>) -> Result<()> {
        self.assert_ok()?;
        self.subscriptions.push(subscription);
        Ok(())
    }

    /// Adds a member to the client group.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ObjectDisposed`] if the wait set was disposed.
    pub fn add_client(&mut self, client: Arc<dyn ClientBase>) -> Result<()> {
        self.assert_ok()?;
        self.clients.push(client);
        Ok(())
    }

    /// Adds a member to the service group.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ObjectDisposed`] if the wait set was disposed.
    pub fn add_service(&mut self, service: Arc<dyn ServiceBase>) -> Result<()> {
        self.assert_ok()?;
        self.services.push(service);
        Ok(())
    }

    /// Adds a member to the guard condition group.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ObjectDisposed`] if the wait set was disposed.
    pub fn add_guard_condition(&mut self, guard_condition: Arc<GuardCondition>) -> Result<()> {
        self.assert_ok()?;
        self.guard_conditions.push(guard_condition);
        Ok(())
    }

    /// Removes a subscription by identity, returning whether it was present.
    pub fn remove_subscription(&mut self, subscription: &Arc<dyn SubscriptionBase>) -> bool {
        remove_by_identity(&mut self.subscriptions, Arc::as_ptr(subscription) as *const ())
    }

    /// Removes a client by identity, returning whether it was present.
    pub fn remove_client(&mut self, client: &Arc<dyn ClientBase>) -> bool {
        remove_by_identity(&mut self.clients, Arc::as_ptr(client) as *const ())
    }

    /// Removes a service by identity, returning whether it was present.
    pub fn remove_service(&mut self, service: &Arc<dyn ServiceBase>) -> bool {
        remove_by_identity(&mut self.services, Arc::as_ptr(service) as *const ())
    }

    /// Removes a guard condition by identity, returning whether it was present.
    pub fn remove_guard_condition(&mut self, guard_condition: &Arc<GuardCondition>) -> bool {
        remove_by_identity(
            &mut self.guard_conditions,
            Arc::as_ptr(guard_condition) as *const (),
        )
    }

    /// Empties the subscription group.
    pub fn clear_subscriptions(&mut self) {
        self.subscriptions.clear();
    }

    /// Empties the client group.
    pub fn clear_clients(&mut self) {
        self.clients.clear();
    }

    /// Empties the service group.
    pub fn clear_services(&mut self) {
        self.services.clear();
    }

    /// Number of members in the subscription group.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Number of members in the client group.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Number of members in the service group.
    #[must_use]
    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    /// Number of members in the guard condition group.
    #[must_use]
    pub fn guard_condition_count(&self) -> usize {
        self.guard_conditions.len()
    }

    /// Whether all four groups are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
            && self.clients.is_empty()
            && self.services.is_empty()
            && self.guard_conditions.is_empty()
    }

    /// Whether the wait set has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Blocks until at least one member is ready or `timeout` passes.
    ///
    /// `Ok(None)` is a timeout. The returned snapshot is consistent: it
    /// reflects one harvest pass, and no member is reported ready twice for
    /// one logical event. It is only meaningful until the next `try_wait`.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyWaitSet`] if all groups are empty at call time (a wait
    /// could never wake); [`Error::ObjectDisposed`] after [`dispose`].
    ///
    /// [`dispose`]: WaitSet::dispose
    pub fn try_wait(&mut self, timeout: Timeout) -> Result<Option<ReadySet>> {
        self.assert_ok()?;
        if self.is_empty() {
            return Err(Error::EmptyWaitSet);
        }
        let deadline = timeout.deadline();

        self.waker.clear();
        self.for_each_live(|member| member.attach_waker(&self.waker));

        let result = loop {
            let ready = self.collect_ready();
            if !ready.is_empty() {
                break Some(ready);
            }
            if !self.waker.wait_until(deadline) {
                // Deadline passed; one final harvest catches anything that
                // arrived at the boundary.
                let ready = self.collect_ready();
                break (!ready.is_empty()).then_some(ready);
            }
        };

        self.for_each_live(|member| member.detach_waker());
        Ok(result)
    }

    /// Disposes the wait set, emptying every group. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.subscriptions.clear();
        self.clients.clear();
        self.services.clear();
        self.guard_conditions.clear();
    }

    fn assert_ok(&self) -> Result<()> {
        if self.disposed {
            return Err(Error::disposed("wait set"));
        }
        Ok(())
    }

    fn for_each_live(&self, mut visit: impl FnMut(&dyn Waitable)) {
        for member in &self.subscriptions {
            if !member.is_disposed() {
                visit(member.as_ref());
            }
        }
        for member in &self.clients {
            if !member.is_disposed() {
                visit(member.as_ref());
            }
        }
        for member in &self.services {
            if !member.is_disposed() {
                visit(member.as_ref());
            }
        }
        for member in &self.guard_conditions {
            if !member.is_disposed() {
                visit(member.as_ref());
            }
        }
    }

    fn collect_ready(&self) -> ReadySet {
        let mut ready = ReadySet::default();
        for (index, member) in self.subscriptions.iter().enumerate() {
            if !member.is_disposed() && member.poll_ready() {
                ready.subscriptions.push((index, Arc::clone(member)));
            }
        }
        for (index, member) in self.clients.iter().enumerate() {
            if !member.is_disposed() && member.poll_ready() {
                ready.clients.push((index, Arc::clone(member)));
            }
        }
        for (index, member) in self.services.iter().enumerate() {
            if !member.is_disposed() && member.poll_ready() {
                ready.services.push((index, Arc::clone(member)));
            }
        }
        for (index, member) in self.guard_conditions.iter().enumerate() {
            if !member.is_disposed() && member.poll_ready() {
                ready.guard_conditions.push((index, Arc::clone(member)));
            }
        }
        ready
    }
}

impl Default for WaitSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the members that became ready in one wait.
///
/// Each group is a sparse list of `(index within group, member)` pairs in
/// registration order. Dispatch order across groups is fixed:
/// subscriptions, then clients, then services, then guard conditions.
#[derive(Default)]
pub struct ReadySet {
    subscriptions: Vec<(usize, Arc<dyn SubscriptionBase>)>,
    clients: Vec<(usize, Arc<dyn ClientBase>)>,
    services: Vec<(usize, Arc<dyn ServiceBase>)>,
    guard_conditions: Vec<(usize, Arc<GuardCondition>)>,
}

impl ReadySet {
    /// Ready subscriptions as `(group index, member)` pairs.
    #[must_use]
    pub fn subscriptions(&self) -> &[(usize, Arc<dyn SubscriptionBase>)] {
        &self.subscriptions
    }

    /// Ready clients as `(group index, member)` pairs.
    #[must_use]
    pub fn clients(&self) -> &[(usize, Arc<dyn ClientBase>)] {
        &self.clients
    }

    /// Ready services as `(group index, member)` pairs.
    #[must_use]
    pub fn services(&self) -> &[(usize, Arc<dyn ServiceBase>)] {
        &self.services
    }

    /// Ready guard conditions as `(group index, member)` pairs.
    #[must_use]
    pub fn guard_conditions(&self) -> &[(usize, Arc<GuardCondition>)] {
        &self.guard_conditions
    }

    /// Total number of ready members across all groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
            + self.clients.len()
            + self.services.len()
            + self.guard_conditions.len()
    }

    /// Whether no member became ready.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispatches one unit of work per ready member, in the documented
    /// group order.
    ///
    /// # Errors
    ///
    /// Stops at and propagates the first processing failure.
    pub fn try_process_all(&self) -> Result<()> {
        for (_, member) in &self.subscriptions {
            member.try_process()?;
        }
        for (_, member) in &self.clients {
            member.try_process()?;
        }
        for (_, member) in &self.services {
            member.try_process()?;
        }
        for (_, member) in &self.guard_conditions {
            member.try_process()?;
        }
        Ok(())
    }
}

fn remove_by_identity<T: ?Sized>(members: &mut Vec<Arc<T>>, target: *const ()) -> bool {
    let before = members.len();
    members.retain(|member| Arc::as_ptr(member) as *const () != target);
    members.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MessageQueue;
    use crate::waitable::Disposable;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct StubSubscription {
        queue: MessageQueue<u32>,
        processed: AtomicUsize,
        disposed: AtomicBool,
    }

    impl StubSubscription {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                queue: MessageQueue::new(8),
                processed: AtomicUsize::new(0),
                disposed: AtomicBool::new(false),
            })
        }
    }

    impl Disposable for StubSubscription {
        fn is_disposed(&self) -> bool {
            self.disposed.load(Ordering::Acquire)
        }

        fn dispose(&self) -> Result<()> {
            self.disposed.store(true, Ordering::Release);
            Ok(())
        }
    }

    impl Waitable for StubSubscription {
        fn attach_waker(&self, waker: &Arc<WakeSignal>) {
            self.queue.attach_waker(waker);
        }

        fn detach_waker(&self) {
            self.queue.detach_waker();
        }

        fn poll_ready(&self) -> bool {
            self.queue.is_ready()
        }

        fn try_process(&self) -> Result<bool> {
            match self.queue.take() {
                Some(_) => {
                    self.processed.fetch_add(1, Ordering::AcqRel);
                    Ok(true)
                }
                None => Ok(false),
            }
        }
    }

    impl SubscriptionBase for StubSubscription {}

    #[test]
    fn test_empty_wait_set_fails_fast() {
        let mut wait_set = WaitSet::new();
        assert!(matches!(
            wait_set.try_wait(Timeout::Duration(Duration::ZERO)),
            Err(Error::EmptyWaitSet)
        ));
    }

    #[test]
    fn test_timeout_returns_none() {
        let member = StubSubscription::new();
        let mut wait_set = WaitSet::new();
        wait_set.add_subscription(member).unwrap();
        let result = wait_set
            .try_wait(Timeout::Duration(Duration::from_millis(20)))
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_ready_member_harvested_with_index() {
        let first = StubSubscription::new();
        let second = StubSubscription::new();
        let mut wait_set = WaitSet::new();
        wait_set.add_subscription(first).unwrap();
        wait_set.add_subscription(Arc::clone(&second) as _).unwrap();

        second.queue.push(5);

        let ready = wait_set
            .try_wait(Timeout::Duration(Duration::ZERO))
            .unwrap()
            .unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready.subscriptions()[0].0, 1);

        ready.try_process_all().unwrap();
        assert_eq!(second.processed.load(Ordering::Acquire), 1);
    }

    #[test]
    fn test_push_wakes_blocked_wait() {
        let member = StubSubscription::new();
        let pusher = Arc::clone(&member);
        let mut wait_set = WaitSet::new();
        wait_set.add_subscription(member).unwrap();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            pusher.queue.push(1);
        });

        let started = Instant::now();
        let ready = wait_set
            .try_wait(Timeout::Duration(Duration::from_secs(10)))
            .unwrap();
        assert!(ready.is_some());
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_disposed_member_skipped() {
        let member = StubSubscription::new();
        member.queue.push(1);
        member.dispose().unwrap();
        let mut wait_set = WaitSet::new();
        wait_set.add_subscription(member).unwrap();

        let result = wait_set.try_wait(Timeout::Duration(Duration::ZERO)).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_remove_subscription_by_identity() {
        let member = StubSubscription::new();
        let erased: Arc<dyn SubscriptionBase> = member;
        let mut wait_set = WaitSet::new();
        wait_set.add_subscription(Arc::clone(&erased)).unwrap();

        assert!(wait_set.remove_subscription(&erased));
        assert!(!wait_set.remove_subscription(&erased));
        assert_eq!(wait_set.subscription_count(), 0);
    }

    #[test]
    fn test_dispose_idempotent() {
        let mut wait_set = WaitSet::new();
        wait_set.add_subscription(StubSubscription::new()).unwrap();
        wait_set.dispose();
        wait_set.dispose();
        assert!(wait_set.is_disposed());
        assert!(matches!(
            wait_set.try_wait(Timeout::Duration(Duration::ZERO)),
            Err(Error::ObjectDisposed(_))
        ));
        assert!(matches!(
            wait_set.add_subscription(StubSubscription::new()),
            Err(Error::ObjectDisposed(_))
        ));
    }
}
