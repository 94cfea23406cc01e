//! Nodes: named owners of endpoint collections.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::client::Client;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::executor::ManualExecutor;
use crate::publisher::Publisher;
use crate::service::Service;
use crate::subscription::Subscription;
use crate::trace::info;
use crate::transport::codec::Message;
use crate::transport::{Interchange, QosProfile};
use crate::waitable::{ClientBase, Disposable, ServiceBase, SubscriptionBase};

/// A named owner of publishers, subscriptions, services and clients.
///
/// Endpoints belong to exactly one node for their entire lifetime. A node
/// is owned by at most one executor at a time; the back-reference is weak
/// and never extends the executor's lifetime.
///
/// Disposing the node detaches it from its executor first (blocking until
/// any in-flight spin finishes), then disposes every owned endpoint, so the
/// executor never iterates endpoints mid-teardown.
pub struct Node {
    name: String,
    context: Weak<Context>,
    interchange: Arc<Interchange>,
    executor: Mutex<Weak<ManualExecutor>>,
    publishers: Mutex<Vec<Arc<dyn Disposable>>>,
    subscriptions: Mutex<Vec<Arc<dyn SubscriptionBase>>>,
    services: Mutex<Vec<Arc<dyn ServiceBase>>>,
    clients: Mutex<Vec<Arc<dyn ClientBase>>>,
    disposed: AtomicBool,
}

impl Node {
    pub(crate) fn new(name: &str, context: &Arc<Context>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            context: Arc::downgrade(context),
            interchange: Arc::clone(context.interchange()),
            executor: Mutex::new(Weak::new()),
            publishers: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            services: Mutex::new(Vec::new()),
            clients: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        })
    }

    /// The node's name, unique within its context.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The owning context, if it is still alive.
    #[must_use]
    pub fn context(&self) -> Option<Arc<Context>> {
        self.context.upgrade()
    }

    /// The executor currently owning this node, if any.
    #[must_use]
    pub fn executor(&self) -> Option<Arc<ManualExecutor>> {
        self.executor.lock().upgrade()
    }

    pub(crate) fn interchange(&self) -> &Arc<Interchange> {
        &self.interchange
    }

    pub(crate) fn bind_executor(&self, executor: &Arc<ManualExecutor>) -> Result<()> {
        let mut slot = self.executor.lock();
        if slot.upgrade().is_some() {
            return Err(Error::InvalidOperation("node already has an executor"));
        }
        *slot = Arc::downgrade(executor);
        Ok(())
    }

    pub(crate) fn clear_executor(&self) {
        *self.executor.lock() = Weak::new();
    }

    /// Creates a publisher for `T` on `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ObjectDisposed`] if the node was disposed, or a
    /// transport error on payload type mismatch.
    pub fn create_publisher<T: Message>(self: &Arc<Self>, topic: &str) -> Result<Arc<Publisher<T>>> {
        self.assert_ok()?;
        let publisher = Publisher::new(self, topic)?;
        self.publishers
            .lock()
            .push(Arc::clone(&publisher) as Arc<dyn Disposable>);
        Ok(publisher)
    }

    /// Creates a subscription for `T` on `topic`, delivering messages to
    /// `callback`.
    ///
    /// # Errors
    ///
    /// As [`create_publisher`](Node::create_publisher).
    pub fn create_subscription<T: Message>(
        self: &Arc<Self>,
        topic: &str,
        qos: QosProfile,
        callback: impl Fn(T) + Send + Sync + 'static,
    ) -> Result<Arc<Subscription<T>>> {
        self.assert_ok()?;
        let subscription = Subscription::new(self, topic, qos, callback)?;
        self.subscriptions
            .lock()
            .push(Arc::clone(&subscription) as Arc<dyn SubscriptionBase>);
        self.nudge_executor();
        Ok(subscription)
    }

    /// Creates a service client for `I -> O` on `topic`.
    ///
    /// # Errors
    ///
    /// As [`create_publisher`](Node::create_publisher).
    pub fn create_client<I: Message, O: Message>(
        self: &Arc<Self>,
        topic: &str,
        qos: QosProfile,
    ) -> Result<Arc<Client<I, O>>> {
        self.assert_ok()?;
        let client = Client::new(self, topic, qos)?;
        self.clients
            .lock()
            .push(Arc::clone(&client) as Arc<dyn ClientBase>);
        self.nudge_executor();
        Ok(client)
    }

    /// Creates a service server for `I -> O` on `topic` backed by `handler`.
    ///
    /// # Errors
    ///
    /// As [`create_publisher`](Node::create_publisher).
    pub fn create_service<I: Message, O: Message>(
        self: &Arc<Self>,
        topic: &str,
        qos: QosProfile,
        handler: impl Fn(I) -> O + Send + Sync + 'static,
    ) -> Result<Arc<Service<I, O>>> {
        self.assert_ok()?;
        let service = Service::new(self, topic, qos, handler)?;
        self.services
            .lock()
            .push(Arc::clone(&service) as Arc<dyn ServiceBase>);
        self.nudge_executor();
        Ok(service)
    }

    /// Snapshot of the node's subscriptions.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<Arc<dyn SubscriptionBase>> {
        self.subscriptions.lock().clone()
    }

    /// Snapshot of the node's clients.
    #[must_use]
    pub fn clients(&self) -> Vec<Arc<dyn ClientBase>> {
        self.clients.lock().clone()
    }

    /// Snapshot of the node's services.
    #[must_use]
    pub fn services(&self) -> Vec<Arc<dyn ServiceBase>> {
        self.services.lock().clone()
    }

    /// Number of publishers owned by the node.
    #[must_use]
    pub fn publisher_count(&self) -> usize {
        self.publishers.lock().len()
    }

    pub(crate) fn remove_publisher(&self, target: *const ()) -> bool {
        remove_entry(&self.publishers, target)
    }

    pub(crate) fn remove_subscription(&self, target: *const ()) -> bool {
        let removed = remove_entry(&self.subscriptions, target);
        if removed {
            self.nudge_executor();
        }
        removed
    }

    pub(crate) fn remove_service(&self, target: *const ()) -> bool {
        let removed = remove_entry(&self.services, target);
        if removed {
            self.nudge_executor();
        }
        removed
    }

    pub(crate) fn remove_client(&self, target: *const ()) -> bool {
        let removed = remove_entry(&self.clients, target);
        if removed {
            self.nudge_executor();
        }
        removed
    }

    fn nudge_executor(&self) {
        if let Some(executor) = self.executor() {
            executor.try_schedule_rescan(self);
        }
    }

    fn assert_ok(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::disposed(format!("node {:?}", self.name)));
        }
        Ok(())
    }
}

impl Disposable for Node {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Detach from the executor before touching endpoints so no spin is
        // in flight while they are torn down.
        let mut result = Ok(());
        if let Some(executor) = self.executor() {
            result = executor.detach_node(self).map(|_| ());
        }
        let publishers: Vec<_> = self.publishers.lock().drain(..).collect();
        for publisher in publishers {
            result = result.and(publisher.dispose());
        }
        let subscriptions: Vec<_> = self.subscriptions.lock().drain(..).collect();
        for subscription in subscriptions {
            result = result.and(subscription.dispose());
        }
        let services: Vec<_> = self.services.lock().drain(..).collect();
        for service in services {
            result = result.and(service.dispose());
        }
        let clients: Vec<_> = self.clients.lock().drain(..).collect();
        for client in clients {
            result = result.and(client.dispose());
        }
        if let Some(context) = self.context.upgrade() {
            context.remove_node(&self.name);
        }
        info!(node = %self.name, "node disposed");
        result
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        let _ = self.dispose();
    }
}

fn remove_entry<T: ?Sized>(members: &Mutex<Vec<Arc<T>>>, target: *const ()) -> bool {
    let mut members = members.lock();
    let before = members.len();
    members.retain(|member| Arc::as_ptr(member) as *const () != target);
    members.len() != before
}
