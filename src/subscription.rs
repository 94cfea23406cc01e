//! Topic subscriptions: one message delivered to a callback per dispatch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::error::Result;
use crate::node::Node;
use crate::transport::codec::{self, Message};
use crate::transport::{QosProfile, SubscriptionHandle, WakeSignal};
use crate::waitable::{Disposable, SubscriptionBase, Waitable};

/// A typed subscription on a topic.
///
/// Created via [`Node::create_subscription`]. Each [`try_process`] takes at
/// most one buffered message, decodes it, and hands it to the callback.
///
/// [`try_process`]: Waitable::try_process
pub struct Subscription<T: Message> {
    topic: String,
    callback: Box<dyn Fn(T) + Send + Sync>,
    handle: SubscriptionHandle,
    node: Weak<Node>,
    disposed: AtomicBool,
}

impl<T: Message> Subscription<T> {
    pub(crate) fn new(
        node: &Arc<Node>,
        topic: &str,
        qos: QosProfile,
        callback: impl Fn(T) + Send + Sync + 'static,
    ) -> Result<Arc<Self>> {
        let handle = node
            .interchange()
            .register_subscription::<T>(topic, qos.depth)?;
        Ok(Arc::new(Self {
            topic: topic.to_owned(),
            callback: Box::new(callback),
            handle,
            node: Arc::downgrade(node),
            disposed: AtomicBool::new(false),
        }))
    }

    /// The subscribed topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Number of buffered messages awaiting dispatch.
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.handle.queue().len()
    }
}

impl<T: Message> Disposable for Subscription<T> {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut result = Ok(());
        if let Some(node) = self.node.upgrade()
            && node.remove_subscription(self as *const Self as *const ())
            && let Some(executor) = node.executor()
        {
            // The executor must stop using this endpoint before the
            // registration is torn down.
            result = executor.wait();
        }
        self.handle.close();
        result
    }
}

impl<T: Message> Waitable for Subscription<T> {
    fn attach_waker(&self, waker: &Arc<WakeSignal>) {
        self.handle.queue().attach_waker(waker);
    }

    fn detach_waker(&self) {
        self.handle.queue().detach_waker();
    }

    fn poll_ready(&self) -> bool {
        self.handle.queue().is_ready()
    }

    fn try_process(&self) -> Result<bool> {
        let Some(bytes) = self.handle.take() else {
            return Ok(false);
        };
        let message = codec::decode::<T>(&self.topic, &bytes)?;
        (self.callback)(message);
        Ok(true)
    }
}

impl<T: Message> SubscriptionBase for Subscription<T> {}

impl<T: Message> Drop for Subscription<T> {
    fn drop(&mut self) {
        let _ = self.dispose();
    }
}
