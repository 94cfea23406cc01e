//! Topic publishers.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::error::{Error, Result};
use crate::node::Node;
use crate::transport::codec::{self, Message};
use crate::transport::PublisherHandle;
use crate::waitable::Disposable;

/// A typed publisher on a topic.
///
/// Created via [`Node::create_publisher`]. Publishing is fire-and-forget:
/// the message is routed to every subscriber registered at that moment and
/// dropped if there are none.
pub struct Publisher<T: Message> {
    topic: String,
    handle: PublisherHandle,
    node: Weak<Node>,
    disposed: AtomicBool,
    _payload: PhantomData<fn(T)>,
}

impl<T: Message> Publisher<T> {
    pub(crate) fn new(node: &Arc<Node>, topic: &str) -> Result<Arc<Self>> {
        let handle = node.interchange().register_publisher::<T>(topic)?;
        Ok(Arc::new(Self {
            topic: topic.to_owned(),
            handle,
            node: Arc::downgrade(node),
            disposed: AtomicBool::new(false),
            _payload: PhantomData,
        }))
    }

    /// The published topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publishes one message to all current subscribers.
    ///
    /// The message can be reused or dropped after this call. Thread safe.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ObjectDisposed`] if the publisher was disposed, or a
    /// transport error if encoding fails.
    pub fn publish(&self, message: &T) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::disposed(format!(
                "publisher for topic {:?}",
                self.topic
            )));
        }
        let bytes = codec::encode(&self.topic, message)?;
        self.handle.publish(&bytes)?;
        Ok(())
    }
}

impl<T: Message> Disposable for Publisher<T> {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(node) = self.node.upgrade() {
            node.remove_publisher(self as *const Self as *const ());
        }
        self.handle.close();
        Ok(())
    }
}

impl<T: Message> Drop for Publisher<T> {
    fn drop(&mut self) {
        let _ = self.dispose();
    }
}
