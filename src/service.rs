//! Service servers: take a request, run the handler, send the response.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::error::Result;
use crate::node::Node;
use crate::transport::codec::{self, Message};
use crate::transport::{QosProfile, ServiceHandle, WakeSignal};
use crate::waitable::{Disposable, ServiceBase, Waitable};

/// A typed service server on a topic.
///
/// Created via [`Node::create_service`]. Each [`try_process`] takes at most
/// one pending request, invokes the handler synchronously, and sends the
/// response tagged with the request's correlation header. Finding no
/// request despite a readiness report is expected contention with other
/// consumers and yields `Ok(false)`.
///
/// [`try_process`]: Waitable::try_process
pub struct Service<I: Message, O: Message> {
    topic: String,
    handler: Box<dyn Fn(I) -> O + Send + Sync>,
    handle: ServiceHandle,
    node: Weak<Node>,
    disposed: AtomicBool,
}

impl<I: Message, O: Message> Service<I, O> {
    pub(crate) fn new(
        node: &Arc<Node>,
        topic: &str,
        qos: QosProfile,
        handler: impl Fn(I) -> O + Send + Sync + 'static,
    ) -> Result<Arc<Self>> {
        let handle = node
            .interchange()
            .register_service::<I, O>(topic, qos.depth)?;
        Ok(Arc::new(Self {
            topic: topic.to_owned(),
            handler: Box::new(handler),
            handle,
            node: Arc::downgrade(node),
            disposed: AtomicBool::new(false),
        }))
    }

    /// The served topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl<I: Message, O: Message> Disposable for Service<I, O> {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut result = Ok(());
        if let Some(node) = self.node.upgrade()
            && node.remove_service(self as *const Self as *const ())
            && let Some(executor) = node.executor()
        {
            result = executor.wait();
        }
        self.handle.close();
        result
    }
}

impl<I: Message, O: Message> Waitable for Service<I, O> {
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
        let Some((header, bytes)) = self.handle.take_request() else {
            return Ok(false);
        };
        let request = codec::decode::<I>(&self.topic, &bytes)?;
        let response = (self.handler)(request);
        let bytes = codec::encode(&self.topic, &response)?;
        self.handle.send_response(header, bytes)?;
        Ok(true)
    }
}

impl<I: Message, O: Message> ServiceBase for Service<I, O> {}

impl<I: Message, O: Message> Drop for Service<I, O> {
    fn drop(&mut self) {
        let _ = self.dispose();
    }
}
