//! The in-process topic and service router.
//!
//! One [`Interchange`] exists per context. Endpoints register under a topic
//! name and receive a handle that carries their registration id plus their
//! inbound queue (for readable endpoints). Routing is synchronous: a
//! publish or request lands in the destination queues before the call
//! returns, which is what makes single-threaded wait/dispatch cycles
//! deterministic.
//!
//! Payload types are checked at registration: the first endpoint on a
//! topic records the concrete Rust type, later registrations must match.

use std::any::{self, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::trace::{debug, warn};

use super::TransportError;
use super::codec::Message;
use super::queue::MessageQueue;

/// Process-unique identifier assigned to every registered endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointId(u64);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation header carried from `take_request` to `send_response`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    /// Registration id of the requesting client.
    pub client: EndpointId,
    /// Client-scoped monotonic sequence number of the request.
    pub sequence: i64,
}

/// Recorded payload type of a topic registration.
#[derive(Clone, Copy)]
pub(crate) struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub(crate) fn of<T: Message>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: any::type_name::<T>(),
        }
    }
}

struct SubscriberEntry {
    id: EndpointId,
    queue: Arc<MessageQueue<Vec<u8>>>,
}

struct TopicRoute {
    key: TypeKey,
    publishers: Vec<EndpointId>,
    subscribers: Vec<SubscriberEntry>,
}

impl TopicRoute {
    fn is_empty(&self) -> bool {
        self.publishers.is_empty() && self.subscribers.is_empty()
    }
}

struct ServerEntry {
    id: EndpointId,
    queue: Arc<MessageQueue<(RequestHeader, Vec<u8>)>>,
}

struct ClientEntry {
    id: EndpointId,
    queue: Arc<MessageQueue<(i64, Vec<u8>)>>,
    next_sequence: i64,
}

struct ServiceRoute {
    request_key: TypeKey,
    response_key: TypeKey,
    servers: Vec<ServerEntry>,
    clients: Vec<ClientEntry>,
}

impl ServiceRoute {
    fn is_empty(&self) -> bool {
        self.servers.is_empty() && self.clients.is_empty()
    }
}

/// The router. One per context, shared by all of its endpoints.
#[derive(Default)]
pub struct Interchange {
    next_endpoint: AtomicU64,
    topics: Mutex<HashMap<String, TopicRoute>>,
    services: Mutex<HashMap<String, ServiceRoute>>,
}

impl Interchange {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> EndpointId {
        EndpointId(self.next_endpoint.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers a publisher for `T` on `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::TypeMismatch`] if the topic is already in
    /// use with a different payload type.
    pub(crate) fn register_publisher<T: Message>(
        self: &Arc<Self>,
        topic: &str,
    ) -> Result<PublisherHandle, TransportError> {
        let key = TypeKey::of::<T>();
        let id = self.allocate_id();
        let mut topics = self.topics.lock();
        let route = Self::topic_route(&mut topics, topic, key)?;
        route.publishers.push(id);
        Ok(PublisherHandle {
            interchange: Arc::clone(self),
            topic: topic.to_owned(),
            id,
            closed: AtomicBool::new(false),
        })
    }

    /// Registers a subscription for `T` on `topic` with the given queue depth.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::TypeMismatch`] if the topic is already in
    /// use with a different payload type.
    pub(crate) fn register_subscription<T: Message>(
        self: &Arc<Self>,
        topic: &str,
        depth: usize,
    ) -> Result<SubscriptionHandle, TransportError> {
        let key = TypeKey::of::<T>();
        let id = self.allocate_id();
        let queue = Arc::new(MessageQueue::new(depth));
        let mut topics = self.topics.lock();
        let route = Self::topic_route(&mut topics, topic, key)?;
        route.subscribers.push(SubscriberEntry {
            id,
            queue: Arc::clone(&queue),
        });
        Ok(SubscriptionHandle {
            interchange: Arc::clone(self),
            topic: topic.to_owned(),
            id,
            queue,
            closed: AtomicBool::new(false),
        })
    }

    /// Registers a service server for `I -> O` on `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::TypeMismatch`] if the service is already in
    /// use with different request or response types.
    pub(crate) fn register_service<I: Message, O: Message>(
        self: &Arc<Self>,
        topic: &str,
        depth: usize,
    ) -> Result<ServiceHandle, TransportError> {
        let id = self.allocate_id();
        let queue = Arc::new(MessageQueue::new(depth));
        let mut services = self.services.lock();
        let route = Self::service_route::<I, O>(&mut services, topic)?;
        route.servers.push(ServerEntry {
            id,
            queue: Arc::clone(&queue),
        });
        Ok(ServiceHandle {
            interchange: Arc::clone(self),
            topic: topic.to_owned(),
            id,
            queue,
            closed: AtomicBool::new(false),
        })
    }

    /// Registers a service client for `I -> O` on `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::TypeMismatch`] if the service is already in
    /// use with different request or response types.
    pub(crate) fn register_client<I: Message, O: Message>(
        self: &Arc<Self>,
        topic: &str,
        depth: usize,
    ) -> Result<ClientHandle, TransportError> {
        let id = self.allocate_id();
        let queue = Arc::new(MessageQueue::new(depth));
        let mut services = self.services.lock();
        let route = Self::service_route::<I, O>(&mut services, topic)?;
        route.clients.push(ClientEntry {
            id,
            queue: Arc::clone(&queue),
            next_sequence: 1,
        });
        Ok(ClientHandle {
            interchange: Arc::clone(self),
            topic: topic.to_owned(),
            id,
            queue,
            closed: AtomicBool::new(false),
        })
    }

    /// Whether any server is currently registered on the service `topic`.
    #[must_use]
    pub fn service_available(&self, topic: &str) -> bool {
        self.services
            .lock()
            .get(topic)
            .is_some_and(|route| !route.servers.is_empty())
    }

    fn topic_route<'a>(
        topics: &'a mut HashMap<String, TopicRoute>,
        topic: &str,
        key: TypeKey,
    ) -> Result<&'a mut TopicRoute, TransportError> {
        if let Some(route) = topics.get(topic)
            && route.key.id != key.id
        {
            return Err(TransportError::TypeMismatch {
                topic: topic.to_owned(),
                existing: route.key.name,
            });
        }
        Ok(topics.entry(topic.to_owned()).or_insert_with(|| TopicRoute {
            key,
            publishers: Vec::new(),
            subscribers: Vec::new(),
        }))
    }

    fn service_route<'a, I: Message, O: Message>(
        services: &'a mut HashMap<String, ServiceRoute>,
        topic: &str,
    ) -> Result<&'a mut ServiceRoute, TransportError> {
        let request_key = TypeKey::of::<I>();
        let response_key = TypeKey::of::<O>();
        if let Some(route) = services.get(topic)
            && (route.request_key.id != request_key.id || route.response_key.id != response_key.id)
        {
            return Err(TransportError::TypeMismatch {
                topic: topic.to_owned(),
                existing: route.request_key.name,
            });
        }
        Ok(services
            .entry(topic.to_owned())
            .or_insert_with(|| ServiceRoute {
                request_key,
                response_key,
                servers: Vec::new(),
                clients: Vec::new(),
            }))
    }

    fn publish(&self, topic: &str, id: EndpointId, bytes: &[u8]) -> Result<(), TransportError> {
        let topics = self.topics.lock();
        let route = topics
            .get(topic)
            .filter(|route| route.publishers.contains(&id))
            .ok_or_else(|| TransportError::EndpointClosed {
                topic: topic.to_owned(),
            })?;
        for subscriber in &route.subscribers {
            subscriber.queue.push(bytes.to_vec());
        }
        Ok(())
    }

    fn send_request(
        &self,
        topic: &str,
        client: EndpointId,
        bytes: Vec<u8>,
    ) -> Result<i64, TransportError> {
        let mut services = self.services.lock();
        let route = services
            .get_mut(topic)
            .ok_or_else(|| TransportError::EndpointClosed {
                topic: topic.to_owned(),
            })?;
        let entry = route
            .clients
            .iter_mut()
            .find(|entry| entry.id == client)
            .ok_or_else(|| TransportError::EndpointClosed {
                topic: topic.to_owned(),
            })?;
        let sequence = entry.next_sequence;
        entry.next_sequence += 1;
        let header = RequestHeader { client, sequence };
        match route.servers.first() {
            Some(server) => {
                server.queue.push((header, bytes));
            }
            None => {
                warn!(%topic, %client, sequence, "no server registered, request dropped");
            }
        }
        Ok(sequence)
    }

    fn send_response(
        &self,
        topic: &str,
        header: RequestHeader,
        bytes: Vec<u8>,
    ) -> Result<(), TransportError> {
        let services = self.services.lock();
        let entry = services
            .get(topic)
            .and_then(|route| route.clients.iter().find(|entry| entry.id == header.client));
        match entry {
            Some(entry) => {
                entry.queue.push((header.sequence, bytes));
            }
            None => {
                // The client left between take_request and send_response.
                debug!(%topic, client = %header.client, "response to departed client discarded");
            }
        }
        Ok(())
    }

    fn unregister_topic_endpoint(&self, topic: &str, id: EndpointId) {
        let mut topics = self.topics.lock();
        if let Some(route) = topics.get_mut(topic) {
            route.publishers.retain(|entry| *entry != id);
            if let Some(pos) = route.subscribers.iter().position(|entry| entry.id == id) {
                route.subscribers.remove(pos).queue.close();
            }
            if route.is_empty() {
                topics.remove(topic);
            }
        }
    }

    fn unregister_service_endpoint(&self, topic: &str, id: EndpointId) {
        let mut services = self.services.lock();
        if let Some(route) = services.get_mut(topic) {
            if let Some(pos) = route.servers.iter().position(|entry| entry.id == id) {
                route.servers.remove(pos).queue.close();
            }
            if let Some(pos) = route.clients.iter().position(|entry| entry.id == id) {
                route.clients.remove(pos).queue.close();
            }
            if route.is_empty() {
                services.remove(topic);
            }
        }
    }
}

/// Registration handle for a publisher.
pub struct PublisherHandle {
    interchange: Arc<Interchange>,
    topic: String,
    id: EndpointId,
    closed: AtomicBool,
}

impl PublisherHandle {
    /// Routes an encoded payload to every current subscriber of the topic.
    ///
    /// A topic with no subscribers drops the payload silently.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::EndpointClosed`] if the handle was closed.
    pub fn publish(&self, bytes: &[u8]) -> Result<(), TransportError> {
        self.interchange.publish(&self.topic, self.id, bytes)
    }

    /// Removes the registration. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.interchange
                .unregister_topic_endpoint(&self.topic, self.id);
        }
    }
}

impl Drop for PublisherHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Registration handle for a subscription, owning its inbound queue.
pub struct SubscriptionHandle {
    interchange: Arc<Interchange>,
    topic: String,
    id: EndpointId,
    queue: Arc<MessageQueue<Vec<u8>>>,
    closed: AtomicBool,
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .finish()
    }
}

impl SubscriptionHandle {
    /// Takes one buffered payload, if any.
    pub fn take(&self) -> Option<Vec<u8>> {
        self.queue.take()
    }

    /// The inbound queue, for readiness registration.
    #[must_use]
    pub fn queue(&self) -> &Arc<MessageQueue<Vec<u8>>> {
        &self.queue
    }

    /// Removes the registration and closes the queue. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.interchange
                .unregister_topic_endpoint(&self.topic, self.id);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Registration handle for a service client, owning its response queue.
pub struct ClientHandle {
    interchange: Arc<Interchange>,
    topic: String,
    id: EndpointId,
    queue: Arc<MessageQueue<(i64, Vec<u8>)>>,
    closed: AtomicBool,
}

impl ClientHandle {
    /// Sends an encoded request, returning its sequence number.
    ///
    /// The sequence number is allocated whether or not a server is
    /// currently registered; an unserved request is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::EndpointClosed`] if the handle was closed.
    pub fn send_request(&self, bytes: Vec<u8>) -> Result<i64, TransportError> {
        self.interchange.send_request(&self.topic, self.id, bytes)
    }

    /// Takes one buffered `(sequence, payload)` response, if any.
    pub fn take_response(&self) -> Option<(i64, Vec<u8>)> {
        self.queue.take()
    }

    /// The response queue, for readiness registration.
    #[must_use]
    pub fn queue(&self) -> &Arc<MessageQueue<(i64, Vec<u8>)>> {
        &self.queue
    }

    /// Whether a server is registered on this service topic.
    #[must_use]
    pub fn service_available(&self) -> bool {
        self.interchange.service_available(&self.topic)
    }

    /// Removes the registration and closes the queue. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.interchange
                .unregister_service_endpoint(&self.topic, self.id);
        }
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Registration handle for a service server, owning its request queue.
pub struct ServiceHandle {
    interchange: Arc<Interchange>,
    topic: String,
    id: EndpointId,
    queue: Arc<MessageQueue<(RequestHeader, Vec<u8>)>>,
    closed: AtomicBool,
}

impl ServiceHandle {
    /// Takes one buffered `(header, payload)` request, if any.
    pub fn take_request(&self) -> Option<(RequestHeader, Vec<u8>)> {
        self.queue.take()
    }

    /// Routes an encoded response back to the requesting client.
    ///
    /// A response whose client has departed is discarded.
    ///
    /// # Errors
    ///
    /// Currently infallible; kept fallible for parity with the send surface.
    pub fn send_response(&self, header: RequestHeader, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.interchange.send_response(&self.topic, header, bytes)
    }

    /// The request queue, for readiness registration.
    #[must_use]
    pub fn queue(&self) -> &Arc<MessageQueue<(RequestHeader, Vec<u8>)>> {
        &self.queue
    }

    /// Removes the registration and closes the queue. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.interchange
                .unregister_service_endpoint(&self.topic, self.id);
        }
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_routes_to_all_subscribers() {
        let interchange = Arc::new(Interchange::new());
        let first = interchange.register_subscription::<u32>("chatter", 4).unwrap();
        let second = interchange.register_subscription::<u32>("chatter", 4).unwrap();
        let publisher = interchange.register_publisher::<u32>("chatter").unwrap();

        publisher.publish(b"1").unwrap();

        assert_eq!(first.take(), Some(b"1".to_vec()));
        assert_eq!(second.take(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let interchange = Arc::new(Interchange::new());
        let publisher = interchange.register_publisher::<u32>("lonely").unwrap();
        publisher.publish(b"1").unwrap();

        let late = interchange.register_subscription::<u32>("lonely", 4).unwrap();
        assert_eq!(late.take(), None);
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let interchange = Arc::new(Interchange::new());
        let _existing = interchange.register_publisher::<u32>("chatter").unwrap();
        let err = interchange
            .register_subscription::<String>("chatter", 4)
            .unwrap_err();
        assert!(matches!(err, TransportError::TypeMismatch { .. }));
    }

    #[test]
    fn test_type_frees_up_when_topic_empties() {
        let interchange = Arc::new(Interchange::new());
        let publisher = interchange.register_publisher::<u32>("chatter").unwrap();
        publisher.close();
        assert!(interchange.register_publisher::<String>("chatter").is_ok());
    }

    #[test]
    fn test_sequence_numbers_monotonic_per_client() {
        let interchange = Arc::new(Interchange::new());
        let client = interchange.register_client::<u32, u32>("add", 4).unwrap();
        let other = interchange.register_client::<u32, u32>("add", 4).unwrap();

        assert_eq!(client.send_request(b"1".to_vec()).unwrap(), 1);
        assert_eq!(client.send_request(b"2".to_vec()).unwrap(), 2);
        assert_eq!(other.send_request(b"3".to_vec()).unwrap(), 1);
    }

    #[test]
    fn test_request_response_round_trip() {
        let interchange = Arc::new(Interchange::new());
        let server = interchange.register_service::<u32, u32>("add", 4).unwrap();
        let client = interchange.register_client::<u32, u32>("add", 4).unwrap();

        let sequence = client.send_request(b"40".to_vec()).unwrap();
        let (header, payload) = server.take_request().unwrap();
        assert_eq!(header.sequence, sequence);
        assert_eq!(payload, b"40");

        server.send_response(header, b"42".to_vec()).unwrap();
        assert_eq!(client.take_response(), Some((sequence, b"42".to_vec())));
    }

    #[test]
    fn test_response_to_departed_client_discarded() {
        let interchange = Arc::new(Interchange::new());
        let server = interchange.register_service::<u32, u32>("add", 4).unwrap();
        let client = interchange.register_client::<u32, u32>("add", 4).unwrap();

        client.send_request(b"40".to_vec()).unwrap();
        let (header, _) = server.take_request().unwrap();
        client.close();

        assert!(server.send_response(header, b"42".to_vec()).is_ok());
    }

    #[test]
    fn test_service_available() {
        let interchange = Arc::new(Interchange::new());
        assert!(!interchange.service_available("add"));
        let server = interchange.register_service::<u32, u32>("add", 4).unwrap();
        assert!(interchange.service_available("add"));
        server.close();
        assert!(!interchange.service_available("add"));
    }

    #[test]
    fn test_send_after_close_fails() {
        let interchange = Arc::new(Interchange::new());
        let client = interchange.register_client::<u32, u32>("add", 4).unwrap();
        client.close();
        let err = client.send_request(b"1".to_vec()).unwrap_err();
        assert!(matches!(err, TransportError::EndpointClosed { .. }));
    }
}
