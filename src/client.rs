//! Service clients: asynchronous request/response correlation.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::node::Node;
use crate::trace::debug;
use crate::transport::codec::{self, Message};
use crate::transport::{ClientHandle, QosProfile, WakeSignal};
use crate::wait_set::Timeout;
use crate::waitable::{ClientBase, Disposable, Waitable};

/// How long [`Client::call`] blocks on its future between drain passes.
const CALL_POLL_SLICE: Duration = Duration::from_millis(10);

/// A typed service client on a topic.
///
/// Created via [`Node::create_client`]. Requests are correlated to
/// responses by the sequence number the transport assigns on send; each
/// outstanding request is tracked in a pending map until it is fulfilled,
/// canceled, or the client is disposed. Out-of-order responses resolve
/// correctly; responses with no pending entry (late arrivals after a
/// cancel) are discarded.
pub struct Client<I: Message, O: Message> {
    topic: String,
    handle: ClientHandle,
    requests: Mutex<HashMap<i64, Arc<ResponseSlot<O>>>>,
    node: Weak<Node>,
    disposed: AtomicBool,
    _request: PhantomData<fn(I)>,
}

impl<I: Message, O: Message> Client<I, O> {
    pub(crate) fn new(node: &Arc<Node>, topic: &str, qos: QosProfile) -> Result<Arc<Self>> {
        let handle = node.interchange().register_client::<I, O>(topic, qos.depth)?;
        Ok(Arc::new(Self {
            topic: topic.to_owned(),
            handle,
            requests: Mutex::new(HashMap::new()),
            node: Arc::downgrade(node),
            disposed: AtomicBool::new(false),
            _request: PhantomData,
        }))
    }

    /// The called topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Whether a server is currently registered for this service.
    #[must_use]
    pub fn service_available(&self) -> bool {
        self.handle.service_available()
    }

    /// Number of requests sent but not yet fulfilled or canceled.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.requests.lock().len()
    }

    /// Sends a request and returns a future for its response.
    ///
    /// Returns immediately; the future resolves when a matching response is
    /// processed (by an executor spinning this client, or by [`call`]).
    /// Thread safe.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ObjectDisposed`] if the client was disposed, or a
    /// transport error if encoding or sending fails.
    ///
    /// [`call`]: Client::call
    pub fn call_async(&self, request: &I) -> Result<ResponseFuture<O>> {
        if self.is_disposed() {
            return Err(self.disposed_error());
        }
        let bytes = codec::encode(&self.topic, request)?;
        // Holding the map lock across send keeps try_process from observing
        // a response before its slot is registered.
        let mut requests = self.requests.lock();
        let sequence = self.handle.send_request(bytes)?;
        let slot = Arc::new(ResponseSlot::new());
        requests.insert(sequence, Arc::clone(&slot));
        Ok(ResponseFuture { slot, sequence })
    }

    /// Sends a request and blocks until its response arrives.
    ///
    /// Drives its own readiness loop, so it completes whether or not an
    /// executor is spinning this client concurrently. Blocks indefinitely
    /// if no server ever answers; check [`service_available`] first when
    /// that matters.
    ///
    /// # Errors
    ///
    /// As [`call_async`], plus [`Error::TaskCanceled`] /
    /// [`Error::ObjectDisposed`] if the request is canceled or the client
    /// disposed while waiting.
    ///
    /// [`call_async`]: Client::call_async
    /// [`service_available`]: Client::service_available
    pub fn call(&self, request: &I) -> Result<O> {
        let future = self.call_async(request)?;
        loop {
            while self.try_process()? {}
            if let Some(response) = future.wait_timeout(Timeout::Duration(CALL_POLL_SLICE))? {
                return Ok(response);
            }
        }
    }

    /// Cancels a pending request.
    ///
    /// Returns whether the request was still pending; its future resolves
    /// as canceled. A response arriving afterwards is discarded. Thread
    /// safe.
    pub fn cancel(&self, future: &ResponseFuture<O>) -> bool {
        let removed = {
            let mut requests = self.requests.lock();
            match requests.get(&future.sequence) {
                Some(slot) if Arc::ptr_eq(slot, &future.slot) => requests.remove(&future.sequence),
                _ => None,
            }
        };
        match removed {
            Some(slot) => {
                slot.resolve(Outcome::Canceled);
                true
            }
            None => false,
        }
    }

    fn disposed_error(&self) -> Error {
        Error::disposed(format!("client for topic {:?}", self.topic))
    }
}

impl<I: Message, O: Message> Disposable for Client<I, O> {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Disposes the client. Every pending future resolves with
    /// [`Error::ObjectDisposed`] so no caller awaits forever; the
    /// outstanding requests themselves are merely forgotten, not recalled
    /// from the transport.
    fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut result = Ok(());
        if let Some(node) = self.node.upgrade()
            && node.remove_client(self as *const Self as *const ())
            && let Some(executor) = node.executor()
        {
            result = executor.wait();
        }
        let pending: Vec<_> = {
            let mut requests = self.requests.lock();
            requests.drain().map(|(_, slot)| slot).collect()
        };
        for slot in pending {
            slot.resolve(Outcome::Disposed(format!(
                "client for topic {:?}",
                self.topic
            )));
        }
        self.handle.close();
        result
    }
}

impl<I: Message, O: Message> Waitable for Client<I, O> {
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
        let (sequence, bytes, slot) = {
            let mut requests = self.requests.lock();
            let Some((sequence, bytes)) = self.handle.take_response() else {
                return Ok(false);
            };
            let slot = requests.remove(&sequence);
            (sequence, bytes, slot)
        };
        match slot {
            Some(slot) => match codec::decode::<O>(&self.topic, &bytes) {
                Ok(response) => slot.resolve(Outcome::Response(response)),
                Err(err) => {
                    // The entry is already removed; resolve the waiter
                    // before surfacing the codec failure.
                    slot.resolve(Outcome::Canceled);
                    return Err(err.into());
                }
            },
            None => {
                debug!(topic = %self.topic, sequence, "response was not pending, maybe canceled");
            }
        }
        Ok(true)
    }
}

impl<I: Message, O: Message> ClientBase for Client<I, O> {}

impl<I: Message, O: Message> Drop for Client<I, O> {
    fn drop(&mut self) {
        let _ = self.dispose();
    }
}

/// Resolution of a pending request.
enum Outcome<O> {
    Response(O),
    Canceled,
    Disposed(String),
}

/// One-shot completion cell for a pending request.
///
/// Exactly one party resolves it: whoever removes the pending-map entry
/// (matching response, cancel, or client disposal). Map removal is the
/// linearization point, so double resolution cannot occur.
struct ResponseSlot<O> {
    state: Mutex<SlotState<O>>,
    condvar: Condvar,
}

struct SlotState<O> {
    outcome: Option<Outcome<O>>,
    taken: bool,
}

impl<O> ResponseSlot<O> {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                outcome: None,
                taken: false,
            }),
            condvar: Condvar::new(),
        }
    }

    fn resolve(&self, outcome: Outcome<O>) {
        let mut state = self.state.lock();
        debug_assert!(
            state.outcome.is_none() && !state.taken,
            "pending request resolved twice"
        );
        state.outcome = Some(outcome);
        self.condvar.notify_all();
    }

    fn is_resolved(&self) -> bool {
        let state = self.state.lock();
        state.taken || state.outcome.is_some()
    }

    fn wait_deadline(&self, deadline: Option<minstant::Instant>) -> Result<Option<O>> {
        let mut state = self.state.lock();
        loop {
            if state.taken {
                return Err(Error::InvalidOperation("response already taken"));
            }
            match state.outcome.take() {
                Some(Outcome::Response(response)) => {
                    state.taken = true;
                    return Ok(Some(response));
                }
                Some(Outcome::Canceled) => {
                    state.outcome = Some(Outcome::Canceled);
                    return Err(Error::TaskCanceled);
                }
                Some(Outcome::Disposed(what)) => {
                    let err = Error::disposed(what.clone());
                    state.outcome = Some(Outcome::Disposed(what));
                    return Err(err);
                }
                None => match deadline {
                    None => self.condvar.wait(&mut state),
                    Some(deadline) => {
                        let Some(remaining) =
                            deadline.checked_duration_since(minstant::Instant::now())
                        else {
                            return Ok(None);
                        };
                        let _ = self.condvar.wait_for(&mut state, remaining);
                    }
                },
            }
        }
    }
}

/// Handle to the eventual response of one request.
///
/// Obtained from [`Client::call_async`]. The response is taken exactly
/// once; later waits fail with [`Error::InvalidOperation`]. A canceled or
/// disposed request keeps reporting its terminal error on every wait.
pub struct ResponseFuture<O> {
    slot: Arc<ResponseSlot<O>>,
    sequence: i64,
}

impl<O> ResponseFuture<O> {
    /// Sequence number correlating this request with its response.
    #[must_use]
    pub fn sequence_number(&self) -> i64 {
        self.sequence
    }

    /// Whether the request has reached a terminal state.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.slot.is_resolved()
    }

    /// Takes the response if it already arrived, without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TaskCanceled`] or [`Error::ObjectDisposed`] if the
    /// request was canceled or the client disposed.
    pub fn poll(&self) -> Result<Option<O>> {
        self.wait_timeout(Timeout::Duration(Duration::ZERO))
    }

    /// Blocks until the response arrives or `timeout` passes.
    ///
    /// `Ok(None)` means the timeout passed with the request still pending.
    ///
    /// # Errors
    ///
    /// As [`poll`](ResponseFuture::poll).
    pub fn wait_timeout(&self, timeout: Timeout) -> Result<Option<O>> {
        self.slot.wait_deadline(timeout.deadline())
    }

    /// Blocks until the response arrives.
    ///
    /// # Errors
    ///
    /// As [`poll`](ResponseFuture::poll).
    pub fn wait(&self) -> Result<O> {
        self.wait_timeout(Timeout::Infinite)
            .map(|response| response.expect("infinite wait cannot time out"))
    }
}
