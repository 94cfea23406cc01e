//! Readiness-pollable endpoint capability.

use std::sync::Arc;

use crate::error::Result;
use crate::transport::WakeSignal;

/// Deterministic teardown surface shared by every endpoint.
///
/// Disposal is explicit and idempotent; `Drop` implementations call
/// [`dispose`] as a best-effort safety net, but callers that care about
/// teardown errors should dispose explicitly.
///
/// [`dispose`]: Disposable::dispose
pub trait Disposable: Send + Sync {
    /// Whether the object has been disposed.
    fn is_disposed(&self) -> bool;

    /// Releases the object's resources. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if detaching from an owning executor failed.
    fn dispose(&self) -> Result<()>;
}

/// A readiness source registrable into a wait set.
///
/// A wait set drives members through three phases: it attaches its wake
/// signal ([`attach_waker`]), polls readiness while blocked
/// ([`poll_ready`]), and detaches before returning. Whoever holds the
/// resulting ready snapshot then dispatches exactly one unit of work per
/// ready member via [`try_process`].
///
/// [`attach_waker`]: Waitable::attach_waker
/// [`poll_ready`]: Waitable::poll_ready
/// [`try_process`]: Waitable::try_process
pub trait Waitable: Disposable {
    /// Attaches the wait signal to be notified when the member becomes
    /// ready. Replaces any previously attached signal; members belong to at
    /// most one blocked wait at a time.
    fn attach_waker(&self, waker: &Arc<WakeSignal>);

    /// Detaches the attached wait signal, if any.
    fn detach_waker(&self);

    /// Whether one unit of work is available right now.
    ///
    /// For guard conditions this consumes the trigger; the caller must
    /// treat a `true` result as part of the current readiness snapshot.
    fn poll_ready(&self) -> bool;

    /// Processes at most one unit of work.
    ///
    /// Returns `Ok(false)` when nothing was actually available, which is
    /// expected under contention between a readiness snapshot and a
    /// concurrent consumer, not a failure.
    ///
    /// # Errors
    ///
    /// Propagates codec and transport failures. User callback panics
    /// propagate to the caller.
    fn try_process(&self) -> Result<bool>;
}

/// Marker for subscription-kind waitables, gating the wait set's
/// subscription group.
pub trait SubscriptionBase: Waitable {}

/// Marker for client-kind waitables, gating the wait set's client group.
pub trait ClientBase: Waitable {}

/// Marker for service-kind waitables, gating the wait set's service group.
pub trait ServiceBase: Waitable {}
