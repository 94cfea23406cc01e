//! Crate-wide error taxonomy.
//!
//! Expected negative outcomes (nothing available to take, timeouts) are
//! expressed as `Ok(false)` / `Ok(None)` by the operations themselves;
//! everything here is a genuine failure.

use thiserror::Error;

use crate::transport::TransportError;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// An operation was attempted on a disposed object.
    ///
    /// The payload describes the object, e.g. `client for topic "add"`.
    #[error("object disposed: {0}")]
    ObjectDisposed(String),

    /// `WaitSet::try_wait` was called with no members in any group.
    ///
    /// Waiting on an empty set would block forever; this fails fast instead.
    #[error("wait set has no members to wait on")]
    EmptyWaitSet,

    /// An operation violated a usage contract, e.g. adding a node that
    /// already has an executor, or driving one executor from two threads.
    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),

    /// A pending request was removed via cancellation.
    #[error("pending request was canceled")]
    TaskCanceled,

    /// A node name failed validation.
    #[error("invalid node name {name:?}: {reason}")]
    InvalidNodeName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A failure below the routing layer: type mismatches, codec failures,
    /// or races with endpoint teardown.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl Error {
    /// Shorthand for [`Error::ObjectDisposed`] with a formatted description.
    pub(crate) fn disposed(what: impl Into<String>) -> Self {
        Self::ObjectDisposed(what.into())
    }
}
