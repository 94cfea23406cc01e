//! In-process transport: topic routing, readiness signaling, payload codec.
//!
//! This module is the boundary the rest of the crate treats as "the
//! transport". The [`Interchange`] routes opaque byte payloads between
//! endpoints registered on named topics and services; [`MessageQueue`]s
//! buffer inbound payloads per endpoint; [`WakeSignal`]s let a blocked
//! wait-set sleep until any registered channel becomes ready.
//!
//! The core above this module never inspects payload bytes. Typed endpoints
//! encode and decode at the edge via [`codec`].

pub mod codec;
mod interchange;
mod queue;
mod signal;

pub use interchange::{
    ClientHandle, EndpointId, Interchange, PublisherHandle, RequestHeader, ServiceHandle,
    SubscriptionHandle,
};
pub use queue::MessageQueue;
pub use signal::{TriggerLatch, WakeSignal};

use thiserror::Error;

/// Failures below the routing layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A topic or service is already registered with a different payload type.
    #[error("topic {topic:?} is already in use with message type {existing}")]
    TypeMismatch {
        /// The contested topic name.
        topic: String,
        /// Type name recorded by the earlier registration.
        existing: &'static str,
    },

    /// Encoding a payload failed.
    #[error("failed to encode message for topic {topic:?}")]
    Encode {
        /// Topic the payload was bound for.
        topic: String,
        /// Underlying serializer failure.
        source: serde_json::Error,
    },

    /// Decoding an inbound payload failed.
    #[error("failed to decode message from topic {topic:?}")]
    Decode {
        /// Topic the payload arrived on.
        topic: String,
        /// Underlying deserializer failure.
        source: serde_json::Error,
    },

    /// The endpoint's registration was torn down while the operation ran.
    #[error("endpoint on topic {topic:?} is closed")]
    EndpointClosed {
        /// Topic of the closed endpoint.
        topic: String,
    },
}

/// Quality-of-service profile passed through to the transport.
///
/// The runtime treats this as opaque apart from `depth`, which bounds the
/// per-endpoint inbound queue. On overflow the oldest payload is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QosProfile {
    /// History depth: maximum number of buffered inbound payloads.
    pub depth: usize,
}

impl QosProfile {
    /// Default profile for plain topics.
    #[must_use]
    pub const fn topics_default() -> Self {
        Self { depth: 10 }
    }

    /// Default profile for services (request and response queues).
    #[must_use]
    pub const fn services_default() -> Self {
        Self { depth: 10 }
    }

    /// Shallow profile for high-rate sensor-style topics.
    #[must_use]
    pub const fn sensor_data() -> Self {
        Self { depth: 5 }
    }
}

impl Default for QosProfile {
    fn default() -> Self {
        Self::topics_default()
    }
}
