//! In-process pub/sub and request/response middleware client runtime.
//!
//! Applications create endpoints (publishers, subscriptions, service
//! servers, service clients, guard conditions) on named [`Node`]s, hand the
//! nodes to an executor, and the runtime multiplexes readiness over the
//! whole endpoint set, dispatching exactly one unit of work per ready
//! endpoint.
//!
//! # Architecture
//!
//! - [`WaitSet`] collects waitables into typed groups and performs one
//!   blocking wait, producing a partitioned ready snapshot.
//! - [`ManualExecutor`] owns a wait set plus an interrupt [`GuardCondition`]
//!   and drives wait/dispatch cycles, keeping membership consistent with
//!   node topology through a rescan flag. [`TaskExecutor`] runs the same
//!   loop on a background thread.
//! - [`Client`] correlates asynchronous requests with responses by the
//!   sequence numbers the transport assigns on send; [`Service`] answers
//!   one request per dispatch under the same correlation header.
//! - [`Context`] owns the node set and the in-process interchange, and
//!   broadcasts a one-shot shutdown event before tearing nodes down.
//!
//! Concurrency model: parallel threads with explicit synchronization. One
//! thread drives an executor; every other operation (adding and removing
//! nodes, scheduling rescans, triggering interrupts, issuing requests) is
//! safe from any thread.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicI64, Ordering};
//! use std::time::Duration;
//!
//! use axon::{Context, ManualExecutor, QosProfile, Timeout};
//!
//! let context = Context::new();
//! let node = context.create_node("listener")?;
//! let executor = ManualExecutor::new(&context)?;
//! executor.add(&node)?;
//!
//! let received = Arc::new(AtomicI64::new(0));
//! let sink = Arc::clone(&received);
//! let _subscription = node.create_subscription::<i64>(
//!     "chatter",
//!     QosProfile::topics_default(),
//!     move |value| sink.store(value, Ordering::Release),
//! )?;
//! let publisher = node.create_publisher::<i64>("chatter")?;
//!
//! executor.rescan()?;
//! publisher.publish(&42)?;
//! assert!(executor.try_spin(Timeout::Duration(Duration::from_secs(1)))?);
//! assert_eq!(received.load(Ordering::Acquire), 42);
//!
//! context.shutdown()?;
//! # Ok::<(), axon::Error>(())
//! ```

mod client;
mod context;
mod error;
mod executor;
mod guard_condition;
mod node;
mod publisher;
mod service;
mod subscription;
pub mod trace;
pub mod transport;
mod wait_set;
mod waitable;

pub use client::{Client, ResponseFuture};
pub use context::Context;
pub use error::{Error, Result};
pub use executor::{ManualExecutor, TaskExecutor};
pub use guard_condition::GuardCondition;
pub use node::Node;
pub use publisher::Publisher;
pub use service::Service;
pub use subscription::Subscription;
pub use transport::codec::Message;
pub use transport::{QosProfile, TransportError};
pub use wait_set::{ReadySet, Timeout, WaitSet};
pub use waitable::{ClientBase, Disposable, ServiceBase, SubscriptionBase, Waitable};

// Re-export serde's derive traits so message types can derive without
// depending on serde directly.
pub use serde::{Deserialize, Serialize};
