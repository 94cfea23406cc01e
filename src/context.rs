//! Contexts: the lifecycle shell owning nodes and the interchange.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::guard_condition::GuardCondition;
use crate::node::Node;
use crate::trace::info;
use crate::transport::Interchange;
use crate::wait_set::WaitSet;
use crate::waitable::Disposable;

/// The non-global state of one init/shutdown cycle.
///
/// Owns the interchange, the node map, and any guard conditions created
/// through it. [`shutdown`] broadcasts to registered hooks exactly once,
/// before node teardown, so dependents such as [`TaskExecutor`] can stop
/// using context resources first.
///
/// [`shutdown`]: Context::shutdown
/// [`TaskExecutor`]: crate::executor::TaskExecutor
pub struct Context {
    interchange: Arc<Interchange>,
    nodes: Mutex<HashMap<String, Arc<Node>>>,
    guard_conditions: Mutex<Vec<Arc<GuardCondition>>>,
    shutdown_hooks: Mutex<Vec<(u64, Box<dyn Fn() + Send + Sync>)>>,
    next_hook: AtomicU64,
    valid: AtomicBool,
}

impl Context {
    /// Creates a fresh context with its own interchange.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            interchange: Arc::new(Interchange::new()),
            nodes: Mutex::new(HashMap::new()),
            guard_conditions: Mutex::new(Vec::new()),
            shutdown_hooks: Mutex::new(Vec::new()),
            next_hook: AtomicU64::new(0),
            valid: AtomicBool::new(true),
        })
    }

    /// Whether the context is still valid (not shut down).
    #[must_use]
    pub fn ok(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub(crate) fn interchange(&self) -> &Arc<Interchange> {
        &self.interchange
    }

    /// Creates a node with a validated, context-unique name.
    ///
    /// # Errors
    ///
    /// [`Error::ObjectDisposed`] if the context was shut down,
    /// [`Error::InvalidNodeName`] on a malformed name, and
    /// [`Error::InvalidOperation`] if the name is already in use.
    pub fn create_node(self: &Arc<Self>, name: &str) -> Result<Arc<Node>> {
        self.assert_ok()?;
        validate_node_name(name)?;
        let mut nodes = self.nodes.lock();
        if nodes.contains_key(name) {
            return Err(Error::InvalidOperation("node name already in use"));
        }
        let node = Node::new(name, self);
        nodes.insert(name.to_owned(), Arc::clone(&node));
        info!(node = name, "node created");
        Ok(node)
    }

    /// Creates a guard condition whose callback runs when it is dispatched.
    ///
    /// The context tracks the guard condition and disposes it at shutdown
    /// if the caller has not done so.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ObjectDisposed`] if the context was shut down.
    pub fn create_guard_condition(
        self: &Arc<Self>,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> Result<Arc<GuardCondition>> {
        self.assert_ok()?;
        let guard_condition = GuardCondition::new(self, callback);
        self.guard_conditions
            .lock()
            .push(Arc::clone(&guard_condition));
        Ok(guard_condition)
    }

    /// Creates an empty wait set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ObjectDisposed`] if the context was shut down.
    pub fn create_wait_set(&self) -> Result<WaitSet> {
        self.assert_ok()?;
        Ok(WaitSet::new())
    }

    /// Looks up a node by name.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes.lock().get(name).cloned()
    }

    /// Number of nodes currently owned by the context.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.lock().len()
    }

    /// Registers a hook to run once when the context shuts down, returning
    /// a token for [`remove_shutdown_hook`].
    ///
    /// [`remove_shutdown_hook`]: Context::remove_shutdown_hook
    pub fn on_shutdown(&self, hook: impl Fn() + Send + Sync + 'static) -> u64 {
        let token = self.next_hook.fetch_add(1, Ordering::Relaxed);
        self.shutdown_hooks.lock().push((token, Box::new(hook)));
        token
    }

    /// Removes a registered shutdown hook, returning whether it was present.
    pub fn remove_shutdown_hook(&self, token: u64) -> bool {
        let mut hooks = self.shutdown_hooks.lock();
        let before = hooks.len();
        hooks.retain(|(registered, _)| *registered != token);
        hooks.len() != before
    }

    pub(crate) fn remove_node(&self, name: &str) -> bool {
        self.nodes.lock().remove(name).is_some()
    }

    pub(crate) fn remove_guard_condition(&self, guard_condition: &GuardCondition) {
        let target = guard_condition as *const GuardCondition;
        self.guard_conditions
            .lock()
            .retain(|member| Arc::as_ptr(member) != target);
    }

    /// Shuts the context down: invalidates it, fires the shutdown broadcast
    /// once, then disposes every node and leftover guard condition.
    ///
    /// Idempotent; later calls return `Ok(())` without effect.
    ///
    /// # Errors
    ///
    /// Returns the first node teardown failure, after attempting the rest.
    pub fn shutdown(&self) -> Result<()> {
        if !self.valid.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        info!("context shutting down");
        let hooks: Vec<_> = self.shutdown_hooks.lock().drain(..).collect();
        for (_, hook) in &hooks {
            hook();
        }
        let nodes: Vec<_> = {
            let mut nodes = self.nodes.lock();
            nodes.drain().map(|(_, node)| node).collect()
        };
        let mut result = Ok(());
        for node in nodes {
            result = result.and(node.dispose());
        }
        let guard_conditions: Vec<_> = self.guard_conditions.lock().drain(..).collect();
        for guard_condition in guard_conditions {
            result = result.and(guard_condition.dispose());
        }
        result
    }

    fn assert_ok(&self) -> Result<()> {
        if !self.ok() {
            return Err(Error::disposed("context"));
        }
        Ok(())
    }
}

impl Disposable for Context {
    fn is_disposed(&self) -> bool {
        !self.ok()
    }

    fn dispose(&self) -> Result<()> {
        self.shutdown()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

fn validate_node_name(name: &str) -> Result<()> {
    let invalid = |reason| Error::InvalidNodeName {
        name: name.to_owned(),
        reason,
    };
    if name.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(invalid("must not start with a digit"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(invalid("may only contain alphanumerics and underscores"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_name_validation() {
        assert!(validate_node_name("sensor_node").is_ok());
        assert!(validate_node_name("_private").is_ok());
        assert!(validate_node_name("").is_err());
        assert!(validate_node_name("1st").is_err());
        assert!(validate_node_name("has space").is_err());
        assert!(validate_node_name("dash-ed").is_err());
    }
}
