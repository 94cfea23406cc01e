//! Integration tests for the manual executor: node ownership, rescan
//! consistency, interrupts, and the remove-while-blocked guarantee.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use axon::{Context, Disposable, Error, ManualExecutor, QosProfile, Timeout};

fn counting_subscription(
    node: &Arc<axon::Node>,
    topic: &str,
) -> (Arc<axon::Subscription<i64>>, Arc<AtomicUsize>) {
    let counter = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&counter);
    let subscription = node
        .create_subscription::<i64>(topic, QosProfile::topics_default(), move |_| {
            sink.fetch_add(1, Ordering::AcqRel);
        })
        .expect("create subscription");
    (subscription, counter)
}

/// Busy-waits until the executor reports a spin in progress.
fn wait_until_spinning(executor: &ManualExecutor) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !executor.is_spinning() {
        assert!(Instant::now() < deadline, "spin never started");
        thread::yield_now();
    }
}

#[test]
fn add_sets_back_reference_and_schedules_rescan() {
    let context = Context::new();
    let node = context.create_node("worker").unwrap();
    let executor = ManualExecutor::new(&context).unwrap();

    executor.add(&node).unwrap();

    let back = node.executor().expect("back-reference set");
    assert!(Arc::ptr_eq(&back, &executor));
    assert!(executor.contains(&node));
    assert_eq!(executor.node_count(), 1);
    assert!(executor.rescan_scheduled());
}

#[test]
fn add_rejects_node_owned_by_another_executor() {
    let context = Context::new();
    let node = context.create_node("worker").unwrap();
    let first = ManualExecutor::new(&context).unwrap();
    let second = ManualExecutor::new(&context).unwrap();

    first.add(&node).unwrap();
    let err = second.add(&node).unwrap_err();

    assert!(matches!(err, Error::InvalidOperation(_)));
    assert!(Arc::ptr_eq(&node.executor().unwrap(), &first));
    assert!(!second.contains(&node));
    assert!(!second.rescan_scheduled());
}

#[test]
fn remove_clears_back_reference() {
    let context = Context::new();
    let node = context.create_node("worker").unwrap();
    let executor = ManualExecutor::new(&context).unwrap();
    executor.add(&node).unwrap();
    executor.rescan().unwrap();

    assert!(executor.remove(&node).unwrap());

    assert!(node.executor().is_none());
    assert!(!executor.contains(&node));
    assert!(executor.rescan_scheduled());
}

#[test]
fn remove_unknown_node_is_noop() {
    let context = Context::new();
    let node = context.create_node("worker").unwrap();
    let executor = ManualExecutor::new(&context).unwrap();

    assert!(!executor.remove(&node).unwrap());
    assert!(!executor.rescan_scheduled());
}

#[test]
fn clear_releases_every_node() {
    let context = Context::new();
    let first = context.create_node("first").unwrap();
    let second = context.create_node("second").unwrap();
    let executor = ManualExecutor::new(&context).unwrap();
    executor.add(&first).unwrap();
    executor.add(&second).unwrap();
    executor.rescan().unwrap();

    executor.clear().unwrap();

    assert!(first.executor().is_none());
    assert!(second.executor().is_none());
    assert_eq!(executor.node_count(), 0);
    assert!(executor.rescan_scheduled());
}

#[test]
fn rescan_clears_dirty_flag() {
    let context = Context::new();
    let executor = ManualExecutor::new(&context).unwrap();

    executor.schedule_rescan();
    executor.schedule_rescan();
    assert!(executor.rescan_scheduled());

    executor.rescan().unwrap();
    assert!(!executor.rescan_scheduled());
}

#[test]
fn rescan_membership_tracks_node_topology() {
    let context = Context::new();
    let node = context.create_node("worker").unwrap();
    let executor = ManualExecutor::new(&context).unwrap();
    executor.add(&node).unwrap();

    let (_subscription, counter) = counting_subscription(&node, "chatter");
    let publisher = node.create_publisher::<i64>("chatter").unwrap();
    executor.rescan().unwrap();

    publisher.publish(&1).unwrap();
    assert!(executor.try_spin(Timeout::Duration(Duration::from_secs(1))).unwrap());
    assert_eq!(counter.load(Ordering::Acquire), 1);

    // After the node leaves and membership is rebuilt, its endpoints are
    // no longer dispatched.
    executor.remove(&node).unwrap();
    executor.rescan().unwrap();
    publisher.publish(&2).unwrap();
    assert!(executor.try_spin(Timeout::Duration(Duration::from_millis(50))).unwrap());
    assert_eq!(counter.load(Ordering::Acquire), 1);
}

#[test]
fn try_spin_bails_out_when_rescan_pending() {
    let context = Context::new();
    let executor = ManualExecutor::new(&context).unwrap();
    executor.schedule_rescan();

    assert!(!executor.try_spin(Timeout::Duration(Duration::ZERO)).unwrap());

    // Must not block even with a long timeout.
    let started = Instant::now();
    assert!(!executor.try_spin(Timeout::Duration(Duration::from_secs(30))).unwrap());
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn try_spin_with_only_interrupt_guard_times_out_cleanly() {
    let context = Context::new();
    let executor = ManualExecutor::new(&context).unwrap();

    assert!(executor.try_spin(Timeout::Duration(Duration::ZERO)).unwrap());
}

#[test]
fn interrupt_wakes_blocked_spin() {
    let context = Context::new();
    let executor = ManualExecutor::new(&context).unwrap();

    let spinner = Arc::clone(&executor);
    let handle = thread::spawn(move || spinner.try_spin(Timeout::Duration(Duration::from_secs(60))));
    wait_until_spinning(&executor);

    executor.interrupt().unwrap();

    let started = Instant::now();
    assert!(handle.join().unwrap().unwrap());
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn interrupt_while_idle_is_harmless() {
    let context = Context::new();
    let executor = ManualExecutor::new(&context).unwrap();
    assert!(!executor.is_spinning());
    executor.interrupt().unwrap();
}

#[test]
fn remove_blocks_until_spin_returns() {
    let context = Context::new();
    let node = context.create_node("worker").unwrap();
    let executor = ManualExecutor::new(&context).unwrap();
    executor.add(&node).unwrap();
    executor.rescan().unwrap();

    let spinner = Arc::clone(&executor);
    let handle = thread::spawn(move || spinner.try_spin(Timeout::Duration(Duration::from_secs(60))));
    wait_until_spinning(&executor);

    let started = Instant::now();
    assert!(executor.remove(&node).unwrap());
    assert!(started.elapsed() < Duration::from_secs(10));

    // The blocked spin was interrupted rather than left to run out.
    assert!(handle.join().unwrap().unwrap());
    assert!(node.executor().is_none());
}

#[test]
fn concurrent_spin_attempt_is_rejected() {
    let context = Context::new();
    let executor = ManualExecutor::new(&context).unwrap();

    let spinner = Arc::clone(&executor);
    let handle = thread::spawn(move || spinner.try_spin(Timeout::Duration(Duration::from_secs(60))));
    wait_until_spinning(&executor);

    let err = executor.try_spin(Timeout::Duration(Duration::ZERO)).unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));
    // The rejected attempt must not have clobbered the busy state.
    assert!(executor.is_spinning());

    executor.interrupt().unwrap();
    assert!(handle.join().unwrap().unwrap());
}

#[test]
fn try_wait_settles_without_spin() {
    let context = Context::new();
    let executor = ManualExecutor::new(&context).unwrap();

    assert!(executor.try_wait(Timeout::Duration(Duration::ZERO)).unwrap());
    executor.schedule_rescan();
    assert!(executor.try_wait(Timeout::Duration(Duration::ZERO)).unwrap());
    executor.wait().unwrap();
    assert!(executor.rescan_scheduled());
}

#[test]
fn try_wait_times_out_while_callback_runs() {
    let context = Context::new();
    let node = context.create_node("worker").unwrap();
    let executor = ManualExecutor::new(&context).unwrap();
    executor.add(&node).unwrap();

    let _subscription = node
        .create_subscription::<i64>("slow", QosProfile::topics_default(), move |_| {
            thread::sleep(Duration::from_secs(2));
        })
        .unwrap();
    let publisher = node.create_publisher::<i64>("slow").unwrap();
    executor.rescan().unwrap();

    publisher.publish(&1).unwrap();
    let spinner = Arc::clone(&executor);
    let handle = thread::spawn(move || spinner.try_spin(Timeout::Duration(Duration::from_secs(30))));
    wait_until_spinning(&executor);
    executor.schedule_rescan();

    // The callback sleeps well past the timeout given to try_wait.
    assert!(!executor.try_wait(Timeout::Duration(Duration::from_millis(300))).unwrap());
    assert!(handle.join().unwrap().unwrap());
}

#[test]
fn spin_while_drains_published_backlog() {
    let context = Context::new();
    let node = context.create_node("worker").unwrap();
    let executor = ManualExecutor::new(&context).unwrap();
    executor.add(&node).unwrap();

    let (_subscription, counter) = counting_subscription(&node, "chatter");
    let publisher = node.create_publisher::<i64>("chatter").unwrap();
    for value in 0..3 {
        publisher.publish(&value).unwrap();
    }

    let progress = Arc::clone(&counter);
    executor
        .spin_while(
            move || progress.load(Ordering::Acquire) < 3,
            Timeout::Duration(Duration::from_millis(100)),
        )
        .unwrap();

    assert_eq!(counter.load(Ordering::Acquire), 3);
}

#[test]
fn disposed_executor_rejects_spinning() {
    let context = Context::new();
    let node = context.create_node("worker").unwrap();
    let executor = ManualExecutor::new(&context).unwrap();
    executor.add(&node).unwrap();
    executor.rescan().unwrap();

    executor.dispose().unwrap();
    executor.dispose().unwrap();

    assert!(executor.is_disposed());
    assert!(node.executor().is_none());
    assert!(!executor.contains(&node));
    assert!(matches!(
        executor.try_spin(Timeout::Duration(Duration::from_millis(100))),
        Err(Error::ObjectDisposed(_))
    ));
}
