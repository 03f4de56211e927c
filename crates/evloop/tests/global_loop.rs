//! Tests for the process-wide default loop.
//!
//! Kept in their own binary: they share one global loop and one interrupt
//! flag, so everything runs inside a single test in a fixed order.

use evloop::global;
use evloop::{EventLoop, Outcome};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_global_loop_lifecycle() {
    let first = EventLoop::try_global().unwrap() as *const EventLoop;
    let second = EventLoop::global() as *const EventLoop;
    assert_eq!(first, second);
    assert!(EventLoop::global().pool().worker_count() >= 1);

    // Free functions route through the same loop
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    global::set_timeout(Duration::from_millis(5), move || sink.lock().push("timeout"));
    let sink = log.clone();
    global::push_event(move || sink.lock().push("event"));

    let double = global::async_fn(|n: i32| n * 2);
    let sink = log.clone();
    double.call(21, move |outcome| {
        assert_eq!(outcome, Outcome::Success(42));
        sink.lock().push("async");
    });

    let ran = Arc::new(AtomicUsize::new(0));
    let counter = ran.clone();
    global::spawn(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    assert!(!global::interrupted());
    global::run_global().unwrap();

    let log = log.lock().clone();
    assert_eq!(log.len(), 3);
    assert_eq!(log[0], "event");
    assert!(log.contains(&"timeout"));
    assert!(log.contains(&"async"));
    assert_eq!(ran.load(Ordering::SeqCst), 1);

    // An interrupt stops the loop even with a long interval pending
    let ticks = Arc::new(AtomicUsize::new(0));
    let counter = ticks.clone();
    let interval = global::set_interval(Duration::from_millis(2), move || {
        if counter.fetch_add(1, Ordering::SeqCst) + 1 == 5 {
            global::request_interrupt();
        }
    });

    global::run_global().unwrap();
    assert!(global::interrupted());
    assert_eq!(ticks.load(Ordering::SeqCst), 5);
    assert!(interval.is_pending());
    assert!(EventLoop::global().has_pending_work());

    // Installing twice reports the same answer
    assert_eq!(global::install_interrupt_handler(), global::install_interrupt_handler());
    assert!(interval.cancel());
}
