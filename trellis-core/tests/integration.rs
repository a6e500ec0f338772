//! Integration Tests for the Reactive Graph
//!
//! These tests verify that values, computeds, keyed transforms, observers,
//! followers and scopes work together correctly.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use trellis_core::{
    do_cleanup, peek, safe, Computed, Easing, ErrorKind, ReactiveError, Runtime, RuntimeConfig,
    Task, TweenInfo, Validity,
};

fn quiet_runtime() -> Runtime {
    Runtime::with_config(RuntimeConfig::default().report_errors(false))
}

/// The canonical scenario: a value, a computed doubling it, and an
/// observer counting changes.
#[test]
fn value_computed_observer_scenario() {
    let runtime = Runtime::new();
    let scope = runtime.scoped();

    let v = scope.value(1);
    let c = scope.computed({
        let v = v.clone();
        move |cx, _| Ok(cx.get(&v)? * 2)
    });

    let counter = Arc::new(AtomicI32::new(0));
    let counter_clone = counter.clone();
    scope.observer(&c).on_change(move || {
        counter_clone.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(c.get().unwrap(), 2);
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    v.set(1);
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    v.set(5);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(c.get().unwrap(), 10);

    v.set(5);
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    assert!(scope.destroy().is_clean());
    v.set(6);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(runtime.node_count(), 0);
}

/// A lazy node nobody reads never runs, however often its inputs change.
#[test]
fn unread_computed_never_runs() {
    let scope = Runtime::new().scoped();
    let source = scope.value(0);
    let runs = Arc::new(AtomicI32::new(0));

    let _unread = scope.computed({
        let (source, runs) = (source.clone(), runs.clone());
        move |cx, _| {
            runs.fetch_add(1, Ordering::SeqCst);
            cx.get(&source)
        }
    });

    for i in 1..=10 {
        source.set(i);
    }
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

/// A diamond recomputes its bottom node once per upstream change.
#[test]
fn diamond_recomputes_once() {
    let scope = Runtime::new().scoped();
    let top = scope.value(1);
    let left = scope.computed({
        let top = top.clone();
        move |cx, _| Ok(cx.get(&top)? + 1)
    });
    let right = scope.computed({
        let top = top.clone();
        move |cx, _| Ok(cx.get(&top)? * 10)
    });
    let runs = Arc::new(AtomicI32::new(0));
    let bottom = scope.computed({
        let (left, right, runs) = (left.clone(), right.clone(), runs.clone());
        move |cx, _| {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(cx.get(&left)? + cx.get(&right)?)
        }
    });

    assert_eq!(bottom.get().unwrap(), 12);
    top.set(2);
    assert_eq!(bottom.get().unwrap(), 23);
    assert_eq!(bottom.get().unwrap(), 23);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

/// Eager observers see every change before `set` returns, in creation order.
#[test]
fn eager_nodes_run_synchronously_in_creation_order() {
    let scope = Runtime::new().scoped();
    let source = scope.value(0);
    let log = Arc::new(Mutex::new(Vec::new()));

    for name in ["first", "second", "third"] {
        let log = log.clone();
        scope.observer(&source).on_change(move || log.lock().push(name));
    }

    source.set(1);
    assert_eq!(*log.lock(), vec!["first", "second", "third"]);
}

/// An observer downstream of a computed sees the computed's new value.
#[test]
fn observers_never_see_stale_values() {
    let scope = Runtime::new().scoped();
    let source = scope.value(1i32);
    let squared = scope.computed({
        let source = source.clone();
        move |cx, _| Ok(cx.get(&source)?.pow(2))
    });
    let seen = Arc::new(Mutex::new(Vec::new()));

    let (seen_clone, squared_clone) = (seen.clone(), squared.clone());
    scope.observer(&squared).on_change(move || {
        seen_clone.lock().push(peek(&squared_clone).unwrap());
    });

    source.set(3);
    source.set(4);
    assert_eq!(*seen.lock(), vec![9, 16]);
}

/// Every recorded edge appears on both of its ends.
#[test]
fn edges_stay_symmetric() {
    let runtime = Runtime::new();
    let scope = runtime.scoped();
    let flag = scope.value(true);
    let a = scope.value(1);
    let b = scope.value(2);

    let pick = scope.computed({
        let (flag, a, b) = (flag.clone(), a.clone(), b.clone());
        move |cx, _| if cx.get(&flag)? { cx.get(&a) } else { cx.get(&b) }
    });
    let inner = scope.inner_scope();
    inner.observer(&pick);

    assert!(runtime.edges_consistent());
    flag.set(false);
    assert!(runtime.edges_consistent());

    let info = runtime.inspect(a.node()).unwrap();
    assert!(info.dependents.is_empty());

    assert!(inner.destroy().is_clean());
    assert!(runtime.edges_consistent());
    assert!(runtime.inspect(pick.node()).unwrap().dependents.is_empty());
}

/// Teardown runs tasks in reverse order and only once.
#[test]
fn teardown_is_reversed_and_idempotent() {
    let runtime = Runtime::new();
    let scope = runtime.scoped();
    let log = Arc::new(Mutex::new(Vec::new()));

    for name in ["x", "y", "z"] {
        let log = log.clone();
        scope.defer(move || log.lock().push(name));
    }
    let value = scope.value(0);
    scope.add(Task::Many(Vec::new())).unwrap();

    assert!(scope.destroy().is_clean());
    assert!(scope.destroy().is_clean());
    assert_eq!(*log.lock(), vec!["z", "y", "x"]);
    assert!(!runtime.is_alive(value.node()));
}

/// A node reachable from two teardown paths is destroyed once, silently.
#[test]
fn shared_node_teardown_is_tolerated() {
    let runtime = Runtime::new();
    let reports = Arc::new(AtomicI32::new(0));
    let reports_clone = reports.clone();
    runtime.on_error(move |_| {
        reports_clone.fetch_add(1, Ordering::SeqCst);
    });

    let first = runtime.scoped();
    let second = runtime.scoped();
    let value = first.value(1);
    second.add(first.clone()).unwrap();

    assert!(second.destroy().is_clean());
    assert!(first.is_destroyed());
    assert!(first.destroy().is_clean());
    assert!(!runtime.is_alive(value.node()));
    assert_eq!(reports.load(Ordering::SeqCst), 0);
}

/// A keyed transform only processes what changed.
#[test]
fn keyed_transform_reuses_entries() {
    let scope = Runtime::new().scoped();
    let names = scope.value(IndexMap::from([(1, "ada"), (2, "grace"), (3, "edsger")]));
    let calls = Arc::new(AtomicI32::new(0));

    let upper = scope.for_values(&names, {
        let calls = calls.clone();
        move |_, _, name| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(name.to_uppercase())
        }
    });

    assert_eq!(upper.get().unwrap()[&2], "GRACE");
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    names.update(|table| {
        table.insert(2, "barbara");
    });
    assert_eq!(upper.get().unwrap()[&2], "BARBARA");
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    names.update(|table| {
        table.shift_remove(&3);
    });
    assert_eq!(upper.get().unwrap().len(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

/// A computed that reads itself fails instead of recursing.
#[test]
fn cycles_are_detected() {
    let runtime = quiet_runtime();
    let scope = runtime.scoped();
    let toggle = scope.value(false);
    let slot: Arc<Mutex<Option<Computed<i32>>>> = Arc::new(Mutex::new(None));

    let a = scope.computed({
        let (slot, toggle) = (slot.clone(), toggle.clone());
        move |cx, _| {
            let b = slot.lock().clone();
            match b {
                Some(b) if cx.get(&toggle)? => Ok(cx.get(&b)? + 1),
                _ => Ok(0),
            }
        }
    });
    let b = scope.computed({
        let a = a.clone();
        move |cx, _| Ok(cx.get(&a)? + 1)
    });
    *slot.lock() = Some(b.clone());

    assert_eq!(b.get().unwrap(), 1);

    toggle.set(true);
    let error = b.get().unwrap_err();
    assert_eq!(error.kind(), ErrorKind::CyclicDependency);
    assert!(error.to_string().contains("->"));

    assert!(runtime.current_evaluator().is_none());
    assert_eq!(runtime.inspect(a.node()).unwrap().validity, Validity::Invalid);

    // Breaking the loop recovers.
    toggle.set(false);
    assert_eq!(b.get().unwrap(), 1);
}

/// Observer failures reach the host's error channel as structured reports.
#[test]
fn failures_reach_the_error_channel() {
    let runtime = quiet_runtime();
    let reports = Arc::new(Mutex::new(Vec::new()));
    let reports_clone = reports.clone();
    runtime.on_error(move |report| reports_clone.lock().push(report.clone()));

    let scope = runtime.scoped();
    let source = scope.value(1);
    let checked = scope.computed({
        let source = source.clone();
        move |cx, _| {
            let value = cx.get(&source)?;
            if value > 1 {
                Err(ReactiveError::failed(format!("{value} is too large")))
            } else {
                Ok(value)
            }
        }
    });
    scope.observer(&checked);

    source.set(2);

    let reports = reports.lock();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].kind, ErrorKind::Failed);
    assert_eq!(reports[0].raw, "2 is too large");
    assert!(reports[0].to_json().contains("\"context\""));
}

/// An observer behind a computed that failed is still notified once the
/// computed recovers, without anyone reading it in between.
#[test]
fn observer_recovers_after_upstream_computed_fails() {
    let runtime = quiet_runtime();
    let scope = runtime.scoped();
    let v = scope.value(1i32);
    let c = scope.computed({
        let v = v.clone();
        move |cx, _| {
            let value = cx.get(&v)?;
            if value < 0 {
                Err(ReactiveError::failed("negative input"))
            } else {
                Ok(value * 2)
            }
        }
    });

    let counter = Arc::new(AtomicI32::new(0));
    let counter_clone = counter.clone();
    scope.observer(&c).on_change(move || {
        counter_clone.fetch_add(1, Ordering::SeqCst);
    });

    v.set(2);
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    v.set(-1);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(runtime.inspect(c.node()).unwrap().validity, Validity::Invalid);

    v.set(5);
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert_eq!(c.get().unwrap(), 10);

    v.set(6);
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

/// An observer behind a keyed transform that hit a duplicate output key is
/// still notified once the input is fixed.
#[test]
fn observer_recovers_after_duplicate_output_key() {
    let runtime = quiet_runtime();
    let scope = runtime.scoped();
    let table = scope.value(IndexMap::from([("a", 1), ("b", 2)]));
    let by_value = scope.for_pairs(&table, |_, _, key, value| Ok((*value, key.to_string())));

    let counter = Arc::new(AtomicI32::new(0));
    let counter_clone = counter.clone();
    scope.observer(&by_value).on_change(move || {
        counter_clone.fetch_add(1, Ordering::SeqCst);
    });

    table.update(|entries| {
        entries.insert("b", 1);
    });
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    table.update(|entries| {
        entries.insert("b", 3);
    });
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    let output = by_value.get().unwrap();
    assert_eq!(output[&1], "a");
    assert_eq!(output[&3], "b");
}

/// `safe` turns a failing read into a fallback value.
#[test]
fn safe_falls_back_on_failed_reads() {
    let scope = quiet_runtime().scoped();
    let failing = scope.computed(|_, _| -> Result<i32, ReactiveError> {
        Err(ReactiveError::failed("offline"))
    });

    let value = safe(|| failing.get(), |_| -1);
    assert_eq!(value, -1);
}

/// Reads through a context kept past its evaluation are refused.
#[test]
fn stale_context_is_refused() {
    let scope = Runtime::new().scoped();
    let source = scope.value(1);
    let leaked = Arc::new(Mutex::new(None));

    let computed = scope.computed({
        let leaked = leaked.clone();
        move |cx, _| {
            *leaked.lock() = Some(cx.clone());
            Ok(1)
        }
    });
    computed.get().unwrap();

    let cx = leaked.lock().take().unwrap();
    assert!(!cx.is_open());
    assert_eq!(cx.get(&source).unwrap_err().kind(), ErrorKind::StaleReadOutsideEvaluation);
}

/// Tasks handed to `do_cleanup` run right away.
#[test]
fn do_cleanup_releases_lists() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let task = |name: &'static str| {
        let log = log.clone();
        Task::callback(move || log.lock().push(name))
    };

    let report = do_cleanup(vec![task("a"), task("b")]);
    assert!(report.is_clean());
    assert_eq!(*log.lock(), vec!["b", "a"]);
}

/// Followers move with the host clock and notify observers on each tick.
#[test]
fn followers_move_with_the_clock() {
    let runtime = Runtime::new();
    let scope = runtime.scoped();
    let goal = scope.value(0.0f64);
    let tween = scope
        .tween(&goal, TweenInfo::new(Duration::from_millis(100)).easing(Easing::Linear))
        .unwrap();
    let spring = scope.spring(&tween, 6.0, 1.0).unwrap();

    let frames = Arc::new(AtomicI32::new(0));
    let frames_clone = frames.clone();
    scope.observer(&spring).on_change(move || {
        frames_clone.fetch_add(1, Ordering::SeqCst);
    });

    goal.set(1.0);
    let mut ticks = 0;
    while runtime.tick(Duration::from_millis(16)) {
        ticks += 1;
        assert!(ticks < 1_000);
    }

    assert_eq!(tween.get().unwrap(), 1.0);
    assert_eq!(spring.get().unwrap(), 1.0);
    assert!(frames.load(Ordering::SeqCst) > 1);
    assert!(runtime.inspect(spring.node()).unwrap().dependencies.contains(&tween.node()));
}

#[tokio::test]
async fn animate_drives_followers_to_rest() {
    let runtime = Runtime::new();
    let scope = runtime.scoped();
    let goal = scope.value([0.0f64, 0.0]);
    let spring = scope.spring(&goal, 10.0, 1.0).unwrap();

    goal.set([3.0, 4.0]);
    trellis_core::animate(&runtime, Duration::from_millis(4)).await;

    assert_eq!(spring.get().unwrap(), [3.0, 4.0]);
    assert!(!spring.is_moving());
}
