//! Timer integration tests
//!
//! Drives setTimeout / setInterval / clear* through the host registry and
//! checks ordering, cancellation and pin release on a real event loop.

use evhost::{HostRegistry, NativeEngine, Runtime, Value};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

fn host() -> (Rc<NativeEngine>, Runtime, Rc<HostRegistry>) {
    let engine = Rc::new(NativeEngine::new());
    let rt = Runtime::new(engine.clone()).unwrap();
    (engine, rt, Rc::new(HostRegistry::new()))
}

fn ms(n: f64) -> Value {
    Value::Number(n)
}

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn test_timeouts_fire_in_deadline_order() {
    let (engine, rt, registry) = host();
    let order = Rc::new(RefCell::new(Vec::new()));

    for delay in [30.0, 10.0, 20.0] {
        let log = order.clone();
        let cb = engine.function(move |_| log.borrow_mut().push(delay as u32));
        registry.call(&rt, "setTimeout", &[cb, ms(delay)]).unwrap();
    }

    assert_eq!(rt.run().unwrap(), 0);
    assert_eq!(*order.borrow(), vec![10, 20, 30]);
}

#[test]
fn test_equal_deadlines_fire_in_schedule_order() {
    let (engine, rt, registry) = host();
    let order = Rc::new(RefCell::new(Vec::new()));

    for i in 0..5 {
        let log = order.clone();
        let cb = engine.function(move |_| log.borrow_mut().push(i));
        registry.call(&rt, "setTimeout", &[cb, ms(0.0)]).unwrap();
    }

    rt.run().unwrap();
    assert_eq!(*order.borrow(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_timeout_waits_at_least_its_delay() {
    let (engine, rt, registry) = host();
    let fired_at = Rc::new(Cell::new(None));

    let slot = fired_at.clone();
    let cb = engine.function(move |_| slot.set(Some(Instant::now())));
    let start = Instant::now();
    registry.call(&rt, "setTimeout", &[cb, ms(25.0)]).unwrap();
    rt.run().unwrap();

    let fired_at = fired_at.get().expect("timer never fired");
    assert!(fired_at.duration_since(start) >= Duration::from_millis(25));
}

#[test]
fn test_timer_ids_are_distinct() {
    let (engine, rt, registry) = host();
    let cb = engine.function(|_| {});

    let a = registry.call(&rt, "setTimeout", &[cb.clone(), ms(0.0)]).unwrap();
    let b = registry.call(&rt, "setTimeout", &[cb, ms(0.0)]).unwrap();
    assert_eq!(a, Value::Number(1.0));
    assert_ne!(a, b);
    rt.run().unwrap();
}

// ============================================================================
// Cancellation
// ============================================================================

#[test]
fn test_clear_timeout_prevents_firing() {
    let (engine, rt, registry) = host();
    let fired = Rc::new(Cell::new(false));

    let flag = fired.clone();
    let cb = engine.function(move |_| flag.set(true));
    let id = registry.call(&rt, "setTimeout", &[cb.clone(), ms(10.0)]).unwrap();
    registry.call(&rt, "clearTimeout", &[id]).unwrap();

    assert_eq!(rt.run().unwrap(), 0);
    assert!(!fired.get());
    assert_eq!(engine.pin_count(cb.as_callback().unwrap()), 0);
}

#[test]
fn test_clear_from_earlier_timer() {
    let (engine, rt, registry) = host();
    let fired = Rc::new(Cell::new(false));

    let flag = fired.clone();
    let late = engine.function(move |_| flag.set(true));
    let late_id = registry.call(&rt, "setTimeout", &[late, ms(20.0)]).unwrap();

    let (rt2, registry2) = (rt.downgrade(), registry.clone());
    let early = engine.function(move |_| {
        let rt = rt2.upgrade().unwrap();
        registry2.call(&rt, "clearTimeout", &[late_id.clone()]).unwrap();
    });
    registry.call(&rt, "setTimeout", &[early, ms(5.0)]).unwrap();

    rt.run().unwrap();
    assert!(!fired.get());
}

#[test]
fn test_clear_unknown_and_nullish_ids() {
    let (_engine, rt, registry) = host();
    assert_eq!(
        registry.call(&rt, "clearTimeout", &[ms(999.0)]).unwrap(),
        Value::Undefined
    );
    assert!(registry.call(&rt, "clearTimeout", &[Value::Undefined]).is_ok());
    assert!(registry.call(&rt, "clearInterval", &[Value::Null]).is_ok());
}

// ============================================================================
// Intervals
// ============================================================================

#[test]
fn test_interval_repeats_until_cleared_from_callback() {
    let (engine, rt, registry) = host();
    let count = Rc::new(Cell::new(0));
    let id_slot: Rc<RefCell<Option<Value>>> = Rc::default();

    let (counter, slot, weak, reg) = (count.clone(), id_slot.clone(), rt.downgrade(), registry.clone());
    let cb = engine.function(move |_| {
        counter.set(counter.get() + 1);
        if counter.get() == 3 {
            let rt = weak.upgrade().unwrap();
            let id = slot.borrow().clone().unwrap();
            reg.call(&rt, "clearInterval", &[id]).unwrap();
        }
    });
    let id = registry.call(&rt, "setInterval", &[cb.clone(), ms(2.0)]).unwrap();
    *id_slot.borrow_mut() = Some(id);

    assert_eq!(rt.run().unwrap(), 0);
    assert_eq!(count.get(), 3);
    assert_eq!(engine.pin_count(cb.as_callback().unwrap()), 0);
}

#[test]
fn test_zero_interval_does_not_starve_timeouts() {
    let (engine, rt, registry) = host();
    let ticks = Rc::new(Cell::new(0u32));
    let id_slot: Rc<RefCell<Option<Value>>> = Rc::default();

    let counter = ticks.clone();
    let tick = engine.function(move |_| counter.set(counter.get() + 1));
    let id = registry.call(&rt, "setInterval", &[tick, ms(0.0)]).unwrap();
    *id_slot.borrow_mut() = Some(id);

    let (slot, weak, reg) = (id_slot.clone(), rt.downgrade(), registry.clone());
    let stop = engine.function(move |_| {
        let rt = weak.upgrade().unwrap();
        let id = slot.borrow().clone().unwrap();
        reg.call(&rt, "clearInterval", &[id]).unwrap();
    });
    registry.call(&rt, "setTimeout", &[stop, ms(15.0)]).unwrap();

    assert_eq!(rt.run().unwrap(), 0);
    assert!(ticks.get() >= 1);
}

// ============================================================================
// Exit
// ============================================================================

#[test]
fn test_process_exit_abandons_pending_timers() {
    let (engine, rt, registry) = host();
    let fired = Rc::new(Cell::new(false));

    let flag = fired.clone();
    let late = engine.function(move |_| flag.set(true));
    registry.call(&rt, "setTimeout", &[late, ms(50.0)]).unwrap();

    let (weak, reg) = (rt.downgrade(), registry.clone());
    let exit = engine.function(move |_| {
        let rt = weak.upgrade().unwrap();
        reg.call(&rt, "process.exit", &[Value::Number(3.0)]).unwrap();
    });
    registry.call(&rt, "setTimeout", &[exit, ms(1.0)]).unwrap();

    assert_eq!(rt.run().unwrap(), 3);
    assert!(!fired.get());
}
