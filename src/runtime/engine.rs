//! Script engine boundary
//!
//! The host never inspects script functions. It only needs to invoke a
//! function reference with marshaled arguments and to keep that reference
//! alive (pinned) while native work is outstanding.
//!
//! [`NativeEngine`] is an engine whose functions are Rust closures. It keeps
//! pin counts and can simulate a collection, which makes pin leaks and
//! use-after-collect visible to tests.

use super::Value;
use log::{debug, warn};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Opaque reference to a script function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackRef(pub u64);

/// What the host requires from a script engine
pub trait ScriptEngine {
    /// Call `callback` with `args`. Exceptions thrown by the script are the
    /// engine's business and must not unwind into the host.
    fn invoke(&self, callback: CallbackRef, args: Vec<Value>);

    /// Protect `callback` from collection. Pins nest.
    fn pin(&self, callback: CallbackRef);

    /// Release one pin taken by [`pin`](Self::pin)
    fn unpin(&self, callback: CallbackRef);
}

/// A pinned callback. The pin is released when the guard drops.
pub struct Pinned {
    engine: Rc<dyn ScriptEngine>,
    callback: CallbackRef,
}

impl Pinned {
    pub fn new(engine: Rc<dyn ScriptEngine>, callback: CallbackRef) -> Self {
        engine.pin(callback);
        Self { engine, callback }
    }

    pub fn callback(&self) -> CallbackRef {
        self.callback
    }

    /// Call the pinned function
    pub fn invoke(&self, args: Vec<Value>) {
        self.engine.invoke(self.callback, args);
    }
}

impl Drop for Pinned {
    fn drop(&mut self) {
        self.engine.unpin(self.callback);
    }
}

impl fmt::Debug for Pinned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pinned").field(&self.callback).finish()
    }
}

// =============================================================================
// Native engine
// =============================================================================

type NativeFn = Rc<dyn Fn(&[Value])>;

struct Slot {
    func: NativeFn,
    pins: usize,
}

/// Script engine backed by Rust closures
pub struct NativeEngine {
    slots: RefCell<HashMap<CallbackRef, Slot>>,
    next_id: Cell<u64>,
    invocations: Cell<usize>,
    dangling: Cell<usize>,
}

impl NativeEngine {
    pub fn new() -> Self {
        Self {
            slots: RefCell::new(HashMap::new()),
            next_id: Cell::new(1),
            invocations: Cell::new(0),
            dangling: Cell::new(0),
        }
    }

    /// Register a closure and return its reference
    pub fn register<F>(&self, func: F) -> CallbackRef
    where
        F: Fn(&[Value]) + 'static,
    {
        let id = CallbackRef(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.slots.borrow_mut().insert(
            id,
            Slot {
                func: Rc::new(func),
                pins: 0,
            },
        );
        id
    }

    /// Register a closure and wrap it as a function value
    pub fn function<F>(&self, func: F) -> Value
    where
        F: Fn(&[Value]) + 'static,
    {
        Value::Function(self.register(func))
    }

    pub fn pin_count(&self, callback: CallbackRef) -> usize {
        self.slots
            .borrow()
            .get(&callback)
            .map(|s| s.pins)
            .unwrap_or(0)
    }

    /// Sum of pins over every live function
    pub fn total_pins(&self) -> usize {
        self.slots.borrow().values().map(|s| s.pins).sum()
    }

    /// Drop every unpinned function, returning how many were collected
    pub fn collect_garbage(&self) -> usize {
        let mut slots = self.slots.borrow_mut();
        let before = slots.len();
        slots.retain(|_, slot| slot.pins > 0);
        let collected = before - slots.len();
        debug!("collected {} unpinned functions", collected);
        collected
    }

    pub fn is_alive(&self, callback: CallbackRef) -> bool {
        self.slots.borrow().contains_key(&callback)
    }

    /// Invocations that targeted an already-collected function
    pub fn dangling_invocations(&self) -> usize {
        self.dangling.get()
    }

    /// Successful invocations so far
    pub fn invocation_count(&self) -> usize {
        self.invocations.get()
    }
}

impl Default for NativeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptEngine for NativeEngine {
    fn invoke(&self, callback: CallbackRef, args: Vec<Value>) {
        // Clone the closure out so it may re-enter the engine.
        let func = self.slots.borrow().get(&callback).map(|s| s.func.clone());
        match func {
            Some(func) => {
                self.invocations.set(self.invocations.get() + 1);
                func(&args);
            }
            None => {
                warn!("invoked collected function {:?}", callback);
                self.dangling.set(self.dangling.get() + 1);
            }
        }
    }

    fn pin(&self, callback: CallbackRef) {
        match self.slots.borrow_mut().get_mut(&callback) {
            Some(slot) => slot.pins += 1,
            None => warn!("pin of unknown function {:?}", callback),
        }
    }

    fn unpin(&self, callback: CallbackRef) {
        if let Some(slot) = self.slots.borrow_mut().get_mut(&callback) {
            slot.pins = slot.pins.saturating_sub(1);
        }
    }
}
