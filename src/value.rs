//! Type-erased payload carried by events.
//!
//! The teacher crate (`quantverse-desim`) parameterized its whole
//! `Simulation<T>` over a single message type `T`, which only works if every
//! event in a run carries the same kind of value. Timeouts, condition result
//! maps, resource grants, store items and interrupt causes all need to
//! coexist in the same run here, so payloads are type-erased behind an `Rc`
//! instead.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// A value flowing through the event graph: a process's return value, a
/// timeout's payload, a resource grant, a store item, an interrupt cause.
#[derive(Clone)]
pub struct Value(Rc<dyn Any>);

impl Value {
    /// Wrap any value as an event payload.
    pub fn new<T: 'static>(v: T) -> Self {
        Value(Rc::new(v))
    }

    /// The payload used for events that do not carry meaningful data.
    pub fn unit() -> Self {
        Value::new(())
    }

    /// Recover the concrete type, if it matches.
    pub fn downcast<T: 'static>(&self) -> Option<Rc<T>> {
        Rc::clone(&self.0).downcast::<T>().ok()
    }

    /// True if the wrapped value has concrete type `T`.
    pub fn is<T: 'static>(&self) -> bool {
        self.0.is::<T>()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Value").finish()
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::unit()
    }
}
