//! Operator handlers: the long-lived counterpart to `OperatorState`
//! (spec.md §4.F). Registered once per query at compile time, keyed by
//! `OperatorHandlerId`, and looked up by every pipeline invocation that
//! needs state spanning more than one invocation — windowing's
//! thread-local slice stores and join build-side slices are both
//! handlers living in `nes-windowing`/`nes-join`.

use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;
use nes_core::OperatorHandlerId;

/// Anything stored in the registry just needs to be nameable by `Any` so
/// call sites can downcast back to their concrete handler type.
pub trait OperatorHandler: Any + Send + Sync {}
impl<T: Any + Send + Sync> OperatorHandler for T {}

/// Registry of live handlers for one query, keyed by the id the query
/// compiler assigned during physical lowering.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<OperatorHandlerId, Arc<dyn Any + Send + Sync>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H: OperatorHandler>(&self, id: OperatorHandlerId, handler: Arc<H>) {
        self.handlers.insert(id, handler);
    }

    /// Typed lookup: looks up `id`, then downcasts to `H`. Panics on a type
    /// mismatch — a handler registered under the wrong concrete type at a
    /// call site is a compiler bug, not a runtime condition to recover from.
    pub fn get_as<H: OperatorHandler>(&self, id: OperatorHandlerId) -> Option<Arc<H>> {
        self.handlers.get(&id).map(|entry| {
            entry
                .value()
                .clone()
                .downcast::<H>()
                .expect("operator handler registered under an unexpected concrete type")
        })
    }

    pub fn release(&self, id: OperatorHandlerId) {
        self.handlers.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn registers_and_looks_up_typed_handler() {
        let registry = HandlerRegistry::new();
        let id = OperatorHandlerId(1);
        registry.register(id, Arc::new(AtomicU64::new(0)));

        let counter = registry.get_as::<AtomicU64>(id).unwrap();
        counter.fetch_add(5, Ordering::Relaxed);
        assert_eq!(counter.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn release_drops_handler() {
        let registry = HandlerRegistry::new();
        let id = OperatorHandlerId(2);
        registry.register(id, Arc::new(AtomicU64::new(0)));
        assert_eq!(registry.len(), 1);
        registry.release(id);
        assert!(registry.is_empty());
    }
}
