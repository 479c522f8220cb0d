//! A minimal, in-process stand-in for the distributed naming service.
//!
//! The registry hands out fresh [`GlobalRef`]s and resolves them to the two
//! kinds of components a cell talks to: evaluators and value sources
//! (output ports, or anything else an input port can pull from).

use std::collections::HashMap;
use std::future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::trace;

use super::GlobalRef;
use crate::error::CellError;
use crate::stencil::evaluator::Evaluator;
use crate::stencil::port::{BoxFuture, RemoteFetch, ValueSource};

/// Maps global references to locally registered components.
pub struct Registry {
    next: AtomicU64,
    evaluators: RwLock<HashMap<GlobalRef, Arc<dyn Evaluator>>>,
    sources: RwLock<HashMap<GlobalRef, Arc<dyn ValueSource>>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            evaluators: RwLock::new(HashMap::new()),
            sources: RwLock::new(HashMap::new()),
        }
    }

    /// Issues a reference that has never been handed out before.
    #[inline]
    pub fn next_ref(&self) -> GlobalRef {
        GlobalRef::from_raw(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers an evaluator and returns the reference naming it.
    pub fn register_evaluator(&self, evaluator: Arc<dyn Evaluator>) -> GlobalRef {
        let id = self.next_ref();
        self.evaluators
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, evaluator);
        trace!(%id, "registered evaluator");
        id
    }

    /// Registers a value source and returns the reference naming it.
    pub fn register_source(&self, source: Arc<dyn ValueSource>) -> GlobalRef {
        let id = self.next_ref();
        self.bind_source(id, source);
        id
    }

    /// Binds `source` under an already issued reference.
    pub fn bind_source(&self, id: GlobalRef, source: Arc<dyn ValueSource>) {
        debug_assert!(id.is_valid());
        self.sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, source);
        trace!(%id, "registered value source");
    }

    /// Removes whatever is registered under `id`. Returns `true` if something was removed.
    pub fn unregister(&self, id: GlobalRef) -> bool {
        let evaluator = self
            .evaluators
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        let source = self
            .sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        evaluator.is_some() || source.is_some()
    }

    /// Resolves an evaluator reference.
    pub fn resolve_evaluator(&self, id: GlobalRef) -> Result<Arc<dyn Evaluator>, CellError> {
        self.evaluators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(CellError::Unresolved(id))
    }

    /// Resolves a value-source reference.
    pub fn resolve_source(&self, id: GlobalRef) -> Result<Arc<dyn ValueSource>, CellError> {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(CellError::Unresolved(id))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteFetch for Registry {
    fn fetch(&self, remote: GlobalRef) -> BoxFuture<'static, Result<GlobalRef, CellError>> {
        match self.resolve_source(remote) {
            Ok(source) => source.fetch_value(),
            Err(err) => Box::pin(future::ready(Err(err))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threads::block_on;

    struct Constant(GlobalRef);

    impl ValueSource for Constant {
        fn fetch_value(&self) -> BoxFuture<'static, Result<GlobalRef, CellError>> {
            Box::pin(future::ready(Ok(self.0)))
        }
    }

    #[test]
    fn issued_refs_are_unique_and_valid() {
        let registry = Registry::new();
        let a = registry.next_ref();
        let b = registry.next_ref();
        assert!(a.is_valid());
        assert_ne!(a, b);
    }

    #[test]
    fn fetch_resolves_registered_source() {
        let registry = Registry::new();
        let value = registry.next_ref();
        let id = registry.register_source(Arc::new(Constant(value)));
        assert_eq!(block_on(registry.fetch(id)), Ok(value));
    }

    #[test]
    fn unknown_refs_are_unresolved() {
        let registry = Registry::new();
        let missing = GlobalRef::from_raw(99);
        assert_eq!(block_on(registry.fetch(missing)), Err(CellError::Unresolved(missing)));
        assert!(matches!(
            registry.resolve_evaluator(missing),
            Err(CellError::Unresolved(_))
        ));
    }

    #[test]
    fn unregister_removes_source() {
        let registry = Registry::new();
        let id = registry.register_source(Arc::new(Constant(GlobalRef::from_raw(5))));
        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(registry.resolve_source(id).is_err());
    }
}
