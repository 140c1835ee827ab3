//! Action registry.
//!
//! Actions register under a stable dotted name at context build time;
//! the name is what checkpoints persist and what recovery resolves. An
//! action may bring a compensation that runs when the main block fails.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::job::Action;
use super::Error;

#[derive(Clone)]
pub struct RegisteredAction {
    pub run: Arc<dyn Action>,
    pub undo: Option<Arc<dyn Action>>,
}

#[derive(Default)]
pub struct ActionRegistry {
    inner: RwLock<HashMap<String, RegisteredAction>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action under `fqn`, optionally with a compensation.
    pub fn register(
        &self,
        fqn: &str,
        run: Arc<dyn Action>,
        undo: Option<Arc<dyn Action>>,
    ) -> Result<(), Error> {
        let mut inner = self.inner.write();
        if inner.contains_key(fqn) {
            return Err(Error::DuplicateAction(fqn.into()));
        }
        inner.insert(fqn.into(), RegisteredAction { run, undo });
        Ok(())
    }

    pub fn resolve(&self, fqn: &str) -> Option<RegisteredAction> {
        self.inner.read().get(fqn).cloned()
    }

    pub fn is_registered(&self, fqn: &str) -> bool {
        self.inner.read().contains_key(fqn)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::executor::job::{FnAction, Outcome};
    use futures::FutureExt;

    fn noop() -> Arc<dyn Action> {
        FnAction::new(|_ctx| async { Ok(Outcome::none()) }.boxed())
    }

    #[test]
    fn duplicate_registration_refused() {
        let registry = ActionRegistry::new();
        registry.register("test.noop", noop(), None).unwrap();
        assert!(registry.is_registered("test.noop"));
        assert!(registry.register("test.noop", noop(), None).is_err());
    }

    #[test]
    fn resolve_unknown() {
        let registry = ActionRegistry::new();
        assert!(registry.resolve("test.missing").is_none());
    }
}
