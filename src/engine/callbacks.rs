//! Ordered hook storage shared by modules and fetchers.
//!
//! A registry maps a callback kind to the hooks registered for it, in
//! registration order. Invoking an event runs every hook registered for the
//! event's kind, each with mutable access to the owner's state, and stops at
//! the first hook that fails.

use std::fmt;

use crate::app::{HarvestError, Result};

/// An event that can be dispatched through a [`CallbackRegistry`].
pub trait Callback {
    type Kind: Copy + Eq + fmt::Debug + fmt::Display;

    fn kind(&self) -> Self::Kind;
}

pub type Hook<T, E> = Box<dyn Fn(&mut T, &E) -> anyhow::Result<()> + Send + Sync>;

pub struct CallbackRegistry<T, E: Callback> {
    entries: Vec<(E::Kind, Vec<Hook<T, E>>)>,
}

impl<T, E: Callback> CallbackRegistry<T, E> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append a hook for `kind`. Hooks are never removed.
    pub fn register<F>(&mut self, kind: E::Kind, hook: F)
    where
        F: Fn(&mut T, &E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        match self.entries.iter_mut().find(|(k, _)| *k == kind) {
            Some((_, hooks)) => hooks.push(Box::new(hook)),
            None => self.entries.push((kind, vec![Box::new(hook)])),
        }
    }

    pub fn has(&self, kind: E::Kind) -> bool {
        self.len(kind) > 0
    }

    pub fn len(&self, kind: E::Kind) -> usize {
        self.hooks(kind).map_or(0, <[_]>::len)
    }

    /// Kinds with at least one hook, in order of first registration.
    pub fn kinds(&self) -> impl Iterator<Item = E::Kind> + '_ {
        self.entries.iter().map(|(kind, _)| *kind)
    }

    /// Run the hooks registered for `event.kind()` against `target`.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Hook`] with the first hook error; later hooks
    /// of the same kind do not run.
    pub fn invoke(&self, target: &mut T, event: &E) -> Result<()> {
        let kind = event.kind();
        let Some(hooks) = self.hooks(kind) else {
            return Ok(());
        };

        hooks
            .iter()
            .try_for_each(|hook| hook(target, event))
            .map_err(|source| HarvestError::hook(kind, source))
    }

    fn hooks(&self, kind: E::Kind) -> Option<&[Hook<T, E>]> {
        self.entries
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, hooks)| hooks.as_slice())
    }
}

impl<T, E: Callback> Default for CallbackRegistry<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E: Callback> fmt::Debug for CallbackRegistry<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(kind, hooks)| (kind, hooks.len())))
            .finish()
    }
}
