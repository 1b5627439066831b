//! Lifetime of one build invocation.
//!
//! Some work must happen once per build no matter how many projects ask for
//! it, and some must happen after the last task ran (printing cache stats,
//! releasing shared state). [`BuildSession`] is owned by whoever drives the
//! build and passed down explicitly.

use std::collections::HashSet;

use crate::error::SessionError;

type Hook = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

/// State scoped to a single build invocation.
#[derive(Default)]
pub struct BuildSession {
    started: bool,
    executed: HashSet<String>,
    hooks: Vec<(String, Hook)>,
}

impl BuildSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        if self.started {
            tracing::warn!("build session started twice");
        }
        self.started = true;
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Runs `action` unless an action with the same key already ran during
    /// this build.
    pub fn execute_once<R>(&mut self, key: &str, action: impl FnOnce() -> R) -> Option<R> {
        if !self.executed.insert(key.to_string()) {
            return None;
        }
        Some(action())
    }

    /// Queues `hook` to run when the build finishes. Hooks run in the order
    /// they were added.
    pub fn add_build_finished_hook(
        &mut self,
        name: impl Into<String>,
        hook: impl FnOnce() -> anyhow::Result<()> + Send + 'static,
    ) {
        self.hooks.push((name.into(), Box::new(hook)));
    }

    pub fn pending_hooks(&self) -> usize {
        self.hooks.len()
    }

    /// Runs every hook, even when an earlier one fails, then resets the
    /// session so it can serve the next build.
    pub fn finish(&mut self) -> Result<(), SessionError> {
        let hooks = std::mem::take(&mut self.hooks);
        let mut errors = Vec::new();

        for (name, hook) in hooks {
            tracing::debug!(hook = %name, "running build finished hook");
            if let Err(err) = hook() {
                tracing::error!(hook = %name, "build finished hook failed: {err}");
                errors.push((name, err));
            }
        }

        self.started = false;
        self.executed.clear();

        match errors.is_empty() {
            true => Ok(()),
            false => Err(SessionError(errors)),
        }
    }
}
