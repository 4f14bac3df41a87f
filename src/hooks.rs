//! Tagged transformation hooks run at the record and playback boundaries

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::request::HttpInteraction;
use crate::Result;

/// Boundary a hook runs at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    /// Before an interaction is handed to storage
    BeforeRecord,
    /// Before a loaded interaction becomes available for replay
    BeforePlayback,
}

type HookFn = dyn Fn(&mut HttpInteraction) -> Result<()> + Send + Sync;

struct Hook {
    phase: HookPhase,
    tag: Option<String>,
    callback: Arc<HookFn>,
}

/// Ordered chain of hooks
#[derive(Default)]
pub struct HookInvoker {
    hooks: RwLock<Vec<Hook>>,
}

impl HookInvoker {
    /// Create an empty hook chain
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook for `phase`, optionally restricted to cassettes with `tag`
    pub fn register<F>(&self, phase: HookPhase, tag: Option<&str>, callback: F)
    where
        F: Fn(&mut HttpInteraction) -> Result<()> + Send + Sync + 'static,
    {
        self.hooks.write().push(Hook {
            phase,
            tag: tag.map(ToString::to_string),
            callback: Arc::new(callback),
        });
    }

    /// Append a before_record hook
    pub fn before_record<F>(&self, tag: Option<&str>, callback: F)
    where
        F: Fn(&mut HttpInteraction) -> Result<()> + Send + Sync + 'static,
    {
        self.register(HookPhase::BeforeRecord, tag, callback);
    }

    /// Append a before_playback hook
    pub fn before_playback<F>(&self, tag: Option<&str>, callback: F)
    where
        F: Fn(&mut HttpInteraction) -> Result<()> + Send + Sync + 'static,
    {
        self.register(HookPhase::BeforePlayback, tag, callback);
    }

    /// Scrub a secret from recordings and restore it on playback
    ///
    /// `secret` is evaluated per interaction. Before recording, every occurrence of
    /// the secret is replaced with `placeholder`; before playback, `placeholder` is
    /// replaced with the secret again.
    pub fn filter_sensitive_data<F>(&self, placeholder: &str, tag: Option<&str>, secret: F)
    where
        F: Fn(&HttpInteraction) -> String + Send + Sync + 'static,
    {
        let secret = Arc::new(secret);

        let record_secret = Arc::clone(&secret);
        let record_placeholder = placeholder.to_string();
        self.before_record(tag, move |interaction| {
            let value = (*record_secret)(interaction);
            interaction.filter(&value, &record_placeholder);
            Ok(())
        });

        let playback_placeholder = placeholder.to_string();
        self.before_playback(tag, move |interaction| {
            let value = (*secret)(interaction);
            interaction.filter(&playback_placeholder, &value);
            Ok(())
        });
    }

    /// Run every hook for `phase` whose tag is unset or equal to `tag`
    ///
    /// Hooks run in registration order. The first failure stops the chain and is
    /// returned to the caller.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failing hook
    pub fn invoke_hook(
        &self,
        phase: HookPhase,
        tag: Option<&str>,
        interaction: &mut HttpInteraction,
    ) -> Result<()> {
        // Snapshot so a hook may register further hooks without deadlocking.
        let callbacks: Vec<Arc<HookFn>> = self
            .hooks
            .read()
            .iter()
            .filter(|hook| hook.phase == phase)
            .filter(|hook| hook.tag.is_none() || hook.tag.as_deref() == tag)
            .map(|hook| Arc::clone(&hook.callback))
            .collect();

        if !callbacks.is_empty() {
            debug!("Invoking {} {:?} hook(s) (tag: {:?})", callbacks.len(), phase, tag);
        }

        for callback in callbacks {
            (*callback)(interaction)?;
        }
        Ok(())
    }

    /// Number of registered hooks across both phases
    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.read().len()
    }

    /// Whether no hooks are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.read().is_empty()
    }
}

impl fmt::Debug for HookInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookInvoker")
            .field("hooks", &self.len())
            .finish()
    }
}
