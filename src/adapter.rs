//! Coordination between HTTP interception adapters
//!
//! Several adapters may be installed at once, e.g. a generic stubbing layer and a
//! client-specific middleware. While one of them handles a call it marks itself
//! exclusively enabled so the others do not record the same interaction again.

use std::borrow::Cow;
use std::fmt;

use parking_lot::Mutex;

use crate::request::Request;
use crate::TapedeckError;

/// Name of an interception adapter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AdapterId(Cow<'static, str>);

impl AdapterId {
    /// Identifier from a static name
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Adapter name
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for AdapterId {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}

impl fmt::Display for AdapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Holds which adapter, if any, is exclusively enabled
///
/// One environment belongs to one execution context; tests running concurrently
/// each get their own.
#[derive(Debug, Default)]
pub struct AdapterEnvironment {
    exclusive: Mutex<Option<AdapterId>>,
}

impl AdapterEnvironment {
    /// Environment with no exclusive adapter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently exclusive adapter
    #[must_use]
    pub fn exclusively_enabled_adapter(&self) -> Option<AdapterId> {
        self.exclusive.lock().clone()
    }

    /// Whether `adapter` may record: nobody is exclusive, or it is
    #[must_use]
    pub fn is_enabled(&self, adapter: &AdapterId) -> bool {
        self.exclusive
            .lock()
            .as_ref()
            .map_or(true, |exclusive| exclusive == adapter)
    }

    /// Mark `adapter` exclusive until the returned guard is dropped
    ///
    /// Dropping the guard resets the environment to "no exclusive adapter".
    #[must_use = "the adapter is only exclusive while the guard lives"]
    pub fn enter_exclusive(&self, adapter: &AdapterId) -> ExclusiveGuard<'_> {
        *self.exclusive.lock() = Some(adapter.clone());
        ExclusiveGuard { environment: self }
    }

    /// Run `f` with `adapter` exclusive, resetting afterwards even if `f` panics
    pub fn exclusively_enabled<T>(&self, adapter: &AdapterId, f: impl FnOnce() -> T) -> T {
        let _guard = self.enter_exclusive(adapter);
        f()
    }
}

/// Resets the exclusive adapter on drop
pub struct ExclusiveGuard<'a> {
    environment: &'a AdapterEnvironment,
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        *self.environment.exclusive.lock() = None;
    }
}

/// Error returned when a live request is not permitted
#[must_use]
pub fn connections_disabled_error(request: &Request) -> TapedeckError {
    TapedeckError::ConnectionNotAllowed {
        method: request.method.to_string(),
        uri: request.uri.clone(),
    }
}
