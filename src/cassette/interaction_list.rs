//! Ordered interaction list with consumption and parent delegation

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::fingerprint::short_fingerprint;
use crate::matcher::MatchContext;
use crate::request::{HttpInteraction, Request, Response};
use crate::{Result, TapedeckError};

use super::MAX_NESTING_DEPTH;

/// Something that can answer a request from recorded interactions
///
/// Implemented by [`HttpInteractionList`] and [`NullList`]; the parent of a list is
/// held through this trait.
pub trait InteractionSource: Send + Sync {
    /// Whether a recorded interaction would answer `request`; never consumes
    ///
    /// # Errors
    ///
    /// Returns error if a configured matcher is not registered
    fn has_interaction_matching(&self, request: &Request) -> Result<bool>;

    /// Response for `request`, consuming the interaction that supplied it
    ///
    /// # Errors
    ///
    /// Returns error if a configured matcher is not registered
    fn response_for(&self, request: &Request) -> Result<Option<Response>>;

    /// Number of lists in this chain, this one included
    fn depth(&self) -> usize;
}

/// Terminates every parent chain; never has a match
#[derive(Debug, Clone, Copy, Default)]
pub struct NullList;

impl InteractionSource for NullList {
    fn has_interaction_matching(&self, _request: &Request) -> Result<bool> {
        Ok(false)
    }

    fn response_for(&self, _request: &Request) -> Result<Option<Response>> {
        Ok(None)
    }

    fn depth(&self) -> usize {
        0
    }
}

#[derive(Clone)]
struct Entry {
    index: usize,
    interaction: Arc<HttpInteraction>,
}

#[derive(Default)]
struct ListState {
    /// Not yet returned, in original order
    available: Vec<Entry>,
    /// Returned at least once, in consumption order
    used: Vec<Entry>,
}

/// Recorded interactions of one cassette
///
/// Matchers run against a snapshot taken outside the lock, so a matcher may
/// query the list it is matching for.
pub struct HttpInteractionList {
    state: Mutex<ListState>,
    context: MatchContext,
    parent: Arc<dyn InteractionSource>,
    depth: usize,
}

impl HttpInteractionList {
    /// Create a list, optionally delegating unanswered requests to `parent`
    ///
    /// # Errors
    ///
    /// Returns `NestingTooDeep` if the parent chain is already at the nesting limit
    pub fn new(
        interactions: Vec<HttpInteraction>,
        context: MatchContext,
        parent: Option<Arc<dyn InteractionSource>>,
    ) -> Result<Self> {
        let parent = parent.unwrap_or_else(|| Arc::new(NullList));
        let depth = parent.depth() + 1;
        if depth > MAX_NESTING_DEPTH {
            return Err(TapedeckError::NestingTooDeep {
                depth,
                limit: MAX_NESTING_DEPTH,
            });
        }

        let available = interactions
            .into_iter()
            .enumerate()
            .map(|(index, interaction)| Entry {
                index,
                interaction: Arc::new(interaction),
            })
            .collect();

        Ok(Self {
            state: Mutex::new(ListState {
                available,
                used: Vec::new(),
            }),
            context,
            parent,
            depth,
        })
    }

    /// Matchers this list applies
    #[must_use]
    pub fn match_context(&self) -> &MatchContext {
        &self.context
    }

    /// All interactions, consumed or not, in original insertion order
    #[must_use]
    pub fn interactions(&self) -> Vec<HttpInteraction> {
        let state = self.state.lock();
        let mut entries: Vec<&Entry> = state.available.iter().chain(&state.used).collect();
        entries.sort_by_key(|entry| entry.index);
        entries
            .into_iter()
            .map(|entry| HttpInteraction::clone(&entry.interaction))
            .collect()
    }

    /// Consumed interactions in the order they were consumed
    #[must_use]
    pub fn used_interactions(&self) -> Vec<HttpInteraction> {
        self.state
            .lock()
            .used
            .iter()
            .map(|entry| HttpInteraction::clone(&entry.interaction))
            .collect()
    }

    /// Number of interactions not yet consumed
    #[must_use]
    pub fn remaining_unused_count(&self) -> usize {
        self.state.lock().available.len()
    }

    fn snapshot(&self) -> (Vec<Entry>, Vec<Entry>) {
        let state = self.state.lock();
        (state.available.clone(), state.used.clone())
    }

    /// First available interaction that matches
    fn matching_available(&self, available: &[Entry], request: &Request) -> Result<Option<usize>> {
        for entry in available {
            if self.context.matches(request, &entry.interaction.request)? {
                return Ok(Some(entry.index));
            }
        }
        Ok(None)
    }

    /// Most recently consumed interaction that matches
    fn matching_used(&self, used: &[Entry], request: &Request) -> Result<Option<Entry>> {
        for entry in used.iter().rev() {
            if self.context.matches(request, &entry.interaction.request)? {
                return Ok(Some(entry.clone()));
            }
        }
        Ok(None)
    }

    /// Move the interaction with `index` to the used list, if nobody else did
    fn consume(&self, index: usize) -> Option<Arc<HttpInteraction>> {
        let mut state = self.state.lock();
        let position = state.available.iter().position(|entry| entry.index == index)?;
        let entry = state.available.remove(position);
        let interaction = Arc::clone(&entry.interaction);
        state.used.push(entry);
        Some(interaction)
    }
}

impl InteractionSource for HttpInteractionList {
    fn has_interaction_matching(&self, request: &Request) -> Result<bool> {
        let (available, used) = self.snapshot();
        if self.matching_available(&available, request)?.is_some()
            || self.matching_used(&used, request)?.is_some()
        {
            return Ok(true);
        }
        self.parent.has_interaction_matching(request)
    }

    fn response_for(&self, request: &Request) -> Result<Option<Response>> {
        loop {
            let (available, used) = self.snapshot();

            if let Some(index) = self.matching_available(&available, request)? {
                // Consumed by someone else since the snapshot: look again
                let Some(interaction) = self.consume(index) else {
                    continue;
                };
                debug!(
                    "Consumed interaction #{} for {} {} ({})",
                    index,
                    request.method,
                    request.uri,
                    short_fingerprint(request)
                );
                return Ok(Some(interaction.response.clone()));
            }

            if let Some(entry) = self.matching_used(&used, request)? {
                debug!(
                    "Repeating consumed interaction #{} for {} {}",
                    entry.index, request.method, request.uri
                );
                return Ok(Some(entry.interaction.response.clone()));
            }

            break;
        }

        self.parent.response_for(request)
    }

    fn depth(&self) -> usize {
        self.depth
    }
}

impl fmt::Debug for HttpInteractionList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("HttpInteractionList")
            .field("available", &state.available.len())
            .field("used", &state.used.len())
            .field("context", &self.context)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}
