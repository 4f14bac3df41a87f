//! Cassettes: recorded interactions plus the policy for recording new ones

mod interaction_list;
mod persister;

pub use interaction_list::{HttpInteractionList, InteractionSource, NullList};
pub use persister::{CassettePersister, MemoryPersister};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::adapter::connections_disabled_error;
use crate::fingerprint::short_fingerprint;
use crate::hooks::{HookInvoker, HookPhase};
use crate::matcher::{MatchContext, RequestMatcherRegistry, DEFAULT_MATCHERS};
use crate::request::HttpInteraction;
use crate::{Result, TapedeckError};

/// Maximum number of nested cassettes in one parent chain
pub const MAX_NESTING_DEPTH: usize = 64;

/// Policy for live requests while a cassette is inserted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordMode {
    /// Record everything; stored interactions are not replayed
    All,
    /// Replay only; live requests are forbidden
    None,
    /// Record only into a cassette that started empty
    #[default]
    Once,
    /// Replay stored interactions and record new ones
    NewEpisodes,
}

/// Options for inserting a cassette
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CassetteOptions {
    /// Recording mode
    pub record: RecordMode,
    /// Matcher names applied to every lookup, in order
    pub match_requests_on: Vec<String>,
    /// Tag selecting which tagged hooks apply
    pub tag: Option<String>,
    /// Do not fall back to the enclosing cassette's interactions
    pub exclusive: bool,
}

impl Default for CassetteOptions {
    fn default() -> Self {
        Self {
            record: RecordMode::default(),
            match_requests_on: DEFAULT_MATCHERS.iter().map(ToString::to_string).collect(),
            tag: None,
            exclusive: false,
        }
    }
}

impl CassetteOptions {
    /// Options with the given recording mode and default everything else
    #[must_use]
    pub fn with_record(record: RecordMode) -> Self {
        Self {
            record,
            ..Self::default()
        }
    }
}

/// An inserted cassette
pub struct Cassette {
    name: String,
    record_mode: RecordMode,
    tag: Option<String>,
    match_context: MatchContext,
    hooks: Arc<HookInvoker>,
    previously_recorded: Vec<HttpInteraction>,
    http_interactions: Arc<HttpInteractionList>,
    new_recorded: Vec<HttpInteraction>,
}

impl Cassette {
    /// Create a cassette from interactions loaded from storage
    ///
    /// Loaded interactions pass through the before_playback hooks first. In
    /// [`RecordMode::All`] they are kept for the final merge but never replayed.
    ///
    /// # Errors
    ///
    /// Returns error if the name is invalid, a matcher is not registered, the
    /// nesting limit is exceeded, or a before_playback hook fails
    pub fn new(
        name: &str,
        options: &CassetteOptions,
        stored: Vec<HttpInteraction>,
        registry: Arc<RequestMatcherRegistry>,
        hooks: Arc<HookInvoker>,
        parent: Option<Arc<dyn InteractionSource>>,
    ) -> Result<Self> {
        validate_cassette_name(name)?;
        let match_context = MatchContext::new(registry, options.match_requests_on.clone())?;

        let mut previously_recorded = stored;
        for interaction in &mut previously_recorded {
            hooks.invoke_hook(HookPhase::BeforePlayback, options.tag.as_deref(), interaction)?;
        }

        let replayable = if options.record == RecordMode::All {
            Vec::new()
        } else {
            previously_recorded.clone()
        };
        let parent = if options.exclusive { None } else { parent };
        let http_interactions = Arc::new(HttpInteractionList::new(
            replayable,
            match_context.clone(),
            parent,
        )?);

        info!(
            "Inserted cassette '{}': {} recorded interactions (record: {:?})",
            name,
            previously_recorded.len(),
            options.record
        );

        Ok(Self {
            name: name.to_string(),
            record_mode: options.record,
            tag: options.tag.clone(),
            match_context,
            hooks,
            previously_recorded,
            http_interactions,
            new_recorded: Vec::new(),
        })
    }

    /// Cassette name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Recording mode
    #[must_use]
    pub fn record_mode(&self) -> RecordMode {
        self.record_mode
    }

    /// Hook tag
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Interactions available for replay
    #[must_use]
    pub fn http_interactions(&self) -> Arc<HttpInteractionList> {
        Arc::clone(&self.http_interactions)
    }

    /// Number of interactions loaded from storage
    #[must_use]
    pub fn originally_recorded_count(&self) -> usize {
        self.previously_recorded.len()
    }

    /// Whether the cassette started without interactions
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.previously_recorded.is_empty()
    }

    /// Whether a live request may be made and recorded
    #[must_use]
    pub fn recording_allowed(&self) -> bool {
        match self.record_mode {
            RecordMode::All | RecordMode::NewEpisodes => true,
            RecordMode::None => false,
            RecordMode::Once => self.is_new(),
        }
    }

    /// Record a completed live interaction
    ///
    /// The interaction runs through the before_record hooks and is appended after
    /// earlier recordings.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionNotAllowed` if the recording mode forbids new
    /// interactions, or the error of a failing hook
    pub fn record_http_interaction(&mut self, mut interaction: HttpInteraction) -> Result<()> {
        if !self.recording_allowed() {
            warn!(
                "Cassette '{}' ({:?}) refused to record {} {}",
                self.name, self.record_mode, interaction.request.method, interaction.request.uri
            );
            return Err(connections_disabled_error(&interaction.request));
        }

        self.hooks
            .invoke_hook(HookPhase::BeforeRecord, self.tag.as_deref(), &mut interaction)?;

        debug!(
            "Recorded interaction {} on cassette '{}' (count: {})",
            short_fingerprint(&interaction.request),
            self.name,
            self.new_recorded.len() + 1
        );
        self.new_recorded.push(interaction);
        Ok(())
    }

    /// Interactions recorded since insertion, after hooks
    #[must_use]
    pub fn new_recorded_interactions(&self) -> &[HttpInteraction] {
        &self.new_recorded
    }

    /// Whether anything was recorded since insertion
    #[must_use]
    pub fn has_new_recordings(&self) -> bool {
        !self.new_recorded.is_empty()
    }

    /// Interactions to hand to storage on ejection
    ///
    /// Stored interactions come first in their original order, passed through the
    /// before_record hooks again, followed by new recordings. In
    /// [`RecordMode::All`] a stored interaction that matches a new recording is
    /// replaced by it.
    ///
    /// # Errors
    ///
    /// Returns the error of a failing hook or matcher
    pub fn interactions_to_record(&self) -> Result<Vec<HttpInteraction>> {
        let mut stored = self.previously_recorded.clone();
        for interaction in &mut stored {
            self.hooks
                .invoke_hook(HookPhase::BeforeRecord, self.tag.as_deref(), interaction)?;
        }

        if self.record_mode == RecordMode::All && self.has_new_recordings() {
            let recorded = HttpInteractionList::new(
                self.new_recorded.clone(),
                self.match_context.clone(),
                None,
            )?;
            let mut kept = Vec::with_capacity(stored.len());
            for interaction in stored {
                if !recorded.has_interaction_matching(&interaction.request)? {
                    kept.push(interaction);
                }
            }
            stored = kept;
        }

        stored.extend(self.new_recorded.iter().cloned());
        Ok(stored)
    }
}

impl std::fmt::Debug for Cassette {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cassette")
            .field("name", &self.name)
            .field("record_mode", &self.record_mode)
            .field("tag", &self.tag)
            .field("originally_recorded", &self.previously_recorded.len())
            .field("new_recorded", &self.new_recorded.len())
            .finish_non_exhaustive()
    }
}

/// Validate a cassette name
///
/// Names may contain `/` to group cassettes, but must stay relative.
///
/// # Errors
///
/// Returns error if cassette name is invalid
pub fn validate_cassette_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(TapedeckError::InvalidCassetteName(
            "Cassette name cannot be empty".to_string(),
        ));
    }

    if name.len() > 255 {
        return Err(TapedeckError::InvalidCassetteName(format!(
            "Cassette name too long: {} > 255",
            name.len()
        )));
    }

    if name.starts_with('/') || name.starts_with('\\') {
        return Err(TapedeckError::InvalidCassetteName(
            "Cassette name must be relative".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(TapedeckError::InvalidCassetteName(
            "Cassette name cannot contain null bytes".to_string(),
        ));
    }

    if name.contains("..") {
        return Err(TapedeckError::InvalidCassetteName(
            "Cassette name cannot contain '..'".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Headers, Method, Request, Response};

    fn interaction(method: Method, uri: &str, body: &str) -> HttpInteraction {
        HttpInteraction::new(
            Request::new(method, uri, None, Headers::new()),
            Response::new(200, Headers::new(), body.to_string()),
        )
    }

    fn cassette(record: RecordMode, stored: Vec<HttpInteraction>) -> Cassette {
        cassette_with_hooks(record, stored, Arc::new(HookInvoker::new()))
    }

    fn cassette_with_hooks(
        record: RecordMode,
        stored: Vec<HttpInteraction>,
        hooks: Arc<HookInvoker>,
    ) -> Cassette {
        Cassette::new(
            "example",
            &CassetteOptions::with_record(record),
            stored,
            Arc::new(RequestMatcherRegistry::new()),
            hooks,
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_default_options() {
        let options = CassetteOptions::default();
        assert_eq!(options.record, RecordMode::Once);
        assert_eq!(options.match_requests_on, vec!["method", "uri"]);
        assert!(options.tag.is_none());
        assert!(!options.exclusive);
    }

    #[test]
    fn test_recording_allowed_by_mode() {
        let stored = || vec![interaction(Method::Get, "http://example.com/", "old")];

        assert!(cassette(RecordMode::All, stored()).recording_allowed());
        assert!(cassette(RecordMode::NewEpisodes, stored()).recording_allowed());
        assert!(!cassette(RecordMode::None, stored()).recording_allowed());
        assert!(!cassette(RecordMode::None, vec![]).recording_allowed());
        assert!(cassette(RecordMode::Once, vec![]).recording_allowed());
        assert!(!cassette(RecordMode::Once, stored()).recording_allowed());
    }

    #[test]
    fn test_once_records_into_empty_cassette() {
        let mut cassette = cassette(RecordMode::Once, vec![]);
        cassette
            .record_http_interaction(interaction(Method::Get, "http://example.com/", "new"))
            .unwrap();

        assert_eq!(cassette.new_recorded_interactions().len(), 1);
    }

    #[test]
    fn test_once_refuses_after_preexisting_interactions() {
        let mut cassette = cassette(
            RecordMode::Once,
            vec![interaction(Method::Get, "http://example.com/", "old")],
        );
        let new = interaction(Method::Post, "http://example.com/x", "new");
        let result = cassette.record_http_interaction(new);

        match result {
            Err(TapedeckError::ConnectionNotAllowed { method, uri }) => {
                assert_eq!(method, "POST");
                assert_eq!(uri, "http://example.com/x");
            }
            other => panic!("expected ConnectionNotAllowed, got {other:?}"),
        }
        assert!(!cassette.has_new_recordings());
    }

    #[test]
    fn test_none_refuses_but_replays() {
        let mut cassette = cassette(
            RecordMode::None,
            vec![interaction(Method::Get, "http://example.com/", "old")],
        );

        let response = cassette
            .http_interactions()
            .response_for(&Request::get("http://example.com/"))
            .unwrap()
            .unwrap();
        assert_eq!(response.body_str(), Some("old"));

        let new = interaction(Method::Get, "http://example.com/", "new");
        let result = cassette.record_http_interaction(new);
        assert!(matches!(result, Err(TapedeckError::ConnectionNotAllowed { .. })));
    }

    #[test]
    fn test_all_mode_does_not_replay() {
        let cassette = cassette(
            RecordMode::All,
            vec![interaction(Method::Get, "http://example.com/", "old")],
        );

        assert_eq!(cassette.originally_recorded_count(), 1);
        assert!(cassette
            .http_interactions()
            .response_for(&Request::get("http://example.com/"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_all_mode_replaces_matching_stored_interactions() {
        let mut cassette = cassette(
            RecordMode::All,
            vec![
                interaction(Method::Get, "http://example.com/a", "old a"),
                interaction(Method::Get, "http://example.com/b", "old b"),
            ],
        );
        cassette
            .record_http_interaction(interaction(Method::Get, "http://example.com/a", "new a"))
            .unwrap();

        let bodies: Vec<_> = cassette
            .interactions_to_record()
            .unwrap()
            .into_iter()
            .map(|i| i.response.body_str().unwrap().to_string())
            .collect();
        assert_eq!(bodies, vec!["old b", "new a"]);
    }

    #[test]
    fn test_new_episodes_appends_after_stored() {
        let mut cassette = cassette(
            RecordMode::NewEpisodes,
            vec![
                interaction(Method::Get, "http://example.com/a", "old a"),
                interaction(Method::Get, "http://example.com/b", "old b"),
            ],
        );
        cassette
            .http_interactions()
            .response_for(&Request::get("http://example.com/b"))
            .unwrap();
        cassette
            .record_http_interaction(interaction(Method::Get, "http://example.com/c", "new c"))
            .unwrap();

        let bodies: Vec<_> = cassette
            .interactions_to_record()
            .unwrap()
            .into_iter()
            .map(|i| i.response.body_str().unwrap().to_string())
            .collect();
        assert_eq!(bodies, vec!["old a", "old b", "new c"]);
    }

    #[test]
    fn test_hooks_applied_symmetrically() {
        let hooks = Arc::new(HookInvoker::new());
        hooks.filter_sensitive_data("<TOKEN>", None, |_| "s3cret".to_string());

        let mut cassette = cassette_with_hooks(
            RecordMode::NewEpisodes,
            vec![interaction(Method::Get, "http://example.com/", "token=<TOKEN>")],
            hooks,
        );

        let replayed = cassette
            .http_interactions()
            .response_for(&Request::get("http://example.com/"))
            .unwrap()
            .unwrap();
        assert_eq!(replayed.body_str(), Some("token=s3cret"));

        cassette
            .record_http_interaction(interaction(Method::Get, "http://example.com/new", "s3cret!"))
            .unwrap();
        assert_eq!(
            cassette.new_recorded_interactions()[0].response.body_str(),
            Some("<TOKEN>!")
        );

        let bodies: Vec<_> = cassette
            .interactions_to_record()
            .unwrap()
            .into_iter()
            .map(|i| i.response.body_str().unwrap().to_string())
            .collect();
        assert_eq!(bodies, vec!["token=<TOKEN>", "<TOKEN>!"]);
    }

    #[test]
    fn test_tagged_hooks_only_apply_to_tagged_cassette() {
        let hooks = Arc::new(HookInvoker::new());
        hooks.filter_sensitive_data("<TOKEN>", Some("auth"), |_| "s3cret".to_string());
        let registry = Arc::new(RequestMatcherRegistry::new());

        let mut options = CassetteOptions::with_record(RecordMode::NewEpisodes);
        let mut untagged = Cassette::new(
            "plain",
            &options,
            vec![],
            Arc::clone(&registry),
            Arc::clone(&hooks),
            None,
        )
        .unwrap();
        options.tag = Some("auth".to_string());
        let mut tagged = Cassette::new("tagged", &options, vec![], registry, hooks, None).unwrap();

        untagged
            .record_http_interaction(interaction(Method::Get, "http://example.com/", "s3cret"))
            .unwrap();
        tagged
            .record_http_interaction(interaction(Method::Get, "http://example.com/", "s3cret"))
            .unwrap();

        assert_eq!(
            untagged.new_recorded_interactions()[0].response.body_str(),
            Some("s3cret")
        );
        assert_eq!(
            tagged.new_recorded_interactions()[0].response.body_str(),
            Some("<TOKEN>")
        );
    }

    #[test]
    fn test_unregistered_matcher_rejected() {
        let mut options = CassetteOptions::default();
        options.match_requests_on.push("nonexistent".to_string());

        let result = Cassette::new(
            "example",
            &options,
            vec![],
            Arc::new(RequestMatcherRegistry::new()),
            Arc::new(HookInvoker::new()),
            None,
        );
        assert!(matches!(result, Err(TapedeckError::UnregisteredMatcher(_))));
    }

    #[test]
    fn test_validate_cassette_name() {
        assert!(validate_cassette_name("valid_cassette").is_ok());
        assert!(validate_cassette_name("api/users-123").is_ok());

        assert!(validate_cassette_name("").is_err());
        assert!(validate_cassette_name("   ").is_err());
        assert!(validate_cassette_name("/absolute").is_err());
        assert!(validate_cassette_name("a/../b").is_err());
        assert!(validate_cassette_name("a\0b").is_err());
        assert!(validate_cassette_name(&"x".repeat(256)).is_err());
    }
}
