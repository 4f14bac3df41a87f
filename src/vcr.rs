//! The engine context: cassette stack, matchers, hooks and adapter coordination

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::adapter::{connections_disabled_error, AdapterEnvironment, AdapterId};
use crate::cassette::{Cassette, CassetteOptions, CassettePersister, InteractionSource, NullList};
use crate::config::Config;
use crate::hooks::HookInvoker;
use crate::ignorer::RequestIgnorer;
use crate::matcher::{MatchContext, RequestMatcherRegistry};
use crate::request::{HttpInteraction, Request, Response};
use crate::Result;

/// Everything one test context needs to record and replay HTTP interactions
///
/// Each context owns its registry, hooks, ignore rules, adapter environment and
/// cassette stack. Tests that run concurrently should each build their own.
pub struct Vcr {
    config: Config,
    registry: Arc<RequestMatcherRegistry>,
    hooks: Arc<HookInvoker>,
    ignorer: RequestIgnorer,
    environment: Arc<AdapterEnvironment>,
    cassettes: Vec<Cassette>,
}

impl Vcr {
    /// Build a context from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or names an unknown matcher
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(RequestMatcherRegistry::new());
        MatchContext::new(
            Arc::clone(&registry),
            config.default_cassette_options.match_requests_on.clone(),
        )?;

        let hooks = Arc::new(HookInvoker::new());
        for filter in &config.filter_sensitive_data {
            let secret = filter.resolve_secret()?;
            hooks.filter_sensitive_data(&filter.placeholder, filter.tag.as_deref(), move |_| {
                secret.clone()
            });
        }

        let mut ignorer = RequestIgnorer::new();
        ignorer.ignore_hosts(&config.ignore_hosts);
        ignorer.set_ignore_localhost(config.ignore_localhost);

        Ok(Self {
            config,
            registry,
            hooks,
            ignorer,
            environment: Arc::new(AdapterEnvironment::new()),
            cassettes: Vec::new(),
        })
    }

    /// Configuration this context was built from
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Options used by [`Vcr::insert_default_cassette`]
    #[must_use]
    pub fn default_cassette_options(&self) -> &CassetteOptions {
        &self.config.default_cassette_options
    }

    /// Matcher registry
    #[must_use]
    pub fn request_matcher_registry(&self) -> &Arc<RequestMatcherRegistry> {
        &self.registry
    }

    /// Register a custom matcher
    pub fn register_request_matcher<F>(&self, name: &str, compare: F)
    where
        F: Fn(&Request, &Request) -> bool + Send + Sync + 'static,
    {
        self.registry.register(name, compare);
    }

    /// Hook chain
    #[must_use]
    pub fn hooks(&self) -> &Arc<HookInvoker> {
        &self.hooks
    }

    /// Ignore rules
    #[must_use]
    pub fn request_ignorer(&self) -> &RequestIgnorer {
        &self.ignorer
    }

    /// Mutable ignore rules
    pub fn request_ignorer_mut(&mut self) -> &mut RequestIgnorer {
        &mut self.ignorer
    }

    /// Adapter environment shared by every adapter of this context
    #[must_use]
    pub fn environment(&self) -> &Arc<AdapterEnvironment> {
        &self.environment
    }

    /// Innermost inserted cassette
    #[must_use]
    pub fn current_cassette(&self) -> Option<&Cassette> {
        self.cassettes.last()
    }

    /// Number of inserted cassettes
    #[must_use]
    pub fn cassette_depth(&self) -> usize {
        self.cassettes.len()
    }

    /// Insert a cassette loaded from `persister`
    ///
    /// Unless the options are exclusive, the new cassette falls back to the
    /// interactions of the cassette it is nested in.
    ///
    /// # Errors
    ///
    /// Returns error if loading fails or the cassette cannot be created
    pub fn insert_cassette(
        &mut self,
        name: &str,
        options: &CassetteOptions,
        persister: &dyn CassettePersister,
    ) -> Result<&Cassette> {
        let stored = persister.load(name)?;
        let parent = self
            .current_cassette()
            .map(|cassette| cassette.http_interactions() as Arc<dyn InteractionSource>);

        let cassette = Cassette::new(
            name,
            options,
            stored,
            Arc::clone(&self.registry),
            Arc::clone(&self.hooks),
            parent,
        )?;
        self.cassettes.push(cassette);

        let depth = self.cassettes.len();
        Ok(&self.cassettes[depth - 1])
    }

    /// Insert a cassette with the configured default options
    ///
    /// # Errors
    ///
    /// Returns error if loading fails or the cassette cannot be created
    pub fn insert_default_cassette(
        &mut self,
        name: &str,
        persister: &dyn CassettePersister,
    ) -> Result<&Cassette> {
        let options = self.config.default_cassette_options.clone();
        self.insert_cassette(name, &options, persister)
    }

    /// Eject the innermost cassette, saving it if anything new was recorded
    ///
    /// # Errors
    ///
    /// Returns error if a before_record hook fails or saving fails; the cassette
    /// is ejected either way
    pub fn eject_cassette(
        &mut self,
        persister: &dyn CassettePersister,
    ) -> Result<Option<Cassette>> {
        let Some(cassette) = self.cassettes.pop() else {
            debug!("Eject requested with no cassette inserted");
            return Ok(None);
        };

        if cassette.has_new_recordings() {
            let interactions = cassette.interactions_to_record()?;
            info!(
                "Ejecting cassette '{}': saving {} interactions ({} new)",
                cassette.name(),
                interactions.len(),
                cassette.new_recorded_interactions().len()
            );
            persister.save(cassette.name(), interactions)?;
        } else {
            info!("Ejecting cassette '{}': nothing new recorded", cassette.name());
        }

        Ok(Some(cassette))
    }

    /// Run `f` with a cassette inserted, ejecting it afterwards
    ///
    /// The cassette is ejected, and its new recordings saved, even when `f`
    /// fails or panics. The error of `f` takes precedence over an ejection
    /// error.
    ///
    /// # Errors
    ///
    /// Returns error if insertion, `f`, or ejection fails
    ///
    /// # Panics
    ///
    /// Resumes the panic of `f` once the cassette is ejected
    pub fn use_cassette<T, F>(
        &mut self,
        name: &str,
        options: &CassetteOptions,
        persister: &dyn CassettePersister,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        self.insert_cassette(name, options, persister)?;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(self)));
        let ejected = self.eject_cassette(persister);

        let value = match outcome {
            Ok(result) => result?,
            Err(payload) => {
                if let Err(e) = ejected {
                    warn!("Ejecting cassette '{name}' after a panic failed: {e}");
                }
                panic::resume_unwind(payload)
            }
        };
        ejected?;
        Ok(value)
    }

    /// Interactions adapters should consult
    ///
    /// Without a cassette this is a [`NullList`] that never matches.
    #[must_use]
    pub fn http_interactions(&self) -> Arc<dyn InteractionSource> {
        match self.current_cassette() {
            Some(cassette) => cassette.http_interactions() as Arc<dyn InteractionSource>,
            None => Arc::new(NullList),
        }
    }

    /// Whether a request without a recorded match may go to the network
    #[must_use]
    pub fn real_http_connections_allowed(&self) -> bool {
        match self.current_cassette() {
            Some(cassette) => cassette.recording_allowed(),
            None => self.config.allow_http_connections_when_no_cassette,
        }
    }

    /// Record a completed live interaction on the current cassette
    ///
    /// Without a cassette the interaction is discarded.
    ///
    /// # Errors
    ///
    /// Returns error if the cassette refuses the recording or a hook fails
    pub fn record_http_interaction(&mut self, interaction: HttpInteraction) -> Result<()> {
        match self.cassettes.last_mut() {
            Some(cassette) => cassette.record_http_interaction(interaction),
            None => {
                debug!(
                    "No cassette inserted; not recording {} {}",
                    interaction.request.method, interaction.request.uri
                );
                Ok(())
            }
        }
    }

    /// Answer a request on behalf of an adapter
    ///
    /// Ignored requests go straight to `real_call`. Otherwise a recorded response is
    /// replayed if one matches; failing that, `real_call` is made and its result
    /// recorded when the recording mode allows live requests. The adapter is
    /// exclusively enabled for the duration of the call.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionNotAllowed` when nothing matches and live requests are
    /// forbidden, or any error from matching, hooks or `real_call`
    pub async fn handle_request<F, Fut>(
        &mut self,
        adapter: &AdapterId,
        request: Request,
        real_call: F,
    ) -> Result<Response>
    where
        F: FnOnce(Request) -> Fut,
        Fut: Future<Output = Result<Response>>,
    {
        let environment = Arc::clone(&self.environment);
        let _exclusive = environment.enter_exclusive(adapter);

        if self.ignorer.ignore(&request) {
            debug!("Ignoring request to {} ({})", request.uri, adapter);
            return real_call(request).await;
        }

        if let Some(response) = self.http_interactions().response_for(&request)? {
            debug!("Replayed {} {} via {}", request.method, request.uri, adapter);
            return Ok(response);
        }

        if !self.real_http_connections_allowed() {
            warn!(
                "Real HTTP connection refused: {} {} ({})",
                request.method, request.uri, adapter
            );
            return Err(connections_disabled_error(&request));
        }

        let response = real_call(request.clone()).await?;
        if environment.is_enabled(adapter) {
            self.record_http_interaction(HttpInteraction::new(request, response.clone()))?;
        }
        Ok(response)
    }
}

impl Default for Vcr {
    fn default() -> Self {
        Self {
            config: Config::default(),
            registry: Arc::new(RequestMatcherRegistry::new()),
            hooks: Arc::new(HookInvoker::new()),
            ignorer: RequestIgnorer::new(),
            environment: Arc::new(AdapterEnvironment::new()),
            cassettes: Vec::new(),
        }
    }
}

impl std::fmt::Debug for Vcr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vcr")
            .field("cassettes", &self.cassettes)
            .field("hooks", &self.hooks)
            .field("ignorer", &self.ignorer)
            .finish_non_exhaustive()
    }
}
