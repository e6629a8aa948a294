//! The query engine: owns sessions, routes each query through the
//! fallback orchestrator for its feature and records the exchange.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::errors::{EngineError, EngineResult};
use crate::history::ConversationTurn;
use crate::mode::ModeSnapshot;
use crate::network::NetworkStatusMonitor;
use crate::orchestrator::FallbackOrchestrator;
use crate::providers::{
    LocalRuleProvider, ProviderAdapter, ProviderRef, QueryContext, RemoteAiProvider,
    RemoteSearchProvider, Rule,
};
use crate::session::{Session, SessionInfo};
use crate::store::KeyValueStoreRef;
use crate::types::{AggregatedAnswer, Feature, ModePreference, ProviderKind, ProviderResult, Query};

const HISTORY_KEY_PREFIX: &str = "history/";

fn history_key(session_id: &str) -> String {
    format!("{}{}", HISTORY_KEY_PREFIX, session_id)
}

/// Persisted form of a session's history
#[derive(Debug, Serialize, Deserialize)]
struct StoredHistory {
    feature: Feature,
    turns: Vec<ConversationTurn>,
}

pub struct QueryEngineBuilder {
    config: EngineConfig,
    monitor: Option<Arc<NetworkStatusMonitor>>,
    shared_remotes: Vec<ProviderRef>,
    feature_remotes: HashMap<Feature, Vec<ProviderRef>>,
    locals: HashMap<Feature, ProviderRef>,
}

impl QueryEngineBuilder {
    /// Remote adapter consulted for every feature
    pub fn with_remote(mut self, adapter: ProviderRef) -> Self {
        self.shared_remotes.push(adapter);
        self
    }

    /// Remote adapter consulted only for `feature`
    pub fn with_feature_remote(mut self, feature: Feature, adapter: ProviderRef) -> Self {
        self.feature_remotes.entry(feature).or_default().push(adapter);
        self
    }

    /// Replaces the built-in rule table of `feature`
    pub fn with_local_rules(mut self, feature: Feature, rules: Vec<Rule>) -> Self {
        let local = LocalRuleProvider::new(
            format!("local-{}", feature.as_str()),
            format!("{} (offline)", feature.display_name()),
            rules,
            self.config.local_confidence(),
        );
        self.locals.insert(feature, Arc::new(local));
        self
    }

    /// Replaces the local fallback of `feature` with any adapter
    pub fn with_local(mut self, feature: Feature, adapter: ProviderRef) -> Self {
        self.locals.insert(feature, adapter);
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<NetworkStatusMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Must be called inside a Tokio runtime when no monitor was supplied.
    pub fn build(mut self) -> QueryEngine {
        let monitor = self
            .monitor
            .take()
            .unwrap_or_else(|| NetworkStatusMonitor::start(true, self.config.debounce()));
        let timeout = self.config.remote_timeout();

        let mut orchestrators = HashMap::new();
        for feature in Feature::all() {
            let local: ProviderRef = match self.locals.remove(&feature) {
                Some(local) => local,
                None => Arc::new(LocalRuleProvider::for_feature(
                    feature,
                    self.config.local_confidence(),
                )),
            };
            let mut remotes = self.shared_remotes.clone();
            remotes.extend(self.feature_remotes.remove(&feature).unwrap_or_default());

            debug!(
                feature = %feature,
                local = local.name(),
                remotes = remotes.len(),
                "Configured orchestrator"
            );
            orchestrators.insert(
                feature,
                Arc::new(FallbackOrchestrator::new(local, remotes, timeout)),
            );
        }

        QueryEngine {
            config: self.config,
            monitor,
            orchestrators,
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

pub struct QueryEngine {
    config: EngineConfig,
    monitor: Arc<NetworkStatusMonitor>,
    orchestrators: HashMap<Feature, Arc<FallbackOrchestrator>>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl QueryEngine {
    pub fn builder(config: EngineConfig) -> QueryEngineBuilder {
        QueryEngineBuilder {
            config,
            monitor: None,
            shared_remotes: Vec::new(),
            feature_remotes: HashMap::new(),
            locals: HashMap::new(),
        }
    }

    /// Builds an engine with the adapters the configuration enables. The
    /// generative provider serves every feature; search sources back the
    /// medical and food features. A provider that cannot be constructed is
    /// left out with a warning.
    pub fn from_config(config: EngineConfig, monitor: Arc<NetworkStatusMonitor>) -> Self {
        let timeout = config.remote_timeout();
        let mut builder = Self::builder(config.clone()).with_monitor(monitor);

        match config.ai.as_ref() {
            Some(ai) if ai.api_key.as_ref().is_some_and(|k| !k.is_empty()) => {
                match RemoteAiProvider::new(ai, timeout) {
                    Ok(provider) => {
                        info!(model = provider.model_name(), "Remote AI provider enabled");
                        builder = builder.with_remote(Arc::new(provider));
                    }
                    Err(e) => warn!(error = %e, "Remote AI provider disabled"),
                }
            }
            _ => info!("No AI credential configured, remote AI provider disabled"),
        }

        if let Some(sources) = config.search_sources.as_ref().filter(|s| !s.is_empty()) {
            match RemoteSearchProvider::new(sources, timeout) {
                Ok(provider) => {
                    info!(sources = sources.len(), "Remote search provider enabled");
                    let provider: ProviderRef = Arc::new(provider);
                    builder = builder
                        .with_feature_remote(Feature::MedicalAdvisor, provider.clone())
                        .with_feature_remote(Feature::FoodScanner, provider);
                }
                Err(e) => warn!(error = %e, "Remote search provider disabled"),
            }
        }

        builder.build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn monitor(&self) -> &Arc<NetworkStatusMonitor> {
        &self.monitor
    }

    /// Feeds a raw connectivity signal into the debouncer
    pub fn report_connectivity(&self, online: bool) {
        self.monitor.report(online);
    }

    pub fn is_online(&self) -> bool {
        self.monitor.is_online()
    }

    pub fn open_session(&self, session_id: &str, feature: Feature) -> EngineResult<Arc<Session>> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| EngineError::Internal(format!("Failed to acquire write lock: {}", e)))?;
        if sessions.contains_key(session_id) {
            return Err(EngineError::SessionExists(session_id.to_string()));
        }

        let session = Arc::new(Session::new(
            session_id,
            feature,
            self.config.history_max_turns(),
            &self.monitor,
        ));
        sessions.insert(session_id.to_string(), session.clone());
        info!(session_id, feature = %feature, "Opened session");
        Ok(session)
    }

    /// Removes a session, aborting any query still in flight
    pub fn close_session(&self, session_id: &str) -> EngineResult<()> {
        let removed = self
            .sessions
            .write()
            .map_err(|e| EngineError::Internal(format!("Failed to acquire write lock: {}", e)))?
            .remove(session_id);
        match removed {
            Some(session) => {
                session.cancel()?;
                info!(session_id, "Closed session");
                Ok(())
            }
            None => Err(EngineError::SessionNotFound(session_id.to_string())),
        }
    }

    pub fn session(&self, session_id: &str) -> EngineResult<Arc<Session>> {
        self.sessions
            .read()
            .map_err(|e| EngineError::Internal(format!("Failed to acquire read lock: {}", e)))?
            .get(session_id)
            .cloned()
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))
    }

    pub fn list_sessions(&self) -> EngineResult<Vec<SessionInfo>> {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .read()
            .map_err(|e| EngineError::Internal(format!("Failed to acquire read lock: {}", e)))?
            .values()
            .cloned()
            .collect();
        let mut infos = sessions
            .iter()
            .map(|s| s.info())
            .collect::<EngineResult<Vec<_>>>()?;
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(infos)
    }

    /// Cancels in-flight work and truncates history to the system turn
    pub fn reset_session(&self, session_id: &str) -> EngineResult<()> {
        self.session(session_id)?.reset()
    }

    pub fn mode_snapshot(&self, session_id: &str) -> EngineResult<ModeSnapshot> {
        Ok(self.session(session_id)?.mode().snapshot())
    }

    /// Answers `text` in the given session.
    ///
    /// A newer submission in the same session aborts this one, which then
    /// resolves to [`EngineError::Superseded`]. History is only updated when
    /// the query is still the latest one at completion.
    pub async fn submit_query(
        &self,
        session_id: &str,
        text: &str,
        preference: ModePreference,
    ) -> EngineResult<AggregatedAnswer> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EngineError::InvalidQuery("query text is empty".to_string()));
        }

        let session = self.session(session_id)?;
        let orchestrator = self
            .orchestrators
            .get(&session.feature())
            .cloned()
            .ok_or_else(|| {
                EngineError::Internal(format!("No orchestrator for {}", session.feature()))
            })?;

        session.mode().set_preference(preference);
        let mode = session.mode().current_effective_mode();
        let query = Query::new(session_id, text);
        let feature = session.feature();
        let connectivity = self.monitor.subscribe();

        debug!(
            query_id = %query.id(),
            session_id,
            mode = ?mode,
            "Submitting query"
        );

        let (generation, handle) = session.start(|history| {
            let query = query.clone();
            let context = QueryContext::new(feature, history);
            tokio::spawn(async move {
                orchestrator
                    .dispatch(&query, &context, mode, connectivity)
                    .await
            })
        })?;

        let dispatched = match handle.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => {
                debug!(query_id = %query.id(), "Query superseded before completion");
                return Err(EngineError::Superseded);
            }
            Err(e) => {
                session.finish_failed(generation)?;
                return Err(EngineError::Internal(format!("Dispatch task failed: {}", e)));
            }
        };

        let dispatch = match dispatched {
            Ok(dispatch) => dispatch,
            Err(e) => {
                if !session.finish_failed(generation)? {
                    return Err(EngineError::Superseded);
                }
                return Err(e);
            }
        };

        let reply = assistant_reply(&dispatch.results);
        session.commit(generation, query.text(), reply)?;

        info!(
            query_id = %query.id(),
            session_id,
            mode = ?dispatch.chosen_mode,
            results = dispatch.results.len(),
            "Query answered"
        );

        Ok(AggregatedAnswer {
            query,
            results: dispatch.results,
            chosen_mode: dispatch.chosen_mode,
            produced_at: Utc::now(),
            failures: dispatch.failures,
        })
    }

    /// Writes a session's history to `store` under `history/<session_id>`
    pub async fn save_history(&self, session_id: &str, store: &KeyValueStoreRef) -> EngineResult<()> {
        let session = self.session(session_id)?;
        let stored = StoredHistory {
            feature: session.feature(),
            turns: session.history()?,
        };
        let value = serde_json::to_string(&stored)?;
        store
            .save(&history_key(session_id), value)
            .await
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        debug!(session_id, turns = stored.turns.len(), "Saved history");
        Ok(())
    }

    /// Restores a session's history from `store`. Returns `false` when
    /// nothing was stored for the session.
    pub async fn load_history(&self, session_id: &str, store: &KeyValueStoreRef) -> EngineResult<bool> {
        let session = self.session(session_id)?;
        let value = store
            .load(&history_key(session_id))
            .await
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        let Some(value) = value else {
            return Ok(false);
        };

        let stored: StoredHistory = serde_json::from_str(&value)?;
        if stored.feature != session.feature() {
            warn!(
                session_id,
                stored = %stored.feature,
                current = %session.feature(),
                "Restoring history saved for another feature"
            );
        }
        session.restore_history(stored.turns)?;
        debug!(session_id, "Restored history");
        Ok(true)
    }
}

/// The assistant turn recorded for an answer: the generative reply when
/// present, otherwise the top-ranked result.
fn assistant_reply(results: &[ProviderResult]) -> &str {
    results
        .iter()
        .find(|r| r.provider_kind() == ProviderKind::RemoteAi)
        .or_else(|| results.first())
        .map(|r| r.body())
        .unwrap_or_default()
}
