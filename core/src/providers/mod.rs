//! Provider adapters: swappable implementations of "answer a query".

pub mod local;
pub mod remote_ai;
pub mod remote_search;
pub mod rules;

use async_trait::async_trait;
use std::sync::Arc;

use crate::errors::ProviderFailure;
use crate::history::ConversationTurn;
use crate::types::{Feature, ProviderKind, ProviderResult, Query};

pub use local::LocalRuleProvider;
pub use remote_ai::RemoteAiProvider;
pub use remote_search::RemoteSearchProvider;
pub use rules::{Rule, RuleMatcher};

/// Everything an adapter may use besides the query itself
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub feature: Feature,
    /// Copy of the session history taken when the query was submitted
    pub history: Vec<ConversationTurn>,
}

impl QueryContext {
    pub fn new(feature: Feature, history: Vec<ConversationTurn>) -> Self {
        Self { feature, history }
    }
}

/// Common capability of every provider
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Kind of results this adapter produces
    fn kind(&self) -> ProviderKind;

    /// Provider name (for logging and result attribution)
    fn name(&self) -> &str;

    /// Answers a query. Search-style adapters may return several results.
    async fn answer(
        &self,
        query: &Query,
        context: &QueryContext,
    ) -> Result<Vec<ProviderResult>, ProviderFailure>;
}

/// Type alias for Arc-wrapped adapter trait objects
pub type ProviderRef = Arc<dyn ProviderAdapter>;

/// Local HTTP endpoints standing in for remote providers
#[cfg(test)]
pub(crate) mod test_server {
    use axum::Router;
    use std::net::TcpListener;

    /// Serves `app` on an ephemeral port and returns its base URL.
    /// Must be called from within a tokio runtime.
    pub(crate) fn serve(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = axum::Server::from_tcp(listener)
            .unwrap()
            .serve(app.into_make_service());
        tokio::spawn(async move {
            let _ = server.await;
        });
        format!("http://{}", addr)
    }
}
