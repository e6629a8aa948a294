//! Chooses which adapters answer a query and folds branch failures into a
//! fallback decision.

use futures::future::join_all;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::aggregator;
use crate::errors::{EngineError, EngineResult, ProviderFailure};
use crate::providers::{ProviderAdapter, ProviderRef, QueryContext};
use crate::types::{AnswerMode, EffectiveMode, ModePreference, ProviderResult, Query};

/// Transition table for the effective mode. Total over every
/// `(preference, connectivity)` pair; offline always means local.
pub fn resolve_mode(preference: ModePreference, online: bool) -> EffectiveMode {
    match (preference, online) {
        (_, false) => EffectiveMode::LocalOnly,
        (ModePreference::Local, true) => EffectiveMode::LocalOnly,
        (ModePreference::Online, true) => EffectiveMode::OnlinePreferred,
    }
}

/// Outcome of one dispatch, before it is wrapped into an answer
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub results: Vec<ProviderResult>,
    pub chosen_mode: AnswerMode,
    pub failures: Vec<ProviderFailure>,
}

pub struct FallbackOrchestrator {
    local: ProviderRef,
    remotes: Vec<ProviderRef>,
    remote_timeout: Duration,
}

impl FallbackOrchestrator {
    pub fn new(local: ProviderRef, remotes: Vec<ProviderRef>, remote_timeout: Duration) -> Self {
        Self {
            local,
            remotes,
            remote_timeout,
        }
    }

    pub fn remote_count(&self) -> usize {
        self.remotes.len()
    }

    /// Runs the adapters selected by `mode`. `connectivity` is the stable
    /// network stream; losing connectivity fails the remote branches still
    /// in flight.
    pub async fn dispatch(
        &self,
        query: &Query,
        context: &QueryContext,
        mode: EffectiveMode,
        connectivity: watch::Receiver<bool>,
    ) -> EngineResult<Dispatch> {
        match mode {
            EffectiveMode::LocalOnly => self.dispatch_local(query, context).await,
            EffectiveMode::OnlinePreferred => {
                self.dispatch_online(query, context, connectivity).await
            }
        }
    }

    async fn dispatch_local(&self, query: &Query, context: &QueryContext) -> EngineResult<Dispatch> {
        match self.run_local(query, context).await {
            Ok(results) => {
                debug!(query_id = %query.id(), "Answered locally");
                Ok(Dispatch {
                    results: aggregator::aggregate(results),
                    chosen_mode: AnswerMode::Local,
                    failures: Vec::new(),
                })
            }
            Err(failure) => Err(exhausted(query, vec![failure])),
        }
    }

    async fn dispatch_online(
        &self,
        query: &Query,
        context: &QueryContext,
        connectivity: watch::Receiver<bool>,
    ) -> EngineResult<Dispatch> {
        // Cold standby, ready before any remote branch settles.
        let standby = self.run_local(query, context).await;

        let branches = self.remotes.iter().map(|adapter| {
            run_branch(
                adapter.as_ref(),
                query,
                context,
                self.remote_timeout,
                connectivity.clone(),
            )
        });
        let outcomes = join_all(branches).await;

        let mut remote_results = Vec::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(mut results) => remote_results.append(&mut results),
                Err(failure) => {
                    warn!(
                        query_id = %query.id(),
                        provider = %failure.provider,
                        reason = %failure.reason,
                        retryable = failure.is_retryable(),
                        "Remote branch failed"
                    );
                    failures.push(failure);
                }
            }
        }

        if !remote_results.is_empty() {
            info!(
                query_id = %query.id(),
                results = remote_results.len(),
                failed_branches = failures.len(),
                "Answered online"
            );
            return Ok(Dispatch {
                results: aggregator::aggregate(remote_results),
                chosen_mode: AnswerMode::Online,
                failures,
            });
        }

        match standby {
            Ok(results) => {
                info!(
                    query_id = %query.id(),
                    failed_branches = failures.len(),
                    "No remote answer, falling back to local rules"
                );
                Ok(Dispatch {
                    results: aggregator::aggregate(results),
                    chosen_mode: AnswerMode::Degraded,
                    failures,
                })
            }
            Err(failure) => {
                failures.push(failure);
                Err(exhausted(query, failures))
            }
        }
    }

    async fn run_local(
        &self,
        query: &Query,
        context: &QueryContext,
    ) -> Result<Vec<ProviderResult>, ProviderFailure> {
        let results = self.local.answer(query, context).await?;
        if results.is_empty() {
            return Err(ProviderFailure::transport(
                self.local.name(),
                "local provider returned no results",
            ));
        }
        Ok(results)
    }
}

fn exhausted(query: &Query, failures: Vec<ProviderFailure>) -> EngineError {
    // The local provider is expected to always answer.
    error!(
        query_id = %query.id(),
        session_id = query.session_id(),
        failures = ?failures,
        "All providers exhausted, including local fallback"
    );
    EngineError::AllProvidersExhausted { failures }
}

/// One remote branch: its own deadline, cut short if connectivity drops.
async fn run_branch(
    adapter: &dyn ProviderAdapter,
    query: &Query,
    context: &QueryContext,
    timeout: Duration,
    mut connectivity: watch::Receiver<bool>,
) -> Result<Vec<ProviderResult>, ProviderFailure> {
    let name = adapter.name().to_string();
    tokio::select! {
        outcome = tokio::time::timeout(timeout, adapter.answer(query, context)) => match outcome {
            Ok(result) => result,
            Err(_) => Err(ProviderFailure::timeout(
                name,
                format!("no answer within {}s", timeout.as_secs_f32()),
            )),
        },
        _ = wait_for_offline(&mut connectivity) => Err(ProviderFailure::connectivity(name)),
    }
}

async fn wait_for_offline(connectivity: &mut watch::Receiver<bool>) {
    let closed = connectivity.wait_for(|online| !*online).await.is_err();
    if closed {
        // Monitor gone: no more signal, so never report a loss.
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_mode_is_total() {
        let table = [
            (ModePreference::Local, false, EffectiveMode::LocalOnly),
            (ModePreference::Local, true, EffectiveMode::LocalOnly),
            (ModePreference::Online, false, EffectiveMode::LocalOnly),
            (ModePreference::Online, true, EffectiveMode::OnlinePreferred),
        ];
        for (preference, online, expected) in table {
            assert_eq!(resolve_mode(preference, online), expected);
        }
    }
}
