//! Parallel round fetcher.
//!
//! Issues one call per provider concurrently, each under its own timeout, and
//! reports completions as they settle. A failed, timed-out or missing provider
//! contributes zero records and never fails the round.

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::events::{EventSink, ResearchEvent};
use super::sources::{EvidenceRecord, ProviderKind};
use crate::error::ProviderError;
use crate::providers::EvidenceProvider;

/// The evidence providers available to an engine, at most one per kind.
#[derive(Clone, Default)]
pub struct ProviderSet {
    providers: BTreeMap<ProviderKind, Arc<dyn EvidenceProvider>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any previous one of the same kind.
    pub fn with(mut self, provider: Arc<dyn EvidenceProvider>) -> Self {
        self.insert(provider);
        self
    }

    pub fn insert(&mut self, provider: Arc<dyn EvidenceProvider>) {
        self.providers.insert(provider.kind(), provider);
    }

    pub fn get(&self, kind: ProviderKind) -> Option<&Arc<dyn EvidenceProvider>> {
        self.providers.get(&kind)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl FromIterator<Arc<dyn EvidenceProvider>> for ProviderSet {
    fn from_iter<I: IntoIterator<Item = Arc<dyn EvidenceProvider>>>(iter: I) -> Self {
        let mut set = ProviderSet::new();
        for provider in iter {
            set.insert(provider);
        }
        set
    }
}

/// How one provider call of a round settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderOutcome {
    pub provider: ProviderKind,
    pub requested: usize,
    /// Records received before deduplication.
    pub received: usize,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Raw (pre-dedup) results of one round.
#[derive(Debug, Default)]
pub struct RoundFetch {
    pub records: BTreeMap<ProviderKind, Vec<EvidenceRecord>>,
    /// Outcomes in completion order.
    pub outcomes: Vec<ProviderOutcome>,
}

impl RoundFetch {
    pub fn failed_providers(&self) -> impl Iterator<Item = ProviderKind> + '_ {
        self.outcomes.iter().filter(|o| !o.success).map(|o| o.provider)
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.success)
    }
}

pub struct RoundFetcher {
    providers: ProviderSet,
    timeout: Duration,
}

impl RoundFetcher {
    pub fn new(providers: ProviderSet, timeout: Duration) -> Self {
        Self { providers, timeout }
    }

    /// Fetch one round. `allocation` lists the count requested per provider.
    ///
    /// `api_started` is emitted for every provider before any call is awaited;
    /// `api_completed` is emitted as each call settles.
    pub async fn fetch_round(
        &self,
        query: &str,
        allocation: &[(ProviderKind, usize)],
        sink: &dyn EventSink,
    ) -> RoundFetch {
        for &(kind, count) in allocation {
            sink.emit(ResearchEvent::ApiStarted {
                api: kind,
                count,
                query: query.to_string(),
            });
        }

        let mut pending: FuturesUnordered<_> = allocation
            .iter()
            .map(|&(kind, count)| self.fetch_one(kind, query, count))
            .collect();

        let mut round = RoundFetch::default();
        while let Some((kind, count, result, elapsed)) = pending.next().await {
            let duration_ms = elapsed.as_millis() as u64;
            let outcome = match result {
                Ok(records) => {
                    debug!(provider = %kind, received = records.len(), duration_ms, "Provider call succeeded");
                    let received = records.len();
                    round.records.insert(kind, records);
                    ProviderOutcome {
                        provider: kind,
                        requested: count,
                        received,
                        duration_ms,
                        success: true,
                        error: None,
                    }
                }
                Err(e) => {
                    warn!(provider = %kind, error = %e, duration_ms, "Provider call failed");
                    round.records.insert(kind, Vec::new());
                    ProviderOutcome {
                        provider: kind,
                        requested: count,
                        received: 0,
                        duration_ms,
                        success: false,
                        error: Some(e.to_string()),
                    }
                }
            };
            sink.emit(ResearchEvent::ApiCompleted {
                api: kind,
                count: outcome.received,
                duration_ms,
                success: outcome.success,
            });
            round.outcomes.push(outcome);
        }
        round
    }

    async fn fetch_one(
        &self,
        kind: ProviderKind,
        query: &str,
        count: usize,
    ) -> (ProviderKind, usize, Result<Vec<EvidenceRecord>, ProviderError>, Duration) {
        let started = Instant::now();
        let Some(provider) = self.providers.get(kind) else {
            let err = ProviderError::Request {
                provider: kind,
                message: "provider not configured".to_string(),
            };
            return (kind, count, Err(err), started.elapsed());
        };
        if count == 0 {
            return (kind, count, Ok(Vec::new()), started.elapsed());
        }

        let result = match tokio::time::timeout(self.timeout, provider.fetch(query, count)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                provider: kind,
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        };
        (kind, count, result, started.elapsed())
    }
}
