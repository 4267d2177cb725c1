//! Mock evidence provider for testing and offline runs.

use super::EvidenceProvider;
use crate::error::ProviderError;
use crate::research::sources::{EvidenceRecord, ProviderKind};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// How a mock answers when no scripted round response is queued.
enum Fallback {
    /// Generate `count` synthetic records, numbered uniquely across calls.
    Synthetic,
    /// Always return these records (truncated to `count`).
    Fixed(Vec<EvidenceRecord>),
    Fail(String),
}

/// A scriptable `EvidenceProvider`.
///
/// Queued responses are consumed one per call; afterwards the fallback
/// behaviour applies. Every call is recorded as `(query, count)`.
pub struct MockEvidenceProvider {
    kind: ProviderKind,
    delay: Duration,
    fallback: Fallback,
    queued: Mutex<VecDeque<Result<Vec<EvidenceRecord>, String>>>,
    calls: Mutex<Vec<(String, usize)>>,
    serial: Mutex<usize>,
}

impl MockEvidenceProvider {
    /// A provider that synthesizes `count` fresh records on every call.
    pub fn synthetic(kind: ProviderKind) -> Self {
        Self::with_fallback(kind, Fallback::Synthetic)
    }

    /// A provider that always returns the same records.
    pub fn fixed(kind: ProviderKind, records: Vec<EvidenceRecord>) -> Self {
        Self::with_fallback(kind, Fallback::Fixed(records))
    }

    /// A provider that always fails.
    pub fn failing(kind: ProviderKind, message: impl Into<String>) -> Self {
        Self::with_fallback(kind, Fallback::Fail(message.into()))
    }

    fn with_fallback(kind: ProviderKind, fallback: Fallback) -> Self {
        Self {
            kind,
            delay: Duration::ZERO,
            fallback,
            queued: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            serial: Mutex::new(0),
        }
    }

    /// Sleep this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue the records returned by the next call.
    pub fn queue_records(&self, records: Vec<EvidenceRecord>) {
        if let Ok(mut queued) = self.queued.lock() {
            queued.push_back(Ok(records));
        }
    }

    /// Queue a failure for the next call.
    pub fn queue_failure(&self, message: impl Into<String>) {
        if let Ok(mut queued) = self.queued.lock() {
            queued.push_back(Err(message.into()));
        }
    }

    pub fn calls(&self) -> Vec<(String, usize)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn synthesize(&self, query: &str, count: usize) -> Vec<EvidenceRecord> {
        let start = match self.serial.lock() {
            Ok(mut serial) => {
                let start = *serial;
                *serial += count;
                start
            }
            Err(_) => 0,
        };
        (start..start + count)
            .map(|n| {
                let title = format!("{query} ({} #{n})", self.kind);
                match self.kind {
                    ProviderKind::Web => EvidenceRecord::web(
                        format!("https://example.org/web/{n}"),
                        title,
                        format!("Web passage {n} about {query}"),
                    ),
                    ProviderKind::Journal => EvidenceRecord::journal(
                        format!("{}", 30_000_000 + n),
                        title,
                        format!("Abstract {n} about {query}"),
                    ),
                    ProviderKind::Preprint => EvidenceRecord::preprint(
                        format!("https://www.medrxiv.org/content/10.1101/{n}"),
                        title,
                        format!("Preprint abstract {n} about {query}"),
                    ),
                    ProviderKind::Trials => EvidenceRecord::trial(
                        format!("NCT{:08}", n),
                        title,
                        format!("Trial summary {n} about {query}"),
                    ),
                }
            })
            .collect()
    }
}

#[async_trait]
impl EvidenceProvider for MockEvidenceProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn fetch(&self, query: &str, count: usize) -> Result<Vec<EvidenceRecord>, ProviderError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((query.to_string(), count));
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let scripted = self.queued.lock().ok().and_then(|mut q| q.pop_front());
        let outcome = match scripted {
            Some(item) => item,
            None => match &self.fallback {
                Fallback::Synthetic => Ok(self.synthesize(query, count)),
                Fallback::Fixed(records) => Ok(records.clone()),
                Fallback::Fail(message) => Err(message.clone()),
            },
        };

        outcome
            .map(|mut records| {
                records.truncate(count);
                records
            })
            .map_err(|message| ProviderError::Request {
                provider: self.kind,
                message,
            })
    }
}
