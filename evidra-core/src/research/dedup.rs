//! Cross-round source deduplication.
//!
//! One `SourceDeduplicator` lives for a whole run and keeps a separate
//! identity set per provider. Filtering is order-stable and the first
//! occurrence of an identity key wins.

use std::collections::{HashMap, HashSet};

use super::sources::{EvidenceRecord, ProviderKind};

#[derive(Debug, Default)]
pub struct SourceDeduplicator {
    seen: HashMap<ProviderKind, HashSet<String>>,
}

impl SourceDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the records of `kind` whose identity keys have not been seen in
    /// this run, and remember them.
    ///
    /// Records of a different shape than `kind` are dropped; empty identity
    /// keys cannot be tracked and are dropped too.
    pub fn filter(&mut self, kind: ProviderKind, records: Vec<EvidenceRecord>) -> Vec<EvidenceRecord> {
        let seen = self.seen.entry(kind).or_default();
        records
            .into_iter()
            .filter(|record| {
                if record.kind() != kind {
                    return false;
                }
                let key = record.identity_key();
                !key.is_empty() && seen.insert(key)
            })
            .collect()
    }

    pub fn filter_web(&mut self, records: Vec<EvidenceRecord>) -> Vec<EvidenceRecord> {
        self.filter(ProviderKind::Web, records)
    }

    pub fn filter_journal(&mut self, records: Vec<EvidenceRecord>) -> Vec<EvidenceRecord> {
        self.filter(ProviderKind::Journal, records)
    }

    pub fn filter_preprint(&mut self, records: Vec<EvidenceRecord>) -> Vec<EvidenceRecord> {
        self.filter(ProviderKind::Preprint, records)
    }

    pub fn filter_trials(&mut self, records: Vec<EvidenceRecord>) -> Vec<EvidenceRecord> {
        self.filter(ProviderKind::Trials, records)
    }

    /// Number of distinct identities seen so far for `kind`.
    pub fn seen_count(&self, kind: ProviderKind) -> usize {
        self.seen.get(&kind).map_or(0, HashSet::len)
    }

    /// Number of distinct identities seen so far across all providers.
    pub fn total_seen(&self) -> usize {
        self.seen.values().map(HashSet::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn web(url: &str, title: &str) -> EvidenceRecord {
        EvidenceRecord::web(url, title, "")
    }

    #[test]
    fn test_first_occurrence_wins_within_batch() {
        let mut dedup = SourceDeduplicator::new();
        let out = dedup.filter_web(vec![
            web("https://a.org/1", "first"),
            web("https://b.org/2", "other"),
            web("https://a.org/1/", "second"),
        ]);
        let titles: Vec<&str> = out.iter().map(|r| r.title()).collect();
        assert_eq!(titles, vec!["first", "other"]);
    }

    #[test]
    fn test_across_rounds() {
        let mut dedup = SourceDeduplicator::new();
        let round1 = dedup.filter_journal(vec![EvidenceRecord::journal("1", "a", ""), EvidenceRecord::journal("2", "b", "")]);
        let round2 = dedup.filter_journal(vec![EvidenceRecord::journal("2", "b", ""), EvidenceRecord::journal("3", "c", "")]);
        assert_eq!(round1.len(), 2);
        assert_eq!(round2.len(), 1);
        assert_eq!(round2[0].identity_key(), "3");
        assert_eq!(dedup.seen_count(ProviderKind::Journal), 3);
    }

    #[test]
    fn test_identity_sets_are_per_provider() {
        let mut dedup = SourceDeduplicator::new();
        let url = "https://medrxiv.org/content/10.1101/x";
        assert_eq!(dedup.filter_web(vec![web(url, "w")]).len(), 1);
        assert_eq!(dedup.filter_preprint(vec![EvidenceRecord::preprint(url, "p", "")]).len(), 1);
        assert_eq!(dedup.total_seen(), 2);
    }

    #[test]
    fn test_feeding_twice_is_idempotent() {
        let batch = vec![
            EvidenceRecord::trial("NCT1", "a", ""),
            EvidenceRecord::trial("NCT2", "b", ""),
            EvidenceRecord::trial("nct1", "dup", ""),
        ];

        let mut once = SourceDeduplicator::new();
        let unique_once = once.filter_trials(batch.clone());

        let mut twice = SourceDeduplicator::new();
        let mut unique_twice = twice.filter_trials(batch.clone());
        unique_twice.extend(twice.filter_trials(batch));

        assert_eq!(unique_once, unique_twice);
    }

    #[test]
    fn test_mismatched_shape_and_empty_key_dropped() {
        let mut dedup = SourceDeduplicator::new();
        let out = dedup.filter(
            ProviderKind::Journal,
            vec![web("https://x.org", "web"), EvidenceRecord::journal("", "no id", "")],
        );
        assert!(out.is_empty());
    }
}
