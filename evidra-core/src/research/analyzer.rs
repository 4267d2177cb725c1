//! Query analyzer: splits the per-round "others" budget across the
//! journal, preprint and trial providers.
//!
//! Each provider gets a base weight of 1 plus 2 per keyword of its family
//! found in the query. Counts are apportioned with the largest-remainder
//! method, so the three counts always sum to the budget exactly. Remainder
//! ties go to journal, then preprint, then trials.

use serde::{Deserialize, Serialize};

use super::sources::ProviderKind;
use crate::sanitize::turkish_lowercase;

const TRIAL_KEYWORDS: &[&str] = &[
    "klinik çalışma",
    "klinik deney",
    "clinical trial",
    "trial",
    "faz 2",
    "faz 3",
    "phase",
    "randomize",
    "rct",
    "plasebo",
    "placebo",
    "gönüllü",
    "recruiting",
];

const JOURNAL_KEYWORDS: &[&str] = &[
    "meta-analiz",
    "meta analiz",
    "meta-analysis",
    "systematic review",
    "sistematik derleme",
    "kılavuz",
    "guideline",
    "yan etki",
    "side effect",
    "mekanizma",
    "mechanism",
    "doz",
    "literatür",
    "makale",
    "kanıt",
    "evidence",
];

const PREPRINT_KEYWORDS: &[&str] = &[
    "preprint",
    "ön baskı",
    "en son",
    "en yeni",
    "güncel",
    "latest",
    "recent",
    "emerging",
    "novel",
    "yeni tedavi",
    "yeni çıkan",
];

/// How many records to request from each non-primary provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetDistribution {
    pub journal: usize,
    pub preprint: usize,
    pub trials: usize,
}

impl BudgetDistribution {
    pub fn total(&self) -> usize {
        self.journal + self.preprint + self.trials
    }

    /// Count for a provider; `Web` is not part of the distribution and yields 0.
    pub fn get(&self, kind: ProviderKind) -> usize {
        match kind {
            ProviderKind::Web => 0,
            ProviderKind::Journal => self.journal,
            ProviderKind::Preprint => self.preprint,
            ProviderKind::Trials => self.trials,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryAnalyzer;

impl QueryAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Split `budget` across the three non-primary providers.
    pub fn analyze(&self, query: &str, budget: usize) -> BudgetDistribution {
        let lowered = turkish_lowercase(query);
        let hits = [
            count_hits(&lowered, JOURNAL_KEYWORDS),
            count_hits(&lowered, PREPRINT_KEYWORDS),
            count_hits(&lowered, TRIAL_KEYWORDS),
        ];
        let weights = hits.map(|h| 1 + 2 * h);
        let counts = apportion(budget, &weights);
        BudgetDistribution {
            journal: counts[0],
            preprint: counts[1],
            trials: counts[2],
        }
    }
}

fn count_hits(text: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|kw| text.contains(*kw)).count()
}

/// Largest-remainder apportionment of `total` by integer `weights`.
///
/// Ties on the remainder are resolved in index order.
fn apportion<const N: usize>(total: usize, weights: &[usize; N]) -> [usize; N] {
    let weight_sum: usize = weights.iter().sum();
    let mut counts = [0usize; N];
    if weight_sum == 0 {
        return counts;
    }

    let mut remainders = [(0usize, 0usize); N];
    let mut assigned = 0;
    for (i, w) in weights.iter().enumerate() {
        let numerator = total * w;
        counts[i] = numerator / weight_sum;
        remainders[i] = (numerator % weight_sum, i);
        assigned += counts[i];
    }

    // Sort by remainder desc, then index asc.
    remainders.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    for &(_, i) in remainders.iter().take(total - assigned) {
        counts[i] += 1;
    }
    counts
}
