//! Evidence providers and the records they return.
//!
//! `EvidenceRecord` is a tagged union over the four provider shapes. Every
//! record exposes a provider-specific identity key used for deduplication:
//! the normalized URL for web passages and preprints, the accession id
//! (PMID, NCT number) for journal articles and clinical trials.

use serde::{Deserialize, Serialize};

/// One external evidence source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProviderKind {
    /// General web search; the primary provider of every round.
    #[serde(rename = "web_search")]
    Web,
    /// Peer-reviewed journal index.
    #[serde(rename = "pubmed")]
    Journal,
    /// Preprint server index.
    #[serde(rename = "medrxiv")]
    Preprint,
    /// Clinical-trial registry.
    #[serde(rename = "clinical_trials")]
    Trials,
}

impl ProviderKind {
    /// All providers, primary first.
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Web,
        ProviderKind::Journal,
        ProviderKind::Preprint,
        ProviderKind::Trials,
    ];

    /// The non-primary providers that share the "others" budget.
    pub const OTHERS: [ProviderKind; 3] = [
        ProviderKind::Journal,
        ProviderKind::Preprint,
        ProviderKind::Trials,
    ];

    /// Wire name used in events and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Web => "web_search",
            ProviderKind::Journal => "pubmed",
            ProviderKind::Preprint => "medrxiv",
            ProviderKind::Trials => "clinical_trials",
        }
    }

    pub fn is_primary(&self) -> bool {
        matches!(self, ProviderKind::Web)
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single piece of evidence returned by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source_type", rename_all = "snake_case")]
pub enum EvidenceRecord {
    WebPassage {
        url: String,
        title: String,
        #[serde(default)]
        snippet: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        published: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        author: Option<String>,
    },
    JournalArticle {
        pmid: String,
        #[serde(default)]
        url: String,
        title: String,
        #[serde(default)]
        abstract_text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        published: Option<String>,
        #[serde(default)]
        authors: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        journal: Option<String>,
    },
    Preprint {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        doi: Option<String>,
        title: String,
        #[serde(default)]
        abstract_text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        published: Option<String>,
        #[serde(default)]
        authors: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server: Option<String>,
    },
    ClinicalTrial {
        nct_id: String,
        #[serde(default)]
        url: String,
        title: String,
        #[serde(default)]
        summary: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        phase: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sponsor: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_date: Option<String>,
    },
}

impl EvidenceRecord {
    /// Convenience constructor for a web passage.
    pub fn web(url: impl Into<String>, title: impl Into<String>, snippet: impl Into<String>) -> Self {
        EvidenceRecord::WebPassage {
            url: url.into(),
            title: title.into(),
            snippet: snippet.into(),
            published: None,
            author: None,
        }
    }

    /// Convenience constructor for a journal article.
    pub fn journal(pmid: impl Into<String>, title: impl Into<String>, abstract_text: impl Into<String>) -> Self {
        let pmid = pmid.into();
        EvidenceRecord::JournalArticle {
            url: format!("https://pubmed.ncbi.nlm.nih.gov/{pmid}/"),
            pmid,
            title: title.into(),
            abstract_text: abstract_text.into(),
            published: None,
            authors: Vec::new(),
            journal: None,
        }
    }

    /// Convenience constructor for a preprint.
    pub fn preprint(url: impl Into<String>, title: impl Into<String>, abstract_text: impl Into<String>) -> Self {
        EvidenceRecord::Preprint {
            url: url.into(),
            doi: None,
            title: title.into(),
            abstract_text: abstract_text.into(),
            published: None,
            authors: Vec::new(),
            server: None,
        }
    }

    /// Convenience constructor for a clinical trial.
    pub fn trial(nct_id: impl Into<String>, title: impl Into<String>, summary: impl Into<String>) -> Self {
        let nct_id = nct_id.into();
        EvidenceRecord::ClinicalTrial {
            url: format!("https://clinicaltrials.gov/study/{nct_id}"),
            nct_id,
            title: title.into(),
            summary: summary.into(),
            status: None,
            phase: None,
            sponsor: None,
            start_date: None,
        }
    }

    /// The provider this record shape belongs to.
    pub fn kind(&self) -> ProviderKind {
        match self {
            EvidenceRecord::WebPassage { .. } => ProviderKind::Web,
            EvidenceRecord::JournalArticle { .. } => ProviderKind::Journal,
            EvidenceRecord::Preprint { .. } => ProviderKind::Preprint,
            EvidenceRecord::ClinicalTrial { .. } => ProviderKind::Trials,
        }
    }

    /// Provider-specific identity key used for deduplication.
    pub fn identity_key(&self) -> String {
        match self {
            EvidenceRecord::WebPassage { url, .. } | EvidenceRecord::Preprint { url, .. } => {
                normalize_url(url)
            }
            EvidenceRecord::JournalArticle { pmid, .. } => pmid.trim().to_string(),
            EvidenceRecord::ClinicalTrial { nct_id, .. } => nct_id.trim().to_ascii_uppercase(),
        }
    }

    pub fn title(&self) -> &str {
        match self {
            EvidenceRecord::WebPassage { title, .. }
            | EvidenceRecord::JournalArticle { title, .. }
            | EvidenceRecord::Preprint { title, .. }
            | EvidenceRecord::ClinicalTrial { title, .. } => title,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            EvidenceRecord::WebPassage { url, .. }
            | EvidenceRecord::JournalArticle { url, .. }
            | EvidenceRecord::Preprint { url, .. }
            | EvidenceRecord::ClinicalTrial { url, .. } => url,
        }
    }

    /// Snippet, abstract or trial summary.
    pub fn snippet(&self) -> &str {
        match self {
            EvidenceRecord::WebPassage { snippet, .. } => snippet,
            EvidenceRecord::JournalArticle { abstract_text, .. }
            | EvidenceRecord::Preprint { abstract_text, .. } => abstract_text,
            EvidenceRecord::ClinicalTrial { summary, .. } => summary,
        }
    }

    pub fn published(&self) -> Option<&str> {
        match self {
            EvidenceRecord::WebPassage { published, .. }
            | EvidenceRecord::JournalArticle { published, .. }
            | EvidenceRecord::Preprint { published, .. } => published.as_deref(),
            EvidenceRecord::ClinicalTrial { start_date, .. } => start_date.as_deref(),
        }
    }

    /// Author list, single author, or trial sponsor.
    pub fn attribution(&self) -> Option<String> {
        match self {
            EvidenceRecord::WebPassage { author, .. } => author.clone(),
            EvidenceRecord::JournalArticle { authors, .. } | EvidenceRecord::Preprint { authors, .. } => {
                match authors.len() {
                    0 => None,
                    1 | 2 => Some(authors.join(", ")),
                    _ => Some(format!("{} et al.", authors[0])),
                }
            }
            EvidenceRecord::ClinicalTrial { sponsor, .. } => sponsor.clone(),
        }
    }

    /// Text that would be handed to synthesis for this source.
    pub fn synthesis_text(&self) -> String {
        format!("{}\n{}\n{}", self.title(), self.url(), self.snippet())
    }
}

/// Normalize a URL into an identity key: trimmed, lowercase scheme and host,
/// no fragment, no trailing slash.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match url::Url::parse(trimmed) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.as_str().trim_end_matches('/').to_string()
        }
        Err(_) => trimmed.trim_end_matches('/').to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_wire_names() {
        assert_eq!(ProviderKind::Web.to_string(), "web_search");
        assert_eq!(serde_json::to_string(&ProviderKind::Trials).unwrap(), "\"clinical_trials\"");
        let parsed: ProviderKind = serde_json::from_str("\"pubmed\"").unwrap();
        assert_eq!(parsed, ProviderKind::Journal);
        assert!(ProviderKind::Web.is_primary());
        assert!(!ProviderKind::OTHERS.contains(&ProviderKind::Web));
    }

    #[test]
    fn test_identity_keys() {
        let a = EvidenceRecord::web("https://ada.org/guide/", "ADA", "");
        let b = EvidenceRecord::web(" https://ADA.org/guide#section ", "ADA", "");
        assert_eq!(a.identity_key(), b.identity_key());

        let j = EvidenceRecord::journal("12345", "Title", "Abstract");
        assert_eq!(j.identity_key(), "12345");

        let t = EvidenceRecord::trial("nct0001", "Trial", "Summary");
        assert_eq!(t.identity_key(), "NCT0001");
    }

    #[test]
    fn test_record_deserializes_from_tagged_json() {
        let json = r#"{"source_type":"journal_article","pmid":"987","title":"SGLT2","abstract_text":"..","authors":["A","B","C"]}"#;
        let record: EvidenceRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.kind(), ProviderKind::Journal);
        assert_eq!(record.url(), "");
        assert_eq!(record.attribution().as_deref(), Some("A et al."));
    }

    #[test]
    fn test_accessors_across_variants() {
        let t = EvidenceRecord::ClinicalTrial {
            nct_id: "NCT1".into(),
            url: "u".into(),
            title: "T".into(),
            summary: "S".into(),
            status: Some("Recruiting".into()),
            phase: None,
            sponsor: Some("Uni".into()),
            start_date: Some("2025-01-01".into()),
        };
        assert_eq!(t.snippet(), "S");
        assert_eq!(t.published(), Some("2025-01-01"));
        assert_eq!(t.attribution().as_deref(), Some("Uni"));
    }

    #[test]
    fn test_normalize_url_non_url_input() {
        assert_eq!(normalize_url("  not a url/ "), "not a url");
    }
}
