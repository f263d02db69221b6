//! Field mapping suggestions
//!
//! Suggestions come from pluggable scorers:
//! - `HeuristicScorer` always runs (header names, aliases, sample values)
//! - `HttpMappingClassifier` optionally asks an ML service; it runs under a
//!   timeout and any failure degrades to heuristic-only suggestions
//!
//! Scorers only produce candidates. The suggester combines them, picks one
//! field per header deterministically, and never touches job state.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::defaults::ImportSettings;
use crate::services::csv_ingest::{detect_vote_history, IngestedFile};
use crate::services::row_mapping::{normalize_email, normalize_phone, normalize_zip, parse_date};
use crate::types::{ContactField, FieldMapping};

const EXACT_SCORE: f64 = 1.0;
const COMPACT_SCORE: f64 = 0.95;
const VOTE_HISTORY_SCORE: f64 = 0.95;
const ALIAS_TOKEN_SCORE: f64 = 0.8;
const FUZZY_WEIGHT: f64 = 0.85;
const FUZZY_MIN_SIMILARITY: f64 = 0.75;
const VALUE_SNIFF_SCORE: f64 = 0.7;

/// One header with its sample values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSample {
    pub header: String,
    pub samples: Vec<String>,
}

impl ColumnSample {
    pub fn from_file(file: &IngestedFile) -> Vec<ColumnSample> {
        file.headers
            .iter()
            .enumerate()
            .map(|(idx, header)| ColumnSample {
                header: header.clone(),
                samples: file
                    .sample_rows
                    .iter()
                    .filter_map(|row| row.get(idx))
                    .filter(|v| !v.trim().is_empty())
                    .cloned()
                    .collect(),
            })
            .collect()
    }
}

/// A scored guess for one column
#[derive(Debug, Clone, PartialEq)]
pub struct FieldCandidate {
    pub field: ContactField,
    pub confidence: f64,
    pub reason: String,
}

/// Scorer trait - one candidate list per input column, same order
#[async_trait]
pub trait MappingScorer: Send + Sync {
    async fn score(&self, columns: &[ColumnSample]) -> Result<Vec<Vec<FieldCandidate>>>;

    fn name(&self) -> &'static str;
}

// ==========================================================================
// Heuristic scorer
// ==========================================================================

/// Deterministic name and value based scorer
#[derive(Debug, Clone, Default)]
pub struct HeuristicScorer;

impl HeuristicScorer {
    pub fn new() -> Self {
        Self
    }

    pub fn score_column(&self, column: &ColumnSample) -> Vec<FieldCandidate> {
        let mut best: BTreeMap<ContactField, FieldCandidate> = BTreeMap::new();
        let mut offer = |field: ContactField, confidence: f64, reason: String| {
            let keep = best.get(&field).map_or(true, |c| confidence > c.confidence);
            if keep {
                best.insert(field, FieldCandidate { field, confidence, reason });
            }
        };

        if detect_vote_history(&column.header).is_some() {
            offer(
                ContactField::VoteHistory,
                VOTE_HISTORY_SCORE,
                "Header names an election".to_string(),
            );
        }

        let normalized = normalize_header(&column.header);
        let compact = compact(&normalized);
        let tokens: Vec<&str> = normalized.split('_').filter(|t| !t.is_empty()).collect();

        for field in ContactField::ALL {
            if field == ContactField::VoteHistory {
                continue;
            }
            let names = std::iter::once(field.key()).chain(field.aliases().iter().copied());

            for name in names {
                let name_compact = compact_str(name);
                if normalized == name {
                    offer(field, EXACT_SCORE, format!("Exact match for '{}'", name));
                } else if compact == name_compact {
                    offer(field, COMPACT_SCORE, format!("Matches '{}' ignoring separators", name));
                } else if name.len() >= 2 && contains_tokens(&tokens, name) {
                    offer(field, ALIAS_TOKEN_SCORE, format!("Header contains '{}'", name));
                } else if name_compact.len() >= 3 {
                    let similarity = strsim::jaro_winkler(&compact, &name_compact);
                    if similarity >= FUZZY_MIN_SIMILARITY {
                        offer(
                            field,
                            similarity * FUZZY_WEIGHT,
                            format!("Similar to '{}'", name),
                        );
                    }
                }
            }
        }

        if let Some((field, what)) = sniff_values(&column.samples) {
            offer(field, VALUE_SNIFF_SCORE, format!("Sample values look like {}", what));
        }

        best.into_values().collect()
    }
}

#[async_trait]
impl MappingScorer for HeuristicScorer {
    async fn score(&self, columns: &[ColumnSample]) -> Result<Vec<Vec<FieldCandidate>>> {
        Ok(columns.iter().map(|c| self.score_column(c)).collect())
    }

    fn name(&self) -> &'static str {
        "heuristic"
    }
}

/// Lowercase, non-alphanumerics collapsed to single underscores
fn normalize_header(header: &str) -> String {
    let mut out = String::with_capacity(header.len());
    let mut last_sep = true;
    for c in header.trim().chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            last_sep = false;
        } else if !last_sep {
            out.push('_');
            last_sep = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

fn compact(normalized: &str) -> String {
    compact_str(normalized)
}

fn compact_str(s: &str) -> String {
    s.chars().filter(|c| c.is_alphanumeric()).collect()
}

/// Whether the alias (possibly multi-token) appears as whole tokens
fn contains_tokens(tokens: &[&str], alias: &str) -> bool {
    let alias_tokens: Vec<&str> = alias.split('_').collect();
    tokens.len() > alias_tokens.len()
        && tokens
            .windows(alias_tokens.len())
            .any(|window| window == alias_tokens.as_slice())
}

/// Field implied by sample values when every non-empty sample agrees
fn sniff_values(samples: &[String]) -> Option<(ContactField, &'static str)> {
    let values: Vec<&str> = samples.iter().map(|s| s.trim()).filter(|s| !s.is_empty()).collect();
    if values.is_empty() {
        return None;
    }
    let all = |check: fn(&str) -> bool| values.iter().all(|v| check(v));

    if all(|v| normalize_email(v).is_some()) {
        Some((ContactField::Email, "email addresses"))
    } else if all(|v| normalize_zip(v).is_some()) {
        Some((ContactField::ZipCode, "ZIP codes"))
    } else if all(|v| normalize_phone(v).is_some()) {
        Some((ContactField::Phone, "phone numbers"))
    } else if all(|v| parse_date(v).is_some()) {
        Some((ContactField::DateOfBirth, "dates"))
    } else {
        None
    }
}

// ==========================================================================
// HTTP classifier
// ==========================================================================

#[derive(Debug, Serialize)]
struct ClassifierRequest<'a> {
    columns: &'a [ColumnSample],
}

#[derive(Debug, Deserialize)]
struct ClassifierResponse {
    columns: Vec<ClassifierColumn>,
}

#[derive(Debug, Deserialize)]
struct ClassifierColumn {
    #[serde(default)]
    candidates: Vec<ClassifierCandidate>,
}

#[derive(Debug, Deserialize)]
struct ClassifierCandidate {
    field: String,
    confidence: f64,
}

/// ML-backed scorer reached over HTTP.
///
/// POSTs `{"columns": [{"header", "samples"}]}` and expects
/// `{"columns": [{"candidates": [{"field", "confidence"}]}]}` in input order.
pub struct HttpMappingClassifier {
    client: reqwest::Client,
    url: String,
}

impl HttpMappingClassifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl MappingScorer for HttpMappingClassifier {
    async fn score(&self, columns: &[ColumnSample]) -> Result<Vec<Vec<FieldCandidate>>> {
        let response = self
            .client
            .post(&self.url)
            .json(&ClassifierRequest { columns })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Mapping classifier error {}: {}", status, body));
        }

        let parsed: ClassifierResponse = response.json().await?;
        if parsed.columns.len() != columns.len() {
            anyhow::bail!(
                "Mapping classifier returned {} columns, expected {}",
                parsed.columns.len(),
                columns.len()
            );
        }

        Ok(parsed
            .columns
            .into_iter()
            .map(|column| {
                column
                    .candidates
                    .into_iter()
                    .filter_map(|c| {
                        let field = ContactField::from_key(&c.field)?;
                        Some(FieldCandidate {
                            field,
                            confidence: c.confidence.clamp(0.0, 1.0),
                            reason: "Suggested by classifier".to_string(),
                        })
                    })
                    .collect()
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "http-classifier"
    }
}

// ==========================================================================
// Suggester
// ==========================================================================

/// Combines scorer output into one `FieldMapping` per header
pub struct FieldMappingSuggester {
    heuristic: HeuristicScorer,
    classifier: Option<Arc<dyn MappingScorer>>,
    timeout: Duration,
    min_confidence: f64,
}

impl FieldMappingSuggester {
    pub fn new(settings: &ImportSettings) -> Self {
        Self {
            heuristic: HeuristicScorer::new(),
            classifier: None,
            timeout: settings.classifier_timeout,
            min_confidence: settings.min_confidence,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn MappingScorer>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Suggest mappings, in header order
    pub async fn suggest(&self, columns: &[ColumnSample]) -> Vec<FieldMapping> {
        let mut candidates: Vec<Vec<FieldCandidate>> =
            columns.iter().map(|c| self.heuristic.score_column(c)).collect();

        if let Some(classifier) = &self.classifier {
            match tokio::time::timeout(self.timeout, classifier.score(columns)).await {
                Ok(Ok(extra)) if extra.len() == columns.len() => {
                    debug!(scorer = classifier.name(), "Merging classifier suggestions");
                    for (merged, more) in candidates.iter_mut().zip(extra) {
                        merge_candidates(merged, more);
                    }
                }
                Ok(Ok(extra)) => {
                    warn!(
                        scorer = classifier.name(),
                        got = extra.len(),
                        expected = columns.len(),
                        "Classifier returned wrong column count, using heuristic suggestions"
                    );
                }
                Ok(Err(e)) => {
                    warn!(scorer = classifier.name(), "Classifier failed, using heuristic suggestions: {}", e);
                }
                Err(_) => {
                    warn!(
                        scorer = classifier.name(),
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Classifier timed out, using heuristic suggestions"
                    );
                }
            }
        }

        self.assign(columns, candidates)
    }

    /// Greedy one-field-per-header assignment, best confidence first.
    /// Only `vote_history` may be assigned to several headers.
    fn assign(&self, columns: &[ColumnSample], candidates: Vec<Vec<FieldCandidate>>) -> Vec<FieldMapping> {
        let floor = self.min_confidence;
        let mut ranked: Vec<(usize, f64, FieldCandidate)> = candidates
            .into_iter()
            .enumerate()
            .flat_map(|(idx, list)| {
                let normalized = normalize_header(&columns[idx].header);
                list.into_iter()
                    .filter(move |c| c.confidence >= floor)
                    .map(move |c| {
                        let similarity = strsim::jaro_winkler(&normalized, c.field.key());
                        (idx, similarity, c)
                    })
            })
            .collect();

        ranked.sort_by(|(idx_a, sim_a, a), (idx_b, sim_b, b)| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
                .then_with(|| sim_b.partial_cmp(sim_a).unwrap_or(Ordering::Equal))
                .then_with(|| a.field.cmp(&b.field))
                .then_with(|| idx_a.cmp(idx_b))
        });

        let mut chosen: Vec<Option<FieldCandidate>> = vec![None; columns.len()];
        let mut used: HashSet<ContactField> = HashSet::new();
        for (idx, _, candidate) in ranked {
            if chosen[idx].is_some() {
                continue;
            }
            if candidate.field != ContactField::VoteHistory && !used.insert(candidate.field) {
                continue;
            }
            chosen[idx] = Some(candidate);
        }

        columns
            .iter()
            .zip(chosen)
            .map(|(column, candidate)| match candidate {
                Some(c) => FieldMapping {
                    header: column.header.clone(),
                    field: Some(c.field),
                    confidence: c.confidence,
                    reason: c.reason,
                    is_vote_history: c.field == ContactField::VoteHistory,
                },
                None => FieldMapping {
                    header: column.header.clone(),
                    field: None,
                    confidence: 0.0,
                    reason: "No match found".to_string(),
                    is_vote_history: false,
                },
            })
            .collect()
    }
}

/// Keep the higher confidence per field
fn merge_candidates(into: &mut Vec<FieldCandidate>, more: Vec<FieldCandidate>) {
    for candidate in more {
        match into.iter_mut().find(|c| c.field == candidate.field) {
            Some(existing) if existing.confidence >= candidate.confidence => {}
            Some(existing) => *existing = candidate,
            None => into.push(candidate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn column(header: &str, samples: &[&str]) -> ColumnSample {
        ColumnSample {
            header: header.to_string(),
            samples: samples.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn suggester() -> FieldMappingSuggester {
        FieldMappingSuggester::new(&ImportSettings::default())
    }

    struct SlowClassifier;

    #[async_trait]
    impl MappingScorer for SlowClassifier {
        async fn score(&self, columns: &[ColumnSample]) -> Result<Vec<Vec<FieldCandidate>>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(vec![Vec::new(); columns.len()])
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    struct FailingClassifier;

    #[async_trait]
    impl MappingScorer for FailingClassifier {
        async fn score(&self, _columns: &[ColumnSample]) -> Result<Vec<Vec<FieldCandidate>>> {
            anyhow::bail!("model unavailable")
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    /// Maps every column named "Col9" to precinct and counts calls
    struct FixedClassifier {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MappingScorer for FixedClassifier {
        async fn score(&self, columns: &[ColumnSample]) -> Result<Vec<Vec<FieldCandidate>>> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(columns
                .iter()
                .map(|c| {
                    if c.header == "Col9" {
                        vec![FieldCandidate {
                            field: ContactField::Precinct,
                            confidence: 0.9,
                            reason: "Suggested by classifier".into(),
                        }]
                    } else {
                        Vec::new()
                    }
                })
                .collect())
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    #[tokio::test]
    async fn test_suggests_common_voter_file_headers() {
        let columns = vec![
            column("VoterID", &["V1"]),
            column("Email", &["a@x.org"]),
            column("First Name", &["Ann"]),
            column("LAST_NAME", &["Lee"]),
            column("Res Zip", &["44101"]),
            column("2020_General", &["Y"]),
        ];

        let mappings = suggester().suggest(&columns).await;

        assert_eq!(mappings[0].field, Some(ContactField::VoterId));
        assert_eq!(mappings[0].confidence, 1.0);
        assert_eq!(mappings[1].field, Some(ContactField::Email));
        assert_eq!(mappings[2].field, Some(ContactField::FirstName));
        assert_eq!(mappings[3].field, Some(ContactField::LastName));
        assert_eq!(mappings[4].field, Some(ContactField::ZipCode));
        assert_eq!(mappings[5].field, Some(ContactField::VoteHistory));
        assert!(mappings[5].is_vote_history);
    }

    #[tokio::test]
    async fn test_unrecognized_header_gets_no_match() {
        let mappings = suggester().suggest(&[column("Favourite Colour", &["blue"])]).await;
        assert_eq!(mappings[0].field, None);
        assert_eq!(mappings[0].reason, "No match found");
        assert_eq!(mappings[0].confidence, 0.0);
    }

    #[tokio::test]
    async fn test_value_sniffing_maps_unnamed_email_column() {
        let mappings = suggester()
            .suggest(&[column("Col A", &["a@x.org", "b@y.com"])])
            .await;
        assert_eq!(mappings[0].field, Some(ContactField::Email));
        assert_eq!(mappings[0].confidence, VALUE_SNIFF_SCORE);
    }

    #[tokio::test]
    async fn test_each_field_assigned_once_except_vote_history() {
        let columns = vec![
            column("First", &[]),
            column("FirstName", &[]),
            column("2020 General", &[]),
            column("2022 Primary", &[]),
        ];
        let mappings = suggester().suggest(&columns).await;

        let first_name_count = mappings
            .iter()
            .filter(|m| m.field == Some(ContactField::FirstName))
            .count();
        assert_eq!(first_name_count, 1);
        assert_eq!(mappings[2].field, Some(ContactField::VoteHistory));
        assert_eq!(mappings[3].field, Some(ContactField::VoteHistory));
    }

    #[tokio::test]
    async fn test_suggestions_are_idempotent() {
        let columns = vec![
            column("Voter Reg Num", &["123"]),
            column("E-mail", &["x@y.org"]),
            column("Cell", &["555-123-4567"]),
            column("Addr", &["1 Main St"]),
            column("Unknown", &["?"]),
        ];
        let s = suggester();
        let first = s.suggest(&columns).await;
        let second = s.suggest(&columns).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_classifier_timeout_falls_back_to_heuristics() {
        let settings = ImportSettings {
            classifier_timeout: Duration::from_millis(20),
            ..ImportSettings::default()
        };
        let with_classifier =
            FieldMappingSuggester::new(&settings).with_classifier(Arc::new(SlowClassifier));
        let columns = vec![column("Email", &["a@x.org"]), column("Col9", &["12"])];

        let mappings = with_classifier.suggest(&columns).await;
        let heuristic_only = suggester().suggest(&columns).await;
        assert_eq!(mappings, heuristic_only);
    }

    #[tokio::test]
    async fn test_classifier_error_falls_back_to_heuristics() {
        let s = suggester().with_classifier(Arc::new(FailingClassifier));
        let mappings = s.suggest(&[column("Email", &[])]).await;
        assert_eq!(mappings[0].field, Some(ContactField::Email));
    }

    #[tokio::test]
    async fn test_classifier_candidates_are_merged() {
        let classifier = Arc::new(FixedClassifier {
            calls: AtomicUsize::new(0),
        });
        let s = suggester().with_classifier(classifier.clone());
        let mappings = s.suggest(&[column("Email", &[]), column("Col9", &["12"])]).await;

        assert_eq!(classifier.calls.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(mappings[0].field, Some(ContactField::Email));
        assert_eq!(mappings[1].field, Some(ContactField::Precinct));
        assert_eq!(mappings[1].reason, "Suggested by classifier");
    }

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header("  First Name "), "first_name");
        assert_eq!(normalize_header("E-Mail__Address"), "e_mail_address");
        assert_eq!(normalize_header("Zip (5)"), "zip_5");
    }

    #[test]
    fn test_contains_tokens_requires_whole_tokens() {
        assert!(contains_tokens(&["res", "zip"], "zip"));
        assert!(!contains_tokens(&["zipper"], "zip"));
        assert!(!contains_tokens(&["zip"], "zip"));
    }
}
