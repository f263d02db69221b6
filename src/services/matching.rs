//! Matching strategy selection and per-row match plans

use std::collections::{BTreeMap, HashMap};

use crate::error::{ImportError, ImportResult, RowError};
use crate::types::{
    ContactField, ContactValues, IdentifierKind, MatchKey, MatchingStrategiesResponse,
    MatchingStrategy,
};

/// Share of sample rows with a non-empty value in the column mapped to
/// `kind`. `None` when no column is mapped to it.
pub fn coverage(
    kind: IdentifierKind,
    mappings: &HashMap<String, Option<ContactField>>,
    headers: &[String],
    sample_rows: &[Vec<String>],
) -> Option<f64> {
    let idx = headers
        .iter()
        .position(|h| mappings.get(h).copied().flatten() == Some(kind.field()))?;

    if sample_rows.is_empty() {
        return Some(0.0);
    }

    let filled = sample_rows
        .iter()
        .filter(|row| row.get(idx).is_some_and(|v| !v.trim().is_empty()))
        .count();
    Some(filled as f64 / sample_rows.len() as f64)
}

/// Recommend a strategy and explain why
pub fn recommend(
    mappings: &HashMap<String, Option<ContactField>>,
    headers: &[String],
    sample_rows: &[Vec<String>],
    threshold: f64,
) -> (MatchingStrategy, String) {
    let voter = coverage(IdentifierKind::VoterId, mappings, headers, sample_rows);
    let email = coverage(IdentifierKind::Email, mappings, headers, sample_rows);
    let pct = |c: f64| (c * 100.0).round() as i64;

    match (voter, email) {
        (Some(v), _) if v >= threshold => (
            MatchingStrategy::VoterIdFirst,
            format!("Voter ID is present in {}% of sample rows", pct(v)),
        ),
        (_, Some(e)) if e >= threshold => (
            MatchingStrategy::EmailFirst,
            format!("Email is present in {}% of sample rows", pct(e)),
        ),
        (Some(v), None) => (
            MatchingStrategy::VoterIdOnly,
            format!("Only voter ID is mapped ({}% of sample rows)", pct(v)),
        ),
        (None, Some(e)) => (
            MatchingStrategy::EmailOnly,
            format!("Only email is mapped ({}% of sample rows)", pct(e)),
        ),
        (Some(v), Some(e)) if v >= e => (
            MatchingStrategy::VoterIdFirst,
            format!(
                "Voter ID ({}%) and email ({}%) are both sparse; voter ID covers more rows",
                pct(v),
                pct(e)
            ),
        ),
        (Some(v), Some(e)) => (
            MatchingStrategy::EmailFirst,
            format!(
                "Voter ID ({}%) and email ({}%) are both sparse; email covers more rows",
                pct(v),
                pct(e)
            ),
        ),
        (None, None) => (
            MatchingStrategy::EmailFirst,
            "No identifier column detected; map a voter ID or email column before importing"
                .to_string(),
        ),
    }
}

/// Every strategy with its description, regardless of recommendation
pub fn describe_all() -> MatchingStrategiesResponse {
    MatchingStrategiesResponse {
        strategies: MatchingStrategy::ALL
            .into_iter()
            .map(|s| (s.key().to_string(), s.description().to_string()))
            .collect::<BTreeMap<_, _>>(),
    }
}

/// The strategy's primary identifier must be mapped to some column
pub fn validate(
    strategy: MatchingStrategy,
    mappings: &HashMap<String, Option<ContactField>>,
) -> ImportResult<()> {
    let required = strategy.required_identifier();
    let mapped = mappings.values().any(|f| *f == Some(required.field()));
    if !mapped {
        return Err(ImportError::UnsatisfiableStrategy {
            strategy,
            missing: required,
        });
    }
    Ok(())
}

/// Identifier lookups for one row, in the order they are tried
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchPlan {
    pub keys: Vec<MatchKey>,
}

impl MatchPlan {
    /// Keys present in the row; fails when the row carries none of the
    /// strategy's identifiers
    pub fn for_row(strategy: MatchingStrategy, values: &ContactValues) -> Result<Self, RowError> {
        let keys: Vec<MatchKey> = strategy
            .identifiers()
            .iter()
            .filter_map(|kind| values.identifier(*kind).map(|v| MatchKey::new(*kind, v)))
            .collect();

        if keys.is_empty() {
            let names: Vec<&str> = strategy.identifiers().iter().map(|k| k.as_str()).collect();
            return Err(RowError::NoIdentifier(names.join(" or ")));
        }
        Ok(Self { keys })
    }

    /// Keys in lock order (sorted, deduplicated)
    pub fn lock_order(&self) -> Vec<MatchKey> {
        let mut keys = self.keys.clone();
        keys.sort();
        keys.dedup();
        keys
    }
}
