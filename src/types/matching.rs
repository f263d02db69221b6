//! Contact matching strategy types

use std::fmt;

use serde::{Deserialize, Serialize};

use super::mapping::ContactField;

/// Identity key used to resolve an import row to an existing contact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    VoterId,
    Email,
}

impl IdentifierKind {
    pub fn field(&self) -> ContactField {
        match self {
            IdentifierKind::VoterId => ContactField::VoterId,
            IdentifierKind::Email => ContactField::Email,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierKind::VoterId => "voter_id",
            IdentifierKind::Email => "email",
        }
    }
}

/// Ordered rule set for resolving import rows to contacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchingStrategy {
    VoterIdFirst,
    EmailFirst,
    VoterIdOnly,
    EmailOnly,
}

impl MatchingStrategy {
    pub const ALL: [MatchingStrategy; 4] = [
        MatchingStrategy::VoterIdFirst,
        MatchingStrategy::EmailFirst,
        MatchingStrategy::VoterIdOnly,
        MatchingStrategy::EmailOnly,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            MatchingStrategy::VoterIdFirst => "voter_id_first",
            MatchingStrategy::EmailFirst => "email_first",
            MatchingStrategy::VoterIdOnly => "voter_id_only",
            MatchingStrategy::EmailOnly => "email_only",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            MatchingStrategy::VoterIdFirst => {
                "Match by state voter ID; if the row has no voter ID or it matches nobody, fall back to email"
            }
            MatchingStrategy::EmailFirst => {
                "Match by email; if the row has no email or it matches nobody, fall back to state voter ID"
            }
            MatchingStrategy::VoterIdOnly => {
                "Match by state voter ID only; unmatched rows are created or skipped"
            }
            MatchingStrategy::EmailOnly => {
                "Match by email only; unmatched rows are created or skipped"
            }
        }
    }

    /// Identifiers tried in order when resolving a row
    pub fn identifiers(&self) -> &'static [IdentifierKind] {
        match self {
            MatchingStrategy::VoterIdFirst => &[IdentifierKind::VoterId, IdentifierKind::Email],
            MatchingStrategy::EmailFirst => &[IdentifierKind::Email, IdentifierKind::VoterId],
            MatchingStrategy::VoterIdOnly => &[IdentifierKind::VoterId],
            MatchingStrategy::EmailOnly => &[IdentifierKind::Email],
        }
    }

    /// The primary identifier; it must be mapped for the strategy to be usable
    pub fn required_identifier(&self) -> IdentifierKind {
        self.identifiers()[0]
    }

    pub fn from_key(key: &str) -> Option<MatchingStrategy> {
        MatchingStrategy::ALL.into_iter().find(|s| s.key() == key)
    }
}

impl fmt::Display for MatchingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Response for the strategy listing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchingStrategiesResponse {
    pub strategies: std::collections::BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_keys_round_trip() {
        for strategy in MatchingStrategy::ALL {
            assert_eq!(MatchingStrategy::from_key(strategy.key()), Some(strategy));
            let json = serde_json::to_string(&strategy).unwrap();
            assert_eq!(json, format!("\"{}\"", strategy.key()));
        }
    }

    #[test]
    fn test_only_strategies_have_no_fallback() {
        assert_eq!(MatchingStrategy::VoterIdOnly.identifiers().len(), 1);
        assert_eq!(MatchingStrategy::EmailOnly.identifiers().len(), 1);
        assert_eq!(
            MatchingStrategy::EmailFirst.identifiers(),
            &[IdentifierKind::Email, IdentifierKind::VoterId]
        );
    }

    #[test]
    fn test_required_identifier_is_primary() {
        assert_eq!(MatchingStrategy::VoterIdFirst.required_identifier(), IdentifierKind::VoterId);
        assert_eq!(MatchingStrategy::EmailOnly.required_identifier(), IdentifierKind::Email);
    }
}
