//! Contact types touched by the voter-file import

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::mapping::ContactField;
use super::matching::IdentifierKind;

/// Election type parsed from a vote-history header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElectionType {
    General,
    Primary,
    PresidentialPrimary,
    Special,
    Runoff,
    Municipal,
}

impl ElectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElectionType::General => "general",
            ElectionType::Primary => "primary",
            ElectionType::PresidentialPrimary => "presidential_primary",
            ElectionType::Special => "special",
            ElectionType::Runoff => "runoff",
            ElectionType::Municipal => "municipal",
        }
    }
}

/// How a voter participated in an election
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Participation {
    Voted,
    Absentee,
    Early,
    Polls,
}

impl Participation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Participation::Voted => "voted",
            Participation::Absentee => "absentee",
            Participation::Early => "early",
            Participation::Polls => "polls",
        }
    }
}

/// One election-participation record attached to a contact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteHistoryEntry {
    /// Source column header, e.g. `2020_General`
    pub election_label: String,
    pub election_year: i32,
    pub election_type: ElectionType,
    pub participation: Participation,
}

/// Coerced attribute values from one import row, keyed by canonical field.
///
/// Only non-empty cells are present, so applying them as an update never
/// erases existing contact data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactValues(pub BTreeMap<ContactField, String>);

impl ContactValues {
    pub fn get(&self, field: ContactField) -> Option<&str> {
        self.0.get(&field).map(String::as_str)
    }

    pub fn set(&mut self, field: ContactField, value: String) {
        self.0.insert(field, value);
    }

    pub fn identifier(&self, kind: IdentifierKind) -> Option<&str> {
        self.get(kind.field())
    }
}

/// Normalized identifier value used for lookups
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchKey {
    pub kind: IdentifierKind,
    pub value: String,
}

impl MatchKey {
    pub fn new(kind: IdentifierKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

/// What the contact store did with a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactResolution {
    Updated { contact_id: Uuid, matched_by: IdentifierKind },
    Created { contact_id: Uuid },
    Unmatched,
}

impl ContactResolution {
    pub fn contact_id(&self) -> Option<Uuid> {
        match self {
            ContactResolution::Updated { contact_id, .. } | ContactResolution::Created { contact_id } => {
                Some(*contact_id)
            }
            ContactResolution::Unmatched => None,
        }
    }
}

/// Contact record as stored
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub voter_id: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Remaining canonical attributes keyed by field key
    pub attributes: BTreeMap<String, String>,
    pub date_of_birth: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    pub fn from_values(tenant_id: Uuid, values: &ContactValues) -> Self {
        let now = Utc::now();
        let mut contact = Self {
            id: Uuid::new_v4(),
            tenant_id,
            voter_id: None,
            email: None,
            first_name: None,
            last_name: None,
            attributes: BTreeMap::new(),
            date_of_birth: None,
            created_at: now,
            updated_at: now,
        };
        contact.apply(values);
        contact
    }

    /// Overwrite attributes with every value present in `values`
    pub fn apply(&mut self, values: &ContactValues) {
        for (field, value) in &values.0 {
            match field {
                ContactField::VoterId => self.voter_id = Some(value.clone()),
                ContactField::Email => self.email = Some(value.clone()),
                ContactField::FirstName => self.first_name = Some(value.clone()),
                ContactField::LastName => self.last_name = Some(value.clone()),
                ContactField::DateOfBirth => {
                    self.date_of_birth = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok();
                }
                ContactField::VoteHistory => {}
                other => {
                    self.attributes.insert(other.key().to_string(), value.clone());
                }
            }
        }
        self.updated_at = Utc::now();
    }

    pub fn identifier(&self, kind: IdentifierKind) -> Option<&str> {
        match kind {
            IdentifierKind::VoterId => self.voter_id.as_deref(),
            IdentifierKind::Email => self.email.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(ContactField, &str)]) -> ContactValues {
        let mut v = ContactValues::default();
        for (field, value) in pairs {
            v.set(*field, value.to_string());
        }
        v
    }

    #[test]
    fn test_contact_from_values_splits_columns() {
        let contact = Contact::from_values(
            Uuid::nil(),
            &values(&[
                (ContactField::VoterId, "V1"),
                (ContactField::City, "Springfield"),
                (ContactField::DateOfBirth, "1980-02-03"),
            ]),
        );
        assert_eq!(contact.voter_id.as_deref(), Some("V1"));
        assert_eq!(contact.attributes.get("city").map(String::as_str), Some("Springfield"));
        assert_eq!(contact.date_of_birth, NaiveDate::from_ymd_opt(1980, 2, 3));
    }

    #[test]
    fn test_apply_keeps_values_missing_from_row() {
        let mut contact = Contact::from_values(
            Uuid::nil(),
            &values(&[(ContactField::FirstName, "Ann"), (ContactField::Email, "ann@example.org")]),
        );
        contact.apply(&values(&[(ContactField::FirstName, "Anne")]));
        assert_eq!(contact.first_name.as_deref(), Some("Anne"));
        assert_eq!(contact.email.as_deref(), Some("ann@example.org"));
    }
}
