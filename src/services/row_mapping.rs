//! Row coercion: turns one CSV record into typed contact values and
//! vote-history entries according to the confirmed field mapping.

use std::collections::HashMap;

use chrono::NaiveDate;

use crate::error::{ImportError, ImportResult, RowError};
use crate::services::csv_ingest::detect_vote_history;
use crate::types::{ContactField, ContactValues, ElectionType, Participation, VoteHistoryEntry};

/// What a single column feeds into
#[derive(Debug, Clone, PartialEq)]
enum ColumnTarget {
    Skip,
    Field(ContactField),
    VoteHistory {
        label: String,
        year: i32,
        election_type: ElectionType,
    },
}

/// Coerced content of one data row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedRow {
    pub values: ContactValues,
    pub votes: Vec<VoteHistoryEntry>,
    /// Vote-history cells that were dropped; they never fail the row
    pub vote_issues: Vec<RowError>,
}

/// Column-by-column plan derived from confirmed mappings
#[derive(Debug, Clone)]
pub struct RowMapper {
    headers: Vec<String>,
    targets: Vec<ColumnTarget>,
}

impl RowMapper {
    /// Build a mapper for the analyzed headers.
    ///
    /// Fails when a mapping names an unknown header, when two columns target
    /// the same field (vote history excepted) or when a vote-history column
    /// carries no recognizable election in its header.
    pub fn new(
        headers: &[String],
        mappings: &HashMap<String, Option<ContactField>>,
    ) -> ImportResult<Self> {
        if let Some(unknown) = mappings.keys().find(|h| !headers.contains(h)) {
            return Err(ImportError::InvalidMapping(format!(
                "header '{}' is not present in the file",
                unknown
            )));
        }

        let mut claimed: HashMap<ContactField, &str> = HashMap::new();
        let mut targets = Vec::with_capacity(headers.len());

        for header in headers {
            let target = match mappings.get(header).copied().flatten() {
                None => ColumnTarget::Skip,
                Some(ContactField::VoteHistory) => {
                    let (year, election_type) = detect_vote_history(header).ok_or_else(|| {
                        ImportError::InvalidMapping(format!(
                            "column '{}' has no election year and type in its header",
                            header
                        ))
                    })?;
                    ColumnTarget::VoteHistory {
                        label: header.clone(),
                        year,
                        election_type,
                    }
                }
                Some(field) => {
                    if let Some(other) = claimed.insert(field, header) {
                        return Err(ImportError::InvalidMapping(format!(
                            "columns '{}' and '{}' are both mapped to '{}'",
                            other,
                            header,
                            field.key()
                        )));
                    }
                    ColumnTarget::Field(field)
                }
            };
            targets.push(target);
        }

        Ok(Self {
            headers: headers.to_vec(),
            targets,
        })
    }

    /// Coerce one record; `cells` is aligned with the headers
    pub fn map_row(&self, cells: &[String]) -> Result<MappedRow, RowError> {
        let mut row = MappedRow::default();

        for (idx, target) in self.targets.iter().enumerate() {
            let raw = cells.get(idx).map(|c| c.trim()).unwrap_or("");
            match target {
                ColumnTarget::Skip => {}
                ColumnTarget::Field(field) => {
                    if raw.is_empty() {
                        if field.is_required() {
                            return Err(RowError::MissingRequired(field.key()));
                        }
                        continue;
                    }
                    row.values.set(*field, coerce(*field, raw)?);
                }
                ColumnTarget::VoteHistory {
                    label,
                    year,
                    election_type,
                } => {
                    match parse_participation(label, raw) {
                        Ok(Some(participation)) => row.votes.push(VoteHistoryEntry {
                            election_label: label.clone(),
                            election_year: *year,
                            election_type: *election_type,
                            participation,
                        }),
                        Ok(None) => {}
                        Err(issue) => row.vote_issues.push(issue),
                    }
                }
            }
        }

        Ok(row)
    }

    /// Raw cells keyed by header, stored with row errors
    pub fn raw_data(&self, cells: &[String]) -> HashMap<String, String> {
        self.headers
            .iter()
            .enumerate()
            .map(|(idx, header)| (header.clone(), cells.get(idx).cloned().unwrap_or_default()))
            .collect()
    }
}

/// Normalize a non-empty cell for its target field
pub fn coerce(field: ContactField, raw: &str) -> Result<String, RowError> {
    let invalid = |reason: &'static str| RowError::InvalidValue {
        field: field.key(),
        value: raw.to_string(),
        reason,
    };

    match field {
        ContactField::Email => normalize_email(raw).ok_or_else(|| invalid("not a valid email address")),
        ContactField::Phone | ContactField::MobilePhone => {
            normalize_phone(raw).ok_or_else(|| invalid("expected a 10-digit phone number"))
        }
        ContactField::ZipCode => normalize_zip(raw).ok_or_else(|| invalid("expected a 5 or 9 digit ZIP code")),
        ContactField::DateOfBirth | ContactField::RegistrationDate => parse_date(raw)
            .map(|d| d.format("%Y-%m-%d").to_string())
            .ok_or_else(|| invalid("unrecognized date format")),
        ContactField::State => {
            if raw.len() == 2 && raw.chars().all(|c| c.is_ascii_alphabetic()) {
                Ok(raw.to_ascii_uppercase())
            } else {
                Err(invalid("expected a two-letter state code"))
            }
        }
        _ => Ok(raw.split_whitespace().collect::<Vec<_>>().join(" ")),
    }
}

pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    let (local, domain) = email.split_once('@')?;
    let valid = !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace);
    valid.then_some(email)
}

pub fn normalize_phone(raw: &str) -> Option<String> {
    if !raw
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '(' | ')' | '-' | '.' | '+'))
    {
        return None;
    }
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    let digits = match digits.len() {
        11 if digits.starts_with('1') => digits[1..].to_string(),
        10 => digits,
        _ => return None,
    };
    Some(digits)
}

pub fn normalize_zip(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if !trimmed.chars().all(|c| c.is_ascii_digit() || c == '-' || c == ' ') {
        return None;
    }
    let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
    match digits.len() {
        5 => Some(digits),
        9 => Some(format!("{}-{}", &digits[..5], &digits[5..])),
        _ => None,
    }
}

/// Accepts `YYYY-MM-DD`, `MM/DD/YYYY`, `M/D/YYYY` and `YYYYMMDD`
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.len() == 8 && raw.chars().all(|c| c.is_ascii_digit()) {
        let year = raw[..4].parse().ok()?;
        let month = raw[4..6].parse().ok()?;
        let day = raw[6..].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%m/%d/%Y"))
        .ok()
}

/// Vote-history cell to participation; `None` means no entry
pub fn parse_participation(label: &str, raw: &str) -> Result<Option<Participation>, RowError> {
    let value = raw.trim().to_ascii_uppercase();
    let participation = match value.as_str() {
        "" | "N" | "NO" | "0" => return Ok(None),
        "Y" | "YES" | "X" | "1" | "V" | "VOTED" => Participation::Voted,
        "A" | "AB" | "ABSENTEE" => Participation::Absentee,
        "E" | "EV" | "EARLY" => Participation::Early,
        "P" | "POLLS" => Participation::Polls,
        _ => {
            return Err(RowError::InvalidValue {
                field: ContactField::VoteHistory.key(),
                value: format!("{}={}", label, raw),
                reason: "unrecognized participation code",
            })
        }
    };
    Ok(Some(participation))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn cells(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn mapping(pairs: &[(&str, Option<ContactField>)]) -> HashMap<String, Option<ContactField>> {
        pairs.iter().map(|(h, f)| (h.to_string(), *f)).collect()
    }

    #[test]
    fn test_map_row_coerces_values() {
        let mapper = RowMapper::new(
            &headers(&["Email", "Phone", "Zip", "State", "DOB", "Notes"]),
            &mapping(&[
                ("Email", Some(ContactField::Email)),
                ("Phone", Some(ContactField::Phone)),
                ("Zip", Some(ContactField::ZipCode)),
                ("State", Some(ContactField::State)),
                ("DOB", Some(ContactField::DateOfBirth)),
                ("Notes", None),
            ]),
        )
        .unwrap();

        let row = mapper
            .map_row(&cells(&["Ann@Example.ORG", "1 (555) 123-4567", "123456789", "oh", "2/3/1980", "x"]))
            .unwrap();

        assert_eq!(row.values.get(ContactField::Email), Some("ann@example.org"));
        assert_eq!(row.values.get(ContactField::Phone), Some("5551234567"));
        assert_eq!(row.values.get(ContactField::ZipCode), Some("12345-6789"));
        assert_eq!(row.values.get(ContactField::State), Some("OH"));
        assert_eq!(row.values.get(ContactField::DateOfBirth), Some("1980-02-03"));
        assert_eq!(row.values.0.len(), 5);
    }

    #[test]
    fn test_empty_cells_are_omitted() {
        let mapper = RowMapper::new(
            &headers(&["VoterID", "City"]),
            &mapping(&[("VoterID", Some(ContactField::VoterId)), ("City", Some(ContactField::City))]),
        )
        .unwrap();
        let row = mapper.map_row(&cells(&["V1", "  "])).unwrap();
        assert_eq!(row.values.get(ContactField::City), None);
    }

    #[test]
    fn test_missing_required_field_errors() {
        let mapper = RowMapper::new(
            &headers(&["VoterID", "FirstName"]),
            &mapping(&[
                ("VoterID", Some(ContactField::VoterId)),
                ("FirstName", Some(ContactField::FirstName)),
            ]),
        )
        .unwrap();
        let err = mapper.map_row(&cells(&["V1", ""])).unwrap_err();
        assert_eq!(err, RowError::MissingRequired("first_name"));
    }

    #[test]
    fn test_invalid_email_errors() {
        let mapper = RowMapper::new(
            &headers(&["Email"]),
            &mapping(&[("Email", Some(ContactField::Email))]),
        )
        .unwrap();
        let err = mapper.map_row(&cells(&["not-an-email"])).unwrap_err();
        assert!(matches!(err, RowError::InvalidValue { field: "email", .. }));
    }

    #[test]
    fn test_vote_history_entries() {
        let mapper = RowMapper::new(
            &headers(&["2020_General", "2022 Primary", "GEN2018"]),
            &mapping(&[
                ("2020_General", Some(ContactField::VoteHistory)),
                ("2022 Primary", Some(ContactField::VoteHistory)),
                ("GEN2018", Some(ContactField::VoteHistory)),
            ]),
        )
        .unwrap();

        let row = mapper.map_row(&cells(&["Y", "ab", "N"])).unwrap();
        assert_eq!(row.votes.len(), 2);
        assert_eq!(row.votes[0].participation, Participation::Voted);
        assert_eq!(row.votes[1].election_type, ElectionType::Primary);
        assert_eq!(row.votes[1].participation, Participation::Absentee);
    }

    #[test]
    fn test_unknown_participation_code_is_dropped() {
        let mapper = RowMapper::new(
            &headers(&["Email", "2020_General", "2022_Primary"]),
            &mapping(&[
                ("Email", Some(ContactField::Email)),
                ("2020_General", Some(ContactField::VoteHistory)),
                ("2022_Primary", Some(ContactField::VoteHistory)),
            ]),
        )
        .unwrap();
        let row = mapper.map_row(&cells(&["a@b.com", "maybe", "Y"])).unwrap();
        assert_eq!(row.values.get(ContactField::Email), Some("a@b.com"));
        assert_eq!(row.votes.len(), 1);
        assert_eq!(row.votes[0].election_label, "2022_Primary");
        assert_eq!(row.vote_issues.len(), 1);
        assert!(matches!(row.vote_issues[0], RowError::InvalidValue { field: "vote_history", .. }));
    }

    #[test]
    fn test_duplicate_targets_rejected() {
        let err = RowMapper::new(
            &headers(&["First", "FirstName"]),
            &mapping(&[
                ("First", Some(ContactField::FirstName)),
                ("FirstName", Some(ContactField::FirstName)),
            ]),
        )
        .unwrap_err();
        assert!(matches!(err, ImportError::InvalidMapping(_)));
    }

    #[test]
    fn test_unknown_header_rejected() {
        let err = RowMapper::new(
            &headers(&["Email"]),
            &mapping(&[("Mail", Some(ContactField::Email))]),
        )
        .unwrap_err();
        assert!(matches!(err, ImportError::InvalidMapping(msg) if msg.contains("Mail")));
    }

    #[test]
    fn test_vote_history_needs_election_header() {
        let err = RowMapper::new(
            &headers(&["Voted"]),
            &mapping(&[("Voted", Some(ContactField::VoteHistory))]),
        )
        .unwrap_err();
        assert!(matches!(err, ImportError::InvalidMapping(_)));
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(1980, 2, 3);
        assert_eq!(parse_date("1980-02-03"), expected);
        assert_eq!(parse_date("02/03/1980"), expected);
        assert_eq!(parse_date("2/3/1980"), expected);
        assert_eq!(parse_date("19800203"), expected);
        assert_eq!(parse_date("02/30/1980"), None);
        assert_eq!(parse_date("yesterday"), None);
    }

    #[test]
    fn test_normalizers() {
        assert_eq!(normalize_phone("555.123.4567").as_deref(), Some("5551234567"));
        assert_eq!(normalize_phone("123-4567"), None);
        assert_eq!(normalize_phone("call me"), None);
        assert_eq!(normalize_zip("02139").as_deref(), Some("02139"));
        assert_eq!(normalize_zip("2139"), None);
        assert_eq!(normalize_email("a@b"), None);
        assert_eq!(normalize_email(" A@B.ORG ").as_deref(), Some("a@b.org"));
    }

    #[test]
    fn test_raw_data_keyed_by_header() {
        let mapper = RowMapper::new(&headers(&["A", "B"]), &HashMap::new()).unwrap();
        let data = mapper.raw_data(&cells(&["1"]));
        assert_eq!(data["A"], "1");
        assert_eq!(data["B"], "");
    }
}
