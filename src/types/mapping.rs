//! Field mapping types: the canonical contact field dictionary and the
//! per-header suggestions produced during analysis.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::matching::MatchingStrategy;

/// Canonical contact field a CSV column can be mapped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactField {
    VoterId,
    Email,
    FirstName,
    MiddleName,
    LastName,
    NameSuffix,
    Phone,
    MobilePhone,
    AddressLine1,
    AddressLine2,
    City,
    State,
    ZipCode,
    County,
    Precinct,
    CongressionalDistrict,
    StateSenateDistrict,
    StateHouseDistrict,
    Party,
    DateOfBirth,
    Gender,
    RegistrationDate,
    VoterStatus,
    VoteHistory,
}

impl ContactField {
    /// Dictionary order; also the final tie-breaker for suggestions
    pub const ALL: [ContactField; 24] = [
        ContactField::VoterId,
        ContactField::Email,
        ContactField::FirstName,
        ContactField::MiddleName,
        ContactField::LastName,
        ContactField::NameSuffix,
        ContactField::Phone,
        ContactField::MobilePhone,
        ContactField::AddressLine1,
        ContactField::AddressLine2,
        ContactField::City,
        ContactField::State,
        ContactField::ZipCode,
        ContactField::County,
        ContactField::Precinct,
        ContactField::CongressionalDistrict,
        ContactField::StateSenateDistrict,
        ContactField::StateHouseDistrict,
        ContactField::Party,
        ContactField::DateOfBirth,
        ContactField::Gender,
        ContactField::RegistrationDate,
        ContactField::VoterStatus,
        ContactField::VoteHistory,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            ContactField::VoterId => "voter_id",
            ContactField::Email => "email",
            ContactField::FirstName => "first_name",
            ContactField::MiddleName => "middle_name",
            ContactField::LastName => "last_name",
            ContactField::NameSuffix => "name_suffix",
            ContactField::Phone => "phone",
            ContactField::MobilePhone => "mobile_phone",
            ContactField::AddressLine1 => "address_line1",
            ContactField::AddressLine2 => "address_line2",
            ContactField::City => "city",
            ContactField::State => "state",
            ContactField::ZipCode => "zip_code",
            ContactField::County => "county",
            ContactField::Precinct => "precinct",
            ContactField::CongressionalDistrict => "congressional_district",
            ContactField::StateSenateDistrict => "state_senate_district",
            ContactField::StateHouseDistrict => "state_house_district",
            ContactField::Party => "party",
            ContactField::DateOfBirth => "date_of_birth",
            ContactField::Gender => "gender",
            ContactField::RegistrationDate => "registration_date",
            ContactField::VoterStatus => "voter_status",
            ContactField::VoteHistory => "vote_history",
        }
    }

    /// Header spellings commonly found in state voter files and CRM exports
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            ContactField::VoterId => &[
                "voterid", "voter_id", "state_voter_id", "sos_voterid", "voter_reg_num",
                "registration_number", "voter_number", "statevoterid", "vuid", "lalvoterid",
            ],
            ContactField::Email => &["email", "email_address", "e_mail", "emailaddress", "mail"],
            ContactField::FirstName => &["first_name", "firstname", "first", "given_name", "fname"],
            ContactField::MiddleName => &["middle_name", "middlename", "middle", "mname", "middle_initial"],
            ContactField::LastName => &["last_name", "lastname", "last", "surname", "family_name", "lname"],
            ContactField::NameSuffix => &["suffix", "name_suffix", "namesuffix"],
            ContactField::Phone => &["phone", "phone_number", "telephone", "home_phone", "landline"],
            ContactField::MobilePhone => &["mobile", "mobile_phone", "cell", "cell_phone", "cellphone"],
            ContactField::AddressLine1 => &[
                "address", "address1", "address_line1", "street", "street_address",
                "residential_address", "res_address",
            ],
            ContactField::AddressLine2 => &["address2", "address_line2", "apt", "unit", "apartment"],
            ContactField::City => &["city", "town", "res_city", "residential_city"],
            ContactField::State => &["state", "st", "res_state"],
            ContactField::ZipCode => &["zip", "zip_code", "zipcode", "postal_code", "zip5", "res_zip"],
            ContactField::County => &["county", "county_name", "countyname"],
            ContactField::Precinct => &["precinct", "precinct_name", "precinct_code", "ward_precinct"],
            ContactField::CongressionalDistrict => &["congressional_district", "cd", "us_house", "congress"],
            ContactField::StateSenateDistrict => &["state_senate", "senate_district", "sd", "state_senate_district"],
            ContactField::StateHouseDistrict => &[
                "state_house", "house_district", "hd", "state_house_district", "assembly_district",
            ],
            ContactField::Party => &["party", "party_affiliation", "party_code", "political_party"],
            ContactField::DateOfBirth => &["dob", "date_of_birth", "birth_date", "birthdate", "birthday"],
            ContactField::Gender => &["gender", "sex"],
            ContactField::RegistrationDate => &["registration_date", "reg_date", "date_registered", "regdate"],
            ContactField::VoterStatus => &["voter_status", "status", "registration_status"],
            ContactField::VoteHistory => &["vote_history"],
        }
    }

    /// Fields that must be non-empty in every row when they are mapped
    pub fn is_required(&self) -> bool {
        matches!(self, ContactField::FirstName | ContactField::LastName)
    }

    pub fn from_key(key: &str) -> Option<ContactField> {
        ContactField::ALL.into_iter().find(|f| f.key() == key)
    }
}

/// Suggested (or confirmed) mapping for a single CSV header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMapping {
    pub header: String,
    /// `None` = no match found / column skipped
    pub field: Option<ContactField>,
    /// Informational only; never blocks confirmation
    pub confidence: f64,
    pub reason: String,
    pub is_vote_history: bool,
}

/// Result of analyzing an uploaded file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub headers: Vec<String>,
    pub suggested_mappings: HashMap<String, FieldMapping>,
    pub vote_history_columns: Vec<String>,
    pub suggested_matching_strategy: MatchingStrategy,
    pub matching_strategy_reason: String,
    pub total_rows: i64,
    pub delimiter: char,
    pub sample_rows: Vec<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_keys_round_trip() {
        for field in ContactField::ALL {
            assert_eq!(ContactField::from_key(field.key()), Some(field));
        }
    }

    #[test]
    fn test_field_serializes_as_key() {
        for field in ContactField::ALL {
            let json = serde_json::to_string(&field).unwrap();
            assert_eq!(json, format!("\"{}\"", field.key()));
        }
    }

    #[test]
    fn test_null_field_deserializes_as_skip() {
        let mapping: HashMap<String, Option<ContactField>> =
            serde_json::from_str(r#"{"Notes": null, "Email": "email"}"#).unwrap();
        assert_eq!(mapping["Notes"], None);
        assert_eq!(mapping["Email"], Some(ContactField::Email));
    }

    #[test]
    fn test_only_names_are_required() {
        let required: Vec<_> = ContactField::ALL.into_iter().filter(|f| f.is_required()).collect();
        assert_eq!(required, vec![ContactField::FirstName, ContactField::LastName]);
    }
}
