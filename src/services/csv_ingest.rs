//! CSV ingestion & header analysis
//!
//! Reads an uploaded voter file, validates it, and extracts what the mapping
//! wizard needs: ordered headers, sample rows, a row count and the columns
//! that look like vote history.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::defaults::ImportSettings;
use crate::error::{ImportError, ImportResult};
use crate::types::ElectionType;

const DELIMITER_CANDIDATES: [u8; 4] = [b',', b';', b'\t', b'|'];
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

static YEAR_FIRST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*((?:19|20)\d{2})[\s_\-.]*([a-z][a-z_\s]*?)\s*$").expect("valid vote history regex")
});

static TYPE_FIRST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*([a-z][a-z_\s]*?)[\s_\-.]*((?:19|20)\d{2})\s*$").expect("valid vote history regex")
});

/// A header recognized as an election-participation column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteHistoryColumn {
    pub header: String,
    pub year: i32,
    pub election_type: ElectionType,
}

/// Parsed view of an uploaded file
#[derive(Debug, Clone)]
pub struct IngestedFile {
    pub headers: Vec<String>,
    pub delimiter: u8,
    pub sample_rows: Vec<Vec<String>>,
    pub total_rows: i64,
    pub vote_history_columns: Vec<VoteHistoryColumn>,
}

/// Reject files above the configured ceiling
pub fn check_size(size: u64, limit: u64) -> ImportResult<()> {
    if size > limit {
        return Err(ImportError::FileTooLarge { size, limit });
    }
    Ok(())
}

/// Decode the file as UTF-8, dropping a leading byte-order mark
pub fn decode(bytes: &[u8]) -> ImportResult<&str> {
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    std::str::from_utf8(body).map_err(|e| {
        ImportError::UnreadableEncoding(format!("invalid byte sequence at offset {}", e.valid_up_to()))
    })
}

/// Pick the delimiter that occurs most often in the header line
pub fn sniff_delimiter(text: &str) -> u8 {
    let header_line = text.lines().next().unwrap_or("");
    let mut counts = [0usize; DELIMITER_CANDIDATES.len()];
    let mut in_quotes = false;

    for byte in header_line.bytes() {
        if byte == b'"' {
            in_quotes = !in_quotes;
            continue;
        }
        if in_quotes {
            continue;
        }
        if let Some(idx) = DELIMITER_CANDIDATES.iter().position(|c| *c == byte) {
            counts[idx] += 1;
        }
    }

    // max_by_key returns the last maximum; iterate reversed so the first candidate wins ties
    DELIMITER_CANDIDATES
        .iter()
        .zip(counts.iter())
        .rev()
        .max_by_key(|(_, count)| **count)
        .map(|(delimiter, _)| *delimiter)
        .unwrap_or(b',')
}

/// Build a reader over decoded file text
pub fn reader(text: &str, delimiter: u8) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes())
}

/// Rows with no content are not data rows
pub fn is_blank(record: &csv::StringRecord) -> bool {
    record.iter().all(|cell| cell.trim().is_empty())
}

/// Record cells padded (or truncated) to the header width
pub fn record_cells(record: &csv::StringRecord, width: usize) -> Vec<String> {
    (0..width)
        .map(|idx| record.get(idx).unwrap_or("").to_string())
        .collect()
}

/// Parse and validate an uploaded file
pub fn ingest(bytes: &[u8], settings: &ImportSettings) -> ImportResult<IngestedFile> {
    check_size(bytes.len() as u64, settings.max_file_bytes)?;
    let text = decode(bytes)?;
    let delimiter = sniff_delimiter(text);
    let mut rdr = reader(text, delimiter);

    let headers: Vec<String> = rdr
        .headers()
        .map_err(|e| ImportError::MalformedFile(format!("unparsable header row: {}", e)))?
        .iter()
        .map(str::to_string)
        .collect();
    validate_headers(&headers)?;

    let mut sample_rows = Vec::with_capacity(settings.sample_rows);
    let mut total_rows: i64 = 0;
    for result in rdr.records() {
        let record = result.map_err(|e| {
            let line = e.position().map(|p| p.line()).unwrap_or_default();
            ImportError::MalformedFile(format!("unparsable record near line {}: {}", line, e))
        })?;
        if is_blank(&record) {
            continue;
        }
        total_rows += 1;
        if sample_rows.len() < settings.sample_rows {
            sample_rows.push(record_cells(&record, headers.len()));
        }
    }

    if total_rows == 0 {
        return Err(ImportError::MalformedFile("file has no data rows".to_string()));
    }

    let vote_history_columns = headers
        .iter()
        .filter_map(|header| {
            detect_vote_history(header).map(|(year, election_type)| VoteHistoryColumn {
                header: header.clone(),
                year,
                election_type,
            })
        })
        .collect();

    Ok(IngestedFile {
        headers,
        delimiter,
        sample_rows,
        total_rows,
        vote_history_columns,
    })
}

fn validate_headers(headers: &[String]) -> ImportResult<()> {
    if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
        return Err(ImportError::MalformedFile("file has no header row".to_string()));
    }
    if let Some(pos) = headers.iter().position(|h| h.is_empty()) {
        return Err(ImportError::MalformedFile(format!("header in column {} is blank", pos + 1)));
    }
    let mut seen = HashSet::new();
    for header in headers {
        if !seen.insert(header.to_lowercase()) {
            return Err(ImportError::MalformedFile(format!("duplicate header '{}'", header)));
        }
    }
    Ok(())
}

/// Recognize election identifiers such as `2020_General`, `GEN2018`,
/// `Primary 2022` or `2016 PP`
pub fn detect_vote_history(header: &str) -> Option<(i32, ElectionType)> {
    let (year, token) = if let Some(caps) = YEAR_FIRST.captures(header) {
        (caps.get(1)?.as_str(), caps.get(2)?.as_str())
    } else if let Some(caps) = TYPE_FIRST.captures(header) {
        (caps.get(2)?.as_str(), caps.get(1)?.as_str())
    } else {
        return None;
    };

    let election_type = election_type_from_token(token)?;
    Some((year.parse().ok()?, election_type))
}

fn election_type_from_token(token: &str) -> Option<ElectionType> {
    let compact: String = token
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_lowercase();
    let compact = compact.strip_suffix("election").unwrap_or(&compact);

    match compact {
        "general" | "gen" | "ge" | "g" => Some(ElectionType::General),
        "primary" | "prim" | "pri" | "pr" | "p" => Some(ElectionType::Primary),
        "presidentialprimary" | "presprimary" | "pp" | "ppp" => Some(ElectionType::PresidentialPrimary),
        "special" | "spec" | "sp" | "s" => Some(ElectionType::Special),
        "runoff" | "run" | "ro" | "r" => Some(ElectionType::Runoff),
        "municipal" | "muni" | "mun" | "local" | "m" => Some(ElectionType::Municipal),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ImportSettings {
        ImportSettings::default()
    }

    #[test]
    fn test_ingest_reads_headers_samples_and_count() {
        let csv = "VoterID,Email,FirstName,2020_General\nV1,a@x.org,Ann,Y\nV2,,Bob,\n\nV3,c@x.org,Cy,A\n";
        let file = ingest(csv.as_bytes(), &settings()).unwrap();

        assert_eq!(file.headers, vec!["VoterID", "Email", "FirstName", "2020_General"]);
        assert_eq!(file.total_rows, 3);
        assert_eq!(file.sample_rows[1], vec!["V2", "", "Bob", ""]);
        assert_eq!(file.vote_history_columns.len(), 1);
        assert_eq!(file.vote_history_columns[0].year, 2020);
        assert_eq!(file.vote_history_columns[0].election_type, ElectionType::General);
    }

    #[test]
    fn test_ingest_pads_short_rows() {
        let csv = "a,b,c\n1\n";
        let file = ingest(csv.as_bytes(), &settings()).unwrap();
        assert_eq!(file.sample_rows[0], vec!["1", "", ""]);
    }

    #[test]
    fn test_ingest_header_only_is_malformed() {
        let err = ingest(b"VoterID,Email\n", &settings()).unwrap_err();
        assert!(matches!(err, ImportError::MalformedFile(_)));
    }

    #[test]
    fn test_ingest_empty_file_is_malformed() {
        let err = ingest(b"", &settings()).unwrap_err();
        assert!(matches!(err, ImportError::MalformedFile(_)));
    }

    #[test]
    fn test_ingest_duplicate_headers_are_malformed() {
        let err = ingest(b"Email,email\na,b\n", &settings()).unwrap_err();
        assert!(matches!(err, ImportError::MalformedFile(msg) if msg.contains("duplicate")));
    }

    #[test]
    fn test_ingest_blank_header_is_malformed() {
        let err = ingest(b"Email,,Name\na,b,c\n", &settings()).unwrap_err();
        assert!(matches!(err, ImportError::MalformedFile(msg) if msg.contains("column 2")));
    }

    #[test]
    fn test_ingest_rejects_oversized_file() {
        let settings = ImportSettings {
            max_file_bytes: 10,
            ..ImportSettings::default()
        };
        let err = ingest(b"VoterID,Email\nV1,a@x.org\n", &settings).unwrap_err();
        assert!(matches!(err, ImportError::FileTooLarge { limit: 10, .. }));
    }

    #[test]
    fn test_ingest_rejects_invalid_utf8() {
        let bytes = b"Name\n\xff\xfe\n";
        let err = ingest(bytes, &settings()).unwrap_err();
        assert!(matches!(err, ImportError::UnreadableEncoding(_)));
    }

    #[test]
    fn test_ingest_strips_bom() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice(b"VoterID;Email\nV1;a@x.org\n");
        let file = ingest(&bytes, &settings()).unwrap();
        assert_eq!(file.headers[0], "VoterID");
        assert_eq!(file.delimiter, b';');
    }

    #[test]
    fn test_sniff_delimiter() {
        assert_eq!(sniff_delimiter("a,b,c\n1,2,3"), b',');
        assert_eq!(sniff_delimiter("a;b;c"), b';');
        assert_eq!(sniff_delimiter("a\tb\tc"), b'\t');
        assert_eq!(sniff_delimiter("\"last, first\"|city|zip"), b'|');
        assert_eq!(sniff_delimiter("single"), b',');
    }

    #[test]
    fn test_sniff_delimiter_prefers_comma_on_tie() {
        assert_eq!(sniff_delimiter("a,b;c"), b',');
    }

    #[test]
    fn test_detect_vote_history_patterns() {
        assert_eq!(detect_vote_history("2020_General"), Some((2020, ElectionType::General)));
        assert_eq!(detect_vote_history("GEN2018"), Some((2018, ElectionType::General)));
        assert_eq!(detect_vote_history("Primary 2022"), Some((2022, ElectionType::Primary)));
        assert_eq!(detect_vote_history("2016 PP"), Some((2016, ElectionType::PresidentialPrimary)));
        assert_eq!(detect_vote_history("2019-Municipal"), Some((2019, ElectionType::Municipal)));
        assert_eq!(
            detect_vote_history("2021 Special Election"),
            Some((2021, ElectionType::Special))
        );
    }

    #[test]
    fn test_detect_vote_history_ignores_other_headers() {
        assert_eq!(detect_vote_history("VoterID"), None);
        assert_eq!(detect_vote_history("Zip2020"), None);
        assert_eq!(detect_vote_history("Email"), None);
        assert_eq!(detect_vote_history("2020"), None);
    }
}
