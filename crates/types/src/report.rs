// Path: crates/types/src/report.rs
//! Audit reports as held by the backend store.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Identifier assigned to a report by the backend store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportId(pub String);

impl ReportId {
    /// Borrows the identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReportId {
    fn from(s: &str) -> Self {
        ReportId(s.to_string())
    }
}

impl From<String> for ReportId {
    fn from(s: String) -> Self {
        ReportId(s)
    }
}

/// Fixed-size digest of a report artifact, carried verbatim as the ledger
/// payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentFingerprint(String);

impl ContentFingerprint {
    /// Wraps an existing digest string, normalizing surrounding whitespace and
    /// case. A `0x` prefix is kept if present.
    pub fn new(digest: impl AsRef<str>) -> Self {
        Self(digest.as_ref().trim().to_lowercase())
    }

    /// SHA-256 of `bytes`, lowercase hex without prefix (the form the backend
    /// computes over generated PDFs).
    pub fn of(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    /// Borrows the digest string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for an empty digest, which can never be certified.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An audit report. Owned by the backend store; any copy held elsewhere is a
/// transient, possibly stale projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawReport")]
pub struct Report {
    /// Backend identifier.
    pub id: ReportId,
    /// Name of the analysed file.
    pub filename: String,
    /// ISO-8601 analysis timestamp.
    pub timestamp: String,
    /// Digest of the generated report. Absent from listing summaries.
    #[serde(rename = "report_hash_preview")]
    pub content_fingerprint: Option<ContentFingerprint>,
    /// Quality score in `0..=100`.
    pub quality_score: f64,
    /// The backend's cached projection of the ledger certification.
    pub is_certified: bool,
}

impl Report {
    /// The first argument of the ledger certification call: the timestamp, or
    /// the id when no timestamp was recorded.
    pub fn ledger_key(&self) -> &str {
        if self.timestamp.trim().is_empty() {
            self.id.as_str()
        } else {
            &self.timestamp
        }
    }
}

/// Wire shape of a report. The backend has used two names for the
/// fingerprint, and full reports nest the score under `analysis`.
#[derive(Deserialize)]
struct RawReport {
    id: ReportId,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    report_hash_preview: Option<String>,
    #[serde(default)]
    report_hash: Option<String>,
    #[serde(default)]
    quality_score: Option<f64>,
    #[serde(default)]
    analysis: Option<serde_json::Value>,
    #[serde(default)]
    is_certified: bool,
}

impl From<RawReport> for Report {
    fn from(raw: RawReport) -> Self {
        let nested_score = raw
            .analysis
            .as_ref()
            .and_then(|a| a.get("quality_analysis"))
            .and_then(|q| q.get("score"))
            .and_then(|s| s.as_f64());
        Report {
            id: raw.id,
            filename: raw.filename,
            timestamp: raw.timestamp,
            content_fingerprint: raw
                .report_hash_preview
                .or(raw.report_hash)
                .map(ContentFingerprint::new)
                .filter(|f| !f.is_empty()),
            quality_score: raw.quality_score.or(nested_score).unwrap_or(0.0),
            is_certified: raw.is_certified,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn listing_summary_has_no_fingerprint() {
        let report: Report = serde_json::from_value(json!({
            "id": "r-1",
            "filename": "audit.csv",
            "timestamp": "2025-01-02T10:00:00",
            "quality_score": 87,
            "is_certified": false
        }))
        .unwrap();
        assert_eq!(report.id, ReportId::from("r-1"));
        assert_eq!(report.quality_score, 87.0);
        assert!(report.content_fingerprint.is_none());
    }

    #[test]
    fn full_report_reads_legacy_hash_and_nested_score() {
        let report: Report = serde_json::from_value(json!({
            "id": "r-2",
            "filename": "ledger.xlsx",
            "timestamp": "2025-01-02T10:00:00",
            "report_hash": "ABCDEF",
            "analysis": { "quality_analysis": { "score": 64 } }
        }))
        .unwrap();
        assert_eq!(report.content_fingerprint.unwrap().as_str(), "abcdef");
        assert_eq!(report.quality_score, 64.0);
        assert!(!report.is_certified);
    }

    #[test]
    fn preview_hash_wins_over_legacy_name() {
        let report: Report = serde_json::from_value(json!({
            "id": "r-3",
            "report_hash_preview": "0xabc",
            "report_hash": "0xdef"
        }))
        .unwrap();
        assert_eq!(report.content_fingerprint.unwrap().as_str(), "0xabc");
    }

    #[test]
    fn ledger_key_falls_back_to_id() {
        let report: Report = serde_json::from_value(json!({ "id": "r-4" })).unwrap();
        assert_eq!(report.ledger_key(), "r-4");
    }

    #[test]
    fn fingerprint_of_bytes_is_sha256_hex() {
        assert_eq!(
            ContentFingerprint::of(b"").as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
