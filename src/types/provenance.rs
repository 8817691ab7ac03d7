//! Source provenance carried by every district.
//!
//! ## Purpose
//!
//! Every leaf in the atlas must be traceable to the portal response it came
//! from. Provenance records where and how the geometry was fetched, and a
//! SHA-256 of the raw response body so the fetch itself can be audited.
//!
//! ## Provenance Components
//!
//! | Component | What It Captures |
//! |-----------|------------------|
//! | **Source URL** | Portal endpoint the features were read from |
//! | **Retrieval method** | ArcGIS REST, GeoJSON download, shapefile, WFS, manual |
//! | **Retrieved at** | Fetch timestamp (second precision in the leaf) |
//! | **HTTP status** | Status code of the fetch |
//! | **Feature count** | Raw number of features in the response |
//! | **Coordinate system** | CRS tag of the source data before reprojection |
//! | **Response hash** | SHA-256 hex of the raw response body |
//!
//! Provenance is hashed into its own digest, separate from the district
//! identity, so a proof can reveal one without the other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// How the source features were retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMethod {
    /// ArcGIS REST FeatureServer / MapServer query.
    ArcgisRest,
    /// Direct GeoJSON download.
    GeojsonDownload,
    /// Zipped shapefile download.
    ShapefileDownload,
    /// OGC Web Feature Service.
    Wfs,
    /// Manually curated file.
    Manual,
}

impl RetrievalMethod {
    /// Wire name of this method.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ArcgisRest => "arcgis_rest",
            Self::GeojsonDownload => "geojson_download",
            Self::ShapefileDownload => "shapefile_download",
            Self::Wfs => "wfs",
            Self::Manual => "manual",
        }
    }
}

/// Provenance of one district record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provenance {
    /// Portal endpoint the features were read from.
    pub source_url: String,
    /// How the features were retrieved.
    pub retrieval_method: RetrievalMethod,
    /// When the fetch happened.
    pub retrieved_at: DateTime<Utc>,
    /// HTTP status of the fetch (0 for non-HTTP sources).
    pub http_status: u16,
    /// Number of features in the raw response.
    pub feature_count: u32,
    /// Coordinate reference system of the source, e.g. `EPSG:2229`.
    pub coordinate_system: String,
    /// SHA-256 hex of the raw response body.
    pub response_hash: String,
}

impl Provenance {
    /// Hash a raw response body the way ingestion must record it.
    pub fn hash_response(body: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(body);
        hex::encode(hasher.finalize())
    }

    /// Fetch time truncated to whole seconds, as committed in the leaf.
    pub fn retrieved_at_secs(&self) -> i64 {
        self.retrieved_at.timestamp()
    }

    /// Check whether two provenances commit to the same leaf digest.
    ///
    /// Sub-second timestamp differences are ignored because the leaf
    /// encoding only carries whole seconds.
    pub fn same_commitment(&self, other: &Self) -> bool {
        self.source_url == other.source_url
            && self.retrieval_method == other.retrieval_method
            && self.retrieved_at_secs() == other.retrieved_at_secs()
            && self.http_status == other.http_status
            && self.feature_count == other.feature_count
            && self.coordinate_system == other.coordinate_system
            && self.response_hash.eq_ignore_ascii_case(&other.response_hash)
    }
}

/// Error when building provenance.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProvenanceError {
    /// Missing required field.
    #[error("Missing required provenance field: {0}")]
    MissingField(String),
    /// Invalid field value.
    #[error("Invalid provenance value for {field}: {reason}")]
    InvalidValue {
        /// Field name.
        field: String,
        /// Reason for invalidity.
        reason: String,
    },
}

/// Builder for constructing provenance.
#[derive(Debug, Default)]
pub struct ProvenanceBuilder {
    source_url: Option<String>,
    retrieval_method: Option<RetrievalMethod>,
    retrieved_at: Option<DateTime<Utc>>,
    http_status: Option<u16>,
    feature_count: Option<u32>,
    coordinate_system: Option<String>,
    response_hash: Option<String>,
}

impl ProvenanceBuilder {
    /// Create a new provenance builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the source endpoint.
    pub fn source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    /// Set the retrieval method.
    pub fn retrieval_method(mut self, method: RetrievalMethod) -> Self {
        self.retrieval_method = Some(method);
        self
    }

    /// Set the fetch timestamp. Defaults to now.
    pub fn retrieved_at(mut self, at: DateTime<Utc>) -> Self {
        self.retrieved_at = Some(at);
        self
    }

    /// Set the HTTP status. Defaults to 200.
    pub fn http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    /// Set the raw feature count.
    pub fn feature_count(mut self, count: u32) -> Self {
        self.feature_count = Some(count);
        self
    }

    /// Set the source coordinate system tag.
    pub fn coordinate_system(mut self, crs: impl Into<String>) -> Self {
        self.coordinate_system = Some(crs.into());
        self
    }

    /// Set the response hash directly.
    pub fn response_hash(mut self, hash: impl Into<String>) -> Self {
        self.response_hash = Some(hash.into());
        self
    }

    /// Hash the raw response body and record it.
    pub fn response_body(mut self, body: &[u8]) -> Self {
        self.response_hash = Some(Provenance::hash_response(body));
        self
    }

    /// Build the provenance.
    pub fn build(self) -> Result<Provenance, ProvenanceError> {
        let source_url = self
            .source_url
            .ok_or_else(|| ProvenanceError::MissingField("source_url".to_string()))?;
        let retrieval_method = self
            .retrieval_method
            .ok_or_else(|| ProvenanceError::MissingField("retrieval_method".to_string()))?;
        let response_hash = self
            .response_hash
            .ok_or_else(|| ProvenanceError::MissingField("response_hash".to_string()))?
            .to_lowercase();

        if response_hash.len() != 64 || !response_hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ProvenanceError::InvalidValue {
                field: "response_hash".to_string(),
                reason: "expected 64 hex characters (SHA-256)".to_string(),
            });
        }

        Ok(Provenance {
            source_url,
            retrieval_method,
            retrieved_at: self.retrieved_at.unwrap_or_else(Utc::now),
            http_status: self.http_status.unwrap_or(200),
            feature_count: self.feature_count.unwrap_or(0),
            coordinate_system: self
                .coordinate_system
                .unwrap_or_else(|| "EPSG:4326".to_string()),
            response_hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_hash_response_is_sha256_hex() {
        let hash = Provenance::hash_response(b"");
        assert_eq!(
            hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_builder_requires_fields() {
        let err = ProvenanceBuilder::new()
            .retrieval_method(RetrievalMethod::ArcgisRest)
            .response_body(b"{}")
            .build()
            .unwrap_err();
        assert_eq!(err, ProvenanceError::MissingField("source_url".to_string()));
    }

    #[test]
    fn test_builder_rejects_bad_hash() {
        let err = ProvenanceBuilder::new()
            .source_url("https://example.gov/arcgis")
            .retrieval_method(RetrievalMethod::ArcgisRest)
            .response_hash("not-a-hash")
            .build()
            .unwrap_err();
        assert!(matches!(err, ProvenanceError::InvalidValue { .. }));
    }

    #[test]
    fn test_same_commitment_ignores_subsecond() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let a = ProvenanceBuilder::new()
            .source_url("https://example.gov/arcgis")
            .retrieval_method(RetrievalMethod::ArcgisRest)
            .retrieved_at(at)
            .response_body(b"payload")
            .build()
            .unwrap();
        let mut b = a.clone();
        b.retrieved_at = at + chrono::Duration::milliseconds(250);
        assert!(a.same_commitment(&b));

        b.http_status = 203;
        assert!(!a.same_commitment(&b));
    }
}
