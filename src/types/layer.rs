//! Layer identity: jurisdiction paths, district types, and layer keys.
//!
//! A layer is one administrative level inside one jurisdiction. Layer keys
//! order first by jurisdiction path, then by district type, and that order
//! is the order in which layer roots enter the atlas commitment.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Administrative layer a district belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistrictType {
    /// U.S. House districts.
    Congressional,
    /// State senate districts.
    StateUpper,
    /// State house / assembly districts.
    StateLower,
    /// Counties and county equivalents.
    County,
    /// City council districts and wards.
    Municipal,
    /// School board districts.
    School,
    /// Special-purpose districts (water, fire, transit, ...).
    Special,
}

impl DistrictType {
    /// All district types in canonical order.
    pub const ALL: [DistrictType; 7] = [
        Self::Congressional,
        Self::StateUpper,
        Self::StateLower,
        Self::County,
        Self::Municipal,
        Self::School,
        Self::Special,
    ];

    /// Stable numeric code used in the leaf encoding.
    ///
    /// Codes are part of the commitment scheme and must never be reassigned.
    pub fn code(&self) -> u64 {
        match self {
            Self::Congressional => 1,
            Self::StateUpper => 2,
            Self::StateLower => 3,
            Self::County => 4,
            Self::Municipal => 5,
            Self::School => 6,
            Self::Special => 7,
        }
    }

    /// Wire name of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Congressional => "congressional",
            Self::StateUpper => "state_upper",
            Self::StateLower => "state_lower",
            Self::County => "county",
            Self::Municipal => "municipal",
            Self::School => "school",
            Self::Special => "special",
        }
    }

    /// Parse a district type from its wire name.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase().replace('-', "_");
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for DistrictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised for malformed jurisdiction paths or layer keys.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayerKeyError {
    /// The path had no segments.
    #[error("Jurisdiction path is empty")]
    EmptyPath,
    /// A segment contained characters outside the allowed set.
    #[error("Invalid jurisdiction segment: {0:?}")]
    InvalidSegment(String),
    /// The layer key string was not `jurisdiction:type`.
    #[error("Malformed layer key: {0:?}")]
    Malformed(String),
    /// The district type name was not recognized.
    #[error("Unknown district type: {0:?}")]
    UnknownDistrictType(String),
}

fn segment_pattern() -> &'static regex_lite::Regex {
    static PATTERN: OnceLock<regex_lite::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        regex_lite::Regex::new(r"^[a-z0-9][a-z0-9 ._'-]*$").expect("static pattern compiles")
    })
}

/// Hierarchical jurisdiction path, e.g. `us/ca/los angeles`.
///
/// Segments are trimmed and lowercased on construction so that source
/// formatting differences never reach the leaf encoding.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Jurisdiction(Vec<String>);

impl Jurisdiction {
    /// Build a jurisdiction from path segments.
    pub fn new<I, S>(segments: I) -> Result<Self, LayerKeyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let segments: Vec<String> = segments
            .into_iter()
            .map(|s| s.as_ref().trim().to_lowercase())
            .collect();

        if segments.is_empty() {
            return Err(LayerKeyError::EmptyPath);
        }
        for segment in &segments {
            if !segment_pattern().is_match(segment) {
                return Err(LayerKeyError::InvalidSegment(segment.clone()));
            }
        }

        Ok(Self(segments))
    }

    /// Parse a `/`-separated path.
    pub fn parse(path: &str) -> Result<Self, LayerKeyError> {
        Self::new(path.split('/'))
    }

    /// Path segments, outermost first.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Canonical `/`-joined form.
    pub fn as_path(&self) -> String {
        self.0.join("/")
    }
}

impl fmt::Display for Jurisdiction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_path())
    }
}

impl TryFrom<String> for Jurisdiction {
    type Error = LayerKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Jurisdiction> for String {
    fn from(value: Jurisdiction) -> Self {
        value.as_path()
    }
}

/// Key of one layer: a (jurisdiction, district type) pair.
///
/// Serializes as `jurisdiction:type` so it can key JSON maps.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LayerKey {
    /// Jurisdiction the layer partitions.
    pub jurisdiction: Jurisdiction,
    /// Administrative level of the layer.
    pub district_type: DistrictType,
}

impl LayerKey {
    /// Create a new layer key.
    pub fn new(jurisdiction: Jurisdiction, district_type: DistrictType) -> Self {
        Self {
            jurisdiction,
            district_type,
        }
    }

    /// Parse a `jurisdiction:type` string.
    pub fn parse(s: &str) -> Result<Self, LayerKeyError> {
        let (path, kind) = s
            .rsplit_once(':')
            .ok_or_else(|| LayerKeyError::Malformed(s.to_string()))?;
        let district_type = DistrictType::parse(kind)
            .ok_or_else(|| LayerKeyError::UnknownDistrictType(kind.to_string()))?;
        Ok(Self::new(Jurisdiction::parse(path)?, district_type))
    }
}

impl fmt::Display for LayerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.jurisdiction, self.district_type)
    }
}

impl TryFrom<String> for LayerKey {
    type Error = LayerKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<LayerKey> for String {
    fn from(value: LayerKey) -> Self {
        value.to_string()
    }
}
