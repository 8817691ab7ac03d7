//! Core types for the district atlas.

pub mod layer;
pub mod district;
pub mod provenance;
pub mod finding;

pub use layer::{DistrictType, Jurisdiction, LayerKey, LayerKeyError};
pub use district::NormalizedDistrict;
pub use provenance::{Provenance, ProvenanceBuilder, ProvenanceError, RetrievalMethod};
pub use finding::{Finding, FindingKind, Severity};
