// src/extractors/mod.rs
pub mod candidate;
pub mod confidence;
pub mod consolidate;
pub mod fields;
pub mod normalize;
pub mod registry;
pub mod validate;

// Re-export key extraction types for convenience
pub use candidate::{Candidate, CandidateExtractor, Span};
pub use consolidate::{ConsolidatedRecord, Consolidator, FieldValue, Selection};
pub use fields::{Field, FieldDefinition, FieldRule, ValueKind};
pub use normalize::{FieldNormalizer, FiscalWindow, NormalizedValue};
pub use registry::{CompanyIdentity, PatternEntry, PatternRegistry};
pub use validate::{RejectionRecord, ValidCandidate, Validated, Validator};
