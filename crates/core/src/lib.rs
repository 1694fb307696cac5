pub mod action;
pub mod compliance;
pub mod error;
pub mod feature;
pub mod field_value;
pub mod filter;
pub mod ids;

pub use action::Action;
pub use compliance::{CapabilityClassifier, Classification, ComplianceLevel, FilterClassifier};
pub use error::CoreError;
pub use feature::Feature;
pub use field_value::AttributeValue;
pub use filter::{CompareOp, Filter};
pub use ids::FeatureId;
