use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::filter::Filter;

/// How complex a filter the remote service is trusted to evaluate.
///
/// - `None`: nothing; every filter is evaluated locally.
/// - `Low`: identity filters and simple comparisons.
/// - `Medium`: additionally `And`/`Or`/`Not` over supported children.
/// - `High`: additionally `Between`, `Like` and `IsNull`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ComplianceLevel {
    None,
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// The part of the filter sent to the server.
    pub server_filter: Filter,
    /// Whether returned features must still be checked against the full
    /// filter locally.
    pub needs_post_processing: bool,
}

impl Classification {
    pub fn fully_remote(filter: Filter) -> Self {
        Self {
            server_filter: filter,
            needs_post_processing: false,
        }
    }
}

pub trait FilterClassifier: Send + Sync {
    fn classify(&self, filter: &Filter, level: ComplianceLevel) -> Classification;
}

/// Classifier driven by the compliance level alone, optionally treating a set
/// of properties as locally modified. Comparisons on those properties are
/// never sent to the server because its copy of the values is stale.
#[derive(Debug, Clone, Default)]
pub struct CapabilityClassifier {
    local_properties: BTreeSet<String>,
}

impl CapabilityClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_local_properties(local_properties: BTreeSet<String>) -> Self {
        Self { local_properties }
    }

    fn supported(&self, filter: &Filter, level: ComplianceLevel) -> bool {
        match filter {
            Filter::Include | Filter::Exclude => true,
            Filter::Id(_) => level >= ComplianceLevel::Low,
            Filter::Compare { property, .. } => {
                level >= ComplianceLevel::Low && !self.local_properties.contains(property)
            }
            Filter::Between { property, .. }
            | Filter::Like { property, .. }
            | Filter::IsNull { property } => {
                level >= ComplianceLevel::High && !self.local_properties.contains(property)
            }
            Filter::And(children) | Filter::Or(children) => {
                level >= ComplianceLevel::Medium && children.iter().all(|c| self.supported(c, level))
            }
            Filter::Not(inner) => level >= ComplianceLevel::Medium && self.supported(inner, level),
        }
    }
}

impl FilterClassifier for CapabilityClassifier {
    fn classify(&self, filter: &Filter, level: ComplianceLevel) -> Classification {
        if self.supported(filter, level) {
            return Classification::fully_remote(filter.clone());
        }

        // A conjunction can still be narrowed remotely by its supported terms.
        let server_filter = match filter {
            Filter::And(children) => {
                let mut kept: Vec<Filter> = children
                    .iter()
                    .filter(|c| self.supported(c, level))
                    .cloned()
                    .collect();
                match kept.len() {
                    0 => Filter::Include,
                    1 => kept.remove(0),
                    _ if level >= ComplianceLevel::Medium => Filter::And(kept),
                    _ => kept.remove(0),
                }
            }
            _ => Filter::Include,
        };

        Classification {
            server_filter,
            needs_post_processing: true,
        }
    }
}
