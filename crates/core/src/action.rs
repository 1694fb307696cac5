use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::feature::Feature;
use crate::field_value::AttributeValue;
use crate::filter::Filter;

/// One staged edit against a single feature type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Insert {
        feature: Feature,
    },
    Update {
        filter: Filter,
        changes: Vec<(String, AttributeValue)>,
    },
    Delete {
        filter: Filter,
    },
}

impl Action {
    pub fn insert(feature: Feature) -> Self {
        Self::Insert { feature }
    }

    pub fn update(
        filter: Filter,
        changes: impl IntoIterator<Item = (impl Into<String>, AttributeValue)>,
    ) -> Self {
        Self::Update {
            filter,
            changes: changes.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn delete(filter: Filter) -> Self {
        Self::Delete { filter }
    }

    /// The filter an update or delete selects by; inserts have none.
    pub fn filter(&self) -> Option<&Filter> {
        match self {
            Self::Insert { .. } => None,
            Self::Update { filter, .. } | Self::Delete { filter } => Some(filter),
        }
    }

    pub fn filter_mut(&mut self) -> Option<&mut Filter> {
        match self {
            Self::Insert { .. } => None,
            Self::Update { filter, .. } | Self::Delete { filter } => Some(filter),
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, Self::Insert { .. })
    }

    /// String name of the action kind for logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "Insert",
            Self::Update { .. } => "Update",
            Self::Delete { .. } => "Delete",
        }
    }

    /// Reject actions that could never be sent.
    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            Self::Insert { feature } if feature.id().is_empty() => Err(CoreError::InvalidFeature(
                "inserted feature has no identifier".into(),
            )),
            Self::Update { changes, .. } => {
                match changes.iter().find(|(name, _)| name.is_empty()) {
                    Some(_) => Err(CoreError::InvalidAction(
                        "update names an empty property".into(),
                    )),
                    None => Ok(()),
                }
            }
            _ => Ok(()),
        }
    }
}
