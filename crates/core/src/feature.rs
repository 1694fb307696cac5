use serde::{Deserialize, Serialize};

use crate::field_value::AttributeValue;
use crate::ids::FeatureId;

/// One record of a feature type: an identifier plus attribute values in
/// declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    id: FeatureId,
    attributes: Vec<(String, AttributeValue)>,
}

impl Feature {
    pub fn new(id: FeatureId) -> Self {
        Self {
            id,
            attributes: Vec::new(),
        }
    }

    pub fn with_attributes(
        id: FeatureId,
        attributes: impl IntoIterator<Item = (impl Into<String>, AttributeValue)>,
    ) -> Self {
        let mut feature = Self::new(id);
        for (name, value) in attributes {
            feature.set(name, value);
        }
        feature
    }

    pub fn id(&self) -> &FeatureId {
        &self.id
    }

    pub fn attributes(&self) -> &[(String, AttributeValue)] {
        &self.attributes
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Set an attribute, replacing the existing value in place or appending
    /// a new attribute at the end.
    pub fn set(&mut self, name: impl Into<String>, value: AttributeValue) {
        let name = name.into();
        match self.attributes.iter_mut().find(|(key, _)| *key == name) {
            Some((_, slot)) => *slot = value,
            None => self.attributes.push((name, value)),
        }
    }

    /// Apply a set of property changes, as carried by an update action.
    pub fn apply_changes(&mut self, changes: &[(String, AttributeValue)]) {
        for (name, value) in changes {
            self.set(name.clone(), value.clone());
        }
    }

    /// Drop every attribute not named in `properties`.
    pub fn retain_properties(&mut self, properties: &[String]) {
        self.attributes
            .retain(|(key, _)| properties.iter().any(|p| p == key));
    }
}
