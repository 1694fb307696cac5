//! Predicates over features.
//!
//! Filters are plain trees: they can be inspected structurally (to decide
//! what a remote service may evaluate, or to split off identity lookups) and
//! evaluated locally against a [`Feature`].

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::feature::Feature;
use crate::field_value::AttributeValue;
use crate::ids::FeatureId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Filter {
    /// Matches every feature.
    Include,
    /// Matches nothing.
    Exclude,
    /// Identifier is one of the listed ids.
    Id(BTreeSet<FeatureId>),
    Compare {
        property: String,
        op: CompareOp,
        value: AttributeValue,
    },
    Between {
        property: String,
        lower: AttributeValue,
        upper: AttributeValue,
    },
    /// SQL-style pattern: `%` matches any run of characters, `_` exactly one.
    Like {
        property: String,
        pattern: String,
    },
    IsNull {
        property: String,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn id(ids: impl IntoIterator<Item = impl Into<FeatureId>>) -> Self {
        Filter::Id(ids.into_iter().map(Into::into).collect())
    }

    pub fn compare(property: impl Into<String>, op: CompareOp, value: impl Into<AttributeValue>) -> Self {
        Filter::Compare {
            property: property.into(),
            op,
            value: value.into(),
        }
    }

    pub fn equals(property: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self::compare(property, CompareOp::Eq, value)
    }

    pub fn like(property: impl Into<String>, pattern: impl Into<String>) -> Self {
        Filter::Like {
            property: property.into(),
            pattern: pattern.into(),
        }
    }

    pub fn and(children: impl IntoIterator<Item = Filter>) -> Self {
        Filter::And(children.into_iter().collect())
    }

    pub fn or(children: impl IntoIterator<Item = Filter>) -> Self {
        Filter::Or(children.into_iter().collect())
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(inner: Filter) -> Self {
        Filter::Not(Box::new(inner))
    }

    pub fn is_include(&self) -> bool {
        matches!(self, Filter::Include)
    }

    pub fn is_exclude(&self) -> bool {
        matches!(self, Filter::Exclude)
    }

    /// True if this filter is an identity filter naming exactly one id.
    pub fn is_single_identity(&self) -> bool {
        self.single_identity().is_some()
    }

    pub fn single_identity(&self) -> Option<&FeatureId> {
        match self {
            Filter::Id(ids) if ids.len() == 1 => ids.iter().next(),
            _ => None,
        }
    }

    pub fn evaluate(&self, feature: &Feature) -> bool {
        match self {
            Filter::Include => true,
            Filter::Exclude => false,
            Filter::Id(ids) => ids.contains(feature.id()),
            Filter::Compare { property, op, value } => match feature.get(property) {
                Some(actual) if !actual.is_null() => compare(actual, *op, value),
                _ => false,
            },
            Filter::Between {
                property,
                lower,
                upper,
            } => match feature.get(property) {
                Some(actual) => {
                    compare(actual, CompareOp::GtEq, lower) && compare(actual, CompareOp::LtEq, upper)
                }
                None => false,
            },
            Filter::Like { property, pattern } => match feature.get(property).and_then(|v| v.as_text()) {
                Some(text) => like_matches(text, pattern),
                None => false,
            },
            Filter::IsNull { property } => feature.get(property).is_none_or(AttributeValue::is_null),
            Filter::And(children) => children.iter().all(|c| c.evaluate(feature)),
            Filter::Or(children) => children.iter().any(|c| c.evaluate(feature)),
            Filter::Not(inner) => !inner.evaluate(feature),
        }
    }

    /// Split this filter into its identity-only component and the rest.
    ///
    /// A bare identity filter yields `(Some(ids), Exclude)`. A disjunction
    /// yields the union of its identity children and the disjunction of the
    /// remaining children. Anything else has no separable identity component
    /// and comes back whole as the remainder.
    pub fn extract_identity_component(&self) -> (Option<Filter>, Filter) {
        match self {
            Filter::Id(ids) => (Some(Filter::Id(ids.clone())), Filter::Exclude),
            Filter::Or(children) => {
                let mut ids = BTreeSet::new();
                let mut rest = Vec::new();
                for child in children {
                    match child {
                        Filter::Id(child_ids) => ids.extend(child_ids.iter().cloned()),
                        other => rest.push(other.clone()),
                    }
                }
                if ids.is_empty() {
                    return (None, self.clone());
                }
                let remainder = match rest.len() {
                    0 => Filter::Exclude,
                    1 => rest.remove(0),
                    _ => Filter::Or(rest),
                };
                (Some(Filter::Id(ids)), remainder)
            }
            other => (None, other.clone()),
        }
    }

    /// Every property name the filter reads.
    pub fn referenced_properties(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_properties(&mut out);
        out
    }

    fn collect_properties(&self, out: &mut BTreeSet<String>) {
        match self {
            Filter::Include | Filter::Exclude | Filter::Id(_) => {}
            Filter::Compare { property, .. }
            | Filter::Between { property, .. }
            | Filter::Like { property, .. }
            | Filter::IsNull { property } => {
                out.insert(property.clone());
            }
            Filter::And(children) | Filter::Or(children) => {
                for child in children {
                    child.collect_properties(out);
                }
            }
            Filter::Not(inner) => inner.collect_properties(out),
        }
    }

    /// Every identity literal anywhere in the tree.
    pub fn identity_literals(&self) -> BTreeSet<FeatureId> {
        let mut out = BTreeSet::new();
        self.collect_ids(&mut out);
        out
    }

    fn collect_ids(&self, out: &mut BTreeSet<FeatureId>) {
        match self {
            Filter::Id(ids) => out.extend(ids.iter().cloned()),
            Filter::And(children) | Filter::Or(children) => {
                for child in children {
                    child.collect_ids(out);
                }
            }
            Filter::Not(inner) => inner.collect_ids(out),
            _ => {}
        }
    }

    /// Copy the tree, passing every identity literal through `map`.
    /// Literals for which `map` returns `None` are kept as they are.
    pub fn map_identities<F>(&self, map: &F) -> Filter
    where
        F: Fn(&FeatureId) -> Option<FeatureId>,
    {
        match self {
            Filter::Id(ids) => Filter::Id(
                ids.iter()
                    .map(|id| map(id).unwrap_or_else(|| id.clone()))
                    .collect(),
            ),
            Filter::And(children) => Filter::And(children.iter().map(|c| c.map_identities(map)).collect()),
            Filter::Or(children) => Filter::Or(children.iter().map(|c| c.map_identities(map)).collect()),
            Filter::Not(inner) => Filter::Not(Box::new(inner.map_identities(map))),
            other => other.clone(),
        }
    }
}

fn compare(actual: &AttributeValue, op: CompareOp, expected: &AttributeValue) -> bool {
    match op {
        CompareOp::Eq => actual == expected,
        CompareOp::NotEq => actual != expected,
        CompareOp::Lt => actual.compare(expected).is_some_and(|o| o.is_lt()),
        CompareOp::LtEq => actual.compare(expected).is_some_and(|o| o.is_le()),
        CompareOp::Gt => actual.compare(expected).is_some_and(|o| o.is_gt()),
        CompareOp::GtEq => actual.compare(expected).is_some_and(|o| o.is_ge()),
    }
}

fn like_matches(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    // matched[j]: pattern[..j] matches the text consumed so far
    let mut matched = vec![false; pattern.len() + 1];
    matched[0] = true;
    for j in 0..pattern.len() {
        if pattern[j] == '%' {
            matched[j + 1] = matched[j];
        }
    }
    for &c in &text {
        let mut next = vec![false; pattern.len() + 1];
        for j in 0..pattern.len() {
            next[j + 1] = match pattern[j] {
                '%' => next[j] || matched[j + 1],
                '_' => matched[j],
                p => matched[j] && p == c,
            };
        }
        matched = next;
    }
    matched[pattern.len()]
}
