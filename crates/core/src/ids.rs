use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

/// Process-wide source of placeholder numbers. Only ever decreases, so a
/// placeholder is never handed out twice while the process lives.
static NEXT_PLACEHOLDER: AtomicI64 = AtomicI64::new(-1);

/// Identifier of a feature, either issued by the remote service or minted
/// locally as a placeholder for an uncommitted insert.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FeatureId(String);

impl FeatureId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh placeholder scoped to `type_name`, e.g. `roads.-3`.
    ///
    /// Server identifiers never carry a negative suffix, so placeholders
    /// cannot collide with them.
    pub fn placeholder(type_name: &str) -> Self {
        let n = NEXT_PLACEHOLDER.fetch_sub(1, Ordering::Relaxed);
        Self(format!("{type_name}.{n}"))
    }

    /// True if this id has the shape produced by [`FeatureId::placeholder`].
    pub fn is_placeholder(&self) -> bool {
        match self.0.rsplit_once('.') {
            Some((_, suffix)) => {
                suffix.starts_with('-')
                    && suffix.len() > 1
                    && suffix[1..].bytes().all(|b| b.is_ascii_digit())
            }
            None => false,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FeatureId({})", self.0)
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FeatureId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for FeatureId {
    fn from(value: String) -> Self {
        Self(value)
    }
}
