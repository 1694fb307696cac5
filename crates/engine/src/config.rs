use serde::{Deserialize, Serialize};
use tracing::debug;

use wfst_core::ComplianceLevel;

/// Server-family quirks that change how queries are split.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    /// Identity predicates are evaluated exactly; split queries when needed.
    #[default]
    Strict,
    /// The server tolerates filters it cannot fully evaluate; always send a
    /// single query and post-filter locally.
    NonStrict,
    /// The server rejects mixed identity/attribute requests but answers a
    /// single query; always send a single query and post-filter locally.
    MapServer,
}

impl StrategyKind {
    /// Guess the strategy from the capabilities URL.
    pub fn detect(capabilities_url: &str, lenient: bool) -> Self {
        let url = capabilities_url.to_ascii_lowercase();
        let kind = if url.contains("mapserv") {
            StrategyKind::MapServer
        } else if url.contains("geoserver") || lenient {
            StrategyKind::NonStrict
        } else {
            StrategyKind::Strict
        };
        debug!(capabilities_url, ?kind, "detected server strategy");
        kind
    }

    /// Whether queries needing post-processing may be split in two.
    pub fn splits_queries(self) -> bool {
        matches!(self, StrategyKind::Strict)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// How much of a filter the server is trusted to evaluate.
    pub compliance: ComplianceLevel,
    /// Explicit strategy. When unset it is detected from `capabilities_url`.
    pub strategy: Option<StrategyKind>,
    /// Prefer the lenient strategy for servers that are not recognised.
    pub lenient: bool,
    pub capabilities_url: Option<String>,
    /// Upper bound on the features one query yields. `None` is unbounded.
    pub max_features: Option<usize>,
}

impl ClientConfig {
    pub fn with_compliance(compliance: ComplianceLevel) -> Self {
        Self {
            compliance,
            ..Self::default()
        }
    }

    pub fn resolved_strategy(&self) -> StrategyKind {
        match (self.strategy, &self.capabilities_url) {
            (Some(kind), _) => kind,
            (None, Some(url)) => StrategyKind::detect(url, self.lenient),
            (None, None) if self.lenient => StrategyKind::NonStrict,
            (None, None) => StrategyKind::Strict,
        }
    }
}
