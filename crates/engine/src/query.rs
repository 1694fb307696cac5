//! Queries against services that cannot evaluate every filter.
//!
//! A query is planned once, then executed as at most two remote requests: an
//! identity lookup for the filter's enumerated ids, and a general request
//! for the rest. The results are streamed back as one lazy sequence with
//! duplicates removed.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use wfst_core::{CapabilityClassifier, ComplianceLevel, Feature, FeatureId, Filter, FilterClassifier};
use wfst_remote::{FeatureCursor, RemoteService};

use crate::config::StrategyKind;
use crate::error::EngineError;

/// How one query call will be answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    /// Ids looked up first, on their own. `None` if the query is not split.
    pub identity_filter: Option<Filter>,
    /// What the general request must match. When the query is not split this
    /// is the whole filter.
    pub remainder_filter: Filter,
    /// The part of `remainder_filter` sent to the service.
    pub server_filter: Filter,
    /// Whether features from the general request must be checked against
    /// `remainder_filter` locally.
    pub needs_post_processing: bool,
}

impl QueryPlan {
    fn single(filter: &Filter, server_filter: Filter, needs_post_processing: bool) -> Self {
        Self {
            identity_filter: None,
            remainder_filter: filter.clone(),
            server_filter,
            needs_post_processing,
        }
    }

    pub fn is_split(&self) -> bool {
        self.identity_filter.is_some()
    }

    /// Whether a general request is needed at all.
    pub fn has_general_phase(&self) -> bool {
        !self.remainder_filter.is_exclude()
    }
}

pub struct SplitQueryEngine {
    remote: Arc<dyn RemoteService>,
    classifier: Arc<dyn FilterClassifier>,
    level: ComplianceLevel,
    strategy: StrategyKind,
}

impl SplitQueryEngine {
    pub fn new(remote: Arc<dyn RemoteService>, level: ComplianceLevel) -> Self {
        Self {
            remote,
            classifier: Arc::new(CapabilityClassifier::new()),
            level,
            strategy: StrategyKind::Strict,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn FilterClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn level(&self) -> ComplianceLevel {
        self.level
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    pub fn plan(&self, filter: &Filter) -> QueryPlan {
        self.plan_with(self.classifier.as_ref(), filter)
    }

    /// Plan `filter` using a classifier other than the configured one.
    pub fn plan_with(&self, classifier: &dyn FilterClassifier, filter: &Filter) -> QueryPlan {
        let whole = classifier.classify(filter, self.level);
        if !whole.needs_post_processing || !self.strategy.splits_queries() {
            return QueryPlan::single(filter, whole.server_filter, whole.needs_post_processing);
        }

        let (identity, remainder) = filter.extract_identity_component();
        let Some(identity) = identity else {
            return QueryPlan::single(filter, whole.server_filter, true);
        };

        let rest = classifier.classify(&remainder, self.level);
        QueryPlan {
            identity_filter: Some(identity),
            remainder_filter: remainder,
            server_filter: rest.server_filter,
            needs_post_processing: rest.needs_post_processing,
        }
    }

    pub fn execute(
        &self,
        type_name: &str,
        filter: &Filter,
        properties: Option<&[String]>,
    ) -> Result<MergedFeatures, EngineError> {
        let plan = self.plan(filter);
        self.execute_plan(type_name, &plan, properties)
    }

    /// Start the plan's first request. The general request, if any, is only
    /// issued once the identity lookup has been drained.
    pub fn execute_plan(
        &self,
        type_name: &str,
        plan: &QueryPlan,
        properties: Option<&[String]>,
    ) -> Result<MergedFeatures, EngineError> {
        debug!(
            type_name,
            split = plan.is_split(),
            post_processing = plan.needs_post_processing,
            "executing query plan"
        );

        let general = plan.has_general_phase().then(|| {
            let post_filter = plan.needs_post_processing.then(|| plan.remainder_filter.clone());
            PendingRequest {
                fetch_properties: widen(properties, post_filter.as_ref()),
                server_filter: plan.server_filter.clone(),
                post_filter,
            }
        });

        let mut merged = MergedFeatures {
            remote: Arc::clone(&self.remote),
            type_name: type_name.to_string(),
            phase: Phase::Done,
            seen: HashSet::new(),
            projection: properties.map(<[String]>::to_vec),
            remaining: None,
        };

        merged.phase = match (&plan.identity_filter, general) {
            (Some(identity), general) => Phase::Identity {
                cursor: self.remote.query(type_name, identity, properties)?,
                filter: identity.clone(),
                next: general,
            },
            (None, Some(general)) => merged.open(general)?,
            (None, None) => Phase::Done,
        };
        Ok(merged)
    }
}

/// The properties to fetch so that `post_filter` can be evaluated on the
/// returned features. `None` means all of them.
fn widen(properties: Option<&[String]>, post_filter: Option<&Filter>) -> Option<Vec<String>> {
    let mut fetch = properties?.to_vec();
    if let Some(filter) = post_filter {
        for name in filter.referenced_properties() {
            if !fetch.contains(&name) {
                fetch.push(name);
            }
        }
    }
    Some(fetch)
}

struct PendingRequest {
    server_filter: Filter,
    post_filter: Option<Filter>,
    fetch_properties: Option<Vec<String>>,
}

enum Phase {
    Identity {
        cursor: FeatureCursor,
        filter: Filter,
        next: Option<PendingRequest>,
    },
    General {
        cursor: FeatureCursor,
        post_filter: Option<Filter>,
    },
    Done,
}

/// Lazy, single-pass result of a split query. Each matching feature is
/// yielded once; identity matches come first.
///
/// Dropping or [closing](MergedFeatures::close) the sequence releases the
/// open remote request, and a general request that has not started yet is
/// never issued.
pub struct MergedFeatures {
    remote: Arc<dyn RemoteService>,
    type_name: String,
    phase: Phase,
    seen: HashSet<FeatureId>,
    projection: Option<Vec<String>>,
    remaining: Option<usize>,
}

impl MergedFeatures {
    /// Stop after `max` features, releasing the open request at that point.
    pub fn with_limit(mut self, max: usize) -> Self {
        self.remaining = Some(max);
        if max == 0 {
            self.close();
        }
        self
    }

    pub fn close(&mut self) {
        if !matches!(self.phase, Phase::Done) {
            debug!(type_name = %self.type_name, yielded = self.seen.len(), "query closed early");
        }
        self.phase = Phase::Done;
    }

    pub fn is_done(&self) -> bool {
        matches!(self.phase, Phase::Done)
    }

    fn open(&self, request: PendingRequest) -> Result<Phase, EngineError> {
        let cursor = self.remote.query(
            &self.type_name,
            &request.server_filter,
            request.fetch_properties.as_deref(),
        )?;
        Ok(Phase::General {
            cursor,
            post_filter: request.post_filter,
        })
    }

    fn accept(&mut self, mut feature: Feature) -> Feature {
        self.seen.insert(feature.id().clone());
        if let Some(properties) = &self.projection {
            feature.retain_properties(properties);
        }
        feature
    }
}

impl Iterator for MergedFeatures {
    type Item = Result<Feature, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == Some(0) {
            if !self.is_done() {
                debug!(type_name = %self.type_name, "query reached its feature limit");
                self.phase = Phase::Done;
            }
            return None;
        }
        let item = self.advance()?;
        if let (Ok(_), Some(n)) = (&item, self.remaining.as_mut()) {
            *n -= 1;
        }
        Some(item)
    }
}

impl MergedFeatures {
    fn advance(&mut self) -> Option<Result<Feature, EngineError>> {
        loop {
            let candidate = match &mut self.phase {
                Phase::Done => return None,
                Phase::Identity { cursor, filter, .. } => match cursor.next() {
                    Some(Ok(feature)) if filter.evaluate(&feature) => Some(Ok(feature)),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => Some(Err(e)),
                    None => None,
                },
                Phase::General { cursor, post_filter } => match cursor.next() {
                    Some(Ok(feature)) if post_filter.as_ref().is_none_or(|f| f.evaluate(&feature)) => {
                        Some(Ok(feature))
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => Some(Err(e)),
                    None => None,
                },
            };

            match candidate {
                Some(Ok(feature)) => {
                    if self.seen.contains(feature.id()) {
                        continue;
                    }
                    return Some(Ok(self.accept(feature)));
                }
                Some(Err(e)) => {
                    self.phase = Phase::Done;
                    return Some(Err(e.into()));
                }
                None => {
                    // Release the exhausted cursor before starting the next request.
                    let next = match std::mem::replace(&mut self.phase, Phase::Done) {
                        Phase::Identity { cursor, next, .. } => {
                            drop(cursor);
                            next
                        }
                        _ => None,
                    };
                    let Some(request) = next else {
                        debug!(type_name = %self.type_name, yielded = self.seen.len(), "query exhausted");
                        return None;
                    };
                    match self.open(request) {
                        Ok(phase) => self.phase = phase,
                        Err(e) => return Some(Err(e)),
                    }
                }
            }
        }
    }
}
