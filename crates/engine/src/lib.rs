pub mod config;
pub mod error;
pub mod query;
pub mod rewriter;
pub mod stager;
pub mod view;

pub use config::{ClientConfig, StrategyKind};
pub use error::EngineError;
pub use query::{MergedFeatures, QueryPlan, SplitQueryEngine};
pub use rewriter::IdentifierMap;
pub use stager::{CommitSummary, StagedView, TransactionStager, combine_actions};
pub use view::TransactionFeatures;

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use wfst_core::{
    Action, AttributeValue, CapabilityClassifier, ComplianceLevel, Feature, FeatureId, Filter,
    FilterClassifier,
};
use wfst_remote::RemoteService;

/// Client-side view of one feature service connection: staged edits, the
/// identifiers learned from past commits, and queries.
///
/// All staging operations and commits take one lock, so a commit never
/// observes a half-staged log. Queries only take the identifier map's read
/// lock.
pub struct DataStore {
    remote: Arc<dyn RemoteService>,
    queries: SplitQueryEngine,
    stager: Mutex<TransactionStager>,
    ids: RwLock<IdentifierMap>,
    max_features: Option<usize>,
}

impl DataStore {
    pub fn new(remote: Arc<dyn RemoteService>, config: &ClientConfig) -> Self {
        let strategy = config.resolved_strategy();
        debug!(compliance = ?config.compliance, ?strategy, "opening data store");
        Self {
            queries: SplitQueryEngine::new(Arc::clone(&remote), config.compliance).with_strategy(strategy),
            remote,
            stager: Mutex::new(TransactionStager::new()),
            ids: RwLock::new(IdentifierMap::new()),
            max_features: config.max_features,
        }
    }

    /// Use `classifier` instead of the built-in capability rules for
    /// ordinary queries.
    pub fn with_classifier(mut self, classifier: Arc<dyn FilterClassifier>) -> Self {
        self.queries = self.queries.with_classifier(classifier);
        self
    }

    pub fn compliance(&self) -> ComplianceLevel {
        self.queries.level()
    }

    pub fn strategy(&self) -> StrategyKind {
        self.queries.strategy()
    }

    pub fn max_features(&self) -> Option<usize> {
        self.max_features
    }

    // ========================================================================
    // Staging
    // ========================================================================

    /// Stage a new feature and return the placeholder id it is known by
    /// until (and after) commit.
    pub fn insert(
        &self,
        type_name: &str,
        attributes: impl IntoIterator<Item = (impl Into<String>, AttributeValue)>,
    ) -> Result<FeatureId, EngineError> {
        let mut stager = self.stager.lock();
        let id = stager.next_placeholder_id(type_name)?;
        let feature = Feature::with_attributes(id.clone(), attributes);
        stager.stage(type_name, Action::insert(feature))?;
        Ok(id)
    }

    pub fn update(
        &self,
        type_name: &str,
        filter: Filter,
        changes: impl IntoIterator<Item = (impl Into<String>, AttributeValue)>,
    ) -> Result<(), EngineError> {
        self.stage(type_name, Action::update(filter, changes))
    }

    pub fn delete(&self, type_name: &str, filter: Filter) -> Result<(), EngineError> {
        self.stage(type_name, Action::delete(filter))
    }

    pub fn stage(&self, type_name: &str, action: Action) -> Result<(), EngineError> {
        self.stager.lock().stage(type_name, action)?;
        Ok(())
    }

    pub fn next_placeholder_id(&self, type_name: &str) -> Result<FeatureId, EngineError> {
        Ok(self.stager.lock().next_placeholder_id(type_name)?)
    }

    /// Reorder and collapse the staged logs now rather than at commit.
    pub fn combine(&self) {
        self.stager.lock().combine();
    }

    pub fn staged_actions(&self, type_name: &str) -> Vec<Action> {
        self.stager.lock().actions(type_name).to_vec()
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.stager.lock().is_empty()
    }

    /// Send everything staged as one remote transaction.
    ///
    /// On failure the staged edits are kept and can be committed again or
    /// rolled back.
    pub fn commit(&self) -> Result<CommitSummary, EngineError> {
        self.stager.lock().commit(self.remote.as_ref(), &self.ids)
    }

    pub fn rollback(&self) {
        self.stager.lock().rollback();
    }

    // ========================================================================
    // Identifiers
    // ========================================================================

    /// Copy of `filter` with committed placeholders replaced by real ids.
    pub fn rewrite_filter(&self, type_name: &str, filter: &Filter) -> Filter {
        self.ids.read().rewrite(type_name, filter)
    }

    /// The id the service knows `id` by. Ids with no mapping are returned
    /// unchanged.
    pub fn resolve_id(&self, type_name: &str, id: &FeatureId) -> FeatureId {
        self.ids.read().resolve(type_name, id).cloned().unwrap_or_else(|| id.clone())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn plan(&self, type_name: &str, filter: &Filter) -> QueryPlan {
        self.queries.plan(&self.rewrite_filter(type_name, filter))
    }

    /// Query committed service state. Placeholders from earlier commits may
    /// be used in `filter`.
    pub fn query(
        &self,
        type_name: &str,
        filter: &Filter,
        properties: Option<&[String]>,
    ) -> Result<MergedFeatures, EngineError> {
        let filter = self.rewrite_filter(type_name, filter);
        let merged = self.queries.execute(type_name, &filter, properties)?;
        Ok(match self.max_features {
            Some(max) => merged.with_limit(max),
            None => merged,
        })
    }

    /// Query the state the service would hold if the staged edits were
    /// committed now.
    pub fn query_in_transaction(
        &self,
        type_name: &str,
        filter: &Filter,
        properties: Option<&[String]>,
    ) -> Result<TransactionFeatures, EngineError> {
        let filter = self.rewrite_filter(type_name, filter);
        let staged = {
            let stager = self.stager.lock();
            stager.view(type_name, &self.ids.read())
        };

        // Projection happens after the full filter is re-evaluated below.
        let merged = if staged.is_empty() {
            self.queries.execute(type_name, &filter, None)?
        } else {
            // Staged edits may read or write any property, so fetch them all.
            let classifier = CapabilityClassifier::with_local_properties(staged.modified_properties());
            let mut plan = self.queries.plan_with(&classifier, &filter);
            // Matching is decided after the staged edits are applied.
            plan.needs_post_processing = false;
            self.queries.execute_plan(type_name, &plan, None)?
        };

        // The cap counts features after staged edits are applied.
        let features = TransactionFeatures::new(merged, staged, filter, properties.map(<[String]>::to_vec));
        Ok(match self.max_features {
            Some(max) => features.with_limit(max),
            None => features,
        })
    }
}
