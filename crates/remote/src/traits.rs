use wfst_core::{Action, Feature, FeatureId, Filter};

use crate::error::RemoteError;

/// Lazy, single-pass stream of features from one remote request. Dropping it
/// releases the underlying request.
pub type FeatureCursor = Box<dyn Iterator<Item = Result<Feature, RemoteError>> + Send>;

/// The staged actions of one feature type, in the order they are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionBatch {
    pub type_name: String,
    pub actions: Vec<Action>,
}

impl TransactionBatch {
    pub fn new(type_name: impl Into<String>, actions: Vec<Action>) -> Self {
        Self {
            type_name: type_name.into(),
            actions,
        }
    }

    pub fn insert_count(&self) -> usize {
        self.actions.iter().filter(|a| a.is_insert()).count()
    }
}

/// Identifiers the service issued for one batch's inserts, in the order the
/// inserts were sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedIds {
    pub type_name: String,
    pub ids: Vec<FeatureId>,
}

/// A feature service reachable over some transport.
///
/// Calls block until the service answers. Implementations do not retry.
pub trait RemoteService: Send + Sync {
    /// Query features of `type_name` matching `filter`. `properties` limits
    /// the returned attributes; `None` returns all of them.
    fn query(
        &self,
        type_name: &str,
        filter: &Filter,
        properties: Option<&[String]>,
    ) -> Result<FeatureCursor, RemoteError>;

    /// Apply every batch as one atomic transaction.
    fn commit_transaction(
        &self,
        batches: &[TransactionBatch],
    ) -> Result<Vec<AssignedIds>, RemoteError>;
}
