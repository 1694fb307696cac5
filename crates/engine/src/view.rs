use std::collections::HashSet;
use std::vec;

use wfst_core::{Feature, FeatureId, Filter};

use crate::error::EngineError;
use crate::query::MergedFeatures;
use crate::stager::StagedView;

/// Query result as seen from inside an open transaction: service features
/// with the staged edits applied, followed by staged inserts.
pub struct TransactionFeatures {
    remote: Option<MergedFeatures>,
    staged: StagedView,
    filter: Filter,
    projection: Option<Vec<String>>,
    inserts: Option<vec::IntoIter<Feature>>,
    seen: HashSet<FeatureId>,
    remaining: Option<usize>,
}

impl TransactionFeatures {
    pub(crate) fn new(
        remote: MergedFeatures,
        staged: StagedView,
        filter: Filter,
        projection: Option<Vec<String>>,
    ) -> Self {
        Self {
            remote: Some(remote),
            staged,
            filter,
            projection,
            inserts: None,
            seen: HashSet::new(),
            remaining: None,
        }
    }

    /// Stop after `max` features.
    pub fn with_limit(mut self, max: usize) -> Self {
        self.remaining = Some(max);
        self
    }

    /// Release the remote request and stop yielding.
    pub fn close(&mut self) {
        if let Some(mut remote) = self.remote.take() {
            remote.close();
        }
        self.inserts = Some(Vec::new().into_iter());
    }
}

fn project(projection: Option<&[String]>, mut feature: Feature) -> Feature {
    if let Some(properties) = projection {
        feature.retain_properties(properties);
    }
    feature
}

impl Iterator for TransactionFeatures {
    type Item = Result<Feature, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == Some(0) {
            self.close();
            return None;
        }
        let item = self.next_match()?;
        if let (Ok(_), Some(n)) = (&item, self.remaining.as_mut()) {
            *n -= 1;
        }
        Some(item)
    }
}

impl TransactionFeatures {
    fn next_match(&mut self) -> Option<Result<Feature, EngineError>> {
        while let Some(remote) = self.remote.as_mut() {
            match remote.next() {
                Some(Ok(feature)) => {
                    let Some(feature) = self.staged.apply(feature) else {
                        continue;
                    };
                    if self.filter.evaluate(&feature) && self.seen.insert(feature.id().clone()) {
                        return Some(Ok(project(self.projection.as_deref(), feature)));
                    }
                }
                Some(Err(e)) => {
                    self.close();
                    return Some(Err(e));
                }
                None => self.remote = None,
            }
        }

        let inserts = self
            .inserts
            .get_or_insert_with(|| self.staged.pending_inserts().into_iter());
        for feature in inserts.by_ref() {
            if self.filter.evaluate(&feature) && self.seen.insert(feature.id().clone()) {
                return Some(Ok(project(self.projection.as_deref(), feature)));
            }
        }
        None
    }
}
