use std::collections::{BTreeMap, BTreeSet};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use wfst_core::{Action, CoreError, Feature, FeatureId, Filter};
use wfst_remote::{AssignedIds, RemoteService, TransactionBatch};

use crate::error::EngineError;
use crate::rewriter::IdentifierMap;

/// Outcome of a successful commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// Placeholder → real id pairs published by this commit, per type.
    pub assigned: BTreeMap<String, Vec<(FeatureId, FeatureId)>>,
    /// Number of actions actually sent, per type.
    pub sent: BTreeMap<String, usize>,
}

impl CommitSummary {
    pub fn real_id(&self, type_name: &str, placeholder: &FeatureId) -> Option<&FeatureId> {
        self.assigned
            .get(type_name)?
            .iter()
            .find(|(p, _)| p == placeholder)
            .map(|(_, real)| real)
    }
}

/// Buffers the edits of one logical transaction, per feature type, until
/// they are committed or rolled back.
#[derive(Debug, Default)]
pub struct TransactionStager {
    logs: BTreeMap<String, Vec<Action>>,
}

impl TransactionStager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&mut self, type_name: &str, action: Action) -> Result<(), CoreError> {
        if type_name.is_empty() {
            return Err(CoreError::InvalidTypeName(type_name.to_string()));
        }
        action.validate()?;
        debug!(type_name, kind = action.kind_name(), "staged action");
        self.logs.entry(type_name.to_string()).or_default().push(action);
        Ok(())
    }

    /// A placeholder id for a feature about to be inserted into `type_name`.
    pub fn next_placeholder_id(&self, type_name: &str) -> Result<FeatureId, CoreError> {
        if type_name.is_empty() {
            return Err(CoreError::InvalidTypeName(type_name.to_string()));
        }
        Ok(FeatureId::placeholder(type_name))
    }

    pub fn actions(&self, type_name: &str) -> &[Action] {
        self.logs.get(type_name).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.values().all(Vec::is_empty)
    }

    /// Reorder and collapse every type's log in place.
    pub fn combine(&mut self) {
        for (type_name, actions) in self.logs.iter_mut() {
            let before = actions.len();
            combine_actions(actions);
            debug!(%type_name, before, after = actions.len(), "combined log");
        }
        self.logs.retain(|_, actions| !actions.is_empty());
    }

    /// Discard everything staged, without contacting the service.
    pub fn rollback(&mut self) {
        let discarded: usize = self.logs.values().map(Vec::len).sum();
        self.logs.clear();
        debug!(discarded, "rolled back staged actions");
    }

    /// The batches a commit would send right now: each log combined, with
    /// identity literals resolved through `ids`. The staged logs themselves
    /// are left as they are.
    pub fn prepare_batches(&self, ids: &IdentifierMap) -> Vec<TransactionBatch> {
        let mut batches = Vec::new();
        for (type_name, actions) in &self.logs {
            let mut combined = actions.clone();
            combine_actions(&mut combined);
            if combined.is_empty() {
                continue;
            }
            for action in combined.iter_mut() {
                if let Some(filter) = action.filter_mut() {
                    *filter = ids.rewrite(type_name, filter);
                }
            }
            batches.push(TransactionBatch::new(type_name.clone(), combined));
        }
        batches
    }

    /// Send the combined logs as one remote transaction and publish the
    /// identifiers the service assigned.
    ///
    /// On any failure the staged logs are left exactly as they were and no
    /// mapping is recorded, so the same edits can be committed again.
    pub fn commit(
        &mut self,
        remote: &dyn RemoteService,
        ids: &RwLock<IdentifierMap>,
    ) -> Result<CommitSummary, EngineError> {
        let batches = self.prepare_batches(&ids.read());
        if batches.is_empty() {
            self.logs.clear();
            return Ok(CommitSummary::default());
        }

        let assigned = remote.commit_transaction(&batches).inspect_err(|e| {
            warn!(error = %e, batches = batches.len(), "commit failed, staged actions kept");
        })?;
        let pairs = match_assigned_ids(&batches, &assigned).inspect_err(|e| {
            warn!(error = %e, "commit response rejected, staged actions kept");
        })?;

        let mut summary = CommitSummary::default();
        {
            let mut map = ids.write();
            for (type_name, type_pairs) in pairs {
                for (placeholder, real) in &type_pairs {
                    map.record(&type_name, placeholder.clone(), real.clone());
                }
                summary.assigned.insert(type_name, type_pairs);
            }
        }
        for batch in &batches {
            summary.sent.insert(batch.type_name.clone(), batch.actions.len());
        }
        self.logs.clear();

        info!(
            types = batches.len(),
            inserted = summary.assigned.values().map(Vec::len).sum::<usize>(),
            "transaction committed"
        );
        Ok(summary)
    }

    /// Snapshot of the staged log for `type_name`, for reading through.
    /// Filters are resolved through `ids` so they match service features.
    pub fn view(&self, type_name: &str, ids: &IdentifierMap) -> StagedView {
        let mut actions = self.actions(type_name).to_vec();
        for action in actions.iter_mut() {
            if let Some(filter) = action.filter_mut() {
                *filter = ids.rewrite(type_name, filter);
            }
        }
        StagedView { actions }
    }
}

/// Pair every sent insert with the id the service returned for it, in
/// submission order.
fn match_assigned_ids(
    batches: &[TransactionBatch],
    assigned: &[AssignedIds],
) -> Result<BTreeMap<String, Vec<(FeatureId, FeatureId)>>, EngineError> {
    let mut answered = BTreeSet::new();
    for answer in assigned {
        if !answered.insert(answer.type_name.as_str()) {
            return Err(EngineError::UnexpectedType(answer.type_name.clone()));
        }
    }

    let mut pairs = BTreeMap::new();
    for batch in batches {
        let returned = assigned
            .iter()
            .find(|a| a.type_name == batch.type_name)
            .map(|a| a.ids.as_slice())
            .unwrap_or_default();
        let sent = batch.insert_count();
        if returned.len() != sent {
            return Err(EngineError::IdentifierCountMismatch {
                type_name: batch.type_name.clone(),
                sent,
                returned: returned.len(),
            });
        }
        let placeholders = batch.actions.iter().filter_map(|action| match action {
            Action::Insert { feature } => Some(feature.id().clone()),
            _ => None,
        });
        let type_pairs: Vec<(FeatureId, FeatureId)> =
            placeholders.zip(returned.iter().cloned()).collect();
        pairs.insert(batch.type_name.clone(), type_pairs);
    }
    if let Some(extra) = assigned
        .iter()
        .find(|a| !batches.iter().any(|b| b.type_name == a.type_name))
    {
        return Err(EngineError::UnexpectedType(extra.type_name.clone()));
    }
    Ok(pairs)
}

enum Step {
    /// The next action deletes the insert; drop it, and the delete too if
    /// it named only this feature.
    Delete { discharged: bool },
    /// The next action updates the insert; fold the changes in, then drop
    /// the update if it named only this feature, else move past it.
    Update { discharged: bool },
    /// The next action cannot touch the insert; move past it.
    Advance,
}

/// Fold deletes and updates into the inserts they target and drain inserts
/// toward the end of the log.
///
/// Inserts never pass each other, so the log converges: every step either
/// removes an action or moves an insert past one more non-insert.
pub fn combine_actions(actions: &mut Vec<Action>) {
    actions.retain(|action| !action.filter().is_some_and(Filter::is_exclude));

    let mut start = 0;
    while let Some(i) = next_movable_insert(actions, start) {
        let step = match (&actions[i], &actions[i + 1]) {
            (Action::Insert { feature }, Action::Delete { filter }) if filter.evaluate(feature) => {
                Step::Delete {
                    discharged: filter.is_single_identity(),
                }
            }
            (Action::Insert { feature }, Action::Update { filter, .. }) if filter.evaluate(feature) => {
                Step::Update {
                    discharged: filter.is_single_identity(),
                }
            }
            _ => Step::Advance,
        };

        match step {
            Step::Delete { discharged } => {
                actions.remove(i);
                if discharged {
                    actions.remove(i);
                }
            }
            Step::Update { discharged } => {
                let (left, right) = actions.split_at_mut(i + 1);
                if let (Action::Insert { feature }, Action::Update { changes, .. }) =
                    (&mut left[i], &right[0])
                {
                    feature.apply_changes(changes);
                }
                if discharged {
                    actions.remove(i + 1);
                } else {
                    actions.swap(i, i + 1);
                }
            }
            Step::Advance => actions.swap(i, i + 1),
        }

        // Only the pair ending at `i` can have become movable behind us.
        start = i.saturating_sub(1);
    }
}

fn next_movable_insert(actions: &[Action], start: usize) -> Option<usize> {
    (start..actions.len().saturating_sub(1))
        .find(|&i| actions[i].is_insert() && !actions[i + 1].is_insert())
}

/// A copy of one type's staged log, used to show callers the state they
/// would see after committing.
#[derive(Debug, Clone, Default)]
pub struct StagedView {
    actions: Vec<Action>,
}

impl StagedView {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Properties written by staged updates. The service's values for these
    /// are stale, so filters on them must be evaluated locally.
    pub fn modified_properties(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for action in &self.actions {
            if let Action::Update { changes, .. } = action {
                out.extend(changes.iter().map(|(name, _)| name.clone()));
            }
        }
        out
    }

    /// Run an existing feature through the staged updates and deletes.
    /// `None` means a staged delete removes it.
    pub fn apply(&self, feature: Feature) -> Option<Feature> {
        apply_from(&self.actions, feature)
    }

    /// The staged inserts as they will look once every later action in the
    /// log has been applied to them.
    pub fn pending_inserts(&self) -> Vec<Feature> {
        let mut out = Vec::new();
        for (i, action) in self.actions.iter().enumerate() {
            if let Action::Insert { feature } = action
                && let Some(feature) = apply_from(&self.actions[i + 1..], feature.clone())
            {
                out.push(feature);
            }
        }
        out
    }
}

fn apply_from(actions: &[Action], mut feature: Feature) -> Option<Feature> {
    for action in actions {
        match action {
            Action::Insert { .. } => {}
            Action::Update { filter, changes } => {
                if filter.evaluate(&feature) {
                    feature.apply_changes(changes);
                }
            }
            Action::Delete { filter } => {
                if filter.evaluate(&feature) {
                    return None;
                }
            }
        }
    }
    Some(feature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wfst_core::AttributeValue;

    fn road(id: &FeatureId, name: &str, lanes: i64) -> Feature {
        Feature::with_attributes(
            id.clone(),
            [("name", name.into()), ("lanes", AttributeValue::Integer(lanes))],
        )
    }

    fn kinds(actions: &[Action]) -> Vec<&'static str> {
        actions.iter().map(Action::kind_name).collect()
    }

    #[test]
    fn insert_then_delete_by_own_id_collapses() {
        let p = FeatureId::placeholder("roads");
        let mut log = vec![
            Action::insert(road(&p, "Main", 2)),
            Action::delete(Filter::id([p.clone()])),
        ];
        combine_actions(&mut log);
        assert!(log.is_empty());
    }

    #[test]
    fn insert_then_update_by_own_id_folds() {
        let p = FeatureId::placeholder("roads");
        let mut log = vec![
            Action::insert(road(&p, "Main", 2)),
            Action::update(Filter::id([p.clone()]), [("name", "X".into())]),
        ];
        combine_actions(&mut log);
        assert_eq!(kinds(&log), vec!["Insert"]);
        match &log[0] {
            Action::Insert { feature } => {
                assert_eq!(feature.get("name"), Some(&AttributeValue::Text("X".into())));
                assert_eq!(feature.id(), &p);
            }
            other => panic!("expected insert, got {other:?}"),
        }
    }

    #[test]
    fn broad_update_is_folded_and_kept() {
        let p = FeatureId::placeholder("roads");
        let update = Action::update(Filter::equals("lanes", 2), [("name", "Two".into())]);
        let mut log = vec![Action::insert(road(&p, "Main", 2)), update.clone()];
        combine_actions(&mut log);
        assert_eq!(kinds(&log), vec!["Update", "Insert"]);
        assert_eq!(log[0], update);
        match &log[1] {
            Action::Insert { feature } => {
                assert_eq!(feature.get("name"), Some(&AttributeValue::Text("Two".into())));
            }
            other => panic!("expected insert, got {other:?}"),
        }
    }

    #[test]
    fn broad_delete_drops_insert_but_stays() {
        let p = FeatureId::placeholder("roads");
        let delete = Action::delete(Filter::equals("lanes", 2));
        let mut log = vec![Action::insert(road(&p, "Main", 2)), delete.clone()];
        combine_actions(&mut log);
        assert_eq!(log, vec![delete]);
    }

    #[test]
    fn unrelated_actions_keep_order_and_inserts_drain() {
        let p1 = FeatureId::placeholder("roads");
        let p2 = FeatureId::placeholder("roads");
        let delete = Action::delete(Filter::equals("name", "Elm"));
        let update = Action::update(Filter::id(["roads.17"]), [("lanes", AttributeValue::Integer(6))]);
        let mut log = vec![
            Action::insert(road(&p1, "Main", 2)),
            delete.clone(),
            Action::insert(road(&p2, "Oak", 3)),
            update.clone(),
        ];
        combine_actions(&mut log);
        assert_eq!(kinds(&log), vec!["Delete", "Update", "Insert", "Insert"]);
        assert_eq!(log[0], delete);
        assert_eq!(log[1], update);
        let ids: Vec<&FeatureId> = log[2..]
            .iter()
            .filter_map(|a| match a {
                Action::Insert { feature } => Some(feature.id()),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec![&p1, &p2]);
    }

    #[test]
    fn exclude_filters_are_dropped() {
        let mut log = vec![
            Action::delete(Filter::Exclude),
            Action::update(Filter::Exclude, [("name", "x".into())]),
            Action::delete(Filter::equals("name", "Elm")),
        ];
        combine_actions(&mut log);
        assert_eq!(kinds(&log), vec!["Delete"]);
    }

    #[test]
    fn update_then_delete_of_same_insert() {
        let p = FeatureId::placeholder("roads");
        let mut log = vec![
            Action::insert(road(&p, "Main", 2)),
            Action::update(Filter::id([p.clone()]), [("lanes", AttributeValue::Integer(9))]),
            Action::delete(Filter::equals("lanes", 9)),
        ];
        combine_actions(&mut log);
        assert_eq!(log, vec![Action::delete(Filter::equals("lanes", 9))]);
    }

    #[test]
    fn combine_on_stager_drops_emptied_types() {
        let mut stager = TransactionStager::new();
        let p = stager.next_placeholder_id("roads").unwrap();
        stager.stage("roads", Action::insert(road(&p, "Main", 2))).unwrap();
        stager.stage("roads", Action::delete(Filter::id([p]))).unwrap();
        stager.combine();
        assert!(stager.is_empty());
        assert!(stager.actions("roads").is_empty());
    }

    #[test]
    fn staging_rejects_misuse() {
        let mut stager = TransactionStager::new();
        assert!(stager.stage("", Action::delete(Filter::Include)).is_err());
        assert!(stager.next_placeholder_id("").is_err());
        assert!(
            stager
                .stage("roads", Action::insert(Feature::new(FeatureId::new(""))))
                .is_err()
        );
        assert!(stager.is_empty());
    }

    #[test]
    fn view_applies_staged_edits() {
        let p = FeatureId::placeholder("roads");
        let mut stager = TransactionStager::new();
        stager.stage("roads", Action::insert(road(&p, "Main", 2))).unwrap();
        stager
            .stage("roads", Action::update(Filter::equals("lanes", 2), [("lanes", AttributeValue::Integer(3))]))
            .unwrap();
        stager.stage("roads", Action::delete(Filter::equals("name", "Elm"))).unwrap();

        let view = stager.view("roads", &IdentifierMap::new());
        assert_eq!(view.modified_properties(), BTreeSet::from(["lanes".to_string()]));

        let inserted = view.pending_inserts();
        assert_eq!(inserted.len(), 1);
        assert_eq!(inserted[0].get("lanes"), Some(&AttributeValue::Integer(3)));

        let existing = road(&FeatureId::new("roads.1"), "Elm", 2);
        assert!(view.apply(existing).is_none());
        let other = road(&FeatureId::new("roads.2"), "Oak", 2);
        assert_eq!(view.apply(other).unwrap().get("lanes"), Some(&AttributeValue::Integer(3)));
    }

    #[test]
    fn prepare_batches_rewrites_committed_placeholders() {
        let mut map = IdentifierMap::new();
        map.record("roads", FeatureId::new("roads.-100"), FeatureId::new("roads.abc"));

        let mut stager = TransactionStager::new();
        stager.stage("roads", Action::delete(Filter::id(["roads.-100"]))).unwrap();
        let batches = stager.prepare_batches(&map);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].actions, vec![Action::delete(Filter::id(["roads.abc"]))]);
        // staged log untouched
        assert_eq!(stager.actions("roads"), &[Action::delete(Filter::id(["roads.-100"]))]);
    }

    #[test]
    fn mismatched_id_count_is_a_protocol_violation() {
        let p = FeatureId::placeholder("roads");
        let batches = vec![TransactionBatch::new("roads", vec![Action::insert(road(&p, "Main", 2))])];
        let err = match_assigned_ids(&batches, &[AssignedIds { type_name: "roads".into(), ids: vec![] }])
            .unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[test]
    fn repeated_type_in_answer_is_rejected() {
        let p = FeatureId::placeholder("roads");
        let batches = vec![TransactionBatch::new("roads", vec![Action::insert(road(&p, "Main", 2))])];
        let answer = AssignedIds { type_name: "roads".into(), ids: vec![FeatureId::new("roads.a")] };
        let err = match_assigned_ids(&batches, &[answer.clone(), answer]).unwrap_err();
        assert!(matches!(err, EngineError::UnexpectedType(ref t) if t == "roads"));
        assert!(err.is_protocol_violation());
    }
}
