use std::collections::HashMap;

use wfst_core::{FeatureId, Filter};

/// Placeholder → server identifier mappings learned from commits, per
/// feature type. Entries are never removed: callers may hold on to a
/// placeholder long after the insert was committed.
#[derive(Debug, Default)]
pub struct IdentifierMap {
    by_type: HashMap<String, HashMap<FeatureId, FeatureId>>,
}

impl IdentifierMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, type_name: &str, placeholder: FeatureId, real: FeatureId) {
        self.by_type
            .entry(type_name.to_string())
            .or_default()
            .insert(placeholder, real);
    }

    pub fn resolve(&self, type_name: &str, id: &FeatureId) -> Option<&FeatureId> {
        self.by_type.get(type_name)?.get(id)
    }

    pub fn len(&self) -> usize {
        self.by_type.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `filter`, replacing every identity literal that has a mapping
    /// for `type_name` with the real identifier. The input is not touched.
    pub fn rewrite(&self, type_name: &str, filter: &Filter) -> Filter {
        match self.by_type.get(type_name) {
            Some(mappings) if !mappings.is_empty() => {
                filter.map_identities(&|id: &FeatureId| mappings.get(id).cloned())
            }
            _ => filter.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> IdentifierMap {
        let mut map = IdentifierMap::new();
        map.record("roads", FeatureId::new("roads.-1"), FeatureId::new("roads.a1"));
        map.record("roads", FeatureId::new("roads.-2"), FeatureId::new("roads.b2"));
        map
    }

    #[test]
    fn rewrites_known_placeholders_only() {
        let filter = Filter::or([
            Filter::id(["roads.-1", "roads.-9", "roads.77"]),
            Filter::equals("lanes", 2),
        ]);
        let rewritten = map().rewrite("roads", &filter);
        assert_eq!(
            rewritten,
            Filter::or([
                Filter::id(["roads.a1", "roads.-9", "roads.77"]),
                Filter::equals("lanes", 2),
            ])
        );
        // original untouched
        assert!(filter.identity_literals().contains(&FeatureId::new("roads.-1")));
    }

    #[test]
    fn rewrite_is_idempotent() {
        let map = map();
        let filter = Filter::not(Filter::id(["roads.-2"]));
        let once = map.rewrite("roads", &filter);
        assert_eq!(map.rewrite("roads", &once), once);
    }

    #[test]
    fn mappings_are_scoped_by_type() {
        let map = map();
        let filter = Filter::id(["roads.-1"]);
        assert_eq!(map.rewrite("rivers", &filter), filter);
        assert!(map.resolve("rivers", &FeatureId::new("roads.-1")).is_none());
        assert_eq!(map.len(), 2);
    }
}
