use std::sync::Arc;

use wfst_core::{Action, AttributeValue, CompareOp, ComplianceLevel, Feature, FeatureId, Filter};
use wfst_engine::{ClientConfig, DataStore, EngineError};
use wfst_harness::{Fault, ROADS, RIVERS, ScriptedService, TestClient, sorted_ids};

fn names(features: &[Feature]) -> Vec<String> {
    let mut out: Vec<String> = features
        .iter()
        .filter_map(|f| f.get("name").and_then(AttributeValue::as_text).map(str::to_string))
        .collect();
    out.sort();
    out
}

// ============================================================================
// Reading through staged edits
// ============================================================================

#[test]
fn staged_edits_are_visible_in_transaction() -> Result<(), Box<dyn std::error::Error>> {
    let client = TestClient::with_compliance(ComplianceLevel::High)?;
    client.seed_roads(4)?; // lanes 1, 2, 3, 4

    client.store.insert(ROADS, [("name", AttributeValue::from("new")), ("lanes", AttributeValue::Integer(2))])?;
    client.store.update(ROADS, Filter::equals("name", "road-0"), [("lanes", AttributeValue::Integer(2))])?;
    client.store.delete(ROADS, Filter::equals("name", "road-1"))?;

    let filter = Filter::equals("lanes", 2);
    let seen = client.query_in_transaction(ROADS, &filter)?;
    assert_eq!(names(&seen), vec!["new", "road-0"]);

    // committed state is unchanged until commit
    assert_eq!(names(&client.query(ROADS, &filter)?), vec!["road-1"]);

    client.store.commit()?;
    assert_eq!(names(&client.query(ROADS, &filter)?), vec!["new", "road-0"]);
    Ok(())
}

#[test]
fn modified_properties_are_evaluated_locally() -> Result<(), Box<dyn std::error::Error>> {
    let client = TestClient::with_compliance(ComplianceLevel::High)?;
    client.seed_roads(4)?;
    client.store.update(ROADS, Filter::equals("name", "road-3"), [("lanes", AttributeValue::Integer(1))])?;
    client.remote.clear_log();

    let filter = Filter::and([Filter::equals("lanes", 1), Filter::like("name", "road-%")]);
    let seen = client.query_in_transaction(ROADS, &filter)?;
    assert_eq!(names(&seen), vec!["road-0", "road-3"]);

    let sent = client.remote.queries();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].filter, Filter::like("name", "road-%"));
    assert!(sent[0].properties.is_none());
    Ok(())
}

#[test]
fn pending_inserts_match_by_placeholder() -> Result<(), Box<dyn std::error::Error>> {
    let client = TestClient::with_compliance(ComplianceLevel::Low)?;
    let ids = client.seed_roads(3)?;
    let p = client.store.insert(ROADS, [("name", AttributeValue::from("new")), ("lanes", AttributeValue::Integer(7))])?;
    client.store.update(ROADS, Filter::id([p.clone()]), [("name", AttributeValue::from("renamed"))])?;

    let filter = Filter::or([Filter::id([p.clone(), ids[0].clone()]), Filter::equals("lanes", 3)]);
    let seen = client.query_in_transaction(ROADS, &filter)?;
    assert_eq!(names(&seen), vec!["renamed", "road-0", "road-2"]);
    assert!(seen.iter().any(|f| f.id() == &p));
    Ok(())
}

#[test]
fn transaction_reads_project_after_evaluation() -> Result<(), Box<dyn std::error::Error>> {
    let client = TestClient::with_compliance(ComplianceLevel::Medium)?;
    client.seed_roads(4)?;
    client.store.update(ROADS, Filter::Include, [("surface", AttributeValue::from("gravel"))])?;

    let properties = vec!["surface".to_string()];
    let seen: Vec<Feature> = client
        .store
        .query_in_transaction(ROADS, &Filter::compare("lanes", CompareOp::Gt, 2), Some(&properties))?
        .collect::<Result<_, _>>()?;
    assert_eq!(seen.len(), 2);
    for feature in &seen {
        assert_eq!(feature.attributes().len(), 1);
        assert_eq!(feature.get("surface"), Some(&AttributeValue::Text("gravel".into())));
    }
    Ok(())
}

fn read_projected(
    client: &TestClient,
    filter: &Filter,
    properties: &[String],
) -> Result<Vec<Feature>, Box<dyn std::error::Error>> {
    Ok(client
        .store
        .query_in_transaction(ROADS, filter, Some(properties))?
        .collect::<Result<_, _>>()?)
}

#[test]
fn projection_without_staged_edits_keeps_matches() -> Result<(), Box<dyn std::error::Error>> {
    let client = TestClient::with_compliance(ComplianceLevel::Medium)?;
    client.seed_roads(4)?; // lanes 1, 2, 3, 4
    let filter = Filter::compare("lanes", CompareOp::Gt, 2);
    let properties = vec!["name".to_string()];

    let plain: Vec<Feature> = client.store.query(ROADS, &filter, Some(&properties))?.collect::<Result<_, _>>()?;
    let seen = read_projected(&client, &filter, &properties)?;
    assert_eq!(names(&seen), vec!["road-2", "road-3"]);
    assert_eq!(sorted_ids(&seen), sorted_ids(&plain));
    assert!(seen.iter().all(|f| f.attributes().len() == 1 && f.get("lanes").is_none()));
    Ok(())
}

#[test]
fn projection_with_staged_edits_keeps_matches() -> Result<(), Box<dyn std::error::Error>> {
    let client = TestClient::with_compliance(ComplianceLevel::Medium)?;
    client.seed_roads(4)?;
    client.store.update(ROADS, Filter::equals("name", "road-0"), [("lanes", AttributeValue::Integer(5))])?;
    client.store.delete(ROADS, Filter::equals("name", "road-3"))?;
    client.store.insert(ROADS, [("name", AttributeValue::from("new")), ("lanes", AttributeValue::Integer(9))])?;

    let properties = vec!["name".to_string()];
    let seen = read_projected(&client, &Filter::compare("lanes", CompareOp::Gt, 2), &properties)?;
    assert_eq!(names(&seen), vec!["new", "road-0", "road-2"]);
    assert!(seen.iter().all(|f| f.attributes().len() == 1 && f.get("lanes").is_none()));

    // a null check on a property left out of the projection
    let unnamed = read_projected(&client, &Filter::IsNull { property: "lanes".into() }, &properties)?;
    assert!(unnamed.is_empty());
    Ok(())
}

#[test]
fn max_features_caps_both_kinds_of_read() -> Result<(), Box<dyn std::error::Error>> {
    let config = ClientConfig {
        max_features: Some(2),
        ..ClientConfig::with_compliance(ComplianceLevel::Low)
    };
    let client = TestClient::with_config(config)?;
    client.seed_roads(5)?;
    assert_eq!(client.store.max_features(), Some(2));

    assert_eq!(client.query(ROADS, &Filter::Include)?.len(), 2);
    assert_eq!(client.remote.open_cursors(), 0);

    client.store.insert(ROADS, [("name", AttributeValue::from("new"))])?;
    assert_eq!(client.query_in_transaction(ROADS, &Filter::Include)?.len(), 2);
    assert_eq!(client.remote.open_cursors(), 0);
    Ok(())
}

#[test]
fn without_staged_edits_reads_match_plain_queries() -> Result<(), Box<dyn std::error::Error>> {
    let client = TestClient::with_compliance(ComplianceLevel::Low)?;
    let ids = client.seed_roads(6)?;
    let filter = Filter::or([Filter::id([ids[5].clone()]), Filter::like("name", "road-1")]);
    assert_eq!(
        sorted_ids(&client.query_in_transaction(ROADS, &filter)?),
        sorted_ids(&client.query(ROADS, &filter)?)
    );
    Ok(())
}

#[test]
fn closing_transaction_read_releases_cursor() -> Result<(), Box<dyn std::error::Error>> {
    let client = TestClient::new()?;
    client.seed_roads(5)?;
    client.store.delete(ROADS, Filter::equals("lanes", 1))?;

    let mut seen = client.store.query_in_transaction(ROADS, &Filter::Include, None)?;
    assert!(seen.next().transpose()?.is_some());
    assert_eq!(client.remote.open_cursors(), 1);
    seen.close();
    assert_eq!(client.remote.open_cursors(), 0);
    assert!(seen.next().is_none());
    Ok(())
}

// ============================================================================
// Scripted service responses
// ============================================================================

fn scripted_store(service: Arc<ScriptedService>) -> DataStore {
    DataStore::new(service, &ClientConfig::default())
}

#[test]
fn scripted_ids_are_assigned_in_order() -> Result<(), Box<dyn std::error::Error>> {
    let service = Arc::new(ScriptedService::new());
    service.respond_with(ROADS, &["roads.a", "roads.b"]);
    let store = scripted_store(service.clone());

    let first = store.insert(ROADS, [("name", AttributeValue::from("one"))])?;
    let second = store.insert(ROADS, [("name", AttributeValue::from("two"))])?;
    let summary = store.commit()?;

    assert_eq!(summary.real_id(ROADS, &first), Some(&FeatureId::new("roads.a")));
    assert_eq!(summary.real_id(ROADS, &second), Some(&FeatureId::new("roads.b")));
    assert_eq!(store.resolve_id(ROADS, &second), FeatureId::new("roads.b"));
    Ok(())
}

#[test]
fn too_many_ids_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let service = Arc::new(ScriptedService::new());
    service.respond_with(ROADS, &["roads.a", "roads.b"]);
    let store = scripted_store(service.clone());

    let p = store.insert(ROADS, [("name", AttributeValue::from("one"))])?;
    match store.commit() {
        Err(EngineError::IdentifierCountMismatch { type_name, sent, returned }) => {
            assert_eq!((type_name.as_str(), sent, returned), (ROADS, 1, 2));
        }
        other => panic!("expected count mismatch, got {other:?}"),
    }
    assert_eq!(store.resolve_id(ROADS, &p), p);
    assert!(store.has_pending_changes());
    Ok(())
}

#[test]
fn answers_for_unsent_types_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let service = Arc::new(ScriptedService::new());
    service.respond_with(RIVERS, &[]);
    let store = scripted_store(service.clone());

    store.delete(ROADS, Filter::Include)?;
    let err = store.commit().unwrap_err();
    assert!(matches!(err, EngineError::UnexpectedType(ref t) if t == RIVERS));
    assert!(err.is_protocol_violation());
    assert_eq!(store.staged_actions(ROADS), vec![Action::delete(Filter::Include)]);
    Ok(())
}

#[test]
fn scripted_rejection_then_retry() -> Result<(), Box<dyn std::error::Error>> {
    let service = Arc::new(ScriptedService::new());
    service.respond_with_fault(Fault::Reject("locked".into()));
    service.respond_with(ROADS, &["roads.z"]);
    let store = scripted_store(service.clone());

    let p = store.insert(ROADS, [("name", AttributeValue::from("one"))])?;
    assert!(store.commit().unwrap_err().is_rejection());
    store.commit()?;
    assert_eq!(store.resolve_id(ROADS, &p), FeatureId::new("roads.z"));
    Ok(())
}

#[test]
fn scripted_dataset_answers_queries() -> Result<(), Box<dyn std::error::Error>> {
    let service = Arc::new(
        ScriptedService::new()
            .with_feature(ROADS, Feature::with_attributes(FeatureId::new("roads.1"), [("lanes", AttributeValue::Integer(2))]))
            .with_feature(RIVERS, Feature::with_attributes(FeatureId::new("rivers.1"), [("lanes", AttributeValue::Integer(2))])),
    );
    let store = scripted_store(service);
    let out: Vec<Feature> = store.query(ROADS, &Filter::equals("lanes", 2), None)?.collect::<Result<_, _>>()?;
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].id(), &FeatureId::new("roads.1"));
    Ok(())
}

// ============================================================================
// File-backed service
// ============================================================================

#[test]
fn commits_survive_in_file_backed_service() -> Result<(), Box<dyn std::error::Error>> {
    let client = TestClient::on_disk(ClientConfig::with_compliance(ComplianceLevel::None))?;
    let p = client.store.insert(ROADS, [("name", AttributeValue::from("Main")), ("lanes", AttributeValue::Integer(2))])?;
    client.store.insert(ROADS, [("name", AttributeValue::from("Oak")), ("lanes", AttributeValue::Integer(4))])?;
    client.store.commit()?;

    client.store.delete(ROADS, Filter::id([p.clone()]))?;
    client.store.commit()?;

    assert_eq!(client.service.feature_count(ROADS)?, 1);
    let rest = client.query(ROADS, &Filter::like("name", "%a%"))?;
    assert_eq!(names(&rest), vec!["Oak"]);
    assert!(client.get(ROADS, &p)?.is_none());
    Ok(())
}
