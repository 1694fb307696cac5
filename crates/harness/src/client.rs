use std::sync::Arc;

use tempfile::TempDir;
use wfst_core::{Action, AttributeValue, ComplianceLevel, Feature, FeatureId, Filter};
use wfst_engine::{ClientConfig, DataStore};
use wfst_remote::{RemoteError, RemoteService, SqliteService, TransactionBatch};

use crate::service::RecordingService;

pub const ROADS: &str = "roads";
pub const RIVERS: &str = "rivers";

/// A `DataStore` talking to a fresh `SqliteService` through a
/// `RecordingService`. Two types are registered: `roads` (name, lanes,
/// surface) and `rivers` (name, length).
pub struct TestClient {
    pub service: Arc<SqliteService>,
    pub remote: Arc<RecordingService>,
    pub store: DataStore,
    _dir: Option<TempDir>,
}

impl TestClient {
    pub fn new() -> Result<Self, RemoteError> {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_compliance(level: ComplianceLevel) -> Result<Self, RemoteError> {
        Self::with_config(ClientConfig::with_compliance(level))
    }

    pub fn with_config(config: ClientConfig) -> Result<Self, RemoteError> {
        Self::build(SqliteService::open_in_memory()?, None, config)
    }

    /// Same as [`TestClient::with_config`] but the service keeps its data in
    /// a temporary file.
    pub fn on_disk(config: ClientConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("features.db");
        let service = SqliteService::open(&path.to_string_lossy())?;
        Ok(Self::build(service, Some(dir), config)?)
    }

    fn build(service: SqliteService, dir: Option<TempDir>, config: ClientConfig) -> Result<Self, RemoteError> {
        service.register_type(ROADS, &["name", "lanes", "surface"])?;
        service.register_type(RIVERS, &["name", "length"])?;
        let service = Arc::new(service);
        let remote = Arc::new(RecordingService::new(service.clone()));
        let store = DataStore::new(remote.clone(), &config);
        Ok(Self {
            service,
            remote,
            store,
            _dir: dir,
        })
    }

    /// Write features straight to the service, bypassing the store, and
    /// return their real ids in order.
    pub fn seed(
        &self,
        type_name: &str,
        rows: Vec<Vec<(&str, AttributeValue)>>,
    ) -> Result<Vec<FeatureId>, Box<dyn std::error::Error>> {
        let actions = rows
            .into_iter()
            .enumerate()
            .map(|(i, row)| Action::insert(Feature::with_attributes(FeatureId::new(format!("seed.{i}")), row)))
            .collect();
        let assigned = self
            .service
            .commit_transaction(&[TransactionBatch::new(type_name, actions)])?;
        Ok(assigned.into_iter().flat_map(|a| a.ids).collect())
    }

    /// Seed `count` roads named `road-<i>` with `lanes = i % 4 + 1`.
    pub fn seed_roads(&self, count: usize) -> Result<Vec<FeatureId>, Box<dyn std::error::Error>> {
        let rows = (0..count)
            .map(|i| {
                vec![
                    ("name", AttributeValue::Text(format!("road-{i}"))),
                    ("lanes", AttributeValue::Integer(i as i64 % 4 + 1)),
                ]
            })
            .collect();
        self.seed(ROADS, rows)
    }

    /// Run a query through the store and collect the results.
    pub fn query(&self, type_name: &str, filter: &Filter) -> Result<Vec<Feature>, Box<dyn std::error::Error>> {
        Ok(self.store.query(type_name, filter, None)?.collect::<Result<_, _>>()?)
    }

    pub fn query_in_transaction(
        &self,
        type_name: &str,
        filter: &Filter,
    ) -> Result<Vec<Feature>, Box<dyn std::error::Error>> {
        Ok(self
            .store
            .query_in_transaction(type_name, filter, None)?
            .collect::<Result<_, _>>()?)
    }

    /// Every stored feature of `type_name` that `filter` matches, evaluated
    /// entirely in process.
    pub fn oracle(&self, type_name: &str, filter: &Filter) -> Result<Vec<Feature>, Box<dyn std::error::Error>> {
        let mut out = Vec::new();
        for feature in self.service.query(type_name, &Filter::Include, None)? {
            let feature = feature?;
            if filter.evaluate(&feature) {
                out.push(feature);
            }
        }
        Ok(out)
    }

    pub fn get(&self, type_name: &str, id: &FeatureId) -> Result<Option<Feature>, Box<dyn std::error::Error>> {
        let real = self.store.resolve_id(type_name, id);
        Ok(self.oracle(type_name, &Filter::id([real]))?.into_iter().next())
    }
}

/// Sorted ids of `features`, for order-insensitive comparison.
pub fn sorted_ids(features: &[Feature]) -> Vec<FeatureId> {
    let mut ids: Vec<FeatureId> = features.iter().map(|f| f.id().clone()).collect();
    ids.sort();
    ids
}
