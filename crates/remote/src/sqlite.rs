use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use wfst_core::{Action, AttributeValue, Feature, FeatureId, Filter};

use crate::error::RemoteError;
use crate::traits::{AssignedIds, FeatureCursor, RemoteService, TransactionBatch};

type Attributes = Vec<(String, AttributeValue)>;

/// Reference feature service living in a SQLite database.
///
/// It evaluates every filter it receives in full and applies transactions
/// atomically, issuing `<type>.<uuid>` identifiers for inserted features.
pub struct SqliteService {
    conn: Mutex<Connection>,
}

impl SqliteService {
    pub fn open(path: &str) -> Result<Self, RemoteError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, RemoteError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Declare a feature type and the properties its features may carry.
    pub fn register_type(&self, type_name: &str, properties: &[&str]) -> Result<(), RemoteError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO feature_types (type_name) VALUES (?1)",
            rusqlite::params![type_name],
        )?;
        for (position, property) in properties.iter().enumerate() {
            tx.execute(
                "INSERT OR REPLACE INTO type_properties (type_name, property, position) VALUES (?1, ?2, ?3)",
                rusqlite::params![type_name, *property, position as i64],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Number of features currently stored for `type_name`.
    pub fn feature_count(&self, type_name: &str) -> Result<u64, RemoteError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM features WHERE type_name = ?1",
            rusqlite::params![type_name],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

fn declared_properties(conn: &Connection, type_name: &str) -> Result<Vec<String>, RemoteError> {
    let known: Option<String> = conn
        .query_row(
            "SELECT type_name FROM feature_types WHERE type_name = ?1",
            rusqlite::params![type_name],
            |row| row.get(0),
        )
        .optional()?;
    if known.is_none() {
        return Err(RemoteError::rejected(format!("unknown feature type: {type_name}")));
    }

    let mut stmt = conn.prepare(
        "SELECT property FROM type_properties WHERE type_name = ?1 ORDER BY position",
    )?;
    let rows = stmt.query_map(rusqlite::params![type_name], |row| row.get::<_, String>(0))?;
    let mut properties = Vec::new();
    for row in rows {
        properties.push(row?);
    }
    Ok(properties)
}

fn check_properties<'a>(
    type_name: &str,
    declared: &[String],
    names: impl IntoIterator<Item = &'a String>,
) -> Result<(), RemoteError> {
    for name in names {
        if !declared.contains(name) {
            return Err(RemoteError::rejected(format!(
                "property {name} is not declared for {type_name}"
            )));
        }
    }
    Ok(())
}

fn encode_attributes(attributes: &[(String, AttributeValue)]) -> Result<Vec<u8>, RemoteError> {
    rmp_serde::to_vec(attributes).map_err(|e| RemoteError::Serialization(e.to_string()))
}

fn load_features(conn: &Connection, type_name: &str) -> Result<Vec<(i64, Feature)>, RemoteError> {
    let mut stmt = conn.prepare(
        "SELECT rowid, fid, attributes FROM features WHERE type_name = ?1 ORDER BY rowid",
    )?;
    let rows = stmt.query_map(rusqlite::params![type_name], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Vec<u8>>(2)?,
        ))
    })?;

    let mut features = Vec::new();
    for row in rows {
        let (rowid, fid, bytes) = row?;
        let attributes: Attributes = rmp_serde::from_slice(&bytes)
            .map_err(|e| RemoteError::Serialization(e.to_string()))?;
        features.push((rowid, Feature::with_attributes(FeatureId::new(fid), attributes)));
    }
    Ok(features)
}

fn apply_action(
    tx: &rusqlite::Transaction,
    type_name: &str,
    declared: &[String],
    action: &Action,
    assigned: &mut Vec<FeatureId>,
) -> Result<(), RemoteError> {
    match action {
        Action::Insert { feature } => {
            check_properties(type_name, declared, feature.attributes().iter().map(|(k, _)| k))?;
            let fid = FeatureId::new(format!("{type_name}.{}", Uuid::now_v7().simple()));
            tx.execute(
                "INSERT INTO features (type_name, fid, attributes) VALUES (?1, ?2, ?3)",
                rusqlite::params![type_name, fid.as_str(), encode_attributes(feature.attributes())?],
            )?;
            assigned.push(fid);
        }

        Action::Update { filter, changes } => {
            check_properties(type_name, declared, changes.iter().map(|(k, _)| k))?;
            for (rowid, mut feature) in load_features(tx, type_name)? {
                if filter.evaluate(&feature) {
                    feature.apply_changes(changes);
                    tx.execute(
                        "UPDATE features SET attributes = ?1 WHERE rowid = ?2",
                        rusqlite::params![encode_attributes(feature.attributes())?, rowid],
                    )?;
                }
            }
        }

        Action::Delete { filter } => {
            for (rowid, feature) in load_features(tx, type_name)? {
                if filter.evaluate(&feature) {
                    tx.execute("DELETE FROM features WHERE rowid = ?1", rusqlite::params![rowid])?;
                }
            }
        }
    }
    Ok(())
}

impl RemoteService for SqliteService {
    fn query(
        &self,
        type_name: &str,
        filter: &Filter,
        properties: Option<&[String]>,
    ) -> Result<FeatureCursor, RemoteError> {
        let conn = self.conn.lock();
        declared_properties(&conn, type_name)?;

        let mut matched = Vec::new();
        for (_rowid, mut feature) in load_features(&conn, type_name)? {
            if filter.evaluate(&feature) {
                if let Some(properties) = properties {
                    feature.retain_properties(properties);
                }
                matched.push(feature);
            }
        }
        debug!(type_name, matched = matched.len(), "sqlite service answered query");
        Ok(Box::new(matched.into_iter().map(Ok)))
    }

    fn commit_transaction(
        &self,
        batches: &[TransactionBatch],
    ) -> Result<Vec<AssignedIds>, RemoteError> {
        let mut conn = self.conn.lock();
        // Dropping `tx` on an early return rolls every batch back.
        let tx = conn.transaction()?;

        let mut result = Vec::with_capacity(batches.len());
        for batch in batches {
            let declared = declared_properties(&tx, &batch.type_name)?;
            let mut ids = Vec::with_capacity(batch.insert_count());
            for action in &batch.actions {
                apply_action(&tx, &batch.type_name, &declared, action, &mut ids)?;
            }
            result.push(AssignedIds {
                type_name: batch.type_name.clone(),
                ids,
            });
        }

        tx.commit()?;
        Ok(result)
    }
}

impl std::fmt::Debug for SqliteService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteService").finish_non_exhaustive()
    }
}
