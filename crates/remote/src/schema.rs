use rusqlite::Connection;

use crate::error::RemoteError;

pub fn init_schema(conn: &Connection) -> Result<(), RemoteError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS feature_types (
    type_name TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS type_properties (
    type_name TEXT NOT NULL REFERENCES feature_types (type_name) ON DELETE CASCADE,
    property TEXT NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (type_name, property)
);

CREATE TABLE IF NOT EXISTS features (
    rowid INTEGER PRIMARY KEY,
    type_name TEXT NOT NULL REFERENCES feature_types (type_name),
    fid TEXT NOT NULL UNIQUE,
    attributes BLOB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_features_type ON features (type_name, rowid);
";
