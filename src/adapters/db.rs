use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

use crate::domain::engine::EngineState;

pub const LATEST_SCHEMA_VERSION: u32 = 1;

const MIGRATIONS: &[(u32, &str)] = &[(
    1,
    r#"
CREATE TABLE IF NOT EXISTS engine_snapshot (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    state_json TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#,
)];

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database operation failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("unsupported schema version {current}; latest supported is {latest}")]
    UnsupportedSchemaVersion { current: u32, latest: u32 },
    #[error("failed to encode engine snapshot: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode engine snapshot: {0}")]
    Decode(#[source] serde_json::Error),
}

pub fn open_connection(path: &str) -> Result<Connection, DbError> {
    Connection::open(path).map_err(DbError::from)
}

pub fn run_migrations(connection: &mut Connection) -> Result<(), DbError> {
    let current_version = schema_version(connection)?;

    if current_version > LATEST_SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchemaVersion {
            current: current_version,
            latest: LATEST_SCHEMA_VERSION,
        });
    }

    let transaction = connection.transaction()?;

    for (version, sql) in MIGRATIONS {
        if *version > current_version {
            transaction.execute_batch(sql)?;
            transaction.pragma_update(None, "user_version", version)?;
        }
    }

    transaction.commit()?;

    Ok(())
}

pub fn schema_version(connection: &Connection) -> Result<u32, DbError> {
    let version = connection.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Persist the full engine state, replacing the previous snapshot.
pub fn save_snapshot(
    connection: &Connection,
    state: &EngineState,
    updated_at: &str,
) -> Result<(), DbError> {
    let state_json = serde_json::to_string(state).map_err(DbError::Encode)?;

    connection.execute(
        "INSERT INTO engine_snapshot (id, state_json, updated_at) VALUES (1, ?1, ?2)
         ON CONFLICT(id) DO UPDATE SET state_json = excluded.state_json, updated_at = excluded.updated_at",
        params![state_json, updated_at],
    )?;

    Ok(())
}

/// Restore the last snapshot. Absence is not an error: a cold start with no
/// snapshot begins from zeroed accumulators.
pub fn load_snapshot(connection: &Connection) -> Result<Option<EngineState>, DbError> {
    let state_json: Option<String> = connection
        .query_row(
            "SELECT state_json FROM engine_snapshot WHERE id = 1",
            [],
            |row| row.get(0),
        )
        .optional()?;

    match state_json {
        Some(json) => {
            let state = serde_json::from_str(&json).map_err(DbError::Decode)?;
            Ok(Some(state))
        }
        None => Ok(None),
    }
}

pub fn snapshot_updated_at(connection: &Connection) -> Result<Option<String>, DbError> {
    let updated_at = connection
        .query_row(
            "SELECT updated_at FROM engine_snapshot WHERE id = 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(updated_at)
}
