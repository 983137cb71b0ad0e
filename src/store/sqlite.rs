use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::Context;
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use super::{EntityStore, ensure_single_step};
use crate::entity::GovernedEntity;
use crate::errors::{EngineError, EngineResult};
use crate::history::RoundSnapshot;

/// SQLite-backed store. Entities are kept as JSON bodies next to an indexed
/// `version` column; round snapshots go to an append-only table.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database at `path` and run migrations.
    pub fn new(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database {}", path.display()))?;
        Self::init(conn)
    }

    /// In-memory database, used by tests.
    pub fn new_in_memory() -> anyhow::Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;

            CREATE TABLE IF NOT EXISTS entities (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                version INTEGER NOT NULL,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS round_snapshots (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_id TEXT NOT NULL,
                gate TEXT NOT NULL,
                execution INTEGER NOT NULL,
                round_index INTEGER NOT NULL,
                body TEXT NOT NULL,
                closed_at TEXT NOT NULL,
                UNIQUE(entity_id, gate, execution, round_index)
            );

            CREATE INDEX IF NOT EXISTS idx_round_snapshots_entity
                ON round_snapshots(entity_id, gate);

            CREATE TRIGGER IF NOT EXISTS round_snapshots_no_update
            BEFORE UPDATE ON round_snapshots
            BEGIN
                SELECT RAISE(ABORT, 'round history is append-only');
            END;

            CREATE TRIGGER IF NOT EXISTS round_snapshots_no_delete
            BEFORE DELETE ON round_snapshots
            BEGIN
                SELECT RAISE(ABORT, 'round history is append-only');
            END;
            ",
        )
        .context("Failed to run migrations")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> EngineResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| EngineError::storage(anyhow::anyhow!("DB lock poisoned: {}", e)))
    }
}

fn stored_version(conn: &Connection, id: Uuid) -> anyhow::Result<Option<u64>> {
    let version: Option<i64> = conn
        .query_row(
            "SELECT version FROM entities WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to read entity version")?;
    Ok(version.map(|v| v as u64))
}

fn conflict_or_missing(conn: &Connection, id: Uuid, expected: u64) -> EngineError {
    match stored_version(conn, id) {
        Ok(Some(actual)) => EngineError::VersionConflict { expected, actual },
        Ok(None) => EngineError::EntityNotFound { id },
        Err(e) => EngineError::storage(e),
    }
}

fn parse_entity(body: &str) -> anyhow::Result<GovernedEntity> {
    serde_json::from_str(body).context("Failed to decode stored entity")
}

impl EntityStore for SqliteStore {
    fn insert(&self, entity: &GovernedEntity) -> EngineResult<()> {
        let body = serde_json::to_string(entity)
            .context("Failed to encode entity")
            .map_err(EngineError::storage)?;
        self.lock()?
            .execute(
                "INSERT INTO entities (id, kind, version, body, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entity.id.to_string(),
                    entity.kind().as_str(),
                    entity.version as i64,
                    body,
                    entity.created_at.to_rfc3339(),
                    entity.updated_at.to_rfc3339(),
                ],
            )
            .with_context(|| format!("Failed to insert entity {}", entity.id))
            .map_err(EngineError::storage)?;
        Ok(())
    }

    fn load(&self, id: Uuid) -> EngineResult<GovernedEntity> {
        let body: Option<String> = self
            .lock()?
            .query_row(
                "SELECT body FROM entities WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query entity")
            .map_err(EngineError::storage)?;
        match body {
            Some(body) => parse_entity(&body).map_err(EngineError::storage),
            None => Err(EngineError::EntityNotFound { id }),
        }
    }

    fn commit(
        &self,
        entity: &GovernedEntity,
        expected_version: u64,
        snapshots: &[RoundSnapshot],
    ) -> EngineResult<u64> {
        ensure_single_step(entity, expected_version)?;
        let body = serde_json::to_string(entity)
            .context("Failed to encode entity")
            .map_err(EngineError::storage)?;

        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .context("Failed to begin transaction")
            .map_err(EngineError::storage)?;

        let updated = tx
            .execute(
                "UPDATE entities SET version = ?1, body = ?2, updated_at = ?3
                 WHERE id = ?4 AND version = ?5",
                params![
                    entity.version as i64,
                    body,
                    entity.updated_at.to_rfc3339(),
                    entity.id.to_string(),
                    expected_version as i64,
                ],
            )
            .context("Failed to update entity")
            .map_err(EngineError::storage)?;
        if updated == 0 {
            // Dropping `tx` rolls back.
            return Err(conflict_or_missing(&tx, entity.id, expected_version));
        }

        for snapshot in snapshots {
            let snapshot_body = serde_json::to_string(snapshot)
                .context("Failed to encode round snapshot")
                .map_err(EngineError::storage)?;
            tx.execute(
                "INSERT INTO round_snapshots
                    (entity_id, gate, execution, round_index, body, closed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    snapshot.entity_id.to_string(),
                    snapshot.gate.as_str(),
                    snapshot.execution as i64,
                    snapshot.round_index as i64,
                    snapshot_body,
                    snapshot.closed_at.to_rfc3339(),
                ],
            )
            .with_context(|| {
                format!(
                    "Failed to append round {} of {} (execution {})",
                    snapshot.round_index, snapshot.gate, snapshot.execution
                )
            })
            .map_err(EngineError::storage)?;
        }

        tx.commit()
            .context("Failed to commit transaction")
            .map_err(EngineError::storage)?;
        Ok(entity.version)
    }

    fn remove(&self, id: Uuid, expected_version: u64) -> EngineResult<()> {
        let conn = self.lock()?;
        let deleted = conn
            .execute(
                "DELETE FROM entities WHERE id = ?1 AND version = ?2",
                params![id.to_string(), expected_version as i64],
            )
            .context("Failed to delete entity")
            .map_err(EngineError::storage)?;
        if deleted == 0 {
            return Err(conflict_or_missing(&conn, id, expected_version));
        }
        Ok(())
    }

    fn list(&self) -> EngineResult<Vec<GovernedEntity>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT body FROM entities ORDER BY created_at, id")
            .context("Failed to prepare entity listing")
            .map_err(EngineError::storage)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("Failed to query entities")
            .map_err(EngineError::storage)?;
        let mut entities = Vec::new();
        for row in rows {
            let body = row
                .context("Failed to read entity row")
                .map_err(EngineError::storage)?;
            entities.push(parse_entity(&body).map_err(EngineError::storage)?);
        }
        Ok(entities)
    }

    fn history(&self, id: Uuid) -> EngineResult<Vec<RoundSnapshot>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT body FROM round_snapshots WHERE entity_id = ?1 ORDER BY seq")
            .context("Failed to prepare history query")
            .map_err(EngineError::storage)?;
        let rows = stmt
            .query_map(params![id.to_string()], |row| row.get::<_, String>(0))
            .context("Failed to query round history")
            .map_err(EngineError::storage)?;
        let mut snapshots = Vec::new();
        for row in rows {
            let body = row
                .context("Failed to read history row")
                .map_err(EngineError::storage)?;
            let snapshot = serde_json::from_str(&body)
                .context("Failed to decode round snapshot")
                .map_err(EngineError::storage)?;
            snapshots.push(snapshot);
        }
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gates::GateKey;
    use crate::store::contract;
    use tempfile::TempDir;

    #[test]
    fn test_sqlite_store_contract() {
        contract::run_all(|| Box::new(SqliteStore::new_in_memory().unwrap()));
    }

    #[test]
    fn test_data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("stagegate.db");

        let mut entity = GovernedEntity::initiative("Loyalty", "growth");
        {
            let store = SqliteStore::new(&path).unwrap();
            store.insert(&entity).unwrap();
            entity.version = 2;
            store
                .commit(&entity, 1, &[contract::snapshot(&entity, GateKey::L0, 0)])
                .unwrap();
        }

        let store = SqliteStore::new(&path).unwrap();
        assert_eq!(store.load(entity.id).unwrap(), entity);
        assert_eq!(store.history(entity.id).unwrap().len(), 1);
    }

    #[test]
    fn test_history_table_rejects_update_and_delete() {
        let store = SqliteStore::new_in_memory().unwrap();
        let mut entity = GovernedEntity::initiative("Loyalty", "growth");
        store.insert(&entity).unwrap();
        entity.version = 2;
        store
            .commit(&entity, 1, &[contract::snapshot(&entity, GateKey::L0, 0)])
            .unwrap();

        let conn = store.lock().unwrap();
        assert!(
            conn.execute("UPDATE round_snapshots SET body = '{}'", [])
                .is_err()
        );
        assert!(conn.execute("DELETE FROM round_snapshots", []).is_err());
    }
}
