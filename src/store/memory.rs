use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use uuid::Uuid;

use super::{EntityStore, ensure_single_step};
use crate::entity::GovernedEntity;
use crate::errors::{EngineError, EngineResult};
use crate::gates::GateKey;
use crate::history::RoundSnapshot;

#[derive(Default)]
struct Inner {
    entities: HashMap<Uuid, GovernedEntity>,
    history: Vec<RoundSnapshot>,
    history_keys: HashSet<(Uuid, GateKey, u32, usize)>,
}

/// In-process store. The whole commit runs under one lock.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> EngineResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|e| EngineError::storage(anyhow::anyhow!("store lock poisoned: {}", e)))
    }
}

impl EntityStore for MemoryStore {
    fn insert(&self, entity: &GovernedEntity) -> EngineResult<()> {
        let mut inner = self.lock()?;
        if inner.entities.contains_key(&entity.id) {
            return Err(EngineError::storage(anyhow::anyhow!(
                "entity {} already exists",
                entity.id
            )));
        }
        inner.entities.insert(entity.id, entity.clone());
        Ok(())
    }

    fn load(&self, id: Uuid) -> EngineResult<GovernedEntity> {
        self.lock()?
            .entities
            .get(&id)
            .cloned()
            .ok_or(EngineError::EntityNotFound { id })
    }

    fn commit(
        &self,
        entity: &GovernedEntity,
        expected_version: u64,
        snapshots: &[RoundSnapshot],
    ) -> EngineResult<u64> {
        ensure_single_step(entity, expected_version)?;
        let mut inner = self.lock()?;

        let actual = inner
            .entities
            .get(&entity.id)
            .map(|e| e.version)
            .ok_or(EngineError::EntityNotFound { id: entity.id })?;
        if actual != expected_version {
            return Err(EngineError::VersionConflict {
                expected: expected_version,
                actual,
            });
        }
        for snapshot in snapshots {
            if inner.history_keys.contains(&snapshot.key()) {
                return Err(EngineError::storage(anyhow::anyhow!(
                    "round {} of {} (execution {}) already recorded",
                    snapshot.round_index,
                    snapshot.gate,
                    snapshot.execution
                )));
            }
        }

        for snapshot in snapshots {
            inner.history_keys.insert(snapshot.key());
            inner.history.push(snapshot.clone());
        }
        inner.entities.insert(entity.id, entity.clone());
        Ok(entity.version)
    }

    fn remove(&self, id: Uuid, expected_version: u64) -> EngineResult<()> {
        let mut inner = self.lock()?;
        let actual = inner
            .entities
            .get(&id)
            .map(|e| e.version)
            .ok_or(EngineError::EntityNotFound { id })?;
        if actual != expected_version {
            return Err(EngineError::VersionConflict {
                expected: expected_version,
                actual,
            });
        }
        inner.entities.remove(&id);
        Ok(())
    }

    fn list(&self) -> EngineResult<Vec<GovernedEntity>> {
        let mut entities: Vec<_> = self.lock()?.entities.values().cloned().collect();
        entities.sort_by_key(|e| e.created_at);
        Ok(entities)
    }

    fn history(&self, id: Uuid) -> EngineResult<Vec<RoundSnapshot>> {
        Ok(self
            .lock()?
            .history
            .iter()
            .filter(|s| s.entity_id == id)
            .cloned()
            .collect())
    }
}
