//! Persistence collaborator.
//!
//! Every mutation is a compare-and-swap: `commit` writes the entity only if
//! the stored version still equals `expected_version`, and appends the round
//! snapshots in the same atomic step. A caller that lost the race gets
//! `VersionConflict` and nothing is written.
//!
//! | Backend       | Atomicity                                         |
//! |---------------|---------------------------------------------------|
//! | `MemoryStore` | single mutex critical section                     |
//! | `SqliteStore` | one transaction, `UPDATE .. WHERE version = ?`    |

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use uuid::Uuid;

use crate::entity::GovernedEntity;
use crate::errors::{EngineError, EngineResult};
use crate::gates::GateKey;
use crate::history::RoundSnapshot;

pub trait EntityStore: Send + Sync {
    /// Insert a brand-new entity. Fails if the id already exists.
    fn insert(&self, entity: &GovernedEntity) -> EngineResult<()>;

    fn load(&self, id: Uuid) -> EngineResult<GovernedEntity>;

    /// Atomically replace the entity stored at `expected_version` and append
    /// `snapshots`. `entity.version` must be `expected_version + 1`.
    /// Returns the new version.
    fn commit(
        &self,
        entity: &GovernedEntity,
        expected_version: u64,
        snapshots: &[RoundSnapshot],
    ) -> EngineResult<u64>;

    /// Delete the entity. Its round history is kept.
    fn remove(&self, id: Uuid, expected_version: u64) -> EngineResult<()>;

    fn list(&self) -> EngineResult<Vec<GovernedEntity>>;

    /// Full history of one entity, in append order.
    fn history(&self, id: Uuid) -> EngineResult<Vec<RoundSnapshot>>;

    /// History of one gate of one entity, in append order.
    fn gate_history(&self, id: Uuid, gate: GateKey) -> EngineResult<Vec<RoundSnapshot>> {
        Ok(self
            .history(id)?
            .into_iter()
            .filter(|s| s.gate == gate)
            .collect())
    }
}

fn ensure_single_step(entity: &GovernedEntity, expected_version: u64) -> EngineResult<()> {
    if entity.version != expected_version + 1 {
        return Err(EngineError::storage(anyhow::anyhow!(
            "commit of entity {} must move version {} to {}, got {}",
            entity.id,
            expected_version,
            expected_version + 1,
            entity.version
        )));
    }
    Ok(())
}
