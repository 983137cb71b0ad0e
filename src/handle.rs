use std::sync::Arc;

use anyhow::{Context, Result};

use crate::engine::ApprovalEngine;

/// Async-safe handle to the approval engine.
///
/// Engine calls are synchronous and may block on SQLite I/O, so every call
/// runs on tokio's blocking pool via `spawn_blocking`. The stores serialise
/// their own access; the handle adds no lock of its own.
#[derive(Clone)]
pub struct EngineHandle {
    inner: Arc<ApprovalEngine>,
}

impl EngineHandle {
    pub fn new(engine: ApprovalEngine) -> Self {
        Self {
            inner: Arc::new(engine),
        }
    }

    /// Run a closure against the engine on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&ApprovalEngine) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let engine = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&engine))
            .await
            .context("Engine task panicked")?
    }

    /// Direct access for callers that are already off the async runtime.
    pub fn engine(&self) -> &ApprovalEngine {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::DecisionOutcome;
    use crate::directory::StaticDirectory;
    use crate::engine::{DecisionRequest, EngineOptions};
    use crate::errors::EngineError;
    use crate::gates::GateKey;
    use crate::notify::LogNotifier;
    use crate::rule::ApprovalRule;
    use crate::store::MemoryStore;
    use crate::workstream::{
        ApprovalRound, ApproverRequirement, GateConfigResolver, GateConfiguration, Workstream,
    };

    fn handle() -> EngineHandle {
        let gates = GateConfiguration::new().with_gate(
            GateKey::L0,
            vec![
                ApprovalRound::new("l0-r1", ApprovalRule::Majority)
                    .with_approver(ApproverRequirement::account("a", "alice"))
                    .with_approver(ApproverRequirement::account("b", "bob"))
                    .with_approver(ApproverRequirement::account("c", "carol")),
            ],
        );
        EngineHandle::new(ApprovalEngine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(StaticDirectory::new()),
            Arc::new(LogNotifier),
            GateConfigResolver::new(vec![Workstream::new("growth", "Growth", gates)]),
            EngineOptions::default(),
        ))
    }

    #[tokio::test]
    async fn test_call_runs_engine_operations() {
        let handle = handle();
        let entity = handle
            .call(|engine| Ok(engine.create_initiative("Loyalty", "growth")?))
            .await
            .unwrap();
        let id = entity.id;
        let state = handle
            .call(move |engine| Ok(engine.submit(id, 1)?))
            .await
            .unwrap();
        assert_eq!(state.round_index, 0);
    }

    #[tokio::test]
    async fn test_concurrent_decisions_on_same_version_admit_one() {
        let handle = handle();
        let entity = handle
            .engine()
            .create_initiative("Loyalty", "growth")
            .unwrap();
        handle.engine().submit(entity.id, 1).unwrap();
        let id = entity.id;

        let tasks: Vec<_> = ["alice", "bob", "carol"]
            .into_iter()
            .map(|actor| {
                let handle = handle.clone();
                tokio::spawn(async move {
                    handle
                        .call(move |engine| {
                            let request =
                                DecisionRequest::new(id, 2, GateKey::L0, actor, DecisionOutcome::Approve);
                            Ok(engine.decide(request).map(|e| e.version))
                        })
                        .await
                })
            })
            .collect();

        let mut won = 0;
        for task in tasks {
            match task.await.unwrap().unwrap() {
                Ok(version) => {
                    assert_eq!(version, 3);
                    won += 1;
                }
                Err(e) => assert!(matches!(e, EngineError::VersionConflict { .. })),
            }
        }
        assert_eq!(won, 1);
        assert_eq!(handle.engine().load(id).unwrap().version, 3);
    }
}
