//! Scoped cleanup: each phase accumulates an undo list of handles
//! (container IDs, router file paths) as it creates resources. On abort the
//! list unwinds in reverse so a container started two steps ago is torn down
//! before one started one step ago, matching dependency order.

use std::sync::Arc;
use tracing::{error, warn};

use obtura_core::ResourceId;
use obtura_core::container::ContainerStatus;
use obtura_core::runtime::{ContainerRuntime, RuntimeHandle};
use obtura_db::repo::ContainerRepo;
use obtura_router::FileRouterProgrammer;

/// One undoable side effect recorded while a phase runs.
enum UndoStep {
    StopAndRemoveContainer { id: ResourceId, handle: RuntimeHandle },
    RemoveRouterRule { container_name: String },
}

/// Accumulates undo steps in the order they were taken; `unwind` runs them
/// in reverse. Cheap to construct per-deploy; dropped without unwinding is a
/// silent no-op, so callers must explicitly call `unwind` on every failure
/// path -- there is no `Drop`-based guarantee here because undoing requires
/// `async` I/O.
#[derive(Default)]
pub struct CleanupScope {
    steps: Vec<UndoStep>,
}

impl CleanupScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_container(&mut self, id: ResourceId, handle: RuntimeHandle) {
        self.steps.push(UndoStep::StopAndRemoveContainer { id, handle });
    }

    pub fn record_router_rule(&mut self, container_name: impl Into<String>) {
        self.steps.push(UndoStep::RemoveRouterRule {
            container_name: container_name.into(),
        });
    }

    /// Runs every recorded undo step in reverse order. Individual step
    /// failures are logged, never propagated -- a failed cleanup must not
    /// prevent the deployment from being marked failed and the rate limiter
    /// slot from being released.
    pub async fn unwind(
        &mut self,
        runtime: &Arc<dyn ContainerRuntime>,
        router: &Arc<FileRouterProgrammer>,
        containers: &dyn ContainerRepo,
    ) {
        while let Some(step) = self.steps.pop() {
            match step {
                UndoStep::StopAndRemoveContainer { id, handle } => {
                    if let Err(e) = runtime.stop(&handle, std::time::Duration::from_secs(10)).await {
                        warn!(container_id = %id, error = %e, "cleanup: stop failed, attempting remove anyway");
                    }
                    if let Err(e) = runtime.remove(&handle, true).await {
                        error!(container_id = %id, error = %e, "cleanup: remove failed, container may be abandoned");
                    }
                    if let Err(e) = containers.update_status(id, ContainerStatus::Failed).await {
                        error!(container_id = %id, error = %e, "cleanup: failed to record container status after unwind");
                    }
                }
                UndoStep::RemoveRouterRule { container_name } => {
                    if let Err(e) = router.remove(&container_name) {
                        error!(container = %container_name, error = %e, "cleanup: failed to remove router rule");
                    }
                }
            }
        }
    }
}
