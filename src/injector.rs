//! Loads the capture capabilities into a page context.

use crate::error::{NodeshotError, Result};
use crate::page::{PageHandle, Script};

/// Load order: styling, then the rasterizer, then the selection script.
const STAGES: [Script; 3] = [Script::Stylesheet, Script::Rasterizer, Script::SelectionScript];

#[derive(Debug, Default, Clone, Copy)]
pub struct Injector;

impl Injector {
    pub fn new() -> Self {
        Self
    }

    /// Make sure the page can receive capture commands.
    ///
    /// A no-op for an already instrumented page. Each stage is guarded on the
    /// page side as well, so overlapping calls for one page cannot install
    /// anything twice.
    pub async fn ensure_capabilities_loaded(&self, page: &PageHandle) -> Result<()> {
        if page.execute(Script::Probe).await.map_err(injection_failure)? {
            tracing::debug!("Page {} already instrumented", page.id());
            return Ok(());
        }

        for stage in STAGES {
            let changed = page.execute(stage).await.map_err(|e| {
                NodeshotError::InjectionFailure(format!("{}: {}", stage.name(), e))
            })?;
            tracing::debug!(
                "Loaded {} into page {}{}",
                stage.name(),
                page.id(),
                if changed { "" } else { " (already present)" }
            );
        }
        Ok(())
    }
}

fn injection_failure(e: NodeshotError) -> NodeshotError {
    match e {
        NodeshotError::InjectionFailure(_) => e,
        other => NodeshotError::InjectionFailure(other.to_string()),
    }
}
