//! Issue and project-state types shared across the scheduler, coordinator, and worker
//! prompt builder.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A single unit of work, as produced by the external project initializer and consumed
/// by the scheduler and worker supervisor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Issue {
    pub id: String,
    pub title: String,
    pub category: String,
    #[serde(default = "default_priority")]
    pub priority: String,
    /// Fields the tracker attaches that this crate doesn't interpret, preserved
    /// verbatim so the worker prompt can still reference them.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn default_priority() -> String {
    "Medium".to_string()
}

/// The `.linear_project.json` document: the externally produced project state this
/// crate treats as read-only input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectState {
    pub issues: Vec<Issue>,
}

impl ProjectState {
    pub const FILENAME: &'static str = ".linear_project.json";

    pub fn load(project_dir: &Path) -> anyhow::Result<Self> {
        let path = project_dir.join(Self::FILENAME);
        let data = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
        let state: Self = serde_json::from_str(&data)
            .map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))?;
        Ok(state)
    }

    pub fn exists(project_dir: &Path) -> bool {
        project_dir.join(Self::FILENAME).exists()
    }
}
