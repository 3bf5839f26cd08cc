//! Resolution of script ids to engine-executable files.
mod directory;


use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ScriptError;

pub use directory::DirectoryScriptStore;

/// A resolved script ready to hand to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptInfo {
    pub script_id: String,
    pub executable_path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
}

#[async_trait]
pub trait ScriptStore: Send + Sync + std::fmt::Debug {
    /// Look up a script by id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when no script exists under that id.
    async fn resolve(&self, script_id: &str) -> Result<ScriptInfo, ScriptError>;
}
