use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{ScriptInfo, ScriptStore};
use crate::error::ScriptError;

/// Scripts stored as plain files in one directory, addressed by file name.
#[derive(Debug, Clone)]
pub struct DirectoryScriptStore {
    root: PathBuf,
}

impl DirectoryScriptStore {
    #[must_use]
    pub const fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn is_plain_file_name(script_id: &str) -> bool {
    let mut components = Path::new(script_id).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !script_id.contains(['/', '\\'])
        && script_id != ".."
}

#[async_trait]
impl ScriptStore for DirectoryScriptStore {
    async fn resolve(&self, script_id: &str) -> Result<ScriptInfo, ScriptError> {
        if !is_plain_file_name(script_id) {
            debug!("Rejecting script id with path components: {}", script_id);
            return Err(ScriptError::NotFound {
                script_id: script_id.to_owned(),
            });
        }
        let path = self.root.join(script_id);
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ScriptError::NotFound {
                    script_id: script_id.to_owned(),
                });
            }
            Err(err) => return Err(ScriptError::Metadata { path, source: err }),
        };
        if !metadata.is_file() {
            return Err(ScriptError::NotFound {
                script_id: script_id.to_owned(),
            });
        }
        Ok(ScriptInfo {
            script_id: script_id.to_owned(),
            file_name: script_id.to_owned(),
            size_bytes: metadata.len(),
            executable_path: path,
        })
    }
}
