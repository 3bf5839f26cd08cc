use std::future::Future;
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};

pub(crate) fn run_async_test<F>(future: F) -> AppResult<()>
where
    F: Future<Output = AppResult<()>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(future)
}

/// Snapshot record line for one endpoint with `requests` 20ms requests.
pub(crate) fn snapshot_line(progress: u64, requests: u64, failures: u64) -> String {
    serde_json::json!({
        "type": "Snapshot",
        "data": {
            "progress": progress,
            "vus": 2,
            "rps": requests,
            "response_time": 20.0,
            "error_rate": 0.0,
            "endpoints": [{
                "name": "home",
                "requests": requests,
                "failures": failures,
                "durations": vec![20.0; usize::try_from(requests).unwrap_or(0)],
                "status_codes": { "200": requests.saturating_sub(failures) }
            }]
        }
    })
    .to_string()
}

/// Write an executable shell script standing in for the engine.
#[cfg(unix)]
pub(crate) fn write_fake_engine(dir: &Path, name: &str, body: &str) -> AppResult<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body))?;
    let mut permissions = std::fs::metadata(&path)?.permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&path, permissions)?;
    if !path.exists() {
        return Err(AppError::engine("Fake engine was not written"));
    }
    Ok(path)
}
