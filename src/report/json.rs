use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use super::{FinalReport, ReportSink, report_url};
use crate::domain::SessionId;
use crate::error::ReportError;

/// Writes `{dir}/{testId}_summary.json` files.
#[derive(Debug, Clone)]
pub struct JsonReportSink {
    dir: PathBuf,
}

impl JsonReportSink {
    #[must_use]
    pub const fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn summary_path(&self, session_id: &SessionId) -> Option<PathBuf> {
        let id = session_id.as_str();
        let safe = !id.is_empty()
            && id
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
        safe.then(|| self.dir.join(format!("{}_summary.json", id)))
    }
}

#[async_trait]
impl ReportSink for JsonReportSink {
    async fn store(&self, report: &FinalReport) -> Result<String, ReportError> {
        let path = self
            .summary_path(&report.test_id)
            .ok_or_else(|| ReportError::NotFound {
                session_id: report.test_id.to_string(),
            })?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| ReportError::CreateDir {
                path: self.dir.clone(),
                source: err,
            })?;
        let bytes = serde_json::to_vec_pretty(report)
            .map_err(|err| ReportError::Serialize { source: err })?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|err| ReportError::Write {
                path: path.clone(),
                source: err,
            })?;
        info!("Report for test {} written to {}", report.test_id, path.display());
        Ok(report_url(&report.test_id))
    }

    async fn load(&self, session_id: &SessionId) -> Result<serde_json::Value, ReportError> {
        let not_found = || ReportError::NotFound {
            session_id: session_id.to_string(),
        };
        let path = self.summary_path(session_id).ok_or_else(not_found)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
            Err(err) => return Err(ReportError::Read { path, source: err }),
        };
        serde_json::from_slice(&bytes).map_err(|err| ReportError::Parse { path, source: err })
    }
}
