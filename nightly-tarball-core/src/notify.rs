//! End-of-run summary report and its delivery sink.

use async_trait::async_trait;
use tracing::{error, info};

use crate::contract::Notifier;

/// Aggregate outcome of one orchestrator run, by branch name.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub project_name: String,
    pub success: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
}

impl BuildReport {
    pub fn new(project_name: &str) -> Self {
        Self {
            project_name: project_name.to_string(),
            ..Default::default()
        }
    }

    /// A non-empty failed list is the "pipeline is unhealthy" signal.
    pub fn is_healthy(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn subject(&self) -> String {
        if self.is_healthy() {
            format!("{} nightly build: SUCCESS", self.project_name)
        } else {
            format!("{} nightly build: FAILURE", self.project_name)
        }
    }

    pub fn body(&self) -> String {
        format!(
            "Successful builds: {:?}\nSkipped builds: {:?}\nFailed builds: {:?}\n",
            self.success, self.skipped, self.failed
        )
    }
}

/// Notifier that emits the report through the log stream. Mail or chat
/// delivery can be layered behind the same trait by the embedding binary.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        report: &BuildReport,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if report.is_healthy() {
            info!(subject = %report.subject(), "{}", report.body());
        } else {
            error!(subject = %report.subject(), "{}", report.body());
        }
        Ok(())
    }
}
