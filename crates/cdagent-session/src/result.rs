//! Session outcomes and the structured build report.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Terminal outcome of one session execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobResult {
    Passed,
    Failed,
    Cancelled,
}

impl JobResult {
    pub fn is_passed(&self) -> bool {
        matches!(self, JobResult::Passed)
    }
}

impl std::fmt::Display for JobResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobResult::Passed => write!(f, "Passed"),
            JobResult::Failed => write!(f, "Failed"),
            JobResult::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Execution status of one builder after the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    Failed,
    Cancelled,
    /// Not executed because an earlier sibling failed or was cancelled.
    Skipped,
}

/// One executed (or skipped) builder, in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Nesting depth in the tree (root = 0).
    pub depth: usize,

    /// Masked builder label.
    pub label: String,

    pub status: StepStatus,
}

/// Everything a caller needs after a session execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReport {
    pub session_id: Uuid,

    pub result: JobResult,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,

    pub steps: Vec<StepRecord>,

    /// Masked message of the first failure, if the build failed.
    pub error: Option<String>,
}

impl BuildReport {
    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    /// Steps with the given status, by label.
    pub fn labels(&self, status: StepStatus) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.status == status)
            .map(|s| s.label.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> BuildReport {
        BuildReport {
            session_id: Uuid::new_v4(),
            result: JobResult::Failed,
            duration_ms: 12,
            steps: vec![
                StepRecord {
                    depth: 1,
                    label: "mkdirs /w".to_string(),
                    status: StepStatus::Passed,
                },
                StepRecord {
                    depth: 1,
                    label: "p4 sync".to_string(),
                    status: StepStatus::Failed,
                },
                StepRecord {
                    depth: 1,
                    label: "echo".to_string(),
                    status: StepStatus::Skipped,
                },
            ],
            error: Some("command 'p4' exited with exit code 1".to_string()),
        }
    }

    #[test]
    fn test_report_counts() {
        let report = report();
        assert_eq!(report.count(StepStatus::Passed), 1);
        assert_eq!(report.count(StepStatus::Failed), 1);
        assert_eq!(report.labels(StepStatus::Skipped), vec!["echo"]);
    }

    #[test]
    fn test_report_json_shape() {
        let json = serde_json::to_value(report()).unwrap();
        assert_eq!(json["result"], "Failed");
        assert_eq!(json["steps"][2]["status"], "skipped");
    }

    #[test]
    fn test_job_result_display() {
        assert_eq!(JobResult::Cancelled.to_string(), "Cancelled");
        assert!(JobResult::Passed.is_passed());
        assert!(!JobResult::Failed.is_passed());
    }
}
