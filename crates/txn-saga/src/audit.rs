use std::time::Instant;

/// Status of a step in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum StepStatus {
    /// Action started but has not finished yet.
    Running,
    /// Action completed and its compensation is registered.
    Executed,
    /// Action failed; nothing was registered.
    Failed,
    /// Compensation ran successfully.
    Compensated,
    /// Compensation failed.
    CompensationFailed,
    /// Side effect with no compensation.
    Uncompensable,
}

/// Record of a single step of a transaction run.
#[derive(Debug, Clone)]
pub struct StepRecord {
    /// Name of the step.
    pub name: String,
    /// Current status.
    pub status: StepStatus,
    /// When the step started executing.
    pub started_at: Instant,
    /// When the step last changed status (execution or compensation).
    pub completed_at: Option<Instant>,
    /// Description of compensation (if registered).
    pub compensation_description: Option<String>,
}

/// Audit log of one transaction run.
///
/// Records are kept in start order and addressed by the index returned from
/// `record_start`, so concurrently running steps never overwrite each other.
#[derive(Debug, Clone, Default)]
pub struct TxnAuditLog {
    records: Vec<StepRecord>,
}

impl TxnAuditLog {
    /// Create a new empty audit log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_start(&mut self, name: &str) -> usize {
        self.records.push(StepRecord {
            name: name.to_string(),
            status: StepStatus::Running,
            started_at: Instant::now(),
            completed_at: None,
            compensation_description: None,
        });
        self.records.len() - 1
    }

    pub(crate) fn record_success(&mut self, index: usize, compensation_description: String) {
        if let Some(record) = self.records.get_mut(index) {
            record.status = StepStatus::Executed;
            record.completed_at = Some(Instant::now());
            record.compensation_description = Some(compensation_description);
        }
    }

    pub(crate) fn record_failure(&mut self, index: usize) {
        self.set_status(index, StepStatus::Failed);
    }

    pub(crate) fn record_compensated(&mut self, index: usize) {
        self.set_status(index, StepStatus::Compensated);
    }

    pub(crate) fn record_compensation_failed(&mut self, index: usize) {
        self.set_status(index, StepStatus::CompensationFailed);
    }

    pub(crate) fn record_uncompensable(&mut self, name: &str) {
        let now = Instant::now();
        self.records.push(StepRecord {
            name: name.to_string(),
            status: StepStatus::Uncompensable,
            started_at: now,
            completed_at: Some(now),
            compensation_description: None,
        });
    }

    fn set_status(&mut self, index: usize, status: StepStatus) {
        if let Some(record) = self.records.get_mut(index) {
            record.status = status;
            record.completed_at = Some(Instant::now());
        }
    }

    /// Get all records in the audit log.
    #[must_use]
    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    /// Records with the given status, in start order.
    pub fn with_status(&self, status: StepStatus) -> impl Iterator<Item = &StepRecord> {
        self.records.iter().filter(move |record| record.status == status)
    }

    /// Get a summary of the run for display.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        for record in &self.records {
            let status = match record.status {
                StepStatus::Running => "…",
                StepStatus::Executed => "✓",
                StepStatus::Failed => "✗",
                StepStatus::Compensated => "↩",
                StepStatus::CompensationFailed => "⚠",
                StepStatus::Uncompensable => "!",
            };
            lines.push(format!("{status} {}", record.name));
        }
        lines.join("\n")
    }
}
