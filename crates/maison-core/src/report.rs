use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of one schema step. A step that found its invariant already
/// holding reports `Skipped`; a step that had to mutate the schema or the
/// data reports `Applied`; anything that went wrong is captured in
/// `Failed` instead of being raised at the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Applied,
    Skipped,
    Failed { reason: String },
}

impl StepOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, StepOutcome::Failed { .. })
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Applied => write!(f, "applied"),
            StepOutcome::Skipped => write!(f, "skipped"),
            StepOutcome::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    pub step: String,
    #[serde(flatten)]
    pub outcome: StepOutcome,
    /// Diagnostic detail accumulated while the step ran: dropped stale
    /// staging columns, count mismatches, per-row write failures.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl StepReport {
    pub fn applied(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            outcome: StepOutcome::Applied,
            notes: Vec::new(),
        }
    }

    pub fn skipped(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            outcome: StepOutcome::Skipped,
            notes: Vec::new(),
        }
    }

    pub fn failed(step: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            outcome: StepOutcome::Failed {
                reason: reason.into(),
            },
            notes: Vec::new(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn push_note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }
}

/// Aggregated result of one healer run, one entry per step in execution
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealReport {
    pub steps: Vec<StepReport>,
}

impl HealReport {
    pub fn push(&mut self, step: StepReport) {
        self.steps.push(step);
    }

    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find(|step| step.step == name)
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepReport> {
        self.steps.iter().filter(|step| step.outcome.is_failure())
    }

    pub fn fully_healthy(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn applied_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|step| step.outcome == StepOutcome::Applied)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_lookup_and_health() {
        let mut report = HealReport::default();
        report.push(StepReport::applied("slug_column"));
        report.push(StepReport::skipped("listing_type_column"));
        assert!(report.fully_healthy());
        assert_eq!(report.applied_count(), 1);

        report.push(StepReport::failed("price_text_migration", "disk I/O error"));
        assert!(!report.fully_healthy());
        let failed: Vec<_> = report.failures().map(|step| step.step.as_str()).collect();
        assert_eq!(failed, vec!["price_text_migration"]);
        assert!(report.step("slug_column").is_some());
        assert!(report.step("missing").is_none());
    }

    #[test]
    fn report_serializes_with_snake_case_tags() {
        let report = StepReport::failed("price_text_migration", "boom").with_note("restore rename failed");
        let json = serde_json::to_string(&report).expect("serialize");
        assert!(json.contains("\"outcome\":\"failed\""));
        assert!(json.contains("\"reason\":\"boom\""));
        assert!(json.contains("restore rename failed"));

        let skipped = serde_json::to_string(&StepReport::skipped("slug_column")).expect("serialize");
        assert!(skipped.contains("\"outcome\":\"skipped\""));
        assert!(!skipped.contains("notes"));

        let back: StepReport = serde_json::from_str(&json).expect("deserialize");
        assert!(back.outcome.is_failure());
    }
}
