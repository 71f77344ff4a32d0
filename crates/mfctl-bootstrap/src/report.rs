use crate::stage::Stage;

/// What happened to one stage during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// The checkpoint already marked the stage done; nothing was executed.
    AlreadyDone,
    /// The stage ran and its checkpoint now holds this value.
    Completed(String),
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub stage: Stage,
    pub outcome: StageOutcome,
}

/// Result of one orchestrator run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Stages examined this run, in order. Empty when the framework was
    /// already ready.
    pub stages: Vec<StageReport>,
    /// `status = ready` is recorded.
    pub ready: bool,
    /// The status was already ready when the run started.
    pub was_ready: bool,
    /// Stage whose failure ended the run early.
    pub halted_at: Option<Stage>,
}

impl BootstrapReport {
    pub(crate) fn already_ready() -> Self {
        Self {
            ready: true,
            was_ready: true,
            ..Self::default()
        }
    }

    pub(crate) fn push(&mut self, stage: Stage, outcome: StageOutcome) {
        self.stages.push(StageReport { stage, outcome });
    }

    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages.iter().find(|r| r.stage == stage).map(|r| &r.outcome)
    }

    /// Failed stages with their reasons.
    pub fn failures(&self) -> impl Iterator<Item = (Stage, &str)> {
        self.stages.iter().filter_map(|r| match &r.outcome {
            StageOutcome::Failed { reason } => Some((r.stage, reason.as_str())),
            _ => None,
        })
    }

    pub fn is_success(&self) -> bool {
        self.ready && self.halted_at.is_none()
    }
}
