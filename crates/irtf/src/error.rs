use serde::Serialize;
use thiserror::Error;

use crate::channel::ChannelError;
use crate::ir::MatchReport;

/// Printed after a failure report unless the user already asked for more output.
pub const RERUN_HINT: &str = "\
#############################################################
 - To only run the failed tests use --test, --exclude,
   and/or --scenarios.
 - To also get the standard output of the test VM run with
   --report-stdout or for even more fine-grained logging
   use --verbose.
#############################################################
";

/// Closed classification of everything that can go wrong in a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Format,
    Infrastructure,
    Protocol,
    NoTestsRun,
    IrViolation,
    TestVm,
    FlagVm,
}

#[derive(Debug, Error)]
pub enum ScenarioFailure {
    #[error("test format violation\n\n{violations}")]
    Format { violations: String },

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("failed to execute TestFramework {vm}: {detail}")]
    Launch { vm: &'static str, detail: String },

    #[error("TestFramework flag VM exited with {exit_code}")]
    FlagVm { exit_code: i32, output: String },

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error(
        ">>> No tests run due to empty set specified with --test and/or --exclude. \
         Make sure to select at least one test method"
    )]
    NoTestsRun,

    #[error("{violations}")]
    IrViolation {
        violations: String,
        /// Command line of the test VM and, when applicable, the re-run hint.
        info: String,
        compilations: String,
        report: Box<MatchReport>,
    },

    #[error("{info}")]
    TestVm { exit_code: i32, info: String },

    #[error("cannot read diagnostic log {path}: {detail}")]
    LogUnreadable { path: String, detail: String },
}

impl ScenarioFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            ScenarioFailure::Format { .. } => FailureKind::Format,
            ScenarioFailure::Channel(_)
            | ScenarioFailure::Launch { .. }
            | ScenarioFailure::LogUnreadable { .. } => FailureKind::Infrastructure,
            ScenarioFailure::FlagVm { .. } => FailureKind::FlagVm,
            ScenarioFailure::Protocol(_) => FailureKind::Protocol,
            ScenarioFailure::NoTestsRun => FailureKind::NoTestsRun,
            ScenarioFailure::IrViolation { .. } => FailureKind::IrViolation,
            ScenarioFailure::TestVm { .. } => FailureKind::TestVm,
        }
    }

    /// Full report text: the headline plus any captured process detail.
    pub fn detail(&self) -> String {
        match self {
            ScenarioFailure::IrViolation {
                violations, info, ..
            } => format!("{info}{violations}"),
            ScenarioFailure::FlagVm { exit_code, output } => format!(
                "TestFramework flag VM exited with {exit_code}\n\
                 --- OUTPUT TestFramework flag VM ---\n{output}"
            ),
            other => other.to_string(),
        }
    }

    pub fn match_report(&self) -> Option<&MatchReport> {
        match self {
            ScenarioFailure::IrViolation { report, .. } => Some(report.as_ref()),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum FrameworkError {
    #[error("test format violation: {0}")]
    Format(String),

    #[error("{0}")]
    Failed(ScenarioFailure),

    #[error(
        "The following scenarios have failed: #{}. Please check stderr for more information.",
        join_indices(.failed)
    )]
    ScenariosFailed {
        /// Failed scenario indices in ascending order.
        failed: Vec<u32>,
        /// Kind of the lowest-indexed failure.
        kind: FailureKind,
        rendered: String,
    },
}

impl FrameworkError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FrameworkError::Format(_) => FailureKind::Format,
            FrameworkError::Failed(f) => f.kind(),
            FrameworkError::ScenariosFailed { kind, .. } => *kind,
        }
    }

    pub fn is_format(&self) -> bool {
        self.kind() == FailureKind::Format
    }
}

impl From<ScenarioFailure> for FrameworkError {
    fn from(f: ScenarioFailure) -> Self {
        match f {
            ScenarioFailure::Format { violations } => FrameworkError::Format(violations),
            other => FrameworkError::Failed(other),
        }
    }
}

fn join_indices(indices: &[u32]) -> String {
    indices
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", #")
}
