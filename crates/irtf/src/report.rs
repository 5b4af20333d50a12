//! Machine-readable run report (`irtf.report@0.1.0`).

use base64::Engine;
use irtf_contracts::{IRTF_MATCH_REPORT_SCHEMA_VERSION, IRTF_REPORT_SCHEMA_VERSION};
use serde::Serialize;

use crate::config::FrameworkConfig;
use crate::error::{FailureKind, FrameworkError};
use crate::framework::{FailureSummary, ScenarioOutcome, ScenarioState, Verdict};
use crate::ir::MatchReport;

#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub version: String,
}

impl Default for ToolInfo {
    fn default() -> Self {
        Self {
            name: "irtf".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Summary {
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub disabled: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestVmSection {
    pub exit_code: i32,
    pub pid: u32,
    pub command: Vec<String>,
    pub log_path: String,
    pub stdout_b64: String,
    pub stderr_b64: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    pub flags: Vec<String>,
    pub verdict: Verdict,
    pub states: Vec<ScenarioState>,
    pub verify_ir: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag_vm_command: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_vm: Option<TestVmSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ir: Option<MatchReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorSection {
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub schema_version: String,
    pub tool: ToolInfo,
    pub ok: bool,
    pub test_class: String,
    pub config: FrameworkConfig,
    pub summary: Summary,
    pub scenarios: Vec<ScenarioReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorSection>,
}

fn command_argv(cmd: &irtf_runner_common::CommandLine) -> Vec<String> {
    let mut argv = vec![cmd.program.display().to_string()];
    argv.extend(cmd.args.iter().cloned());
    argv
}

impl ScenarioReport {
    pub fn from_outcome(o: &ScenarioOutcome) -> Self {
        let b64 = base64::engine::general_purpose::STANDARD;
        Self {
            index: o.index,
            flags: o.flags.clone(),
            verdict: o.verdict,
            states: o.states.clone(),
            verify_ir: o.verify_ir,
            flag_vm_command: o.flag_vm_command.as_ref().map(command_argv),
            test_vm: o.test_vm.as_ref().map(|t| TestVmSection {
                exit_code: t.exit_code,
                pid: t.pid,
                command: command_argv(&t.command),
                log_path: t.log_path.display().to_string(),
                stdout_b64: b64.encode(t.stdout.as_bytes()),
                stderr_b64: b64.encode(t.stderr.as_bytes()),
            }),
            ir: o.match_report.clone(),
            failure: o.failure.clone(),
        }
    }
}

impl RunReport {
    pub fn build(
        test_class: &str,
        config: &FrameworkConfig,
        outcomes: &[ScenarioOutcome],
        result: &Result<(), FrameworkError>,
    ) -> Self {
        let mut summary = Summary::default();
        for o in outcomes {
            match o.verdict {
                Verdict::Passed => summary.passed += 1,
                Verdict::Failed => summary.failed += 1,
                Verdict::Skipped => summary.skipped += 1,
                Verdict::Disabled => summary.disabled += 1,
            }
        }
        Self {
            schema_version: IRTF_REPORT_SCHEMA_VERSION.to_string(),
            tool: ToolInfo::default(),
            ok: result.is_ok(),
            test_class: test_class.to_string(),
            config: config.clone(),
            summary,
            scenarios: outcomes.iter().map(ScenarioReport::from_outcome).collect(),
            error: result.as_ref().err().map(|err| ErrorSection {
                kind: err.kind(),
                message: err.to_string(),
            }),
        }
    }
}

/// Report of an offline `irtf match` run.
#[derive(Debug, Clone, Serialize)]
pub struct MatchOnlyReport {
    pub schema_version: String,
    pub tool: ToolInfo,
    pub ok: bool,
    pub ir: MatchReport,
}

impl MatchOnlyReport {
    pub fn new(ir: MatchReport) -> Self {
        Self {
            schema_version: IRTF_MATCH_REPORT_SCHEMA_VERSION.to_string(),
            tool: ToolInfo::default(),
            ok: ir.passed(),
            ir,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use irtf_runner_common::CommandLine;

    use super::*;
    use crate::test_vm::TestVmOutput;

    fn outcome(verdict: Verdict) -> ScenarioOutcome {
        let mut command = CommandLine::new("java");
        command.arg("Main");
        ScenarioOutcome {
            index: Some(1),
            flags: vec!["-Xbatch".to_string()],
            verdict,
            states: vec![ScenarioState::NotStarted, ScenarioState::ChannelClosed],
            verify_ir: false,
            flag_vm_command: None,
            test_vm: Some(TestVmOutput {
                scenario: Some(1),
                command,
                pid: 7,
                exit_code: 0,
                stdout: "hi\n".to_string(),
                stderr: String::new(),
                log_path: PathBuf::from("/w/hotspot_pid7.log"),
            }),
            match_report: None,
            failure: None,
        }
    }

    #[test]
    fn report_counts_verdicts_and_encodes_streams() {
        let outcomes = vec![outcome(Verdict::Passed), outcome(Verdict::Disabled)];
        let report = RunReport::build("T", &FrameworkConfig::default(), &outcomes, &Ok(()));
        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["schema_version"], "irtf.report@0.1.0");
        assert_eq!(v["ok"], true);
        assert_eq!(v["summary"]["passed"], 1);
        assert_eq!(v["summary"]["disabled"], 1);
        assert_eq!(v["scenarios"][0]["verdict"], "passed");
        assert_eq!(v["scenarios"][0]["states"][1], "channel_closed");
        assert_eq!(v["scenarios"][0]["test_vm"]["stdout_b64"], "aGkK");
        assert_eq!(v["scenarios"][0]["test_vm"]["command"][1], "Main");
        assert!(v.get("error").is_none());
    }

    #[test]
    fn failed_run_carries_error_kind() {
        let result = Err(FrameworkError::ScenariosFailed {
            failed: vec![1],
            kind: FailureKind::Protocol,
            rendered: String::new(),
        });
        let report = RunReport::build(
            "T",
            &FrameworkConfig::default(),
            &[outcome(Verdict::Failed)],
            &result,
        );
        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["ok"], false);
        assert_eq!(v["summary"]["failed"], 1);
        assert_eq!(v["error"]["kind"], "protocol");
    }
}
