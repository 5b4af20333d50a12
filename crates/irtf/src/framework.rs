//! The driver: runs the flag VM and the test VM once per scenario and aggregates the outcome.

use std::fmt;
use std::time::Duration;

use irtf_runner_common::CommandLine;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::config::{FrameworkConfig, VmConfig};
use crate::error::{FailureKind, FrameworkError, ScenarioFailure, RERUN_HINT};
use crate::flag_vm::{flag_vm_command, run_flag_vm, verification_blocker};
use crate::ir::render::{render_failed_compilations, render_violations};
use crate::ir::{match_records, read_log, MatchReport};
use crate::launcher::{SystemLauncher, VmLauncher};
use crate::manifest::RuleSource;
use crate::scenario::Scenario;
use crate::test_vm::{
    classify_exit, read_test_vm_channel, run_test_vm, test_vm_command, test_vm_flags,
    TestVmInvocation, TestVmOutput,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioState {
    NotStarted,
    ChannelOpen,
    FlagVmRunning,
    FlagVmDone,
    FlagVmFailed,
    TestVmRunning,
    TestVmDone,
    TestVmFailed,
    Verifying,
    VerificationSkipped,
    Passed,
    Failed,
    Skipped,
    ChannelClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Failed,
    /// The test VM found no test to run.
    Skipped,
    /// Not selected; no child was launched.
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureSummary {
    pub kind: FailureKind,
    pub message: String,
    pub detail: String,
}

/// What happened in one scenario (or in the single run when no scenarios were added).
#[derive(Debug, Clone)]
pub struct ScenarioOutcome {
    pub index: Option<u32>,
    pub flags: Vec<String>,
    pub verdict: Verdict,
    pub states: Vec<ScenarioState>,
    /// Whether IR verification was still on when the test VM ran.
    pub verify_ir: bool,
    pub flag_vm_command: Option<CommandLine>,
    pub test_vm: Option<TestVmOutput>,
    pub match_report: Option<MatchReport>,
    pub failure: Option<FailureSummary>,
}

impl ScenarioOutcome {
    fn new(index: Option<u32>, flags: Vec<String>) -> Self {
        Self {
            index,
            flags,
            verdict: Verdict::Passed,
            states: Vec::new(),
            verify_ir: false,
            flag_vm_command: None,
            test_vm: None,
            match_report: None,
            failure: None,
        }
    }

    fn enter(&mut self, state: ScenarioState) {
        debug!(scenario = ?self.index, ?state, "scenario state");
        self.states.push(state);
    }
}

pub struct TestFramework<'s> {
    source: &'s dyn RuleSource,
    vm: VmConfig,
    cfg: FrameworkConfig,
    launcher: Box<dyn VmLauncher + 's>,
    flags: Vec<String>,
    helper_classes: Vec<String>,
    scenarios: Option<Vec<Scenario>>,
    default_warmup: Option<u32>,
    last_test_vm_output: Option<String>,
    outcomes: Vec<ScenarioOutcome>,
}

impl fmt::Debug for TestFramework<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestFramework")
            .field("test_class", &self.source.test_class())
            .field("flags", &self.flags)
            .field("helper_classes", &self.helper_classes)
            .field("scenarios", &self.scenarios)
            .field("default_warmup", &self.default_warmup)
            .finish_non_exhaustive()
    }
}

impl<'s> TestFramework<'s> {
    pub fn new(source: &'s dyn RuleSource, vm: VmConfig, cfg: FrameworkConfig) -> Self {
        let mut helper_classes: Vec<String> = Vec::new();
        for h in source.helper_classes() {
            if !helper_classes.contains(h) {
                helper_classes.push(h.clone());
            }
        }
        Self {
            source,
            vm,
            cfg,
            launcher: Box::new(SystemLauncher::default()),
            flags: Vec::new(),
            helper_classes,
            scenarios: None,
            default_warmup: None,
            last_test_vm_output: None,
            outcomes: Vec::new(),
        }
    }

    pub fn with_launcher(mut self, launcher: impl VmLauncher + 's) -> Self {
        self.launcher = Box::new(launcher);
        self
    }

    /// Flags given to both children of every scenario.
    pub fn add_flags<I, S>(&mut self, flags: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flags.extend(flags.into_iter().map(Into::into));
        self
    }

    pub fn add_helper_classes<I, S>(&mut self, classes: I) -> Result<&mut Self, FrameworkError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for class in classes {
            let class = class.into();
            if class == self.source.test_class() {
                return Err(FrameworkError::Format(format!(
                    "Cannot specify test class {class} as helper class, too"
                )));
            }
            if !self.helper_classes.contains(&class) {
                self.helper_classes.push(class);
            }
        }
        Ok(self)
    }

    pub fn add_scenarios<I>(&mut self, scenarios: I) -> Result<&mut Self, FrameworkError>
    where
        I: IntoIterator<Item = Scenario>,
    {
        let list = self.scenarios.get_or_insert_with(Vec::new);
        for mut s in scenarios {
            if list.iter().any(|existing| existing.index() == s.index()) {
                return Err(FrameworkError::Format(format!(
                    "Cannot define two scenarios with the same index {}",
                    s.index()
                )));
            }
            if let Some(selected) = &self.cfg.scenarios {
                s.set_enabled(selected.contains(&s.index()));
            }
            list.push(s);
        }
        Ok(self)
    }

    pub fn set_default_warmup(&mut self, warmup: i64) -> Result<&mut Self, FrameworkError> {
        let warmup = u32::try_from(warmup).map_err(|_| {
            FrameworkError::Format(format!(
                "Cannot specify a negative default warm-up (got {warmup})"
            ))
        })?;
        self.default_warmup = Some(warmup);
        Ok(self)
    }

    /// Combined output of the most recent test VM run.
    pub fn last_test_vm_output(&self) -> Option<&str> {
        self.last_test_vm_output.as_deref()
    }

    pub fn scenarios(&self) -> &[Scenario] {
        self.scenarios.as_deref().unwrap_or(&[])
    }

    /// Outcomes of the last [`TestFramework::start`], in run order.
    pub fn outcomes(&self) -> &[ScenarioOutcome] {
        &self.outcomes
    }

    pub fn start(&mut self) -> Result<(), FrameworkError> {
        self.outcomes.clear();
        self.last_test_vm_output = None;
        if let Some(list) = self.scenarios.as_mut() {
            for s in list.iter_mut() {
                s.reset_output();
            }
        }
        self.check_scenario_selection()?;

        let verify_ir = match verification_blocker(&self.cfg, &self.vm, self.source) {
            Some(reason) => {
                println!("{reason}");
                false
            }
            None => true,
        };
        info!(test_class = self.source.test_class(), verify_ir, "starting test framework");

        if self.scenarios.is_none() {
            return self.start_single(verify_ir);
        }
        self.start_with_scenarios(verify_ir)
    }

    fn check_scenario_selection(&self) -> Result<(), FrameworkError> {
        let (Some(selected), Some(list)) = (&self.cfg.scenarios, &self.scenarios) else {
            return Ok(());
        };
        for idx in selected {
            if !list.iter().any(|s| s.index() == *idx) {
                return Err(FrameworkError::Format(format!(
                    "Selected scenario #{idx} is not defined"
                )));
            }
        }
        Ok(())
    }

    fn start_single(&mut self, verify_ir: bool) -> Result<(), FrameworkError> {
        let (outcome, failure) = self.run_scenario(None, Vec::new(), verify_ir);
        self.outcomes.push(outcome);
        let Some(failure) = failure else {
            return Ok(());
        };
        match &failure {
            ScenarioFailure::TestVm { info, .. } => eprintln!("\n{info}"),
            ScenarioFailure::IrViolation {
                violations,
                info,
                compilations,
                ..
            } => {
                println!("Compilation(s) of failed match(es):");
                println!("{compilations}");
                eprintln!("\n{info}{violations}");
            }
            other => eprintln!("{}", other.detail()),
        }
        Err(FrameworkError::from(failure))
    }

    fn start_with_scenarios(&mut self, verify_ir: bool) -> Result<(), FrameworkError> {
        let plan: Vec<(u32, Vec<String>, bool)> = self
            .scenarios()
            .iter()
            .map(|s| (s.index(), s.flags().to_vec(), s.is_enabled()))
            .collect();

        let mut failed: Vec<(u32, ScenarioFailure)> = Vec::new();
        for (index, flags, enabled) in plan {
            if !enabled {
                println!(
                    "Disabled scenario #{index}! This scenario is not present in the scenario \
                     selection and is therefore not executed."
                );
                let mut outcome = ScenarioOutcome::new(Some(index), flags);
                outcome.verdict = Verdict::Disabled;
                self.outcomes.push(outcome);
                continue;
            }
            let (outcome, failure) = self.run_scenario(Some(index), flags, verify_ir);
            self.outcomes.push(outcome);
            match failure {
                // Format violations are wrong for every scenario; report once.
                Some(f) if f.kind() == FailureKind::Format => return Err(FrameworkError::from(f)),
                Some(f) => failed.push((index, f)),
                None => {}
            }
        }

        if failed.is_empty() {
            return Ok(());
        }
        failed.sort_by_key(|(idx, _)| *idx);
        let rendered = self.render_scenario_failures(&failed);
        eprintln!("{rendered}");
        if !self.cfg.verbose
            && !self.cfg.report_stdout
            && !self.cfg.has_test_list()
            && !self.cfg.has_exclude_list()
        {
            eprintln!("{RERUN_HINT}");
        }
        Err(FrameworkError::ScenariosFailed {
            failed: failed.iter().map(|(idx, _)| *idx).collect(),
            kind: failed[0].1.kind(),
            rendered,
        })
    }

    fn render_scenario_failures(&self, failed: &[(u32, ScenarioFailure)]) -> String {
        let indices = failed
            .iter()
            .map(|(idx, _)| idx.to_string())
            .collect::<Vec<_>>()
            .join(", #");
        let mut out = format!("The following scenarios have failed: #{indices}\n\n");
        for (idx, failure) in failed {
            if let Some(s) = self.scenarios().iter().find(|s| s.index() == *idx) {
                out.push_str(&s.title_and_flags());
            }
            out.push('\n');
            if let ScenarioFailure::IrViolation { compilations, .. } = failure {
                println!("Scenario #{idx} - Compilation(s) of failed match(es):");
                println!("{compilations}");
            }
            out.push_str(&failure.detail());
            out.push('\n');
        }
        out
    }

    fn run_scenario(
        &mut self,
        index: Option<u32>,
        scenario_flags: Vec<String>,
        verify_ir: bool,
    ) -> (ScenarioOutcome, Option<ScenarioFailure>) {
        let mut flags = self.flags.clone();
        if let Some(idx) = index {
            if scenario_flags.is_empty() {
                println!("Scenario #{idx}:");
            } else {
                println!("Scenario #{idx} - [{}]:", scenario_flags.join(", "));
            }
        }
        flags.extend(scenario_flags.iter().cloned());

        let mut outcome = ScenarioOutcome::new(index, scenario_flags);
        outcome.enter(ScenarioState::NotStarted);

        let result = match Channel::open(Duration::from_millis(self.cfg.channel_timeout_ms)) {
            Ok(mut channel) => {
                outcome.enter(ScenarioState::ChannelOpen);
                let result = self.execute(&mut channel, index, &flags, verify_ir, &mut outcome);
                channel.close();
                result
            }
            Err(err) => Err(ScenarioFailure::from(err)),
        };

        let failure = match result {
            Ok(verdict) => {
                outcome.verdict = verdict;
                None
            }
            Err(failure) => {
                outcome.verdict = Verdict::Failed;
                warn!(scenario = ?index, kind = ?failure.kind(), "scenario failed");
                outcome.failure = Some(FailureSummary {
                    kind: failure.kind(),
                    message: failure.to_string(),
                    detail: failure.detail(),
                });
                if let Some(report) = failure.match_report() {
                    outcome.match_report = Some(report.clone());
                }
                Some(failure)
            }
        };
        outcome.enter(match outcome.verdict {
            Verdict::Failed => ScenarioState::Failed,
            Verdict::Skipped => ScenarioState::Skipped,
            _ => ScenarioState::Passed,
        });
        outcome.enter(ScenarioState::ChannelClosed);
        println!();
        (outcome, failure)
    }

    fn execute(
        &mut self,
        channel: &mut Channel,
        index: Option<u32>,
        flags: &[String],
        verify_ir: bool,
        outcome: &mut ScenarioOutcome,
    ) -> Result<Verdict, ScenarioFailure> {
        let source = self.source;
        let mut verify = verify_ir;
        let mut answer = None;

        if verify {
            println!("Run Flag VM:");
            outcome.enter(ScenarioState::FlagVmRunning);
            let cmd = flag_vm_command(
                &self.vm,
                &channel.property_flag(),
                flags,
                source.test_class(),
            );
            outcome.flag_vm_command = Some(cmd.clone());
            match run_flag_vm(self.launcher.as_mut(), &cmd, channel, self.cfg.verbose) {
                Ok(a) => {
                    outcome.enter(ScenarioState::FlagVmDone);
                    verify = a.should_verify_ir;
                    answer = Some(a);
                }
                Err(err) => {
                    outcome.enter(ScenarioState::FlagVmFailed);
                    return Err(err);
                }
            }
        } else {
            println!("Skip Flag VM due to not performing IR verification.");
        }
        outcome.verify_ir = verify;

        if flags.is_empty() {
            println!("Run Test VM:");
        } else {
            println!("Run Test VM - [{}]:", flags.join(", "));
        }
        outcome.enter(ScenarioState::TestVmRunning);
        let tv_flags = test_vm_flags(&self.cfg, &self.vm, answer.as_ref());
        let cmd = test_vm_command(&TestVmInvocation {
            cfg: &self.cfg,
            vm: &self.vm,
            channel_flag: &channel.property_flag(),
            flags,
            test_vm_flags: &tv_flags,
            default_warmup: self.default_warmup,
            test_class: source.test_class(),
            helper_classes: &self.helper_classes,
        });
        let out = match run_test_vm(self.launcher.as_mut(), &cmd, channel, index) {
            Ok(out) => out,
            Err(err) => {
                outcome.enter(ScenarioState::TestVmFailed);
                return Err(err);
            }
        };

        let combined = out.combined();
        if let Some(idx) = index {
            if let Some(s) = self.scenarios().iter().find(|s| s.index() == idx) {
                s.record_output(combined.clone());
            }
        }
        self.last_test_vm_output = Some(combined.clone());
        outcome.test_vm = Some(out.clone());

        if self.cfg.exclude_random
            || self.cfg.report_stdout
            || (self.cfg.verbose && out.exit_code == 0)
        {
            println!("--- OUTPUT TestFramework test VM ---");
            println!("{combined}");
        }

        let strip_rerun_hint = index.is_some();
        let include_stdout = self.cfg.verbose || self.cfg.report_stdout;
        if let Err(err) = classify_exit(&out, strip_rerun_hint, include_stdout) {
            outcome.enter(ScenarioState::TestVmFailed);
            if err.kind() == FailureKind::NoTestsRun {
                println!("{err}");
                outcome.verify_ir = false;
                outcome.enter(ScenarioState::VerificationSkipped);
                return Ok(Verdict::Skipped);
            }
            return Err(err);
        }
        outcome.enter(ScenarioState::TestVmDone);

        let channel_text = if verify || self.cfg.has_test_list() || self.cfg.has_exclude_list() {
            read_test_vm_channel(channel)?
        } else {
            String::new()
        };

        if !verify {
            outcome.enter(ScenarioState::VerificationSkipped);
            println!(
                "IR verification disabled either due to no IR rules, through explicitly disabling \
                 verification, due to not running a debug build, using a non-whitelisted VM \
                 option like -Xint, or running the test VM with other VM flags added by user code \
                 that make the IR verification impossible (e.g. -XX:-UseCompiler, \
                 -XX:TieredStopAtLevel=[1,2,3], etc.)."
            );
            return Ok(Verdict::Passed);
        }

        outcome.enter(ScenarioState::Verifying);
        let records = read_log(&out.log_path).map_err(|err| ScenarioFailure::LogUnreadable {
            path: out.log_path.display().to_string(),
            detail: err.root_cause().to_string(),
        })?;
        let report = match_records(source, &records, &channel_text)
            .map_err(|err| ScenarioFailure::Protocol(err.to_string()))?;
        debug!(
            methods = report.methods.len(),
            passed = report.passed(),
            "IR matching finished"
        );
        if report.passed() {
            outcome.match_report = Some(report);
            return Ok(Verdict::Passed);
        }
        Err(ScenarioFailure::IrViolation {
            violations: render_violations(&report),
            info: out.exception_info(strip_rerun_hint, false),
            compilations: render_failed_compilations(&report, &records),
            report: Box::new(report),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::path::{Path, PathBuf};
    use std::rc::Rc;

    use irtf_contracts::{hotspot_log_file_name, BLOCK_END, IR_ENCODING_START, SERVER_PORT_PROPERTY};
    use irtf_runner_common::ProcessOutput;

    use super::*;
    use crate::channel::send;
    use crate::flags::{render_flag_vm_answer, FlagVmAnswer};
    use crate::manifest::TestClassManifest;

    const MANIFEST: &str = r#"{
      "schema_version": "irtf.test_class@0.1.0",
      "test_class": "Demo",
      "methods": [
        {"name": "add", "rules": [
          {"index": 1, "compilers": ["c2"],
           "include": [{"regex": "AddI"}], "exclude": [{"regex": "CallStaticJava"}]}
        ]}
      ]
    }"#;

    const GOOD_LOG: &str = "<compilation compile_id='1' method='Demo::add (II)I' level='4'>\n\
                            <phase name='PrintIdeal'>\n 9 AddI\n</phase>\n</compilation>\n";

    /// Stand-in for the two child VMs. Flag and test behavior are keyed by the scenario flags
    /// found on the command line.
    #[derive(Clone)]
    struct FakeVms {
        work_dir: PathBuf,
        next_pid: Rc<RefCell<u32>>,
        launches: Rc<RefCell<Vec<CommandLine>>>,
    }

    impl FakeVms {
        fn new(work_dir: &Path) -> Self {
            Self {
                work_dir: work_dir.to_path_buf(),
                next_pid: Rc::new(RefCell::new(100)),
                launches: Rc::new(RefCell::new(Vec::new())),
            }
        }

        fn launched(&self) -> Vec<CommandLine> {
            self.launches.borrow().clone()
        }
    }

    fn has(cmd: &CommandLine, flag: &str) -> bool {
        cmd.args.iter().any(|a| a == flag)
    }

    impl VmLauncher for FakeVms {
        fn launch(
            &mut self,
            cmd: &CommandLine,
            channel: &mut Channel,
        ) -> anyhow::Result<ProcessOutput> {
            self.launches.borrow_mut().push(cmd.clone());
            let pid = {
                let mut p = self.next_pid.borrow_mut();
                *p += 1;
                *p
            };
            let port_prefix = format!("-D{SERVER_PORT_PROPERTY}=");
            let port: u16 = cmd
                .args
                .iter()
                .find_map(|a| a.strip_prefix(&port_prefix))
                .expect("port flag")
                .parse()?;
            let mut out = ProcessOutput {
                pid,
                exit_code: 0,
                exit_signal: None,
                stdout: String::new(),
                stderr: String::new(),
                stdout_truncated: false,
                stderr_truncated: false,
            };

            let is_flag_vm = has(cmd, irtf_contracts::DEFAULT_FLAG_VM_MAIN);
            if is_flag_vm {
                if has(cmd, "-DFake.noToken") {
                    send(port, "garbage\n")?;
                } else if has(cmd, "-DFake.silent") {
                    // Exits cleanly without ever connecting.
                } else {
                    let answer = FlagVmAnswer {
                        should_verify_ir: !has(cmd, "-DFake.disableIr"),
                        test_vm_flags: vec!["-XX:+PrintIdeal".to_string()],
                    };
                    send(port, &render_flag_vm_answer(&answer))?;
                }
            } else {
                out.stdout = "Run test: add\n".to_string();
                if has(cmd, "-DFake.crash") {
                    out.exit_code = 134;
                    out.stderr = "# A fatal error has been detected\n".to_string();
                } else if has(cmd, "-DFake.noTests") {
                    out.exit_code = 1;
                    out.stderr = "NoTestsRunException".to_string();
                } else if has(cmd, "-DFake.format") {
                    out.exit_code = 1;
                    out.stderr =
                        "TestFormat.reportIfAnyFailures\nViolations (1)\n - bad\n/============/\n"
                            .to_string();
                } else {
                    let log = if has(cmd, "-DFake.badIr") {
                        GOOD_LOG.replace("AddI", "CallStaticJava")
                    } else {
                        GOOD_LOG.to_string()
                    };
                    if !has(cmd, "-DFake.noLog") {
                        std::fs::write(self.work_dir.join(hotspot_log_file_name(pid)), log)?;
                    }
                    send(
                        port,
                        &format!(
                            "[STDOUT] Run test: add\n{IR_ENCODING_START}\nadd,1\n{BLOCK_END}\n"
                        ),
                    )?;
                }
            }
            channel.pump()?;
            Ok(out)
        }
    }

    fn framework<'s>(
        source: &'s TestClassManifest,
        dir: &Path,
        cfg: FrameworkConfig,
    ) -> (TestFramework<'s>, FakeVms) {
        let fake = FakeVms::new(dir);
        let vm = VmConfig::new("java", dir);
        let cfg = FrameworkConfig {
            channel_timeout_ms: 2_000,
            ..cfg
        };
        (
            TestFramework::new(source, vm, cfg).with_launcher(fake.clone()),
            fake,
        )
    }

    fn manifest() -> TestClassManifest {
        TestClassManifest::from_json_str(MANIFEST).unwrap()
    }

    #[test]
    fn single_run_passes_and_records_state_trail() {
        let dir = tempfile::tempdir().unwrap();
        let source = manifest();
        let (mut fw, fake) = framework(&source, dir.path(), FrameworkConfig::default());
        fw.start().unwrap();

        let outcome = &fw.outcomes()[0];
        assert_eq!(outcome.verdict, Verdict::Passed);
        assert_eq!(
            outcome.states,
            vec![
                ScenarioState::NotStarted,
                ScenarioState::ChannelOpen,
                ScenarioState::FlagVmRunning,
                ScenarioState::FlagVmDone,
                ScenarioState::TestVmRunning,
                ScenarioState::TestVmDone,
                ScenarioState::Verifying,
                ScenarioState::Passed,
                ScenarioState::ChannelClosed,
            ]
        );
        assert!(outcome.match_report.as_ref().unwrap().passed());
        assert_eq!(fake.launched().len(), 2);
        assert!(has(&fake.launched()[1], "-XX:+PrintIdeal"));
        assert_eq!(fw.last_test_vm_output(), Some("Run test: add\n"));
    }

    #[test]
    fn disabled_verification_skips_matcher_and_passes() {
        let dir = tempfile::tempdir().unwrap();
        let source = manifest();
        let (mut fw, _fake) = framework(&source, dir.path(), FrameworkConfig::default());
        fw.add_flags(["-DFake.disableIr", "-DFake.badIr"]);
        fw.start().unwrap();
        let outcome = &fw.outcomes()[0];
        assert!(!outcome.verify_ir);
        assert!(outcome.match_report.is_none());
        assert!(outcome.states.contains(&ScenarioState::VerificationSkipped));
        assert!(!outcome.states.contains(&ScenarioState::Verifying));
    }

    #[test]
    fn missing_token_is_protocol_failure() {
        let dir = tempfile::tempdir().unwrap();
        let source = manifest();
        let (mut fw, fake) = framework(&source, dir.path(), FrameworkConfig::default());
        fw.add_flags(["-DFake.noToken"]);
        let err = fw.start().unwrap_err();
        assert_eq!(err.kind(), FailureKind::Protocol);
        assert_eq!(fake.launched().len(), 1);
        assert!(fw.outcomes()[0].states.contains(&ScenarioState::FlagVmFailed));
    }

    #[test]
    fn silent_flag_vm_is_protocol_failure() {
        let dir = tempfile::tempdir().unwrap();
        let source = manifest();
        let (mut fw, fake) = framework(&source, dir.path(), FrameworkConfig::default());
        fw.add_flags(["-DFake.silent"]);
        let err = fw.start().unwrap_err();
        assert_eq!(err.kind(), FailureKind::Protocol);
        assert!(err
            .to_string()
            .contains("flag VM exited 0 without sending its flag encoding"));
        assert_eq!(fake.launched().len(), 1);
    }

    #[test]
    fn ir_violation_fails_single_run() {
        let dir = tempfile::tempdir().unwrap();
        let source = manifest();
        let (mut fw, _fake) = framework(&source, dir.path(), FrameworkConfig::default());
        fw.add_flags(["-DFake.badIr"]);
        let err = fw.start().unwrap_err();
        assert_eq!(err.kind(), FailureKind::IrViolation);
        let text = err.to_string();
        assert!(text.contains("include \"AddI\""));
        assert!(text.contains("exclude \"CallStaticJava\""));
    }

    #[test]
    fn missing_log_is_infrastructure_failure() {
        let dir = tempfile::tempdir().unwrap();
        let source = manifest();
        let (mut fw, _fake) = framework(&source, dir.path(), FrameworkConfig::default());
        fw.add_flags(["-DFake.noLog"]);
        let err = fw.start().unwrap_err();
        assert_eq!(err.kind(), FailureKind::Infrastructure);
        let text = err.to_string();
        assert!(text.contains("cannot read diagnostic log"));
        assert!(text.contains(&hotspot_log_file_name(102)));
        assert!(!text.contains("read diagnostic log:"));
        assert!(fw.outcomes()[0].states.contains(&ScenarioState::Verifying));
    }

    #[test]
    fn scenarios_run_in_order_and_aggregate() {
        let dir = tempfile::tempdir().unwrap();
        let source = manifest();
        let cfg = FrameworkConfig {
            scenarios: Some(vec![0, 1]),
            ..FrameworkConfig::default()
        };
        let (mut fw, fake) = framework(&source, dir.path(), cfg);
        fw.add_scenarios([
            Scenario::new(0, ["-DFake.badIr"]),
            Scenario::new(2, ["-Xbatch"]),
            Scenario::new(1, Vec::<String>::new()),
        ])
        .unwrap();
        let err = fw.start().unwrap_err();
        match &err {
            FrameworkError::ScenariosFailed {
                failed,
                kind,
                rendered,
            } => {
                assert_eq!(failed, &vec![0]);
                assert_eq!(*kind, FailureKind::IrViolation);
                assert!(
                    rendered.contains("Scenario #0\n===========\nScenario flags: [-DFake.badIr]")
                );
                assert!(rendered.contains("expected but absent"));
                assert!(!rendered.contains("Scenario #1"));
            }
            other => panic!("unexpected {other:?}"),
        }
        let verdicts: Vec<_> = fw.outcomes().iter().map(|o| (o.index, o.verdict)).collect();
        assert_eq!(
            verdicts,
            vec![
                (Some(0), Verdict::Failed),
                (Some(2), Verdict::Disabled),
                (Some(1), Verdict::Passed),
            ]
        );
        // Two children per enabled scenario, none for the disabled one.
        assert_eq!(fake.launched().len(), 4);
        assert!(!fake.launched().iter().any(|c| has(c, "-Xbatch")));
        assert!(fw.scenarios()[0].test_vm_output().is_some());
        assert!(fw.scenarios()[1].test_vm_output().is_none());
    }

    #[test]
    fn aggregated_failures_are_ordered_by_index() {
        let dir = tempfile::tempdir().unwrap();
        let source = manifest();
        let (mut fw, _fake) = framework(&source, dir.path(), FrameworkConfig::default());
        fw.add_scenarios([
            Scenario::new(1, ["-DFake.crash"]),
            Scenario::new(0, ["-DFake.badIr"]),
        ])
        .unwrap();
        let err = fw.start().unwrap_err();
        let FrameworkError::ScenariosFailed {
            failed,
            kind,
            rendered,
        } = &err
        else {
            panic!("unexpected {err:?}");
        };
        assert_eq!(failed, &vec![0, 1]);
        assert_eq!(*kind, FailureKind::IrViolation);
        assert!(rendered.starts_with("The following scenarios have failed: #0, #1\n"));
        let first = rendered.find("Scenario #0\n").unwrap();
        let second = rendered.find("Scenario #1\n").unwrap();
        assert!(first < second);
        assert!(err.to_string().contains("#0, #1."));

        let run_order: Vec<_> = fw.outcomes().iter().map(|o| o.index).collect();
        assert_eq!(run_order, vec![Some(1), Some(0)]);
    }

    #[test]
    fn format_violation_aborts_remaining_scenarios() {
        let dir = tempfile::tempdir().unwrap();
        let source = manifest();
        let (mut fw, fake) = framework(&source, dir.path(), FrameworkConfig::default());
        fw.add_scenarios([
            Scenario::new(0, ["-DFake.format"]),
            Scenario::new(1, Vec::<String>::new()),
        ])
        .unwrap();
        let err = fw.start().unwrap_err();
        assert!(err.is_format());
        assert!(err.to_string().contains("Violations (1)"));
        assert_eq!(fw.outcomes().len(), 1);
        assert_eq!(fake.launched().len(), 2);
    }

    #[test]
    fn no_tests_run_is_a_skip() {
        let dir = tempfile::tempdir().unwrap();
        let source = manifest();
        let (mut fw, _fake) = framework(&source, dir.path(), FrameworkConfig::default());
        fw.add_flags(["-DFake.noTests"]);
        fw.start().unwrap();
        let outcome = &fw.outcomes()[0];
        assert_eq!(outcome.verdict, Verdict::Skipped);
        assert_eq!(
            &outcome.states[outcome.states.len() - 3..],
            &[
                ScenarioState::VerificationSkipped,
                ScenarioState::Skipped,
                ScenarioState::ChannelClosed
            ]
        );
    }

    #[test]
    fn aborted_vm_reports_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let source = manifest();
        let (mut fw, _fake) = framework(&source, dir.path(), FrameworkConfig::default());
        fw.add_flags(["-DFake.crash"]);
        let err = fw.start().unwrap_err();
        assert_eq!(err.kind(), FailureKind::TestVm);
        let text = err.to_string();
        assert!(text.contains("exited with code 134"));
        assert!(text.contains("Standard Output\n---------------\nRun test: add"));
    }

    #[test]
    fn builder_rejects_format_errors() {
        let source = manifest();
        let mut fw =
            TestFramework::new(&source, VmConfig::new("java", "."), FrameworkConfig::default());
        assert!(fw.set_default_warmup(-1).unwrap_err().is_format());
        fw.set_default_warmup(0).unwrap();
        assert!(fw.add_helper_classes(["Demo"]).unwrap_err().is_format());
        fw.add_helper_classes(["H", "H", "I"]).unwrap();
        assert_eq!(fw.helper_classes, vec!["H", "I"]);
        fw.add_scenarios([Scenario::new(3, ["-Xbatch"])]).unwrap();
        assert!(fw
            .add_scenarios([Scenario::new(3, Vec::<String>::new())])
            .unwrap_err()
            .is_format());
    }

    #[test]
    fn unknown_selected_scenario_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = manifest();
        let cfg = FrameworkConfig {
            scenarios: Some(vec![5]),
            ..FrameworkConfig::default()
        };
        let (mut fw, fake) = framework(&source, dir.path(), cfg);
        fw.add_scenarios([Scenario::new(0, Vec::<String>::new())]).unwrap();
        assert!(fw.start().unwrap_err().is_format());
        assert!(fake.launched().is_empty());
    }
}
