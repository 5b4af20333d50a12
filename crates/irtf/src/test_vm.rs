//! The test VM: runs the test methods with the resolved flags and produces the diagnostic log.

use std::path::PathBuf;
use std::sync::OnceLock;

use irtf_contracts::{
    hotspot_log_file_name, ABORT_EXIT_CODE, FORMAT_VIOLATION_MARKER, FORMAT_VIOLATION_TERMINATOR,
    NO_TESTS_RUN_MARKER,
};
use irtf_runner_common::CommandLine;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::channel::Channel;
use crate::config::{FrameworkConfig, VmConfig};
use crate::error::{ScenarioFailure, RERUN_HINT};
use crate::flag_vm::{base_command, push_class_path_flags};
use crate::flags::{FlagVmAnswer, DEFAULT_TEST_VM_FLAGS, VERIFY_VM_FLAGS};
use crate::launcher::VmLauncher;

/// Everything captured from one test VM launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestVmOutput {
    pub scenario: Option<u32>,
    pub command: CommandLine,
    pub pid: u32,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// `hotspot_pid<pid>.log` in the child's working directory.
    pub log_path: PathBuf,
}

impl TestVmOutput {
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }

    pub fn command_line_block(&self) -> String {
        format!("Command Line:\n{}\n\n", self.command.display())
    }

    /// Failure detail shown to the user. Stdout is included for aborted VMs and when
    /// `include_stdout` is set; the re-run hint is left out for scenario runs, which print it
    /// once after the aggregated report.
    pub fn exception_info(&self, strip_rerun_hint: bool, include_stdout: bool) -> String {
        let aborted = self.exit_code == ABORT_EXIT_CODE;
        let rerun_hint = if strip_rerun_hint || aborted {
            ""
        } else {
            RERUN_HINT
        };
        if self.exit_code == 0 {
            return format!("{}{rerun_hint}", self.command_line_block());
        }
        let stdout = if aborted || include_stdout {
            format!("\n\nStandard Output\n---------------\n{}", self.combined())
        } else {
            String::new()
        };
        format!(
            "TestFramework test VM exited with code {}\n{stdout}\n{}\n\n\
             Error Output\n------------\n{}\n\n{rerun_hint}",
            self.exit_code,
            self.command_line_block(),
            self.stderr
        )
    }
}

/// Flags the test VM gets on top of the user's: self-verification, defaults and whatever the
/// flag VM resolved.
pub fn test_vm_flags(
    cfg: &FrameworkConfig,
    vm: &VmConfig,
    answer: Option<&FlagVmAnswer>,
) -> Vec<String> {
    let mut out = Vec::new();
    if cfg.verify_vm && vm.debug_build {
        out.extend(VERIFY_VM_FLAGS.iter().map(|f| f.to_string()));
    }
    out.extend(DEFAULT_TEST_VM_FLAGS.iter().map(|f| f.to_string()));
    if let Some(answer) = answer {
        out.extend(answer.test_vm_flags.iter().cloned());
    }
    out
}

pub struct TestVmInvocation<'a> {
    pub cfg: &'a FrameworkConfig,
    pub vm: &'a VmConfig,
    pub channel_flag: &'a str,
    /// Framework and scenario flags.
    pub flags: &'a [String],
    pub test_vm_flags: &'a [String],
    pub default_warmup: Option<u32>,
    pub test_class: &'a str,
    pub helper_classes: &'a [String],
}

pub fn test_vm_command(inv: &TestVmInvocation<'_>) -> CommandLine {
    let TestVmInvocation { cfg, vm, .. } = *inv;
    let mut cmd = base_command(vm);
    push_class_path_flags(&mut cmd, vm);
    if !cfg.prefer_command_line_flags {
        cmd.args(vm.test_java_opts.iter().cloned());
    }
    cmd.args(inv.flags.iter().cloned());
    cmd.args(inv.test_vm_flags.iter().cloned());
    if cfg.prefer_command_line_flags {
        cmd.args(vm.test_java_opts.iter().cloned());
    }

    if let Some(warmup) = cfg.warmup.or(inv.default_warmup) {
        cmd.arg(format!("-DWarmup={warmup}"));
    }
    if let Some(tests) = &cfg.test_list {
        cmd.arg(format!("-DTest={}", tests.join(",")));
    }
    if let Some(excluded) = &cfg.exclude_list {
        cmd.arg(format!("-DExclude={}", excluded.join(",")));
    }
    if cfg.exclude_random {
        cmd.arg("-DExcludeRandom=true");
    }
    if cfg.verbose {
        cmd.arg("-DVerbose=true");
    }

    cmd.arg(inv.channel_flag);
    cmd.arg(vm.test_vm_main.as_str()).arg(inv.test_class);
    cmd.args(inv.helper_classes.iter().cloned());
    cmd
}

/// Launches the test VM. The exit code is not interpreted here; see [`classify_exit`].
pub fn run_test_vm(
    launcher: &mut dyn VmLauncher,
    cmd: &CommandLine,
    channel: &mut Channel,
    scenario: Option<u32>,
) -> Result<TestVmOutput, ScenarioFailure> {
    channel.begin_session();
    debug!(command = %cmd.display(), "launching test VM");
    let out = launcher
        .launch(cmd, channel)
        .map_err(|err| ScenarioFailure::Launch {
            vm: "test VM",
            detail: format!("{err:#}"),
        })?;
    let work_dir = cmd.cwd.clone().unwrap_or_else(|| PathBuf::from("."));
    Ok(TestVmOutput {
        scenario,
        command: cmd.clone(),
        pid: out.pid,
        exit_code: out.exit_code,
        log_path: work_dir.join(hotspot_log_file_name(out.pid)),
        stdout: out.stdout,
        stderr: out.stderr,
    })
}

fn violations_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let pattern = format!(
            r"(Violations \(\d+\)[\s\S]*){}",
            regex::escape(FORMAT_VIOLATION_TERMINATOR)
        );
        Regex::new(&pattern).expect("valid violations regex")
    })
}

/// Maps a non-zero exit to its cause by scanning stderr. Exit 0 is `Ok`.
pub fn classify_exit(
    out: &TestVmOutput,
    strip_rerun_hint: bool,
    include_stdout: bool,
) -> Result<(), ScenarioFailure> {
    if out.exit_code == 0 {
        return Ok(());
    }
    if out.stderr.contains(FORMAT_VIOLATION_MARKER) {
        let caps = violations_re().captures(&out.stderr).ok_or_else(|| {
            ScenarioFailure::Protocol("Must find violation matches".to_string())
        })?;
        return Err(ScenarioFailure::Format {
            violations: caps[1].to_string(),
        });
    }
    if out.stderr.contains(NO_TESTS_RUN_MARKER) {
        return Err(ScenarioFailure::NoTestsRun);
    }
    Err(ScenarioFailure::TestVm {
        exit_code: out.exit_code,
        info: out.exception_info(strip_rerun_hint, include_stdout),
    })
}

/// Reads the test VM's channel payload, echoing `[STDOUT]` lines.
pub fn read_test_vm_channel(channel: &mut Channel) -> Result<String, ScenarioFailure> {
    Ok(channel.receive_split_stdout()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    fn output(exit_code: i32, stderr: &str) -> TestVmOutput {
        let mut command = CommandLine::new("java");
        command.arg("Main");
        TestVmOutput {
            scenario: None,
            command,
            pid: 42,
            exit_code,
            stdout: "Run test: test1\n".to_string(),
            stderr: stderr.to_string(),
            log_path: PathBuf::from("hotspot_pid42.log"),
        }
    }

    #[test]
    fn format_violation_excerpt_is_extracted() {
        let stderr = "Exception at TestFormat.reportIfAnyFailures\n\n\
                      One or more format violations have been detected:\n\n\
                      Violations (2)\n--------------\n - bad test\n - bad rule\n\
                      /============/\ntrailer\n";
        let err = classify_exit(&output(1, stderr), false, false).unwrap_err();
        match err {
            ScenarioFailure::Format { violations } => {
                assert!(violations.starts_with("Violations (2)"));
                assert!(violations.contains("- bad rule"));
                assert!(!violations.contains("/============/"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn format_marker_without_excerpt_is_protocol_error() {
        let err = classify_exit(&output(1, "TestFormat.reportIfAnyFailures"), false, false)
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Protocol);
    }

    #[test]
    fn format_violation_takes_priority_over_no_tests() {
        let stderr = "NoTestsRunException\nTestFormat.reportIfAnyFailures\n\
                      Violations (1)\nx\n/============/\n";
        let err = classify_exit(&output(1, stderr), false, false).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Format);
    }

    #[test]
    fn no_tests_run_is_its_own_kind() {
        let err = classify_exit(&output(1, "jdk...NoTestsRunException"), false, false).unwrap_err();
        assert_eq!(err.kind(), FailureKind::NoTestsRun);
    }

    #[test]
    fn abort_includes_stdout_and_other_codes_do_not() {
        let err = classify_exit(&output(134, "# A fatal error"), false, false).unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("TestFramework test VM exited with code 134"));
        assert!(text.contains("Standard Output\n---------------\nRun test: test1\n"));
        assert!(text.contains("Command Line:\njava Main\n"));
        assert!(text.contains("Error Output\n------------\n# A fatal error"));
        assert!(!text.contains("#####"));

        let err = classify_exit(&output(1, "boom"), false, false).unwrap_err();
        let text = err.to_string();
        assert!(!text.contains("Standard Output"));
        assert!(text.contains(RERUN_HINT));

        let err = classify_exit(&output(1, "boom"), true, true).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("Standard Output"));
        assert!(!text.contains(RERUN_HINT));
    }

    #[test]
    fn command_follows_documented_order() {
        let cfg = FrameworkConfig {
            warmup: None,
            test_list: Some(vec!["a".to_string(), "b".to_string()]),
            exclude_list: Some(vec!["c".to_string()]),
            exclude_random: true,
            verbose: true,
            verify_vm: true,
            ..FrameworkConfig::default()
        };
        let mut vm = VmConfig::new("java", "/w");
        vm.test_java_opts = vec!["-Xmx1g".to_string()];
        let answer = FlagVmAnswer {
            should_verify_ir: true,
            test_vm_flags: vec!["-XX:+PrintIdeal".to_string()],
        };
        let tv_flags = test_vm_flags(&cfg, &vm, Some(&answer));
        assert_eq!(tv_flags[0], "-XX:+UnlockDiagnosticVMOptions");
        assert_eq!(tv_flags.last().unwrap(), "-XX:+PrintIdeal");

        let flags = vec!["-XX:+UseSerialGC".to_string()];
        let helpers = vec!["H".to_string()];
        let inv = TestVmInvocation {
            cfg: &cfg,
            vm: &vm,
            channel_flag: "-Dir.framework.server.port=1",
            flags: &flags,
            test_vm_flags: &tv_flags,
            default_warmup: Some(7),
            test_class: "T",
            helper_classes: &helpers,
        };
        let args = test_vm_command(&inv).args;
        let pos = |s: &str| args.iter().position(|a| a == s).unwrap();
        assert_eq!(args[0], "-Xbootclasspath/a:.");
        assert!(pos("-Xmx1g") < pos("-XX:+UseSerialGC"));
        assert!(pos("-XX:+UseSerialGC") < pos("-XX:-BackgroundCompilation"));
        assert!(pos("-XX:+PrintIdeal") < pos("-DWarmup=7"));
        assert!(pos("-DWarmup=7") < pos("-DTest=a,b"));
        assert!(pos("-DExclude=c") < pos("-DExcludeRandom=true"));
        assert!(pos("-DVerbose=true") < pos("-Dir.framework.server.port=1"));
        assert_eq!(
            &args[args.len() - 3..],
            &[irtf_contracts::DEFAULT_TEST_VM_MAIN.to_string(), "T".to_string(), "H".to_string()]
        );
    }

    #[test]
    fn prefer_command_line_flags_moves_external_options_last() {
        let cfg = FrameworkConfig {
            prefer_command_line_flags: true,
            warmup: Some(3),
            ..FrameworkConfig::default()
        };
        let mut vm = VmConfig::new("java", "/w");
        vm.test_java_opts = vec!["-Xmx1g".to_string()];
        let tv_flags = test_vm_flags(&cfg, &vm, None);
        let flags = vec!["-Xmx2g".to_string()];
        let inv = TestVmInvocation {
            cfg: &cfg,
            vm: &vm,
            channel_flag: "-Dp=1",
            flags: &flags,
            test_vm_flags: &tv_flags,
            default_warmup: Some(7),
            test_class: "T",
            helper_classes: &[],
        };
        let args = test_vm_command(&inv).args;
        let pos = |s: &str| args.iter().position(|a| a == s).unwrap();
        assert!(pos("-Xmx2g") < pos("-Xmx1g"));
        assert!(args.contains(&"-DWarmup=3".to_string()));
        assert!(!args.iter().any(|a| a == "-DWarmup=7"));
    }
}
