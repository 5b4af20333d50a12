//! The flag VM: a short-lived child that decides the test VM's flags and whether IR
//! verification can be done at all.

use irtf_runner_common::CommandLine;
use tracing::{debug, info};

use crate::channel::{Channel, ChannelError};
use crate::config::{FrameworkConfig, VmConfig};
use crate::error::ScenarioFailure;
use crate::flags::{first_disallowed_flag, parse_flag_vm_answer, FlagVmAnswer};
use crate::launcher::VmLauncher;
use crate::manifest::RuleSource;

/// Why verification is off before any child runs, or `None` when it can be attempted.
pub fn verification_blocker(
    cfg: &FrameworkConfig,
    vm: &VmConfig,
    source: &dyn RuleSource,
) -> Option<String> {
    if !cfg.verify_ir {
        return Some("IR verification disabled by configuration".to_string());
    }
    if !vm.debug_build || vm.is_int() || vm.is_comp() {
        return Some(
            "IR verification disabled due to not running a debug build (required for PrintIdeal \
             and PrintOptoAssembly), running with -Xint, or -Xcomp (use warm-up of 0 instead)"
                .to_string(),
        );
    }
    if !source.has_rules() {
        return Some(format!(
            "IR verification disabled due to test {} not specifying any IR rules",
            source.test_class()
        ));
    }
    if let Some(flag) = first_disallowed_flag(&vm.test_java_opts) {
        return Some(format!(
            "IR verification disabled due to using non-whitelisted VM option {flag:?}"
        ));
    }
    None
}

/// Library path, class path and WhiteBox access, shared by both children.
pub(crate) fn push_class_path_flags(cmd: &mut CommandLine, vm: &VmConfig) {
    if let Some(native) = &vm.native_path {
        cmd.arg(format!("-Djava.library.path={native}"));
    }
    if let Some(cp) = &vm.class_path {
        cmd.arg("-cp").arg(cp.as_str());
    }
    cmd.args(["-Xbootclasspath/a:.", "-XX:+UnlockDiagnosticVMOptions", "-XX:+WhiteBoxAPI"]);
}

pub(crate) fn base_command(vm: &VmConfig) -> CommandLine {
    let mut cmd = CommandLine::new(&vm.java);
    cmd.current_dir(&vm.work_dir);
    cmd
}

pub fn flag_vm_command(
    vm: &VmConfig,
    channel_flag: &str,
    flags: &[String],
    test_class: &str,
) -> CommandLine {
    let mut cmd = base_command(vm);
    cmd.args(vm.test_java_opts.iter().cloned());
    push_class_path_flags(&mut cmd, vm);
    cmd.arg(channel_flag);
    cmd.args(flags.iter().cloned());
    cmd.arg(vm.flag_vm_main.as_str()).arg(test_class);
    cmd
}

/// Runs the flag VM and reads its answer from the channel.
pub fn run_flag_vm(
    launcher: &mut dyn VmLauncher,
    cmd: &CommandLine,
    channel: &mut Channel,
    verbose: bool,
) -> Result<FlagVmAnswer, ScenarioFailure> {
    channel.begin_session();
    debug!(command = %cmd.display(), "launching flag VM");
    let out = launcher
        .launch(cmd, channel)
        .map_err(|err| ScenarioFailure::Launch {
            vm: "flag VM",
            detail: format!("{err:#}"),
        })?;

    if verbose && out.success() {
        println!("--- OUTPUT TestFramework flag VM ---");
        println!("{}", out.combined());
    }
    if !out.success() {
        eprintln!("--- OUTPUT TestFramework flag VM ---");
        eprintln!("{}", out.combined());
        return Err(ScenarioFailure::FlagVm {
            exit_code: out.exit_code,
            output: out.combined(),
        });
    }

    let payload = match channel.receive() {
        Ok(payload) => payload,
        Err(ChannelError::NoConnection { .. }) => {
            return Err(ScenarioFailure::Protocol(
                "flag VM exited 0 without sending its flag encoding".to_string(),
            ));
        }
        Err(err) => return Err(err.into()),
    };
    if verbose {
        println!("Read sent data from flag VM from channel:");
        println!("{payload}");
    }
    let answer = parse_flag_vm_answer(&payload).ok_or_else(|| {
        ScenarioFailure::Protocol("Invalid flag encoding emitted by flag VM".to_string())
    })?;
    info!(
        verify_ir = answer.should_verify_ir,
        flags = answer.test_vm_flags.len(),
        "flag VM answered"
    );
    Ok(answer)
}
