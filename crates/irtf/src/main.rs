use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser};
use irtf::config::parse_list;
use irtf::ir::render::render_violations;
use irtf::ir::{match_records, read_log};
use irtf::manifest::{ManifestError, TestClassManifest};
use irtf::report::{MatchOnlyReport, RunReport};
use irtf::{FrameworkConfig, FrameworkError, Scenario, TestFramework, VmConfig};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const EXIT_OK: u8 = 0;
const EXIT_FAILED: u8 = 10;
const EXIT_FORMAT: u8 = 12;

#[derive(Parser, Debug)]
#[command(name = "irtf")]
#[command(about = "Driver for JIT-compiler IR verification tests.", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run a test class: flag VM and test VM per scenario, then IR matching.
    Run(RunArgs),
    /// Match a saved diagnostic log and rule encoding against a test-class manifest.
    Match(MatchArgs),
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    #[arg(long, value_name = "PATH")]
    manifest: PathBuf,

    /// VM executable used for both children.
    #[arg(long, value_name = "PATH")]
    java: PathBuf,

    /// Working directory of the children; the diagnostic log is read from here.
    #[arg(long, value_name = "DIR")]
    work_dir: Option<PathBuf>,

    #[arg(long, value_name = "PATH")]
    class_path: Option<String>,

    #[arg(long, value_name = "DIR")]
    native_path: Option<String>,

    /// External VM option. May be passed multiple times.
    #[arg(long = "java-opt", value_name = "OPT", allow_hyphen_values = true)]
    java_opts: Vec<String>,

    /// The VM is a release build (no IR printing, no VM self-verification).
    #[arg(long)]
    release_build: bool,

    #[arg(long, value_name = "CLASS")]
    flag_vm_main: Option<String>,

    #[arg(long, value_name = "CLASS")]
    test_vm_main: Option<String>,

    #[arg(long, value_name = "PATH")]
    report_out: Option<PathBuf>,

    #[command(flatten)]
    framework: FrameworkArgs,
}

/// Command-line overrides for [`FrameworkConfig`]. Anything not given here falls back to the
/// `IRTF_*` environment.
#[derive(Debug, Clone, Default, Args)]
struct FrameworkArgs {
    #[arg(long)]
    verbose: bool,

    /// Comma-separated test methods to run.
    #[arg(long, value_name = "LIST")]
    test: Option<String>,

    /// Comma-separated test methods to skip.
    #[arg(long, value_name = "LIST")]
    exclude: Option<String>,

    #[arg(long, value_name = "N")]
    warmup: Option<u32>,

    #[arg(long)]
    prefer_command_line_flags: bool,

    #[arg(long)]
    exclude_random: bool,

    #[arg(long)]
    report_stdout: bool,

    #[arg(long)]
    verify_vm: bool,

    #[arg(long)]
    no_verify_ir: bool,

    /// Comma-separated scenario indices to run.
    #[arg(long, value_name = "LIST")]
    scenarios: Option<String>,

    #[arg(long, value_name = "MS")]
    channel_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Args)]
struct MatchArgs {
    #[arg(long, value_name = "PATH")]
    manifest: PathBuf,

    /// Diagnostic log (`hotspot_pid<pid>.log`).
    #[arg(long, value_name = "PATH")]
    log: PathBuf,

    /// Channel dump holding the rule encoding block.
    #[arg(long, value_name = "PATH")]
    encoding: PathBuf,

    #[arg(long, value_name = "PATH")]
    report_out: Option<PathBuf>,
}

fn main() -> ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(2)
        }
    }
}

fn try_main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let verbose = matches!(&cli.command, Command::Run(args) if args.framework.verbose);
    init_tracing(verbose);

    match cli.command {
        Command::Run(args) => cmd_run(args),
        Command::Match(args) => cmd_match(args),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn framework_config(args: &FrameworkArgs) -> Result<FrameworkConfig> {
    let mut cfg = FrameworkConfig::from_env()?;
    if args.verbose {
        cfg.verbose = true;
    }
    if let Some(v) = &args.test {
        cfg.test_list = Some(parse_list(v));
    }
    if let Some(v) = &args.exclude {
        cfg.exclude_list = Some(parse_list(v));
    }
    if args.warmup.is_some() {
        cfg.warmup = args.warmup;
    }
    if args.prefer_command_line_flags {
        cfg.prefer_command_line_flags = true;
    }
    if args.exclude_random {
        cfg.exclude_random = true;
    }
    if args.report_stdout {
        cfg.report_stdout = true;
    }
    if args.verify_vm {
        cfg.verify_vm = true;
    }
    if args.no_verify_ir {
        cfg.verify_ir = false;
    }
    if let Some(v) = &args.scenarios {
        let indices = parse_list(v)
            .iter()
            .map(|s| {
                s.parse::<u32>()
                    .with_context(|| format!("--scenarios: invalid scenario index {s:?}"))
            })
            .collect::<Result<Vec<_>>>()?;
        cfg.scenarios = Some(indices);
    }
    if let Some(ms) = args.channel_timeout_ms {
        cfg.channel_timeout_ms = ms;
    }
    Ok(cfg)
}

fn vm_config(args: &RunArgs) -> Result<VmConfig> {
    let work_dir = match &args.work_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("get cwd")?,
    };
    let mut vm = VmConfig::new(&args.java, work_dir);
    vm.test_java_opts = args.java_opts.clone();
    vm.class_path = args.class_path.clone();
    vm.native_path = args.native_path.clone();
    vm.debug_build = !args.release_build;
    if let Some(main) = &args.flag_vm_main {
        vm.flag_vm_main = main.clone();
    }
    if let Some(main) = &args.test_vm_main {
        vm.test_vm_main = main.clone();
    }
    Ok(vm)
}

fn report_manifest_error(path: &Path, err: &ManifestError) -> ExitCode {
    eprintln!("{}: {err}", path.display());
    ExitCode::from(EXIT_FORMAT)
}

fn cmd_run(args: RunArgs) -> Result<ExitCode> {
    let manifest = match TestClassManifest::load(&args.manifest) {
        Ok(m) => m,
        Err(err) => return Ok(report_manifest_error(&args.manifest, &err)),
    };
    let cfg = framework_config(&args.framework)?;
    let vm = vm_config(&args)?;
    debug!(?cfg, ?vm, "resolved configuration");

    let mut fw = TestFramework::new(&manifest, vm, cfg.clone());
    let result = configure(&mut fw, &manifest).and_then(|()| fw.start());

    let report = RunReport::build(&manifest.test_class, &cfg, fw.outcomes(), &result);
    let exit_code = match &result {
        Ok(()) => EXIT_OK,
        Err(err) if err.is_format() => {
            eprintln!("{err}");
            EXIT_FORMAT
        }
        Err(err) => {
            eprintln!("{err}");
            EXIT_FAILED
        }
    };
    write_report(args.report_out.as_deref(), &report)?;
    Ok(ExitCode::from(exit_code))
}

fn configure(
    fw: &mut TestFramework<'_>,
    manifest: &TestClassManifest,
) -> Result<(), FrameworkError> {
    fw.add_flags(manifest.flags.iter().cloned());
    if let Some(warmup) = manifest.default_warmup {
        fw.set_default_warmup(warmup)?;
    }
    if !manifest.scenarios.is_empty() {
        fw.add_scenarios(
            manifest
                .scenarios
                .iter()
                .map(|s| Scenario::new(s.index, s.flags.iter().cloned())),
        )?;
    }
    Ok(())
}

fn cmd_match(args: MatchArgs) -> Result<ExitCode> {
    let manifest = match TestClassManifest::load(&args.manifest) {
        Ok(m) => m,
        Err(err) => return Ok(report_manifest_error(&args.manifest, &err)),
    };
    let records = read_log(&args.log)?;
    let encoding = std::fs::read_to_string(&args.encoding)
        .with_context(|| format!("read encoding: {}", args.encoding.display()))?;

    let ir = match match_records(&manifest, &records, &encoding) {
        Ok(res) => res,
        Err(err) => {
            eprintln!("protocol violation: {err}");
            return Ok(ExitCode::from(EXIT_FAILED));
        }
    };
    if !ir.passed() {
        eprintln!("{}", render_violations(&ir));
    }
    let exit_code = if ir.passed() { EXIT_OK } else { EXIT_FAILED };
    write_report(args.report_out.as_deref(), &MatchOnlyReport::new(ir))?;
    Ok(ExitCode::from(exit_code))
}

/// Writes the report to `out` when given, otherwise as the last line of stdout.
fn write_report<T: serde::Serialize>(out: Option<&Path>, report: &T) -> Result<()> {
    let json = serde_json::to_string(report)? + "\n";
    match out {
        Some(out_path) => {
            if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create report dir: {}", parent.display()))?;
            }
            std::fs::write(out_path, json.as_bytes())
                .with_context(|| format!("write report: {}", out_path.display()))?;
        }
        None => print!("{json}"),
    }
    Ok(())
}
