//! VM flag policy: the verification allow-list and the flag VM's answer format.

use irtf_contracts::{
    BLOCK_END, SHOULD_DO_IR_VERIFICATION_PROPERTY, TEST_VM_FLAGS_DELIMITER, TEST_VM_FLAGS_START,
};
use regex::Regex;

/// Flag-name fragments that keep IR verification possible. A fragment may be part of several
/// VM flags (`Print`, `Heap`, ...) or name exactly one (`Xbatch`, ...).
pub const ALLOWED_FLAG_FRAGMENTS: &[&str] = &[
    "RAM",
    "Heap",
    "Trace",
    "Print",
    "Verify",
    "TLAB",
    "UseNewCode",
    "CreateCoredumpOnCrash",
    "IgnoreUnrecognizedVMOptions",
    "UnlockDiagnosticVMOptions",
    "UnlockExperimentalVMOptions",
    "BackgroundCompilation",
    "Xbatch",
    "TieredCompilation",
];

/// Flags always given to the test VM.
pub const DEFAULT_TEST_VM_FLAGS: &[&str] =
    &["-XX:-BackgroundCompilation", "-XX:CompileCommand=quiet"];

/// VM self-verification flags, only meaningful on a debug build.
pub const VERIFY_VM_FLAGS: &[&str] = &[
    "-XX:+UnlockDiagnosticVMOptions",
    "-XX:+VerifyOops",
    "-XX:+VerifyStack",
    "-XX:+VerifyLastFrame",
    "-XX:+VerifyBeforeGC",
    "-XX:+VerifyAfterGC",
    "-XX:+VerifyDuringGC",
    "-XX:+VerifyAdapterSharing",
];

/// Strips `-XX:+`, `-XX:-`, `-XX:` or a single leading dash, except on `-D…`/`-e…` flags.
fn flag_name(flag: &str) -> &str {
    if let Some(rest) = flag.strip_prefix("-XX:") {
        return rest
            .strip_prefix('+')
            .or_else(|| rest.strip_prefix('-'))
            .unwrap_or(rest);
    }
    if flag.starts_with("-D") || flag.starts_with("-e") {
        return flag;
    }
    flag.strip_prefix('-').unwrap_or(flag)
}

pub fn is_allowed_flag(flag: &str) -> bool {
    let name = flag_name(flag);
    name.starts_with("-D")
        || name.starts_with("-e")
        || ALLOWED_FLAG_FRAGMENTS.iter().any(|frag| name.contains(frag))
}

/// The first externally supplied option that rules out IR verification, if any.
pub fn first_disallowed_flag(flags: &[String]) -> Option<&str> {
    flags
        .iter()
        .map(String::as_str)
        .find(|f| !is_allowed_flag(f))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagVmAnswer {
    pub should_verify_ir: bool,
    pub test_vm_flags: Vec<String>,
}

/// Extracts the flag block the flag VM wrote to the channel. `None` means the payload has no
/// well-formed block carrying the verification token.
pub fn parse_flag_vm_answer(payload: &str) -> Option<FlagVmAnswer> {
    let pattern = format!(
        r"(?m)^{start}\r?\n(.*{token}=(true|false).*?)\r?\n{end}",
        start = regex::escape(TEST_VM_FLAGS_START),
        token = regex::escape(SHOULD_DO_IR_VERIFICATION_PROPERTY),
        end = regex::escape(BLOCK_END),
    );
    let re = Regex::new(&pattern).ok()?;
    let caps = re.captures(payload)?;
    let line = caps.get(1)?.as_str();
    let should_verify_ir = caps.get(2)?.as_str() == "true";
    let test_vm_flags = line
        .split(TEST_VM_FLAGS_DELIMITER)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect();
    Some(FlagVmAnswer {
        should_verify_ir,
        test_vm_flags,
    })
}

/// Renders an answer in the wire format; used by child-side implementations.
pub fn render_flag_vm_answer(answer: &FlagVmAnswer) -> String {
    let mut flags = answer.test_vm_flags.clone();
    flags.retain(|f| !f.contains(SHOULD_DO_IR_VERIFICATION_PROPERTY));
    flags.push(format!(
        "-{SHOULD_DO_IR_VERIFICATION_PROPERTY}={}",
        answer.should_verify_ir
    ));
    format!(
        "{TEST_VM_FLAGS_START}\n{}\n{BLOCK_END}\n",
        flags.join(TEST_VM_FLAGS_DELIMITER)
    )
}
