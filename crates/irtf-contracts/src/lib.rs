//! Shared, version-pinned protocol identifiers.
//!
//! These constants are the single source of truth for the strings exchanged between the driver
//! and its child VMs (channel sentinels, property flags, stderr markers) and for the schema
//! versions of the machine-readable documents the driver reads and writes.

pub const TEST_CLASS_MANIFEST_SCHEMA_VERSION: &str = "irtf.test_class@0.1.0";
pub const IRTF_REPORT_SCHEMA_VERSION: &str = "irtf.report@0.1.0";
pub const IRTF_MATCH_REPORT_SCHEMA_VERSION: &str = "irtf.match.report@0.1.0";

/// Property flag carrying the channel port to both child VMs.
pub const SERVER_PORT_PROPERTY: &str = "ir.framework.server.port";

/// Channel lines with this prefix are echoed on the driver's stdout.
pub const STDOUT_PREFIX: &str = "[STDOUT]";

pub const TEST_VM_FLAGS_START: &str =
    "##### TestFrameworkPrepareFlags - used by TestFramework #####";
pub const TEST_VM_FLAGS_DELIMITER: &str = " ";
pub const IR_ENCODING_START: &str = "##### IRMatchRulesEncoding - used by TestFramework #####";
pub const BLOCK_END: &str = "----- END -----";

/// Boolean token inside the flag block that tells the driver whether to verify IR.
pub const SHOULD_DO_IR_VERIFICATION_PROPERTY: &str = "DShouldDoIRVerification";

pub const DEFAULT_FLAG_VM_MAIN: &str =
    "jdk.test.lib.hotspot.ir_framework.TestFrameworkPrepareFlags";
pub const DEFAULT_TEST_VM_MAIN: &str = "jdk.test.lib.hotspot.ir_framework.TestFrameworkExecution";

/// stderr markers used to classify a failing test VM.
pub const FORMAT_VIOLATION_MARKER: &str = "TestFormat.reportIfAnyFailures";
pub const NO_TESTS_RUN_MARKER: &str = "NoTestsRunException";
pub const FORMAT_VIOLATION_TERMINATOR: &str = "/============/";

/// Exit code of a child killed by SIGABRT (128 + 6).
pub const ABORT_EXIT_CODE: i32 = 134;

pub const DEFAULT_CHANNEL_TIMEOUT_MS: u64 = 10_000;

pub fn hotspot_log_file_name(pid: u32) -> String {
    format!("hotspot_pid{pid}.log")
}
