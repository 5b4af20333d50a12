use std::path::PathBuf;

use anyhow::{Context, Result};
use irtf_contracts::{DEFAULT_CHANNEL_TIMEOUT_MS, DEFAULT_FLAG_VM_MAIN, DEFAULT_TEST_VM_MAIN};
use serde::Serialize;

/// User-facing switches of a run. Every field can also be supplied through an `IRTF_*`
/// environment variable (see [`FrameworkConfig::from_lookup`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameworkConfig {
    pub verbose: bool,
    /// Only run these test methods (forwarded to the test VM as `-DTest=`).
    pub test_list: Option<Vec<String>>,
    /// Skip these test methods (forwarded as `-DExclude=`).
    pub exclude_list: Option<Vec<String>>,
    /// Warm-up override; takes precedence over the framework default warm-up.
    pub warmup: Option<u32>,
    pub prefer_command_line_flags: bool,
    pub exclude_random: bool,
    pub report_stdout: bool,
    pub verify_vm: bool,
    pub verify_ir: bool,
    /// Run only the scenarios with these indices.
    pub scenarios: Option<Vec<u32>>,
    pub channel_timeout_ms: u64,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            test_list: None,
            exclude_list: None,
            warmup: None,
            prefer_command_line_flags: false,
            exclude_random: false,
            report_stdout: false,
            verify_vm: false,
            verify_ir: true,
            scenarios: None,
            channel_timeout_ms: DEFAULT_CHANNEL_TIMEOUT_MS,
        }
    }
}

impl FrameworkConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from `IRTF_*` variables resolved through `get`. Unset variables keep
    /// their defaults; malformed values are errors.
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let var = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("IRTF_VERBOSE") {
            cfg.verbose = parse_bool("IRTF_VERBOSE", &v)?;
        }
        if let Some(v) = var("IRTF_TEST") {
            cfg.test_list = Some(parse_list(&v));
        }
        if let Some(v) = var("IRTF_EXCLUDE") {
            cfg.exclude_list = Some(parse_list(&v));
        }
        if let Some(v) = var("IRTF_WARMUP") {
            let n = v
                .trim()
                .parse::<u32>()
                .with_context(|| format!("IRTF_WARMUP must be a non-negative integer, got {v:?}"))?;
            cfg.warmup = Some(n);
        }
        if let Some(v) = var("IRTF_PREFER_COMMAND_LINE_FLAGS") {
            cfg.prefer_command_line_flags = parse_bool("IRTF_PREFER_COMMAND_LINE_FLAGS", &v)?;
        }
        if let Some(v) = var("IRTF_EXCLUDE_RANDOM") {
            cfg.exclude_random = parse_bool("IRTF_EXCLUDE_RANDOM", &v)?;
        }
        if let Some(v) = var("IRTF_REPORT_STDOUT") {
            cfg.report_stdout = parse_bool("IRTF_REPORT_STDOUT", &v)?;
        }
        if let Some(v) = var("IRTF_VERIFY_VM") {
            cfg.verify_vm = parse_bool("IRTF_VERIFY_VM", &v)?;
        }
        if let Some(v) = var("IRTF_VERIFY_IR") {
            cfg.verify_ir = parse_bool("IRTF_VERIFY_IR", &v)?;
        }
        if let Some(v) = var("IRTF_SCENARIOS") {
            cfg.scenarios = Some(parse_indices("IRTF_SCENARIOS", &v)?);
        }
        if let Some(v) = var("IRTF_CHANNEL_TIMEOUT_MS") {
            cfg.channel_timeout_ms = v
                .trim()
                .parse::<u64>()
                .with_context(|| format!("IRTF_CHANNEL_TIMEOUT_MS must be an integer, got {v:?}"))?;
        }
        Ok(cfg)
    }

    pub fn has_test_list(&self) -> bool {
        self.test_list.is_some()
    }

    pub fn has_exclude_list(&self) -> bool {
        self.exclude_list.is_some()
    }
}

/// How child VMs are launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VmConfig {
    /// The VM executable.
    pub java: PathBuf,
    /// Options supplied by the surrounding harness. Only these are checked against the
    /// verification allow-list; framework and scenario flags are not.
    pub test_java_opts: Vec<String>,
    pub class_path: Option<String>,
    pub native_path: Option<String>,
    /// Working directory of both children; the diagnostic log is looked up here.
    pub work_dir: PathBuf,
    /// Whether the VM is a debug build (needed for IR printing and VM self-verification).
    pub debug_build: bool,
    pub flag_vm_main: String,
    pub test_vm_main: String,
}

impl VmConfig {
    pub fn new(java: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            java: java.into(),
            test_java_opts: Vec::new(),
            class_path: None,
            native_path: None,
            work_dir: work_dir.into(),
            debug_build: true,
            flag_vm_main: DEFAULT_FLAG_VM_MAIN.to_string(),
            test_vm_main: DEFAULT_TEST_VM_MAIN.to_string(),
        }
    }

    pub fn is_int(&self) -> bool {
        self.test_java_opts.iter().any(|f| f == "-Xint")
    }

    pub fn is_comp(&self) -> bool {
        self.test_java_opts.iter().any(|f| f == "-Xcomp")
    }
}

fn parse_bool(key: &str, v: &str) -> Result<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("{key} must be a boolean, got {other:?}"),
    }
}

pub fn parse_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_indices(key: &str, v: &str) -> Result<Vec<u32>> {
    parse_list(v)
        .iter()
        .map(|s| {
            s.parse::<u32>()
                .with_context(|| format!("{key}: invalid scenario index {s:?}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_verify_ir_and_nothing_else() {
        let cfg = FrameworkConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, FrameworkConfig::default());
        assert!(cfg.verify_ir);
        assert!(!cfg.verbose);
        assert_eq!(cfg.channel_timeout_ms, DEFAULT_CHANNEL_TIMEOUT_MS);
    }

    #[test]
    fn reads_every_switch() {
        let cfg = FrameworkConfig::from_lookup(lookup(&[
            ("IRTF_VERBOSE", "true"),
            ("IRTF_TEST", "test1, test2"),
            ("IRTF_EXCLUDE", "test3"),
            ("IRTF_WARMUP", "50"),
            ("IRTF_PREFER_COMMAND_LINE_FLAGS", "1"),
            ("IRTF_EXCLUDE_RANDOM", "yes"),
            ("IRTF_REPORT_STDOUT", "on"),
            ("IRTF_VERIFY_VM", "true"),
            ("IRTF_VERIFY_IR", "false"),
            ("IRTF_SCENARIOS", "0,2"),
            ("IRTF_CHANNEL_TIMEOUT_MS", "250"),
        ]))
        .unwrap();
        assert!(cfg.verbose);
        assert_eq!(
            cfg.test_list,
            Some(vec!["test1".to_string(), "test2".to_string()])
        );
        assert_eq!(cfg.exclude_list, Some(vec!["test3".to_string()]));
        assert_eq!(cfg.warmup, Some(50));
        assert!(cfg.prefer_command_line_flags);
        assert!(cfg.exclude_random);
        assert!(cfg.report_stdout);
        assert!(cfg.verify_vm);
        assert!(!cfg.verify_ir);
        assert_eq!(cfg.scenarios, Some(vec![0, 2]));
        assert_eq!(cfg.channel_timeout_ms, 250);
    }

    #[test]
    fn empty_values_are_ignored() {
        let cfg = FrameworkConfig::from_lookup(lookup(&[("IRTF_TEST", "  ")])).unwrap();
        assert!(!cfg.has_test_list());
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(FrameworkConfig::from_lookup(lookup(&[("IRTF_WARMUP", "-1")])).is_err());
        assert!(FrameworkConfig::from_lookup(lookup(&[("IRTF_VERBOSE", "maybe")])).is_err());
        assert!(FrameworkConfig::from_lookup(lookup(&[("IRTF_SCENARIOS", "0,x")])).is_err());
    }

    #[test]
    fn vm_mode_detection() {
        let mut vm = VmConfig::new("java", ".");
        assert!(!vm.is_int() && !vm.is_comp());
        vm.test_java_opts = vec!["-Xint".to_string()];
        assert!(vm.is_int());
        vm.test_java_opts = vec!["-Xcomp".to_string()];
        assert!(vm.is_comp());
    }
}
