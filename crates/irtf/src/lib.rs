//! Driver for JIT-compiler IR tests.
//!
//! A [`framework::TestFramework`] runs a flag VM, then a test VM, per scenario, and matches
//! the test VM's diagnostic log against the rules of a [`manifest::RuleSource`].

pub mod channel;
pub mod config;
pub mod error;
pub mod flag_vm;
pub mod flags;
pub mod framework;
pub mod ir;
pub mod launcher;
pub mod manifest;
pub mod report;
pub mod scenario;
pub mod test_vm;

pub use config::{FrameworkConfig, VmConfig};
pub use error::{FailureKind, FrameworkError, ScenarioFailure};
pub use framework::{ScenarioOutcome, ScenarioState, TestFramework, Verdict};
pub use manifest::{RuleSource, TestClassManifest};
pub use scenario::Scenario;
