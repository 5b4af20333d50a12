//! IR verification: rule model, diagnostic log parsing, rule encoding and matching.

pub mod encoding;
pub mod log;
pub mod matcher;
pub mod render;
pub mod rule;

pub use encoding::{EncodingError, RuleEncoding};
pub use log::{parse_log, read_log, CompilationRecord};
pub use matcher::{match_records, match_rules, FailureReason, MatchReport, MethodResult, RuleResult};
pub use rule::{Compiler, CountConstraint, IrRule, Pattern, PhaseSelector};
