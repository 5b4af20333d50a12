//! Human-readable rendering of match failures.

use std::fmt::Write as _;

use super::log::CompilationRecord;
use super::matcher::{select_compilations, FailureReason, MatchReport, PatternFailure};

pub fn render_violations(report: &MatchReport) -> String {
    let failed_methods: Vec<_> = report.failed_methods().collect();
    let mut out = String::new();
    let _ = writeln!(out, "One or more IR rules failed:");
    let _ = writeln!(out);
    let title = format!(
        "Failed IR Rules ({}) of Methods ({})",
        report.failed_rule_count(),
        failed_methods.len()
    );
    let _ = writeln!(out, "{title}");
    let _ = writeln!(out, "{}", "-".repeat(title.len()));

    for (i, m) in failed_methods.iter().enumerate() {
        let failed_rules: Vec<_> = m.failed_rules().collect();
        let never = if m.compiled { "" } else { " (never compiled)" };
        let _ = writeln!(
            out,
            "{}) Method \"{}::{}\"{never} - [Failed IR rules: {}]:",
            i + 1,
            report.test_class,
            m.method,
            failed_rules.len()
        );
        for r in failed_rules {
            let _ = writeln!(out, "   * Rule {}:", r.rule_index);
            for f in &r.failures {
                let _ = writeln!(out, "     - {}", describe_failure(f));
            }
        }
    }
    out
}

fn describe_failure(f: &PatternFailure) -> String {
    match &f.reason {
        FailureReason::ExpectedButAbsent => {
            format!("include \"{}\" [{}]: expected but absent", f.pattern, f.phase)
        }
        FailureReason::ForbiddenButPresent => format!(
            "exclude \"{}\" [{}]: forbidden but present, matched \"{}\"",
            f.pattern,
            f.phase,
            f.excerpt.as_deref().unwrap_or_default()
        ),
        FailureReason::CountMismatch { actual, expected } => format!(
            "count \"{}\" [{}]: expected {expected} but found {actual}",
            f.pattern, f.phase
        ),
    }
}

/// Every selected compilation of every failed method, with its phase text.
pub fn render_failed_compilations(report: &MatchReport, records: &[CompilationRecord]) -> String {
    let mut out = String::new();
    for m in report.failed_methods() {
        let compilations = select_compilations(records, &report.test_class, &m.method);
        if compilations.is_empty() {
            let _ = writeln!(
                out,
                ">>> {}::{}: no compilation found in the diagnostic log",
                report.test_class, m.method
            );
            let _ = writeln!(out);
            continue;
        }
        for c in compilations {
            let _ = writeln!(
                out,
                ">>> Compilation of {} (compile_id {}, level {}):",
                c.method, c.compile_id, c.level
            );
            for (phase, text) in &c.phases {
                let _ = writeln!(out, "--- {phase} ---");
                out.push_str(text);
            }
            let _ = writeln!(out);
        }
    }
    out
}
