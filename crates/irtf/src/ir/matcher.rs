use serde::Serialize;

use super::encoding::{EncodingError, RuleEncoding};
use super::log::{latest_by_method_level, CompilationRecord};
use super::rule::{CountConstraint, IrRule, Pattern};
use crate::manifest::RuleSource;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    ExpectedButAbsent,
    ForbiddenButPresent,
    CountMismatch {
        actual: u64,
        expected: CountConstraint,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatternFailure {
    pub pattern: String,
    pub reason: FailureReason,
    /// The offending phase for exclusions, otherwise the phases that were searched.
    pub phase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MatchedCompilation {
    pub compile_id: u64,
    pub level: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleResult {
    pub rule_index: u32,
    pub passed: bool,
    pub failures: Vec<PatternFailure>,
    pub matched_compilations: Vec<MatchedCompilation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodResult {
    pub method: String,
    /// False when the log holds no compilation of the method at any level.
    pub compiled: bool,
    pub rules: Vec<RuleResult>,
}

impl MethodResult {
    pub fn passed(&self) -> bool {
        self.rules.iter().all(|r| r.passed)
    }

    pub fn failed_rules(&self) -> impl Iterator<Item = &RuleResult> {
        self.rules.iter().filter(|r| !r.passed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchReport {
    pub test_class: String,
    pub methods: Vec<MethodResult>,
}

impl MatchReport {
    pub fn passed(&self) -> bool {
        self.methods.iter().all(MethodResult::passed)
    }

    pub fn failed_methods(&self) -> impl Iterator<Item = &MethodResult> {
        self.methods.iter().filter(|m| !m.passed())
    }

    pub fn failed_rule_count(&self) -> usize {
        self.methods.iter().map(|m| m.failed_rules().count()).sum()
    }
}

/// Whether a log method identity (`pkg/Cls::name` or `pkg.Cls::name`) denotes `method` of
/// `test_class`. An unqualified test class matches on the simple class name.
pub fn is_same_method(log_method: &str, test_class: &str, method: &str) -> bool {
    let Some((class, name)) = log_method.rsplit_once("::") else {
        return false;
    };
    if name != method {
        return false;
    }
    let class = class.replace('/', ".");
    if class == test_class {
        return true;
    }
    !test_class.contains('.') && class.rsplit('.').next() == Some(test_class)
}

/// Latest compilation per level of `method`, ordered by level.
pub fn select_compilations<'a>(
    records: &'a [CompilationRecord],
    test_class: &str,
    method: &str,
) -> Vec<&'a CompilationRecord> {
    latest_by_method_level(records)
        .into_iter()
        .filter(|((m, _), _)| is_same_method(m, test_class, method))
        .map(|(_, r)| r)
        .collect()
}

/// Evaluates every (method, rule) pair listed in `encoding`. The encoding must already have
/// been validated against `source`; unknown pairs are skipped.
pub fn match_rules(
    source: &dyn RuleSource,
    records: &[CompilationRecord],
    encoding: &RuleEncoding,
) -> MatchReport {
    let test_class = source.test_class();
    let mut methods = Vec::new();

    for entry in &encoding.methods {
        let Some(declared) = source.rules_for(&entry.method) else {
            continue;
        };
        let compilations = select_compilations(records, test_class, &entry.method);
        let rules = entry
            .rules
            .iter()
            .filter_map(|idx| declared.iter().find(|r| r.index == *idx))
            .map(|rule| evaluate_rule(rule, &compilations))
            .collect::<Vec<_>>();
        if rules.is_empty() {
            continue;
        }
        methods.push(MethodResult {
            method: entry.method.clone(),
            compiled: !compilations.is_empty(),
            rules,
        });
    }

    MatchReport {
        test_class: test_class.to_string(),
        methods,
    }
}

/// Parses the log text and the channel text and matches them against `source`.
/// Matches the rule encoding found in `channel_text` against already parsed log records.
pub fn match_records(
    source: &dyn RuleSource,
    records: &[CompilationRecord],
    channel_text: &str,
) -> Result<MatchReport, EncodingError> {
    let encoding = RuleEncoding::parse(channel_text)?;
    encoding.validate(source)?;
    Ok(match_rules(source, records, &encoding))
}

fn evaluate_rule(rule: &IrRule, compilations: &[&CompilationRecord]) -> RuleResult {
    let selected: Vec<&CompilationRecord> = compilations
        .iter()
        .copied()
        .filter(|r| rule.applies_to_level(r.level))
        .collect();

    let mut failures = Vec::new();

    for p in &rule.include {
        if first_match(p, &selected).is_none() {
            failures.push(PatternFailure {
                pattern: p.source.clone(),
                reason: FailureReason::ExpectedButAbsent,
                phase: p.phase.to_string(),
                excerpt: None,
            });
        }
    }

    for p in &rule.exclude {
        if let Some((phase, excerpt)) = first_match(p, &selected) {
            failures.push(PatternFailure {
                pattern: p.source.clone(),
                reason: FailureReason::ForbiddenButPresent,
                phase: phase.to_string(),
                excerpt: Some(excerpt.to_string()),
            });
        }
    }

    for c in &rule.counts {
        let actual = count_matches(&c.pattern, &selected);
        if !c.constraint.holds(actual) {
            failures.push(PatternFailure {
                pattern: c.pattern.source.clone(),
                reason: FailureReason::CountMismatch {
                    actual,
                    expected: c.constraint,
                },
                phase: c.pattern.phase.to_string(),
                excerpt: None,
            });
        }
    }

    RuleResult {
        rule_index: rule.index,
        passed: failures.is_empty(),
        failures,
        matched_compilations: selected
            .iter()
            .map(|r| MatchedCompilation {
                compile_id: r.compile_id,
                level: r.level,
            })
            .collect(),
    }
}

fn selected_phases<'r>(
    p: &'r Pattern,
    records: &'r [&'r CompilationRecord],
) -> impl Iterator<Item = (&'r str, &'r str)> + 'r {
    records.iter().flat_map(move |r| {
        r.phases
            .iter()
            .filter(move |(name, _)| p.phase.selects(name))
            .map(|(name, text)| (name.as_str(), text.as_str()))
    })
}

fn first_match<'r>(
    p: &'r Pattern,
    records: &'r [&'r CompilationRecord],
) -> Option<(&'r str, &'r str)> {
    selected_phases(p, records)
        .find_map(|(phase, text)| p.regex.find(text).map(|m| (phase, m.as_str())))
}

fn count_matches(p: &Pattern, records: &[&CompilationRecord]) -> u64 {
    selected_phases(p, records)
        .map(|(_, text)| p.regex.find_iter(text).count() as u64)
        .sum()
}
