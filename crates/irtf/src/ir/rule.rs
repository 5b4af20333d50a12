use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// Which compiler a rule is restricted to. Levels 1..=3 belong to C1, level 4 to C2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compiler {
    C1,
    C2,
    Any,
}

impl Compiler {
    pub fn covers_level(self, level: u8) -> bool {
        match self {
            Compiler::C1 => (1..=3).contains(&level),
            Compiler::C2 => level == 4,
            Compiler::Any => (1..=4).contains(&level),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Compiler::C1 => "c1",
            Compiler::C2 => "c2",
            Compiler::Any => "any",
        }
    }
}

/// Which phase blocks of a compilation a pattern is evaluated against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum PhaseSelector {
    #[default]
    All,
    Named(String),
}

impl PhaseSelector {
    pub fn selects(&self, phase: &str) -> bool {
        match self {
            PhaseSelector::All => true,
            PhaseSelector::Named(name) => name == phase,
        }
    }
}

impl fmt::Display for PhaseSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseSelector::All => f.write_str("all phases"),
            PhaseSelector::Named(name) => f.write_str(name),
        }
    }
}

impl From<Option<String>> for PhaseSelector {
    fn from(v: Option<String>) -> Self {
        match v {
            None => PhaseSelector::All,
            Some(s) if s.is_empty() || s.eq_ignore_ascii_case("default") => PhaseSelector::All,
            Some(s) => PhaseSelector::Named(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Comparison {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

/// A count requirement such as `2`, `=2`, `>1` or `<=3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CountConstraint {
    pub op: Comparison,
    pub value: u64,
}

impl CountConstraint {
    pub fn holds(&self, actual: u64) -> bool {
        match self.op {
            Comparison::Eq => actual == self.value,
            Comparison::Ne => actual != self.value,
            Comparison::Lt => actual < self.value,
            Comparison::Le => actual <= self.value,
            Comparison::Gt => actual > self.value,
            Comparison::Ge => actual >= self.value,
        }
    }
}

impl FromStr for CountConstraint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (op, rest) = if let Some(r) = s.strip_prefix(">=") {
            (Comparison::Ge, r)
        } else if let Some(r) = s.strip_prefix("<=") {
            (Comparison::Le, r)
        } else if let Some(r) = s.strip_prefix("!=") {
            (Comparison::Ne, r)
        } else if let Some(r) = s.strip_prefix('>') {
            (Comparison::Gt, r)
        } else if let Some(r) = s.strip_prefix('<') {
            (Comparison::Lt, r)
        } else if let Some(r) = s.strip_prefix('=') {
            (Comparison::Eq, r)
        } else {
            (Comparison::Eq, s)
        };
        let value = rest.trim().parse::<u64>().map_err(|_| {
            format!("invalid count constraint {s:?} (expected e.g. \"2\", \">1\", \"<=3\")")
        })?;
        if op == Comparison::Lt && value == 0 {
            return Err(format!("count constraint {s:?} can never hold"));
        }
        Ok(CountConstraint { op, value })
    }
}

impl fmt::Display for CountConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            Comparison::Eq => "=",
            Comparison::Ne => "!=",
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
        };
        write!(f, "{op}{}", self.value)
    }
}

#[derive(Debug, Clone)]
pub struct Pattern {
    pub source: String,
    pub regex: Regex,
    pub phase: PhaseSelector,
}

impl Pattern {
    pub fn new(source: &str, phase: PhaseSelector) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(source).multi_line(true).build()?;
        Ok(Self {
            source: source.to_string(),
            regex,
            phase,
        })
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.phase == other.phase
    }
}

impl Eq for Pattern {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountPattern {
    pub pattern: Pattern,
    pub constraint: CountConstraint,
}

/// One verification rule of a test method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrRule {
    /// 1-based, unique per method.
    pub index: u32,
    pub compilers: BTreeSet<Compiler>,
    pub include: Vec<Pattern>,
    pub exclude: Vec<Pattern>,
    pub counts: Vec<CountPattern>,
}

impl IrRule {
    pub fn applies_to_level(&self, level: u8) -> bool {
        self.compilers.iter().any(|c| c.covers_level(level))
    }
}
