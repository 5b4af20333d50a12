//! The test VM's rule encoding: which (method, rule) pairs apply in this run.

use std::fmt::Write as _;

use irtf_contracts::{BLOCK_END, IR_ENCODING_START};
use thiserror::Error;

use crate::manifest::RuleSource;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    #[error("rule encoding block not found in test VM output")]
    MissingBlock,

    #[error("malformed rule encoding line {line_no}: {line:?}")]
    MalformedLine { line_no: usize, line: String },

    #[error("rule encoding names unknown method {method:?}")]
    UnknownMethod { method: String },

    #[error("rule encoding names unknown rule {index} of method {method:?}")]
    UnknownRule { method: String, index: u32 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodEncoding {
    pub method: String,
    pub rules: Vec<u32>,
}

/// Applicable rules per method, in the order the test VM listed them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleEncoding {
    pub methods: Vec<MethodEncoding>,
}

impl RuleEncoding {
    pub fn parse(text: &str) -> Result<Self, EncodingError> {
        let mut lines = text.lines().map(|l| l.strip_suffix('\r').unwrap_or(l));
        if !lines.any(|l| l.trim() == IR_ENCODING_START) {
            return Err(EncodingError::MissingBlock);
        }

        let mut methods: Vec<MethodEncoding> = Vec::new();
        for (offset, line) in lines.enumerate() {
            let line = line.trim();
            if line == BLOCK_END {
                return Ok(Self { methods });
            }
            if line.is_empty() {
                continue;
            }
            let malformed = || EncodingError::MalformedLine {
                line_no: offset + 1,
                line: line.to_string(),
            };
            let mut parts = line.split(',').map(str::trim);
            let method = parts.next().filter(|m| !m.is_empty()).ok_or_else(malformed)?;
            let mut rules = Vec::new();
            for p in parts {
                let idx = p.parse::<u32>().map_err(|_| malformed())?;
                if idx == 0 {
                    return Err(malformed());
                }
                if !rules.contains(&idx) {
                    rules.push(idx);
                }
            }
            match methods.iter_mut().find(|m| m.method == method) {
                Some(existing) => {
                    for idx in rules {
                        if !existing.rules.contains(&idx) {
                            existing.rules.push(idx);
                        }
                    }
                }
                None => methods.push(MethodEncoding {
                    method: method.to_string(),
                    rules,
                }),
            }
        }
        // A block without its terminator was cut off.
        Err(EncodingError::MissingBlock)
    }

    /// Checks every listed pair against the declared rules.
    pub fn validate(&self, source: &dyn RuleSource) -> Result<(), EncodingError> {
        for m in &self.methods {
            let Some(rules) = source.rules_for(&m.method) else {
                return Err(EncodingError::UnknownMethod {
                    method: m.method.clone(),
                });
            };
            for &index in &m.rules {
                if !rules.iter().any(|r| r.index == index) {
                    return Err(EncodingError::UnknownRule {
                        method: m.method.clone(),
                        index,
                    });
                }
            }
        }
        Ok(())
    }

    /// Renders the block in wire form.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{IR_ENCODING_START}");
        for m in &self.methods {
            out.push_str(&m.method);
            for idx in &m.rules {
                let _ = write!(out, ",{idx}");
            }
            out.push('\n');
        }
        let _ = writeln!(out, "{BLOCK_END}");
        out
    }
}
