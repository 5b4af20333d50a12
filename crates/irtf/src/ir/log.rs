//! Parser for the compiler diagnostic log (`hotspot_pid<pid>.log`).
//!
//! The log is line oriented. Only compilation sections are interpreted; everything else the VM
//! prints is ignored:
//!
//! ```text
//! <compilation compile_id='12' method='pkg.Test::test1 (I)I' level='4'>
//! <phase name='PrintIdeal'>
//! ...
//! </phase>
//! </compilation>
//! ```
//!
//! A phase body runs until `</phase>`, the next phase marker, `</compilation>`, the next
//! compilation marker or the end of the input.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompilationRecord {
    pub compile_id: u64,
    /// `pkg.Class::method`, signature stripped and `/` separators turned into dots.
    pub method: String,
    pub level: u8,
    /// Phase name to raw text, in first-seen order of names.
    pub phases: Vec<(String, String)>,
}

impl CompilationRecord {
    pub fn phase(&self, name: &str) -> Option<&str> {
        self.phases
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, text)| text.as_str())
    }

    fn append_phase_text(&mut self, name: &str, line: &str) {
        let idx = match self.phases.iter().position(|(n, _)| n == name) {
            Some(idx) => idx,
            None => {
                self.phases.push((name.to_string(), String::new()));
                self.phases.len() - 1
            }
        };
        let text = &mut self.phases[idx].1;
        text.push_str(line);
        text.push('\n');
    }
}

fn compilation_start_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*<compilation\s+compile_id='(\d+)'\s+method='([^']*)'\s+level='(\d+)'\s*>\s*$",
        )
        .expect("valid compilation regex")
    })
}

fn phase_start_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*<phase\s+name='([^']+)'\s*>\s*$").expect("valid phase regex")
    })
}

pub fn parse_log(text: &str) -> Vec<CompilationRecord> {
    let mut records = Vec::new();
    let mut current: Option<CompilationRecord> = None;
    let mut phase: Option<String> = None;

    for line in text.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if let Some(caps) = compilation_start_re().captures(line) {
            if let Some(done) = current.take() {
                records.push(done);
            }
            phase = None;
            let method = caps[2]
                .split_whitespace()
                .next()
                .unwrap_or("")
                .replace('/', ".");
            // Ids and levels that overflow are not compilations we can attribute.
            let (Ok(compile_id), Ok(level)) = (caps[1].parse::<u64>(), caps[3].parse::<u8>())
            else {
                continue;
            };
            current = Some(CompilationRecord {
                compile_id,
                method,
                level,
                phases: Vec::new(),
            });
            continue;
        }

        let Some(record) = current.as_mut() else {
            continue;
        };

        if line.trim() == "</compilation>" {
            if let Some(done) = current.take() {
                records.push(done);
            }
            phase = None;
            continue;
        }
        if let Some(caps) = phase_start_re().captures(line) {
            let name = caps[1].to_string();
            // Register the phase even when its body turns out empty.
            if record.phase(&name).is_none() {
                record.phases.push((name.clone(), String::new()));
            }
            phase = Some(name);
            continue;
        }
        if line.trim() == "</phase>" {
            phase = None;
            continue;
        }
        if let Some(name) = &phase {
            record.append_phase_text(name, line);
        }
    }

    if let Some(done) = current.take() {
        records.push(done);
    }
    records
}

pub fn read_log(path: &Path) -> Result<Vec<CompilationRecord>> {
    let bytes =
        std::fs::read(path).with_context(|| format!("read diagnostic log: {}", path.display()))?;
    Ok(parse_log(&String::from_utf8_lossy(&bytes)))
}

/// Last record per (method, level) in log order; a later compilation replaces an earlier one.
pub fn latest_by_method_level(
    records: &[CompilationRecord],
) -> BTreeMap<(&str, u8), &CompilationRecord> {
    let mut out = BTreeMap::new();
    for r in records {
        out.insert((r.method.as_str(), r.level), r);
    }
    out
}
