//! Test-class declarations: the [`RuleSource`] seam and its JSON-backed implementation.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use irtf_contracts::TEST_CLASS_MANIFEST_SCHEMA_VERSION;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ir::rule::{
    Comparison, Compiler, CountConstraint, CountPattern, IrRule, Pattern, PhaseSelector,
};

/// Where the orchestrator learns which methods are tested and what their IR must look like.
pub trait RuleSource {
    fn test_class(&self) -> &str;

    fn helper_classes(&self) -> &[String] {
        &[]
    }

    /// Tested methods in declaration order.
    fn tested_methods(&self) -> Vec<&str>;

    /// Rules declared for `method`; `None` if the method is not a tested method.
    fn rules_for(&self, method: &str) -> Option<&[IrRule]>;

    fn has_rules(&self) -> bool {
        self.tested_methods()
            .into_iter()
            .any(|m| self.rules_for(m).is_some_and(|rules| !rules.is_empty()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestDiag {
    pub code: &'static str,
    pub message: String,
    /// JSON pointer into the manifest.
    pub path: String,
}

#[derive(Debug, Error)]
#[error("invalid test class manifest:{}", render_diags(.diags))]
pub struct ManifestError {
    pub diags: Vec<ManifestDiag>,
}

fn render_diags(diags: &[ManifestDiag]) -> String {
    diags
        .iter()
        .map(|d| {
            if d.path.is_empty() {
                format!("\n  {}: {}", d.code, d.message)
            } else {
                format!("\n  {} at {}: {}", d.code, d.path, d.message)
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioDecl {
    pub index: u32,
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestMethod {
    pub name: String,
    pub rules: Vec<IrRule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestClassManifest {
    pub test_class: String,
    pub helper_classes: Vec<String>,
    pub flags: Vec<String>,
    pub default_warmup: Option<i64>,
    pub scenarios: Vec<ScenarioDecl>,
    pub methods: Vec<TestMethod>,
}

impl RuleSource for TestClassManifest {
    fn test_class(&self) -> &str {
        &self.test_class
    }

    fn helper_classes(&self) -> &[String] {
        &self.helper_classes
    }

    fn tested_methods(&self) -> Vec<&str> {
        self.methods.iter().map(|m| m.name.as_str()).collect()
    }

    fn rules_for(&self, method: &str) -> Option<&[IrRule]> {
        self.methods
            .iter()
            .find(|m| m.name == method)
            .map(|m| m.rules.as_slice())
    }
}

#[derive(Debug, Deserialize)]
struct ManifestRaw {
    schema_version: String,
    test_class: String,
    #[serde(default)]
    helper_classes: Vec<String>,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    default_warmup: Option<i64>,
    #[serde(default)]
    scenarios: Vec<ScenarioRaw>,
    #[serde(default)]
    methods: Vec<MethodRaw>,
}

#[derive(Debug, Deserialize)]
struct ScenarioRaw {
    index: i64,
    #[serde(default)]
    flags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MethodRaw {
    name: String,
    #[serde(default)]
    rules: Vec<RuleRaw>,
}

#[derive(Debug, Deserialize)]
struct RuleRaw {
    index: i64,
    #[serde(default)]
    compilers: Vec<String>,
    #[serde(default)]
    include: Vec<PatternRaw>,
    #[serde(default)]
    exclude: Vec<PatternRaw>,
    #[serde(default)]
    counts: Vec<CountRaw>,
}

#[derive(Debug, Deserialize)]
struct PatternRaw {
    regex: String,
    #[serde(default)]
    phase: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CountValueRaw {
    Number(u64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct CountRaw {
    regex: String,
    count: CountValueRaw,
    #[serde(default)]
    phase: Option<String>,
}

impl TestClassManifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        match std::fs::read(path) {
            Ok(bytes) => Self::from_json_slice(&bytes),
            Err(err) => Err(ManifestError {
                diags: vec![ManifestDiag {
                    code: "ETC_MANIFEST_IO",
                    message: format!("failed to read {}: {err}", path.display()),
                    path: String::new(),
                }],
            }),
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self, ManifestError> {
        Self::from_json_slice(s.as_bytes())
    }

    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, ManifestError> {
        let raw: ManifestRaw = serde_json::from_slice(bytes).map_err(|err| ManifestError {
            diags: vec![ManifestDiag {
                code: "ETC_MANIFEST_JSON",
                message: format!("invalid JSON: {err}"),
                path: String::new(),
            }],
        })?;
        let mut diags = Vec::new();
        let manifest = validate(raw, &mut diags);
        if diags.is_empty() {
            Ok(manifest)
        } else {
            Err(ManifestError { diags })
        }
    }
}

fn validate(raw: ManifestRaw, diags: &mut Vec<ManifestDiag>) -> TestClassManifest {
    let mut diag = |code: &'static str, message: String, path: String| {
        diags.push(ManifestDiag {
            code,
            message,
            path,
        })
    };

    if raw.schema_version != TEST_CLASS_MANIFEST_SCHEMA_VERSION {
        diag(
            "ETC_SCHEMA_VERSION",
            format!(
                "schema_version must be {TEST_CLASS_MANIFEST_SCHEMA_VERSION}, got {}",
                raw.schema_version
            ),
            "/schema_version".to_string(),
        );
    }
    if raw.test_class.trim().is_empty() {
        diag(
            "ETC_TEST_CLASS_EMPTY",
            "test_class must be non-empty".to_string(),
            "/test_class".to_string(),
        );
    }
    if let Some(w) = raw.default_warmup {
        if w < 0 {
            diag(
                "ETC_WARMUP_NEGATIVE",
                format!("default_warmup must be non-negative, got {w}"),
                "/default_warmup".to_string(),
            );
        }
    }

    let mut scenarios = Vec::new();
    let mut seen_scenarios = HashSet::new();
    for (i, s) in raw.scenarios.into_iter().enumerate() {
        let path = format!("/scenarios/{i}/index");
        let Ok(index) = u32::try_from(s.index) else {
            diag(
                "ETC_SCENARIO_INDEX_INVALID",
                format!("scenario index must be a non-negative 32-bit integer, got {}", s.index),
                path,
            );
            continue;
        };
        if !seen_scenarios.insert(index) {
            diag(
                "ETC_SCENARIO_DUPLICATE",
                format!("duplicate scenario index {index}"),
                path,
            );
            continue;
        }
        scenarios.push(ScenarioDecl {
            index,
            flags: s.flags,
        });
    }

    let mut methods = Vec::new();
    let mut seen_methods = HashSet::new();
    for (mi, m) in raw.methods.into_iter().enumerate() {
        let mpath = format!("/methods/{mi}");
        if m.name.trim().is_empty() {
            diag(
                "ETC_METHOD_NAME_EMPTY",
                "method name must be non-empty".to_string(),
                format!("{mpath}/name"),
            );
            continue;
        }
        if !seen_methods.insert(m.name.clone()) {
            diag(
                "ETC_METHOD_DUPLICATE",
                format!("duplicate method {:?}", m.name),
                format!("{mpath}/name"),
            );
            continue;
        }

        let mut rules = Vec::new();
        let mut seen_rules = HashSet::new();
        for (ri, r) in m.rules.into_iter().enumerate() {
            let rpath = format!("{mpath}/rules/{ri}");
            let index = match u32::try_from(r.index) {
                Ok(idx) if idx >= 1 => idx,
                _ => {
                    diag(
                        "ETC_RULE_INDEX_INVALID",
                        format!("rule index must be >= 1, got {}", r.index),
                        format!("{rpath}/index"),
                    );
                    continue;
                }
            };
            if !seen_rules.insert(index) {
                diag(
                    "ETC_RULE_DUPLICATE",
                    format!("duplicate rule index {index} for method {:?}", m.name),
                    format!("{rpath}/index"),
                );
                continue;
            }
            if r.include.is_empty() && r.exclude.is_empty() && r.counts.is_empty() {
                diag(
                    "ETC_RULE_EMPTY",
                    "rule needs at least one include, exclude or count pattern".to_string(),
                    rpath.clone(),
                );
            }

            let mut compilers = BTreeSet::new();
            for (ci, c) in r.compilers.iter().enumerate() {
                match c.as_str() {
                    "c1" => compilers.insert(Compiler::C1),
                    "c2" => compilers.insert(Compiler::C2),
                    "any" => compilers.insert(Compiler::Any),
                    other => {
                        diag(
                            "ETC_COMPILER_INVALID",
                            format!("compiler must be one of c1, c2, any; got {other:?}"),
                            format!("{rpath}/compilers/{ci}"),
                        );
                        continue;
                    }
                };
            }
            if compilers.is_empty() {
                compilers.insert(Compiler::Any);
            }

            let mut patterns = |list: Vec<PatternRaw>, key: &str| -> Vec<Pattern> {
                list.into_iter()
                    .enumerate()
                    .filter_map(|(pi, p)| {
                        match Pattern::new(&p.regex, PhaseSelector::from(p.phase)) {
                            Ok(pat) => Some(pat),
                            Err(err) => {
                                diag(
                                    "ETC_REGEX_INVALID",
                                    format!("invalid regex {:?}: {err}", p.regex),
                                    format!("{rpath}/{key}/{pi}/regex"),
                                );
                                None
                            }
                        }
                    })
                    .collect()
            };
            let include = patterns(r.include, "include");
            let exclude = patterns(r.exclude, "exclude");

            let mut counts = Vec::new();
            for (pi, c) in r.counts.into_iter().enumerate() {
                let cpath = format!("{rpath}/counts/{pi}");
                let constraint = match c.count {
                    CountValueRaw::Number(n) => Ok(CountConstraint {
                        op: Comparison::Eq,
                        value: n,
                    }),
                    CountValueRaw::Text(s) => s.parse::<CountConstraint>(),
                };
                let constraint = match constraint {
                    Ok(c) => c,
                    Err(message) => {
                        diag("ETC_COUNT_INVALID", message, format!("{cpath}/count"));
                        continue;
                    }
                };
                match Pattern::new(&c.regex, PhaseSelector::from(c.phase)) {
                    Ok(pattern) => counts.push(CountPattern {
                        pattern,
                        constraint,
                    }),
                    Err(err) => diag(
                        "ETC_REGEX_INVALID",
                        format!("invalid regex {:?}: {err}", c.regex),
                        format!("{cpath}/regex"),
                    ),
                }
            }

            rules.push(IrRule {
                index,
                compilers,
                include,
                exclude,
                counts,
            });
        }
        methods.push(TestMethod {
            name: m.name,
            rules,
        });
    }

    TestClassManifest {
        test_class: raw.test_class,
        helper_classes: raw.helper_classes,
        flags: raw.flags,
        default_warmup: raw.default_warmup,
        scenarios,
        methods,
    }
}
