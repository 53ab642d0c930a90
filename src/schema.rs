//! KB schema registry: parses `kb.yaml` into typed field/type definitions
//! and validates entry metadata against them.
//!
//! Grounded on kasl's `libs::config::Config` for the "load a YAML/JSON
//! sidecar file into a serde struct" shape, generalized to a per-KB schema
//! document instead of a single global config file.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;

/// One field declared on a [`TypeDef`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub enum_values: Option<Vec<String>>,
    /// Inclusive numeric bounds `[min, max]`, spec.md §3's "validation
    /// rules (enum, range, regex)" and §6's `kb.yaml` `range?` key.
    #[serde(default)]
    pub range: Option<(f64, f64)>,
    /// A regex a string value must fully match, spec.md §3/§6's `regex`
    /// validation rule.
    #[serde(default)]
    pub pattern: Option<String>,
    /// For `field_type == "object-ref"`, the entry type the reference is
    /// expected to point at (spec.md §3's `entry_ref.target_type`).
    #[serde(default)]
    pub target_type: Option<String>,
    #[serde(default)]
    pub description: String,
}

/// One entry type declared in `kb.yaml`, e.g. `task`, `person`, `event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDef {
    pub name: String,
    #[serde(default)]
    pub subdir: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    /// When true, metadata keys outside `fields` are kept rather than
    /// rejected — spec.md's "generic entry falls through" behavior.
    #[serde(default = "default_allow_other")]
    pub allow_other: bool,
}

fn default_allow_other() -> bool {
    true
}

/// KB-wide validation policy (`kb.yaml`'s `validation` key, spec.md §6):
/// whether unenforced violations degrade to warnings, and whether every
/// mutation auto-runs post-save quality validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationPolicy {
    #[serde(default = "default_true")]
    pub enforce: bool,
    #[serde(default)]
    pub qa_on_write: bool,
    #[serde(default)]
    pub rules: Vec<serde_json::Value>,
}

fn default_true() -> bool {
    true
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self { enforce: true, qa_on_write: false, rules: Vec::new() }
    }
}

/// The full `kb.yaml` document: KB-level metadata plus its type registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbSchema {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub types: Vec<TypeDef>,
    /// Free-form KB policies (`public`, `npov`, `review_required`, ...),
    /// per spec.md §6 — the core doesn't interpret these, only carries them
    /// for plugins/transports to consult.
    #[serde(default)]
    pub policies: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub validation: ValidationPolicy,
}

impl KbSchema {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }

    pub fn type_def(&self, name: &str) -> Option<&TypeDef> {
        self.types.iter().find(|t| t.name == name)
    }

    /// Subdirectory an entry of `entry_type` should live under, falling
    /// back to the `CORE_TYPES` convention used by the original Python
    /// repository when the schema doesn't declare one explicitly.
    pub fn subdir_for(&self, entry_type: &str) -> String {
        if let Some(t) = self.type_def(entry_type) {
            if let Some(subdir) = &t.subdir {
                return subdir.clone();
            }
        }
        core_type_subdir(entry_type).unwrap_or_else(|| format!("{entry_type}s"))
    }

    /// Validates a metadata map against the type's field declarations,
    /// returning every violation rather than stopping at the first one so
    /// a caller can surface all of them in a single `VALIDATION_FAILED`
    /// response (spec.md §7).
    pub fn validate(
        &self,
        entry_type: &str,
        metadata: &serde_json::Map<String, serde_json::Value>,
    ) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let Some(type_def) = self.type_def(entry_type) else {
            return issues;
        };

        // Unknown values (enum mismatches, undeclared fields) are warnings
        // when the type allows them through, errors otherwise — spec.md §3's
        // `allow_other` flag. Missing-required and wrong-type are always
        // errors regardless of `allow_other`.
        let unknown_severity = if type_def.allow_other { IssueSeverity::Warning } else { IssueSeverity::Error };

        for field in &type_def.fields {
            let value = metadata.get(&field.name);
            match value {
                None if field.required => {
                    issues.push(ValidationIssue {
                        field: field.name.clone(),
                        rule: "required".to_string(),
                        expected: "present".to_string(),
                        got: "missing".to_string(),
                        severity: IssueSeverity::Error,
                    });
                }
                Some(v) => {
                    if let Some(allowed) = &field.enum_values {
                        let matches = v.as_str().map(|s| allowed.iter().any(|a| a == s)).unwrap_or(false);
                        if !matches {
                            issues.push(ValidationIssue {
                                field: field.name.clone(),
                                rule: "enum".to_string(),
                                expected: allowed.join("|"),
                                got: v.to_string(),
                                severity: unknown_severity,
                            });
                        }
                    }
                    if let Some((min, max)) = field.range {
                        let in_range = v.as_f64().map(|n| n >= min && n <= max).unwrap_or(false);
                        if !in_range {
                            issues.push(ValidationIssue {
                                field: field.name.clone(),
                                rule: "range".to_string(),
                                expected: format!("{min}..={max}"),
                                got: v.to_string(),
                                severity: IssueSeverity::Error,
                            });
                        }
                    }
                    if let Some(pattern) = &field.pattern {
                        let is_match = v
                            .as_str()
                            .and_then(|s| regex::Regex::new(pattern).ok().map(|re| re.is_match(s)))
                            .unwrap_or(false);
                        if !is_match {
                            issues.push(ValidationIssue {
                                field: field.name.clone(),
                                rule: "regex".to_string(),
                                expected: pattern.clone(),
                                got: v.to_string(),
                                severity: IssueSeverity::Error,
                            });
                        }
                    }
                    if !type_matches(&field.field_type, v) {
                        issues.push(ValidationIssue {
                            field: field.name.clone(),
                            rule: "type".to_string(),
                            expected: field.field_type.clone(),
                            got: json_type_name(v).to_string(),
                            severity: IssueSeverity::Error,
                        });
                    }
                }
                None => {}
            }
        }

        let declared: std::collections::HashSet<&str> = type_def.fields.iter().map(|f| f.name.as_str()).collect();
        for key in metadata.keys() {
            if !declared.contains(key.as_str()) {
                issues.push(ValidationIssue {
                    field: key.clone(),
                    rule: "unknown_field".to_string(),
                    expected: "declared field".to_string(),
                    got: key.clone(),
                    severity: unknown_severity,
                });
            }
        }

        issues
    }
}

fn type_matches(field_type: &str, value: &serde_json::Value) -> bool {
    match field_type {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "date" => value.is_string(),
        _ => true,
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Default subdirectory mapping for the built-in entry kinds, mirroring
/// `CORE_TYPES` in the original `repository.py`.
fn core_type_subdir(entry_type: &str) -> Option<String> {
    let table: HashMap<&str, &str> = HashMap::from([
        ("note", "notes"),
        ("event", "events"),
        ("person", "people"),
        ("org", "orgs"),
        ("task", "tasks"),
        ("collection", "collections"),
        ("qa_assessment", "qa"),
    ]);
    table.get(entry_type).map(|s| s.to_string())
}

/// Whether a [`ValidationIssue`] should block a write or merely be reported
/// alongside it, per spec.md §3/§4.2's `allow_other`-driven classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Error,
    Warning,
}

/// One validation failure: a field, the rule it broke, and the
/// expected-vs-actual values, per spec.md §7's `qa_issues`/`warnings` shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub rule: String,
    pub expected: String,
    pub got: String,
    pub severity: IssueSeverity,
}
