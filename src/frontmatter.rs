//! Parsing and serializing Markdown files with YAML frontmatter.
//!
//! Grounded on `serde_yaml` usage patterns from the corpus (kasl's
//! `libs::config` uses serde+JSON for its sidecar file; this module adapts
//! the same "parse into a typed/semi-typed value, round-trip on save" shape
//! to `---`-delimited YAML blocks instead). Key insertion order survives a
//! round trip; comments and the source's original quote characters do not —
//! see the note on [`FrontmatterDocument::render`] and DESIGN.md.

use serde_json::{Map, Value};
use serde_yaml::Value as YamlValue;

use crate::error::{PyriteError, Result};

const DELIMITER: &str = "---";

/// A parsed Markdown file: YAML frontmatter plus the remaining body text.
#[derive(Debug, Clone, PartialEq)]
pub struct FrontmatterDocument {
    pub metadata: Map<String, Value>,
    pub body: String,
}

impl FrontmatterDocument {
    pub fn new(metadata: Map<String, Value>, body: String) -> Self {
        Self { metadata, body }
    }

    /// Parses `---\n<yaml>\n---\n<body>` into a document. A file with no
    /// leading `---` block is treated as having empty metadata and its
    /// entire contents as body, matching the original's tolerant parser.
    pub fn parse(text: &str) -> Result<Self> {
        let Some(rest) = text.strip_prefix(DELIMITER) else {
            return Ok(Self { metadata: Map::new(), body: text.to_string() });
        };
        // First line after the opening delimiter must be a newline for this
        // to be a frontmatter block rather than a literal `---` in prose.
        let rest = match rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n")) {
            Some(r) => r,
            None => return Ok(Self { metadata: Map::new(), body: text.to_string() }),
        };

        let Some(end) = find_closing_delimiter(rest) else {
            return Ok(Self { metadata: Map::new(), body: text.to_string() });
        };

        let yaml_block = &rest[..end];
        let body_start = end + DELIMITER.len();
        let body = rest[body_start..].trim_start_matches('\n').to_string();

        let yaml_value: YamlValue = if yaml_block.trim().is_empty() {
            YamlValue::Mapping(Default::default())
        } else {
            serde_yaml::from_str(yaml_block)?
        };

        let metadata = yaml_to_json_map(yaml_value)?;
        Ok(Self { metadata, body })
    }

    /// Serializes back to `---\n<yaml>\n---\n\n<body>`. Key order is
    /// preserved from the `serde_json::Map`'s insertion order (the
    /// `preserve_order` feature backs it with an `IndexMap`, enabled in
    /// `Cargo.toml`). `serde_yaml`'s emitter quotes scalars that would
    /// otherwise round-trip as a different type (a numeric-looking string,
    /// `yes`/`no`, etc.) on its own; this crate does not add quote-style
    /// inference on top of that. Comments in the original YAML block are
    /// discarded — `serde_yaml::Value` carries no comment data to preserve.
    /// See DESIGN.md's "Frontmatter round-trip fidelity" note.
    pub fn render(&self) -> Result<String> {
        let yaml_value = json_map_to_yaml(&self.metadata);
        let yaml_text = serde_yaml::to_string(&yaml_value)?;
        let mut out = String::new();
        out.push_str(DELIMITER);
        out.push('\n');
        out.push_str(&yaml_text);
        out.push_str(DELIMITER);
        out.push('\n');
        if !self.body.is_empty() {
            out.push('\n');
            out.push_str(&self.body);
            if !self.body.ends_with('\n') {
                out.push('\n');
            }
        }
        Ok(out)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

fn find_closing_delimiter(text: &str) -> Option<usize> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed == DELIMITER {
            return Some(offset);
        }
        offset += line.len();
    }
    None
}

fn yaml_to_json_map(value: YamlValue) -> Result<Map<String, Value>> {
    let json_value = yaml_to_json(value)?;
    match json_value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(PyriteError::Other(format!(
            "frontmatter must be a YAML mapping, got {other}"
        ))),
    }
}

fn yaml_to_json(value: YamlValue) -> Result<Value> {
    Ok(match value {
        YamlValue::Null => Value::Null,
        YamlValue::Bool(b) => Value::Bool(b),
        YamlValue::Number(n) => serde_json::to_value(n).map_err(PyriteError::Json)?,
        YamlValue::String(s) => Value::String(s),
        YamlValue::Sequence(seq) => {
            let mut out = Vec::with_capacity(seq.len());
            for item in seq {
                out.push(yaml_to_json(item)?);
            }
            Value::Array(out)
        }
        YamlValue::Mapping(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                let key = match k {
                    YamlValue::String(s) => s,
                    other => serde_yaml::to_string(&other).unwrap_or_default().trim().to_string(),
                };
                out.insert(key, yaml_to_json(v)?);
            }
            Value::Object(out)
        }
        YamlValue::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}

fn json_map_to_yaml(map: &Map<String, Value>) -> YamlValue {
    let mut out = serde_yaml::Mapping::new();
    for (k, v) in map {
        out.insert(YamlValue::String(k.clone()), json_to_yaml(v));
    }
    YamlValue::Mapping(out)
}

fn json_to_yaml(value: &Value) -> YamlValue {
    match value {
        Value::Null => YamlValue::Null,
        Value::Bool(b) => YamlValue::Bool(*b),
        Value::Number(n) => serde_yaml::to_value(n).unwrap_or(YamlValue::Null),
        Value::String(s) => YamlValue::String(s.clone()),
        Value::Array(arr) => YamlValue::Sequence(arr.iter().map(json_to_yaml).collect()),
        Value::Object(map) => json_map_to_yaml(map),
    }
}
