//! Typed placeholder references.
//!
//! Wire syntax:
//! - `$$action_resource.<action-name>::<dotted.path>$$`
//! - `$$resource.<resource-id>::<dotted.path>$$`
//! - `$$input.<name>$$`
//!
//! An omitted path on a runtime reference stands for the resource id itself.
//! A string that is exactly one placeholder is replaced by the typed value;
//! placeholders embedded in longer strings are spliced in as text.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde_json::Value;
use std::fmt;

use crate::{CoreError, ResourceId};

/// Prefix of any placeholder that has not been substituted yet
pub const UNRESOLVED_MARKER: &str = "$$";

lazy_static! {
    static ref PLACEHOLDER_REGEX: Regex = Regex::new(
        r"\$\$(action_resource|resource|input)\.([^:$\s]+)(?:::([^$\s]*))?\$\$"
    )
    .unwrap();
}

/// Dotted path into a resource detail tree; numeric segments index lists
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    /// Parse `a.0.b`; the empty string is the empty path
    pub fn parse(path: &str) -> Self {
        if path.is_empty() {
            return Self(Vec::new());
        }
        Self(path.split('.').map(str::to_string).collect())
    }

    /// Whether the path has no segments
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Path segments
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Walk the tree; `None` when a segment does not exist
    pub fn extract<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.0.iter().try_fold(value, |current, segment| match current {
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            Value::Object(map) => map.get(segment),
            _ => None,
        })
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// A parsed placeholder
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    /// Value from the resource an action produced
    ActionResource {
        /// Action name, short or stack-qualified
        action: String,
        /// Path into the resource detail
        path: FieldPath,
    },
    /// Value from a resource known by id
    Resource {
        /// Resource id
        id: ResourceId,
        /// Path into the resource detail
        path: FieldPath,
    },
    /// Declared stack input, substituted at compile time
    Input {
        /// Input name
        name: String,
    },
}

impl Reference {
    /// Reference to an action's resource id or a field of its detail
    pub fn action_resource(action: impl Into<String>, path: &str) -> Self {
        Reference::ActionResource {
            action: action.into(),
            path: FieldPath::parse(path),
        }
    }

    /// Reference to a field of a known resource
    pub fn resource(id: impl Into<String>, path: &str) -> Self {
        Reference::Resource {
            id: ResourceId::new(id),
            path: FieldPath::parse(path),
        }
    }

    /// Reference to a declared input
    pub fn input(name: impl Into<String>) -> Self {
        Reference::Input { name: name.into() }
    }

    /// Parse a string that is exactly one placeholder
    pub fn parse(text: &str) -> Option<Self> {
        let captures = PLACEHOLDER_REGEX.captures(text)?;
        let whole = captures.get(0)?;
        if whole.start() != 0 || whole.end() != text.len() {
            return None;
        }
        Self::from_captures(&captures)
    }

    /// Every placeholder in a string, in order of appearance
    pub fn find_all(text: &str) -> Vec<Self> {
        PLACEHOLDER_REGEX
            .captures_iter(text)
            .filter_map(|captures| Self::from_captures(&captures))
            .collect()
    }

    /// Resolved at runtime (as opposed to compile-time input placeholders)
    pub fn is_runtime(&self) -> bool {
        !matches!(self, Reference::Input { .. })
    }

    /// Render back to wire syntax
    pub fn placeholder(&self) -> String {
        self.to_string()
    }

    fn from_captures(captures: &Captures<'_>) -> Option<Self> {
        let kind = captures.get(1)?.as_str();
        let target = captures.get(2)?.as_str();
        let path = captures.get(3).map(|m| m.as_str());
        match kind {
            "action_resource" => Some(Self::action_resource(target, path.unwrap_or(""))),
            "resource" => Some(Self::resource(target, path.unwrap_or(""))),
            "input" if path.is_none() => Some(Self::input(target)),
            _ => None,
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::ActionResource { action, path } if path.is_empty() => {
                write!(f, "$$action_resource.{}$$", action)
            }
            Reference::ActionResource { action, path } => {
                write!(f, "$$action_resource.{}::{}$$", action, path)
            }
            Reference::Resource { id, path } if path.is_empty() => write!(f, "$$resource.{}$$", id),
            Reference::Resource { id, path } => write!(f, "$$resource.{}::{}$$", id, path),
            Reference::Input { name } => write!(f, "$$input.{}$$", name),
        }
    }
}

/// Collect every placeholder in a parameter tree, depth first
pub fn collect_references(value: &Value) -> Vec<Reference> {
    let mut found = Vec::new();
    walk_strings(value, &mut |text| found.extend(Reference::find_all(text)));
    found
}

/// Whether any runtime placeholder remains in the tree
pub fn has_runtime_references(value: &Value) -> bool {
    collect_references(value).iter().any(Reference::is_runtime)
}

/// Whether a value is a string still carrying a placeholder
pub fn is_unresolved(value: &Value) -> bool {
    value
        .as_str()
        .map(|text| text.starts_with(UNRESOLVED_MARKER))
        .unwrap_or(false)
}

/// Rebuild the tree, replacing placeholders the lookup answers.
///
/// `Ok(None)` from the lookup leaves that placeholder untouched; errors abort.
pub fn substitute<F>(value: &Value, lookup: &mut F) -> Result<Value, CoreError>
where
    F: FnMut(&Reference) -> Result<Option<Value>, CoreError>,
{
    match value {
        Value::String(text) => substitute_str(text, lookup),
        Value::Array(items) => items
            .iter()
            .map(|item| substitute(item, lookup))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                out.insert(key.clone(), substitute(item, lookup)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn substitute_str<F>(text: &str, lookup: &mut F) -> Result<Value, CoreError>
where
    F: FnMut(&Reference) -> Result<Option<Value>, CoreError>,
{
    if !text.contains(UNRESOLVED_MARKER) {
        return Ok(Value::String(text.to_string()));
    }

    if let Some(reference) = Reference::parse(text) {
        return Ok(lookup(&reference)?.unwrap_or_else(|| Value::String(text.to_string())));
    }

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for captures in PLACEHOLDER_REGEX.captures_iter(text) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        out.push_str(&text[last..whole.start()]);
        let replacement = match Reference::from_captures(&captures) {
            Some(reference) => lookup(&reference)?,
            None => None,
        };
        match replacement {
            Some(Value::String(s)) => out.push_str(&s),
            Some(other) => out.push_str(&other.to_string()),
            None => out.push_str(whole.as_str()),
        }
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(Value::String(out))
}

fn walk_strings<F: FnMut(&str)>(value: &Value, visit: &mut F) {
    match value {
        Value::String(text) => visit(text),
        Value::Array(items) => items.iter().for_each(|item| walk_strings(item, visit)),
        Value::Object(map) => map.values().for_each(|item| walk_strings(item, visit)),
        _ => {}
    }
}
