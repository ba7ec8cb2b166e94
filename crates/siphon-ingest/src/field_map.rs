//! Column name mapping applied to header names before they become record fields

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named transform applied to every column name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldTransform {
    /// Lowercase, collapse runs of non-alphanumerics into `_`, trim `_` at both ends
    Slugify,
    Lowercase,
    Uppercase,
}

/// Either a transform name (`field_map: slugify`) or an explicit rename table.
///
/// Names missing from a rename table pass through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldMap {
    Transform(FieldTransform),
    Rename(BTreeMap<String, String>),
}

impl FieldMap {
    pub fn apply(&self, name: &str) -> String {
        match self {
            FieldMap::Transform(t) => t.apply(name),
            FieldMap::Rename(table) => table
                .get(name)
                .cloned()
                .unwrap_or_else(|| name.to_string()),
        }
    }
}

impl FieldTransform {
    pub fn apply(&self, name: &str) -> String {
        match self {
            FieldTransform::Lowercase => name.to_lowercase(),
            FieldTransform::Uppercase => name.to_uppercase(),
            FieldTransform::Slugify => slugify(name),
        }
    }
}

fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.chars() {
        if c.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(c.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}
