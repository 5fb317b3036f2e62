//! Parameter declarations, values and `$(params.x)` substitution

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

/// A parameter value: either a single string or an array of strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    String(String),
    Array(Vec<String>),
}

impl Default for ParamValue {
    fn default() -> Self {
        ParamValue::String(String::new())
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::String(value.to_string())
    }
}

/// A declared parameter with an optional default
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamSpec {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Value used when the caller does not provide one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ParamValue>,
}

/// A parameter value supplied by a caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub value: ParamValue,
}

impl Param {
    pub fn new(name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Names of declared params that have no default and were not provided
pub fn missing_params(declared: &[ParamSpec], provided: &[Param]) -> Vec<String> {
    declared
        .iter()
        .filter(|spec| spec.default.is_none())
        .filter(|spec| !provided.iter().any(|p| p.name == spec.name))
        .map(|spec| spec.name.clone())
        .collect()
}

/// Substitution table built from declared defaults and provided values.
///
/// Every param is registered under its three reference spellings:
/// `params.x`, `params["x"]` and `params['x']`.
#[derive(Debug, Clone, Default)]
pub struct Replacements {
    strings: HashMap<String, String>,
    arrays: HashMap<String, Vec<String>>,
}

impl Replacements {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults first, then provided values on top
    pub fn from_params(declared: &[ParamSpec], provided: &[Param]) -> Self {
        let mut replacements = Self::new();
        for spec in declared {
            if let Some(default) = &spec.default {
                replacements.set(&spec.name, default);
            }
        }
        for param in provided {
            replacements.set(&param.name, &param.value);
        }
        replacements
    }

    pub fn set(&mut self, name: &str, value: &ParamValue) {
        for key in reference_keys(name) {
            match value {
                ParamValue::String(s) => {
                    self.arrays.remove(&key);
                    self.strings.insert(key, s.clone());
                }
                ParamValue::Array(items) => {
                    self.strings.remove(&key);
                    self.arrays.insert(key, items.clone());
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty() && self.arrays.is_empty()
    }

    /// Replace every string param reference inside `input` in one pass.
    /// Substituted values are never scanned again, and unknown references
    /// are left as written.
    pub fn apply(&self, input: &str) -> String {
        if !input.contains("$(") {
            return input.to_string();
        }
        reference_pattern()
            .replace_all(input, |caps: &Captures| match self.strings.get(&caps[1]) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }

    /// Apply to a list, expanding array references that make up a whole element
    pub fn apply_list(&self, items: &[String]) -> Vec<String> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match self.whole_array(item) {
                Some(values) => out.extend(values.iter().cloned()),
                None => out.push(self.apply(item)),
            }
        }
        out
    }

    pub fn apply_value(&self, value: &ParamValue) -> ParamValue {
        match value {
            ParamValue::String(s) => ParamValue::String(self.apply(s)),
            ParamValue::Array(items) => ParamValue::Array(self.apply_list(items)),
        }
    }

    fn whole_array(&self, item: &str) -> Option<&Vec<String>> {
        let key = item.strip_prefix("$(")?.strip_suffix(')')?;
        self.arrays.get(key)
    }
}

/// `$(params.x)`, `$(params["x"])` or `$(params['x'])`, capturing the key
fn reference_pattern() -> &'static Regex {
    static REFERENCE: OnceLock<Regex> = OnceLock::new();
    REFERENCE.get_or_init(|| {
        Regex::new(r#"\$\((params(?:\.[^)]+|\["[^"\]]*"\]|\['[^'\]]*'\]))\)"#)
            .expect("static regex is valid")
    })
}

fn reference_keys(name: &str) -> [String; 3] {
    [
        format!("params.{}", name),
        format!("params[\"{}\"]", name),
        format!("params['{}']", name),
    ]
}
