//! Variable declarations and resolution
//!
//! Variables are declared in the manifest with a type, an optional default
//! and an optional declarative validation rule. Effective values come from
//! overrides (process environment beats the var file) or fall back to the
//! default; resolution is pure and happens once, before planning begins.

use crate::error::{EngineError, EngineResult};
use crate::traits::FileSystem;
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Environment variable prefix for overrides, e.g. LATTICE_VAR_region
pub const ENV_PREFIX: &str = "LATTICE_VAR_";

/// Declared variable type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarType {
    String,
    Number,
    Bool,
    List,
    Map,
}

impl VarType {
    fn label(&self) -> &'static str {
        match self {
            VarType::String => "string",
            VarType::Number => "number",
            VarType::Bool => "bool",
            VarType::List => "list",
            VarType::Map => "map",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            VarType::String => value.is_string(),
            VarType::Number => value.is_number(),
            VarType::Bool => value.is_boolean(),
            VarType::List => value.is_array(),
            VarType::Map => value.is_object(),
        }
    }
}

/// A variable declaration from the manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableDecl {
    #[serde(rename = "type")]
    pub var_type: VarType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationRule>,
}

/// Declarative validation rule for a variable value
///
/// Rules are data rather than code so manifests stay serializable; each
/// field that is present must pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_of: Option<Vec<Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ValidationRule {
    /// Check a value against this rule, returning the violation message
    fn check(&self, value: &Value) -> Result<(), String> {
        if let Some(pattern) = &self.pattern {
            let re = Regex::new(pattern)
                .map_err(|e| format!("invalid validation pattern '{}': {}", pattern, e))?;
            match value.as_str() {
                Some(s) if re.is_match(s) => {}
                _ => return Err(self.violation(&format!("must match pattern '{}'", pattern))),
            }
        }

        if let Some(allowed) = &self.one_of
            && !allowed.contains(value)
        {
            return Err(self.violation(&format!(
                "must be one of {}",
                serde_json::Value::Array(allowed.clone())
            )));
        }

        if self.min.is_some() || self.max.is_some() {
            let n = value
                .as_f64()
                .ok_or_else(|| self.violation("min/max validation requires a number"))?;
            if let Some(min) = self.min
                && n < min
            {
                return Err(self.violation(&format!("must be >= {}", min)));
            }
            if let Some(max) = self.max
                && n > max
            {
                return Err(self.violation(&format!("must be <= {}", max)));
            }
        }

        Ok(())
    }

    fn violation(&self, generated: &str) -> String {
        match &self.message {
            Some(msg) => msg.clone(),
            None => generated.to_string(),
        }
    }
}

/// Immutable name -> value map produced by variable resolution
#[derive(Debug, Clone, Default)]
pub struct VariableRegistry {
    values: BTreeMap<String, Value>,
}

impl VariableRegistry {
    /// Resolve effective values for all declared variables
    ///
    /// For each declaration: an override (already reduced to env-over-file
    /// precedence) wins over the default; a variable with neither fails.
    /// Every resolved value is checked against the declared type and the
    /// validation rule before the registry is returned.
    pub fn resolve(
        decls: &BTreeMap<String, VariableDecl>,
        overrides: &BTreeMap<String, String>,
    ) -> EngineResult<Self> {
        let mut values = BTreeMap::new();

        for (name, decl) in decls {
            let value = match overrides.get(name) {
                Some(raw) => parse_override(name, decl.var_type, raw)?,
                None => match &decl.default {
                    Some(default) => default.clone(),
                    None => {
                        return Err(EngineError::Validation {
                            variable: name.clone(),
                            message: "no value supplied and no default declared".to_string(),
                        });
                    }
                },
            };

            if !decl.var_type.matches(&value) {
                return Err(EngineError::Validation {
                    variable: name.clone(),
                    message: format!("expected {}, got {}", decl.var_type.label(), value),
                });
            }

            if let Some(rule) = &decl.validation {
                rule.check(&value).map_err(|message| EngineError::Validation {
                    variable: name.clone(),
                    message,
                })?;
            }

            values.insert(name.clone(), value);
        }

        Ok(Self { values })
    }

    /// Look up a resolved variable value
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Build an empty registry (stacks without variables)
    #[allow(dead_code)]
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Parse a raw override string according to the declared type
///
/// Strings are taken verbatim; everything else is parsed as JSON so
/// `LATTICE_VAR_replicas=3` and `LATTICE_VAR_tags='{"team":"core"}'` work.
fn parse_override(name: &str, var_type: VarType, raw: &str) -> EngineResult<Value> {
    if var_type == VarType::String {
        return Ok(Value::String(raw.to_string()));
    }

    serde_json::from_str(raw).map_err(|_| EngineError::Validation {
        variable: name.to_string(),
        message: format!("override '{}' is not a valid {}", raw, var_type.label()),
    })
}

/// Collect overrides from a var file and the process environment
///
/// The var file holds `NAME=VALUE` lines (blank lines and `#` comments are
/// skipped). Environment entries prefixed with LATTICE_VAR_ take precedence
/// over file entries of the same name.
pub fn collect_overrides(
    fs: &dyn FileSystem,
    var_file: Option<&Path>,
    env: impl Iterator<Item = (String, String)>,
) -> Result<BTreeMap<String, String>> {
    let mut overrides = BTreeMap::new();

    if let Some(path) = var_file {
        let contents = fs
            .read_to_string(path)
            .with_context(|| format!("Failed to read var file: {:?}", path))?;

        for (line_no, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (name, value) = line.split_once('=').with_context(|| {
                format!(
                    "Malformed line {} in {:?}: expected NAME=VALUE",
                    line_no + 1,
                    path
                )
            })?;
            overrides.insert(name.trim().to_string(), value.trim().to_string());
        }
    }

    for (key, value) in env {
        if let Some(name) = key.strip_prefix(ENV_PREFIX) {
            overrides.insert(name.to_string(), value);
        }
    }

    Ok(overrides)
}
