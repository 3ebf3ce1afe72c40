use crate::traits::FileSystem;
use crate::vars::VariableDecl;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Attribute map shared across the engine (resource attributes, state, plans)
pub type AttrMap = serde_json::Map<String, serde_json::Value>;

/// Expected apiVersion for stack manifests
pub const API_VERSION: &str = "lattice.dev/v1";

/// A parsed `lattice.yaml` stack manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackManifest {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: StackMetadata,
    pub spec: StackSpec,
}

/// Stack metadata block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The declarative body of a stack: variables, resources and outputs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackSpec {
    #[serde(default)]
    pub variables: BTreeMap<String, VariableDecl>,
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,
    #[serde(default)]
    pub outputs: BTreeMap<String, OutputSpec>,
}

/// A single resource definition as written in the manifest
///
/// Attribute values may contain unresolved `${...}` expressions; the
/// expression resolver materializes them once dependency order is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Unique dotted address, e.g. "network.vpc"
    pub address: String,

    /// Provider resource kind, e.g. "vpc", "container"
    pub kind: String,

    /// Conditional existence: an expression resolving to 0/1 or true/false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<String>,

    /// Explicit dependencies (addresses this resource must follow)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    /// Attribute map; literal values and/or expressions
    #[serde(default)]
    pub attributes: AttrMap,
}

/// A named output computed from final resource attributes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSpec {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl StackManifest {
    /// Load and parse a stack manifest from a file
    pub fn from_file(fs: &dyn FileSystem, path: &Path) -> Result<Self> {
        let contents = fs
            .read_to_string(path)
            .with_context(|| format!("Failed to read stack manifest: {:?}", path))?;

        let manifest: StackManifest = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse stack manifest: {:?}", path))?;

        if manifest.api_version != API_VERSION {
            anyhow::bail!(
                "Unsupported apiVersion '{}' in {:?} (expected '{}')",
                manifest.api_version,
                path,
                API_VERSION
            );
        }

        if manifest.kind != "Stack" {
            anyhow::bail!(
                "Unsupported kind '{}' in {:?} (expected 'Stack')",
                manifest.kind,
                path
            );
        }

        Ok(manifest)
    }
}

/// Starter manifest written by `lattice init` when no manifest exists
pub fn starter_manifest(stack_name: &str) -> String {
    format!(
        r#"apiVersion: lattice.dev/v1
kind: Stack
metadata:
  name: {}
  description: Starter stack - edit me
spec:
  variables:
    environment:
      type: string
      default: development
      validation:
        one_of: [development, staging, production]
        message: environment must be development, staging or production
    enable_gateway:
      type: bool
      default: false
  resources:
    - address: network.main
      kind: network
      attributes:
        cidr: 10.0.0.0/16
        tags:
          environment: "${{var.environment}}"
    - address: gateway.bridge
      kind: container
      count: "${{var.enable_gateway}}"
      depends_on: [network.main]
      attributes:
        image: bridge-host:latest
        port: 8080
        network_id: "${{network.main.id}}"
        env:
          LISTEN_ADDR: 0.0.0.0:8080
  outputs:
    network_id:
      value: "${{network.main.id}}"
      description: Identifier of the main network
"#,
        stack_name
    )
}
