use crate::component::{Annotations, Component};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the package definition, both in source trees and in built layouts.
pub const PACKAGE_DEFINITION: &str = "zarf.yaml";

/// Architecture recorded for architecture-independent skeleton packages.
pub const SKELETON_ARCH: &str = "skeleton";

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read package definition {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse package definition: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("component '{0}' still carries an unresolved import")]
    UnresolvedImport(String),
    #[error("duplicate component name '{0}'")]
    DuplicateComponent(String),
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackageKind {
    #[default]
    ZarfPackageConfig,
    ZarfInitConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub uncompressed: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub architecture: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub authors: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub documentation: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vendor: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub aggregate_checksum: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: Annotations,
}

/// Facts recorded by the builder; empty on an as-authored definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildData {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub terminal: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub architecture: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub migrations: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub registry_overrides: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub flavor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed: Option<bool>,
}

impl BuildData {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub prompt: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub sensitive: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_indent: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pattern: String,
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constant {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_indent: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pattern: String,
}

/// A declarative package definition as authored in `zarf.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageDefinition {
    #[serde(default)]
    pub kind: PackageKind,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "BuildData::is_empty")]
    pub build: BuildData,
    #[serde(default)]
    pub components: Vec<Component>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constants: Vec<Constant>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<Variable>,
}

impl PackageDefinition {
    pub fn is_init_config(&self) -> bool {
        self.kind == PackageKind::ZarfInitConfig
    }

    pub fn is_skeleton(&self) -> bool {
        self.build.architecture == SKELETON_ARCH || self.metadata.architecture == SKELETON_ARCH
    }

    /// Architecture the package was built for, falling back to the authored metadata.
    pub fn architecture(&self) -> &str {
        if self.build.architecture.is_empty() {
            &self.metadata.architecture
        } else {
            &self.build.architecture
        }
    }

    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name == name)
    }

    pub fn to_yaml(&self) -> Result<String, SchemaError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Architecture name of the running host, in the Go/OCI spelling (`amd64`, `arm64`).
pub fn host_architecture() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "powerpc64" => "ppc64le",
        other => other,
    }
}

pub fn parse_package_str(input: &str) -> Result<PackageDefinition, SchemaError> {
    Ok(serde_yaml::from_str(input)?)
}

pub fn parse_package_file(path: impl AsRef<Path>) -> Result<PackageDefinition, SchemaError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| SchemaError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_package_str(&content)
}

/// A package definition whose imports have all been flattened.
///
/// Only constructible through [`ResolvedPackage::from_flattened`], which
/// rejects leftover imports and duplicate component names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPackage(PackageDefinition);

impl ResolvedPackage {
    pub fn from_flattened(pkg: PackageDefinition) -> Result<Self, SchemaError> {
        let mut seen = HashSet::new();
        for component in &pkg.components {
            if component.import.is_some() {
                return Err(SchemaError::UnresolvedImport(component.name.clone()));
            }
            if !seen.insert(component.name.as_str()) {
                return Err(SchemaError::DuplicateComponent(component.name.clone()));
            }
        }
        Ok(Self(pkg))
    }

    pub fn definition(&self) -> &PackageDefinition {
        &self.0
    }

    pub fn into_inner(self) -> PackageDefinition {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentImport;

    const SAMPLE: &str = r#"
kind: ZarfPackageConfig
metadata:
  name: podinfo
  version: 1.0.0
  annotations:
    org.example/team: platform
components:
  - name: podinfo
    required: true
    images:
      - ghcr.io/stefanprodan/podinfo:6.4.0
variables:
  - name: DOMAIN
    default: example.com
constants:
  - name: VERSION
    value: "1.0.0"
"#;

    #[test]
    fn parse_sample_definition() {
        let pkg = parse_package_str(SAMPLE).unwrap();
        assert_eq!(pkg.kind, PackageKind::ZarfPackageConfig);
        assert_eq!(pkg.metadata.name, "podinfo");
        assert_eq!(pkg.metadata.annotations["org.example/team"], "platform");
        assert!(pkg.components[0].is_required());
        assert_eq!(pkg.variables[0].default, "example.com");
        assert_eq!(pkg.constants[0].value, "1.0.0");
        assert!(pkg.build.is_empty());
    }

    #[test]
    fn yaml_roundtrip_is_stable() {
        let pkg = parse_package_str(SAMPLE).unwrap();
        let first = pkg.to_yaml().unwrap();
        let second = parse_package_str(&first).unwrap().to_yaml().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn init_kind_parses() {
        let pkg = parse_package_str("kind: ZarfInitConfig\nmetadata:\n  name: init\n").unwrap();
        assert!(pkg.is_init_config());
    }

    #[test]
    fn architecture_prefers_build_data() {
        let mut pkg = parse_package_str(SAMPLE).unwrap();
        pkg.metadata.architecture = "arm64".to_owned();
        assert_eq!(pkg.architecture(), "arm64");
        pkg.build.architecture = "amd64".to_owned();
        assert_eq!(pkg.architecture(), "amd64");
    }

    #[test]
    fn host_architecture_uses_oci_names() {
        let arch = host_architecture();
        assert_ne!(arch, "x86_64");
        assert_ne!(arch, "aarch64");
    }

    #[test]
    fn parse_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("zarf.yaml");
        let err = parse_package_file(&missing).unwrap_err();
        assert!(err.to_string().contains("zarf.yaml"));
    }

    #[test]
    fn resolved_rejects_unresolved_import() {
        let mut pkg = parse_package_str(SAMPLE).unwrap();
        pkg.components[0].import = Some(ComponentImport {
            path: "common".to_owned(),
            ..Default::default()
        });
        assert!(matches!(
            ResolvedPackage::from_flattened(pkg),
            Err(SchemaError::UnresolvedImport(name)) if name == "podinfo"
        ));
    }

    #[test]
    fn resolved_rejects_duplicate_names() {
        let mut pkg = parse_package_str(SAMPLE).unwrap();
        let dup = pkg.components[0].clone();
        pkg.components.push(dup);
        assert!(matches!(
            ResolvedPackage::from_flattened(pkg),
            Err(SchemaError::DuplicateComponent(_))
        ));
    }
}
