use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn is_false(value: &bool) -> bool {
    !*value
}

/// A named, independently filterable unit of package content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, skip_serializing_if = "OnlyFilter::is_empty")]
    pub only: OnlyFilter,
    /// Deprecated grouping key, still parsed so old definitions load.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import: Option<ComponentImport>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manifests: Vec<ManifestSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub charts: Vec<ChartSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_injections: Vec<DataInjection>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repos: Vec<String>,
    /// Deprecated lifecycle scripts, migrated into `actions` on load.
    #[serde(default, skip_serializing_if = "DeprecatedScripts::is_empty")]
    pub scripts: DeprecatedScripts,
    #[serde(default, skip_serializing_if = "ComponentActions::is_empty")]
    pub actions: ComponentActions,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub health_checks: Vec<HealthCheck>,
}

impl Component {
    /// A component passes the build target when its `only` constraints are
    /// either unset or equal to the requested architecture and flavor.
    pub fn is_compatible(&self, arch: &str, flavor: &str) -> bool {
        let arch_ok =
            self.only.cluster.architecture.is_empty() || self.only.cluster.architecture == arch;
        let flavor_ok = self.only.flavor.is_empty() || self.only.flavor == flavor;
        arch_ok && flavor_ok
    }

    pub fn is_required(&self) -> bool {
        self.required.unwrap_or(false)
    }

    /// Name of the component to pick out of an imported definition.
    pub fn import_target_name(&self) -> &str {
        match &self.import {
            Some(import) if !import.name.is_empty() => &import.name,
            _ => &self.name,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlyFilter {
    #[serde(default, rename = "localOS", skip_serializing_if = "String::is_empty")]
    pub local_os: String,
    #[serde(default, skip_serializing_if = "OnlyCluster::is_empty")]
    pub cluster: OnlyCluster,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub flavor: String,
}

impl OnlyFilter {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlyCluster {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub architecture: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub distros: Vec<String>,
}

impl OnlyCluster {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Where a component's definition comes from when it is not declared inline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentImport {
    /// Overrides the name looked up in the imported definition.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub kustomize_allow_any_directory: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kustomizations: Vec<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub no_wait: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub repo_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub git_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub local_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub release_name: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub no_wait: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<ChartVariable>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartVariable {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataInjection {
    pub source: String,
    pub target: ContainerTarget,
    #[serde(default, skip_serializing_if = "is_false")]
    pub compress: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerTarget {
    pub namespace: String,
    pub selector: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub container: String,
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSpec {
    pub source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub shasum: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub executable: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symlinks: Vec<String>,
    /// Path inside an archive source to pull out instead of the whole archive.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub extract_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeprecatedScripts {
    #[serde(default, skip_serializing_if = "is_false")]
    pub show_output: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub retry: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prepare: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub before: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after: Vec<String>,
}

impl DeprecatedScripts {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentActions {
    #[serde(default, skip_serializing_if = "ActionSet::is_empty")]
    pub on_create: ActionSet,
    #[serde(default, skip_serializing_if = "ActionSet::is_empty")]
    pub on_deploy: ActionSet,
    #[serde(default, skip_serializing_if = "ActionSet::is_empty")]
    pub on_remove: ActionSet,
}

impl ComponentActions {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn sets_mut(&mut self) -> [&mut ActionSet; 3] {
        [&mut self.on_create, &mut self.on_deploy, &mut self.on_remove]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionSet {
    #[serde(default, skip_serializing_if = "ActionDefaults::is_empty")]
    pub defaults: ActionDefaults,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub before: Vec<Action>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after: Vec<Action>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_success: Vec<Action>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_failure: Vec<Action>,
}

impl ActionSet {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn actions_mut(&mut self) -> impl Iterator<Item = &mut Action> {
        self.before
            .iter_mut()
            .chain(self.after.iter_mut())
            .chain(self.on_success.iter_mut())
            .chain(self.on_failure.iter_mut())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDefaults {
    #[serde(default, skip_serializing_if = "is_false")]
    pub mute: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_total_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dir: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
}

impl ActionDefaults {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mute: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_total_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cmd: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Deprecated single-variable form of `set_variables`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub set_variable: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub set_variables: Vec<SetVariable>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetVariable {
    pub name: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub sensitive: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_indent: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pattern: String,
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
}

/// Free-form key/value pairs, kept ordered so serialization is stable.
pub type Annotations = BTreeMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;

    fn component_with_only(arch: &str, flavor: &str) -> Component {
        Component {
            name: "c".to_owned(),
            only: OnlyFilter {
                cluster: OnlyCluster {
                    architecture: arch.to_owned(),
                    distros: Vec::new(),
                },
                flavor: flavor.to_owned(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn unconstrained_component_is_always_compatible() {
        let c = component_with_only("", "");
        assert!(c.is_compatible("amd64", ""));
        assert!(c.is_compatible("arm64", "vanilla"));
    }

    #[test]
    fn arch_and_flavor_must_both_match() {
        let c = component_with_only("amd64", "vanilla");
        assert!(c.is_compatible("amd64", "vanilla"));
        assert!(!c.is_compatible("arm64", "vanilla"));
        assert!(!c.is_compatible("amd64", "chocolate"));
    }

    #[test]
    fn import_target_defaults_to_own_name() {
        let mut c = Component {
            name: "web".to_owned(),
            import: Some(ComponentImport {
                path: "../common".to_owned(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(c.import_target_name(), "web");
        c.import.as_mut().unwrap().name = "base-web".to_owned();
        assert_eq!(c.import_target_name(), "base-web");
    }

    #[test]
    fn parses_camel_case_fields() {
        let yaml = r"
name: app
only:
  localOS: linux
  cluster:
    architecture: amd64
charts:
  - name: db
    localPath: chart
    releaseName: db-release
    valuesFiles: [values.yaml]
dataInjections:
  - source: data
    target:
      namespace: ns
      selector: app=db
      path: /data
actions:
  onCreate:
    defaults:
      dir: scripts
    before:
      - cmd: ./prepare.sh
        setVariable: PREPARED
";
        let c: Component = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(c.only.local_os, "linux");
        assert_eq!(c.charts[0].release_name, "db-release");
        assert_eq!(c.data_injections[0].target.selector, "app=db");
        assert_eq!(c.actions.on_create.defaults.dir, "scripts");
        assert_eq!(c.actions.on_create.before[0].set_variable, "PREPARED");
    }

    #[test]
    fn empty_sections_are_not_serialized() {
        let c = Component {
            name: "bare".to_owned(),
            ..Default::default()
        };
        let yaml = serde_yaml::to_string(&c).unwrap();
        assert_eq!(yaml.trim(), "name: bare");
    }
}
