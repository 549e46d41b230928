//! Semantic validation of package definitions.
//!
//! Validation never stops at the first problem: every check runs and
//! contributes a [`Finding`] carrying a severity and a document locator
//! (`.components.[2].charts.[0]`), so callers can report everything at once.

use crate::package::PackageDefinition;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

const MAX_CHART_NAME_LEN: usize = 253;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub severity: Severity,
    /// YAML path of the offending node, e.g. `.components.[0].files.[1]`.
    pub locator: String,
    pub message: String,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}: {}", self.severity, self.locator, self.message)
    }
}

/// Ordered list of validation findings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Findings(Vec<Finding>);

impl Findings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, locator: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Error, locator, message);
    }

    pub fn warning(&mut self, locator: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Warning, locator, message);
    }

    fn push(&mut self, severity: Severity, locator: impl Into<String>, message: impl Into<String>) {
        self.0.push(Finding {
            severity,
            locator: locator.into(),
            message: message.into(),
        });
    }

    pub fn extend(&mut self, other: Findings) {
        self.0.extend(other.0);
    }

    pub fn has_errors(&self) -> bool {
        self.0.iter().any(|f| f.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Finding> {
        self.0.iter().filter(|f| f.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.0.iter().filter(|f| f.severity == Severity::Warning)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Finding> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Turn the findings into an error when any of them is an error.
    pub fn into_result(self) -> Result<Findings, ValidationError> {
        if self.has_errors() {
            Err(ValidationError { findings: self })
        } else {
            Ok(self)
        }
    }
}

/// Every finding produced by a failed validation pass.
#[derive(Debug, Error)]
#[error("package validation failed with {} error(s): {}", .findings.errors().count(), summarize(.findings))]
pub struct ValidationError {
    pub findings: Findings,
}

fn summarize(findings: &Findings) -> String {
    findings
        .errors()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Schema + semantic validation capability consumed by the builder.
pub trait Validator {
    fn validate(&self, pkg: &PackageDefinition) -> Findings;
}

/// Built-in rule set covering naming, uniqueness, and per-resource shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct SemanticValidator;

impl Validator for SemanticValidator {
    fn validate(&self, pkg: &PackageDefinition) -> Findings {
        let mut findings = Findings::new();

        if !is_lowercase_name(&pkg.metadata.name) {
            findings.error(
                ".metadata.name",
                format!(
                    "package name '{}' must be lowercase alphanumerics and hyphens, not starting with a hyphen",
                    pkg.metadata.name
                ),
            );
        }
        if pkg.metadata.version.is_empty() && !pkg.is_init_config() {
            findings.warning(".metadata.version", "package version is empty");
        }
        if pkg.components.is_empty() {
            findings.error(".components", "package must have at least one component");
        }

        let mut names = HashSet::new();
        for (idx, component) in pkg.components.iter().enumerate() {
            let loc = format!(".components.[{idx}]");
            if !is_lowercase_name(&component.name) {
                findings.error(
                    format!("{loc}.name"),
                    format!("component name '{}' is not a valid name", component.name),
                );
            }
            if !names.insert(component.name.as_str()) {
                findings.error(
                    format!("{loc}.name"),
                    format!("component name '{}' is not unique", component.name),
                );
            }
            if component.is_required() && component.default {
                findings.error(
                    format!("{loc}.default"),
                    "component cannot be both required and default",
                );
            }
            if !component.group.is_empty() {
                findings.warning(format!("{loc}.group"), "'group' is deprecated");
            }
            if let Some(import) = &component.import {
                validate_import(&mut findings, &loc, &import.path, &import.url);
            }
            validate_resources(&mut findings, &loc, component);
        }

        let mut variable_names = HashSet::new();
        for (idx, variable) in pkg.variables.iter().enumerate() {
            let loc = format!(".variables.[{idx}]");
            if !is_variable_name(&variable.name) {
                findings.error(
                    format!("{loc}.name"),
                    format!("variable name '{}' must be uppercase, digits, or '_'", variable.name),
                );
            }
            if !variable_names.insert(variable.name.as_str()) {
                findings.warning(
                    format!("{loc}.name"),
                    format!("variable '{}' is declared more than once", variable.name),
                );
            }
        }
        for (idx, constant) in pkg.constants.iter().enumerate() {
            if !is_variable_name(&constant.name) {
                findings.error(
                    format!(".constants.[{idx}].name"),
                    format!("constant name '{}' must be uppercase, digits, or '_'", constant.name),
                );
            }
        }

        findings
    }
}

fn validate_import(findings: &mut Findings, loc: &str, path: &str, url: &str) {
    let loc = format!("{loc}.import");
    match (path.is_empty(), url.is_empty()) {
        (true, true) => findings.error(&loc, "import must set one of path or url"),
        (false, false) => findings.error(&loc, "import cannot set both path and url"),
        _ => {}
    }
    if !path.is_empty() && std::path::Path::new(path).is_absolute() {
        findings.error(format!("{loc}.path"), "import path must be relative");
    }
    if !url.is_empty() && !url.starts_with("oci://") {
        findings.error(format!("{loc}.url"), "import url must be an oci:// reference");
    }
}

fn validate_resources(findings: &mut Findings, loc: &str, component: &crate::Component) {
    for (idx, chart) in component.charts.iter().enumerate() {
        let loc = format!("{loc}.charts.[{idx}]");
        if chart.name.is_empty() {
            findings.error(format!("{loc}.name"), "chart must have a name");
        } else if chart.name.len() > MAX_CHART_NAME_LEN {
            findings.error(
                format!("{loc}.name"),
                format!("chart name exceeds {MAX_CHART_NAME_LEN} characters"),
            );
        }
        if chart.namespace.is_empty() {
            findings.error(format!("{loc}.namespace"), "chart must include a namespace");
        }
        match (chart.url.is_empty(), chart.local_path.is_empty()) {
            (true, true) => findings.error(&loc, "chart must set one of url or localPath"),
            (false, false) => findings.error(&loc, "chart cannot set both url and localPath"),
            _ => {}
        }
        if !chart.url.is_empty() && chart.version.is_empty() && chart.git_path.is_empty() {
            findings.error(format!("{loc}.version"), "remote chart must include a version");
        }
    }
    for (idx, manifest) in component.manifests.iter().enumerate() {
        let loc = format!("{loc}.manifests.[{idx}]");
        if manifest.name.is_empty() {
            findings.error(format!("{loc}.name"), "manifest must have a name");
        }
        if manifest.files.is_empty() && manifest.kustomizations.is_empty() {
            findings.error(&loc, "manifest must have at least one file or kustomization");
        }
    }
    for (idx, file) in component.files.iter().enumerate() {
        let loc = format!("{loc}.files.[{idx}]");
        if file.source.is_empty() {
            findings.error(format!("{loc}.source"), "file must have a source");
        }
        if file.target.is_empty() {
            findings.error(format!("{loc}.target"), "file must have a target");
        }
        if !file.shasum.is_empty() && !crate::Sha256Hex::new(file.shasum.as_str()).is_well_formed()
        {
            findings.error(format!("{loc}.shasum"), "shasum must be a sha256 hex digest");
        }
    }
    for (idx, injection) in component.data_injections.iter().enumerate() {
        let loc = format!("{loc}.dataInjections.[{idx}]");
        if injection.source.is_empty() {
            findings.error(format!("{loc}.source"), "data injection must have a source");
        }
        if injection.target.path.is_empty() {
            findings.error(format!("{loc}.target.path"), "data injection must have a target path");
        }
    }
}

fn is_lowercase_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

fn is_variable_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::parse_package_str;

    fn validate(yaml: &str) -> Findings {
        SemanticValidator.validate(&parse_package_str(yaml).unwrap())
    }

    #[test]
    fn valid_package_has_no_errors() {
        let findings = validate(
            r"
metadata:
  name: ok
  version: 0.1.0
components:
  - name: web
    files:
      - source: a.txt
        target: /opt/a.txt
",
        );
        assert!(!findings.has_errors(), "{findings:?}");
        assert!(findings.is_empty());
    }

    #[test]
    fn findings_are_aggregated() {
        let findings = validate(
            r"
metadata:
  name: Bad_Name
components:
  - name: dup
    required: true
    default: true
    charts:
      - name: c
  - name: dup
    files:
      - source: ''
        target: ''
variables:
  - name: lower
",
        );
        let errors: Vec<_> = findings.errors().collect();
        // name, required+default, chart namespace, chart source, duplicate, file source, file target, variable
        assert_eq!(errors.len(), 8, "{errors:#?}");
        assert_eq!(findings.warnings().count(), 1);
    }

    #[test]
    fn locator_points_at_offending_node() {
        let findings = validate(
            r"
metadata:
  name: pkg
  version: 1.0.0
components:
  - name: a
  - name: b
    manifests:
      - name: m
",
        );
        let error = findings.errors().next().unwrap();
        assert_eq!(error.locator, ".components.[1].manifests.[0]");
    }

    #[test]
    fn import_must_set_exactly_one_source() {
        let findings = validate(
            r"
metadata:
  name: pkg
  version: 1.0.0
components:
  - name: both
    import:
      path: common
      url: oci://example.com/common:1.0
  - name: absolute
    import:
      path: /abs/common
  - name: bad-url
    import:
      url: https://example.com/pkg
",
        );
        let messages: Vec<_> = findings.errors().map(|f| f.message.clone()).collect();
        assert!(messages.iter().any(|m| m.contains("both path and url")));
        assert!(messages.iter().any(|m| m.contains("must be relative")));
        assert!(messages.iter().any(|m| m.contains("oci://")));
    }

    #[test]
    fn into_result_keeps_warnings_on_success() {
        let mut findings = Findings::new();
        findings.warning(".metadata.version", "empty");
        let ok = findings.into_result().unwrap();
        assert_eq!(ok.len(), 1);

        let mut findings = Findings::new();
        findings.error(".components", "none");
        let err = findings.into_result().unwrap_err();
        assert!(err.to_string().contains("1 error(s)"));
        assert!(err.to_string().contains(".components"));
    }
}
