//! Package definition schema for airgap.
//!
//! This crate defines the declarative layer: `zarf.yaml` parsing into
//! [`PackageDefinition`], the flattened [`ResolvedPackage`], deprecated-field
//! migrations, aggregated semantic validation ([`Findings`]), component
//! filters, and container image reference normalization.

pub mod component;
pub mod filter;
pub mod image;
pub mod migrate;
pub mod package;
pub mod types;
pub mod validate;

pub use component::{
    Action, ActionDefaults, ActionSet, Annotations, ChartSpec, ChartVariable, Component,
    ComponentActions, ComponentImport, ContainerTarget, DataInjection, DeprecatedScripts,
    FileSpec, HealthCheck, ManifestSpec, OnlyCluster, OnlyFilter, SetVariable,
};
pub use filter::{AllComponents, ByLocalOs, ByName, ComponentFilter, FilterError};
pub use image::{same_image, ImageRef, InvalidImageRef};
pub use migrate::{known_migrations, migrate_deprecated};
pub use package::{
    host_architecture, parse_package_file, parse_package_str, BuildData, Constant, Metadata,
    PackageDefinition, PackageKind, ResolvedPackage, SchemaError, Variable, PACKAGE_DEFINITION,
    SKELETON_ARCH,
};
pub use types::{OciDigest, Sha256Hex};
pub use validate::{Finding, Findings, SemanticValidator, Severity, ValidationError, Validator};
