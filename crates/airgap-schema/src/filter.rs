use crate::component::Component;
use crate::package::PackageDefinition;
use std::fmt::Debug;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("requested component '{0}' does not exist in the package")]
    UnknownComponent(String),
}

/// Narrows the component list of a definition. Implementations never touch files.
pub trait ComponentFilter: Debug + Send + Sync {
    fn apply(&self, pkg: &PackageDefinition) -> Result<Vec<Component>, FilterError>;
}

/// Keeps every component.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllComponents;

impl ComponentFilter for AllComponents {
    fn apply(&self, pkg: &PackageDefinition) -> Result<Vec<Component>, FilterError> {
        Ok(pkg.components.clone())
    }
}

/// Keeps the named components, in package order. Unknown names are an error.
#[derive(Debug, Clone, Default)]
pub struct ByName {
    requested: Vec<String>,
}

impl ByName {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            requested: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl ComponentFilter for ByName {
    fn apply(&self, pkg: &PackageDefinition) -> Result<Vec<Component>, FilterError> {
        if let Some(missing) = self
            .requested
            .iter()
            .find(|name| pkg.component(name).is_none())
        {
            return Err(FilterError::UnknownComponent(missing.clone()));
        }
        Ok(pkg
            .components
            .iter()
            .filter(|c| self.requested.iter().any(|name| *name == c.name))
            .cloned()
            .collect())
    }
}

/// Keeps components whose `only.localOS` is unset or equal to the given OS.
#[derive(Debug, Clone)]
pub struct ByLocalOs {
    os: String,
}

impl ByLocalOs {
    pub fn new(os: impl Into<String>) -> Self {
        Self { os: os.into() }
    }

    /// Filter for the operating system this binary runs on.
    pub fn current() -> Self {
        Self::new(std::env::consts::OS)
    }
}

impl ComponentFilter for ByLocalOs {
    fn apply(&self, pkg: &PackageDefinition) -> Result<Vec<Component>, FilterError> {
        Ok(pkg
            .components
            .iter()
            .filter(|c| c.only.local_os.is_empty() || c.only.local_os == self.os)
            .cloned()
            .collect())
    }
}
