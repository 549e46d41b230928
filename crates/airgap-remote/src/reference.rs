use crate::RemoteError;
use airgap_schema::PackageDefinition;
use std::fmt;

pub const OCI_SCHEME: &str = "oci://";

/// A package location in an OCI registry: `oci://<registry>/<repository>[:tag|@digest]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageReference {
    pub registry: String,
    pub repository: String,
    /// Tag or `sha256:` digest.
    pub reference: String,
}

impl PackageReference {
    /// Parse an `oci://` URL. A missing tag is an error: packages are always
    /// addressed by tag or digest.
    pub fn parse(url: &str) -> Result<Self, RemoteError> {
        let invalid = |reason: &str| RemoteError::InvalidReference {
            reference: url.to_owned(),
            reason: reason.to_owned(),
        };
        let rest = url
            .strip_prefix(OCI_SCHEME)
            .ok_or_else(|| invalid("must begin with oci://"))?;
        let (registry, path) = rest
            .split_once('/')
            .ok_or_else(|| invalid("missing repository"))?;
        if registry.is_empty() {
            return Err(invalid("missing registry host"));
        }

        let (repository, reference) = if let Some((repo, digest)) = path.split_once('@') {
            (repo, digest)
        } else {
            let last_slash = path.rfind('/').map_or(0, |i| i + 1);
            match path[last_slash..].rfind(':') {
                Some(i) => (&path[..last_slash + i], &path[last_slash + i + 1..]),
                None => return Err(invalid("missing tag")),
            }
        };
        if repository.is_empty() || reference.is_empty() {
            return Err(invalid("empty repository or tag"));
        }
        if repository
            .split('/')
            .any(|seg| seg.is_empty() || seg.chars().any(|c| c.is_ascii_uppercase()))
        {
            return Err(invalid("repository must be lowercase path segments"));
        }

        Ok(Self {
            registry: registry.to_owned(),
            repository: repository.to_owned(),
            reference: reference.to_owned(),
        })
    }

    /// Where a package is published under `base` (`oci://<registry>/<namespace>`):
    /// repository `<namespace>/<name>`, tag `<version>[-<flavor>]`.
    pub fn for_package(base: &str, pkg: &PackageDefinition) -> Result<Self, RemoteError> {
        let version = &pkg.metadata.version;
        if version.is_empty() {
            return Err(RemoteError::InvalidPackage(
                "version is required for publishing".to_owned(),
            ));
        }
        let mut tag = version.clone();
        if !pkg.build.flavor.is_empty() {
            tag.push('-');
            tag.push_str(&pkg.build.flavor);
        }
        let base = base.trim_end_matches('/');
        Self::parse(&format!("{base}/{}:{tag}", pkg.metadata.name))
    }

    pub fn is_digest(&self) -> bool {
        self.reference.starts_with("sha256:")
    }

    #[must_use]
    pub fn with_reference(&self, reference: &str) -> Self {
        Self {
            reference: reference.to_owned(),
            ..self.clone()
        }
    }
}

impl fmt::Display for PackageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = if self.is_digest() { '@' } else { ':' };
        write!(
            f,
            "{OCI_SCHEME}{}/{}{sep}{}",
            self.registry, self.repository, self.reference
        )
    }
}
