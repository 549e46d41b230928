//! Staging of one component's declared content into its section directories.

use crate::builder::{ChartFetcher, ManifestRenderer, RepoCollector};
use crate::{io_at, CoreError};
use airgap_remote::fetch_url;
use airgap_schema::Component;
use airgap_store::{extract_package_archive, sha256_file, ComponentSection};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;

pub(crate) struct StageContext<'a> {
    pub source_dir: &'a Path,
    /// Skeletons stage local content only and keep remote sources as references.
    pub skeleton: bool,
    pub charts: Option<&'a dyn ChartFetcher>,
    pub renderer: Option<&'a dyn ManifestRenderer>,
    pub repos: Option<&'a dyn RepoCollector>,
}

fn is_url(source: &str) -> bool {
    source.starts_with("https://") || source.starts_with("http://")
}

fn staging_error(component: &str, reason: impl Into<String>) -> CoreError {
    CoreError::Staging {
        component: component.to_owned(),
        reason: reason.into(),
    }
}

impl StageContext<'_> {
    fn resolve(&self, source: &str) -> PathBuf {
        let path = Path::new(source);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.source_dir.join(path)
        }
    }
}

/// Last path segment of `target`, or `fallback` when it has none.
fn base_name(target: &str, fallback: usize) -> String {
    Path::new(target)
        .file_name()
        .map_or_else(|| fallback.to_string(), |n| n.to_string_lossy().into_owned())
}

fn section(s: ComponentSection, rest: &str) -> String {
    format!("{}/{rest}", s.as_str())
}

/// Copy a file or a directory tree to `dst`, creating parents.
pub(crate) fn copy_path(src: &Path, dst: &Path) -> Result<(), CoreError> {
    let meta = fs::metadata(src).map_err(io_at(src))?;
    if meta.is_dir() {
        fs::create_dir_all(dst).map_err(io_at(dst))?;
        for entry in fs::read_dir(src).map_err(io_at(src))? {
            let entry = entry.map_err(io_at(src))?;
            copy_path(&entry.path(), &dst.join(entry.file_name()))?;
        }
        return Ok(());
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(io_at(parent))?;
    }
    fs::copy(src, dst).map_err(io_at(src))?;
    Ok(())
}

fn set_mode(path: &Path, executable: bool) -> Result<(), CoreError> {
    let mode = if executable || path.is_dir() { 0o755 } else { 0o644 };
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(io_at(path))
}

/// Pull `extract_path` out of a `.tar`/`.tar.zst` archive into `dst`.
fn extract_member(archive: &Path, extract_path: &str, dst: &Path) -> Result<(), CoreError> {
    let tmp = tempfile::tempdir().map_err(io_at(archive))?;
    extract_package_archive(archive, tmp.path())?;
    let member = tmp.path().join(extract_path);
    if !member.exists() {
        return Err(CoreError::Io {
            path: archive.join(extract_path),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found in archive"),
        });
    }
    copy_path(&member, dst)
}

fn check_shasum(component: &str, dst: &Path, expected: &str) -> Result<(), CoreError> {
    if expected.is_empty() || !dst.is_file() {
        return Ok(());
    }
    let actual = sha256_file(dst)?;
    if !expected.eq_ignore_ascii_case(actual.as_str()) {
        return Err(staging_error(
            component,
            format!(
                "shasum mismatch for {}: expected {expected}, got {actual}",
                dst.display()
            ),
        ));
    }
    Ok(())
}

/// Stage `component` into `comp_dir` and point its fields at the staged,
/// component-relative locations.
pub(crate) fn stage_component(
    ctx: &StageContext<'_>,
    component: &mut Component,
    comp_dir: &Path,
) -> Result<(), CoreError> {
    fs::create_dir_all(comp_dir).map_err(io_at(comp_dir))?;
    let name = component.name.clone();

    stage_charts(ctx, component, comp_dir)?;
    stage_files(ctx, component, comp_dir)?;
    stage_data(ctx, component, comp_dir)?;
    stage_manifests(ctx, component, comp_dir)?;

    if !ctx.skeleton && !component.repos.is_empty() {
        let collector = ctx
            .repos
            .ok_or_else(|| staging_error(&name, "git repos need a repo collector"))?;
        let repos_dir = comp_dir.join(ComponentSection::Repos.as_str());
        for url in &component.repos {
            collector.collect(url, &repos_dir)?;
        }
    }
    debug!("staged component {name}");
    Ok(())
}

fn stage_files(ctx: &StageContext<'_>, component: &mut Component, comp_dir: &Path) -> Result<(), CoreError> {
    for (idx, file) in component.files.iter_mut().enumerate() {
        let remote = is_url(&file.source);
        if remote && ctx.skeleton {
            continue;
        }
        let rel = section(
            ComponentSection::Files,
            &format!("{idx}/{}", base_name(&file.target, idx)),
        );
        let dst = comp_dir.join(&rel);

        match (remote, file.extract_path.is_empty()) {
            (true, true) => {
                fetch_url(&file.source, &dst, None)?;
            }
            (true, false) => {
                let tmp = tempfile::tempdir().map_err(io_at(comp_dir))?;
                let archive = tmp.path().join(base_name(&file.source, idx));
                fetch_url(&file.source, &archive, None)?;
                extract_member(&archive, &file.extract_path, &dst)?;
            }
            (false, true) => copy_path(&ctx.resolve(&file.source), &dst)?,
            (false, false) => extract_member(&ctx.resolve(&file.source), &file.extract_path, &dst)?,
        }

        check_shasum(&component.name, &dst, &file.shasum)?;
        set_mode(&dst, file.executable)?;
        file.source = rel;
        file.extract_path.clear();
    }
    Ok(())
}

fn stage_data(ctx: &StageContext<'_>, component: &mut Component, comp_dir: &Path) -> Result<(), CoreError> {
    for (idx, injection) in component.data_injections.iter_mut().enumerate() {
        let remote = is_url(&injection.source);
        if remote && ctx.skeleton {
            continue;
        }
        let rel = section(
            ComponentSection::DataInjections,
            &format!("{idx}/{}", base_name(&injection.target.path, idx)),
        );
        let dst = comp_dir.join(&rel);
        if remote {
            fetch_url(&injection.source, &dst, None)?;
        } else {
            copy_path(&ctx.resolve(&injection.source), &dst)?;
        }
        injection.source = rel;
    }
    Ok(())
}

fn stage_charts(ctx: &StageContext<'_>, component: &mut Component, comp_dir: &Path) -> Result<(), CoreError> {
    let charts_dir = comp_dir.join(ComponentSection::Charts.as_str());
    for (idx, chart) in component.charts.iter_mut().enumerate() {
        if !chart.local_path.is_empty() {
            let rel = section(ComponentSection::Charts, &format!("{}-{idx}", chart.name));
            copy_path(&ctx.resolve(&chart.local_path), &comp_dir.join(&rel))?;
            chart.local_path = rel;
        } else if !ctx.skeleton {
            let fetcher = ctx.charts.ok_or_else(|| {
                staging_error(&component.name, format!("remote chart '{}' needs a chart fetcher", chart.name))
            })?;
            fetcher.fetch(chart, &charts_dir)?;
        }

        for (vidx, values) in chart.values_files.iter_mut().enumerate() {
            let remote = is_url(values);
            if remote && ctx.skeleton {
                continue;
            }
            let rel = section(ComponentSection::Values, &format!("{}-{vidx}", chart.name));
            let dst = comp_dir.join(&rel);
            if remote {
                fetch_url(values, &dst, None)?;
            } else {
                copy_path(&ctx.resolve(values), &dst)?;
            }
            *values = rel;
        }
    }
    Ok(())
}

fn stage_manifests(ctx: &StageContext<'_>, component: &mut Component, comp_dir: &Path) -> Result<(), CoreError> {
    for manifest in &mut component.manifests {
        let mut staged = Vec::with_capacity(manifest.files.len() + manifest.kustomizations.len());
        for (idx, path) in manifest.files.iter().enumerate() {
            let remote = is_url(path);
            if remote && ctx.skeleton {
                staged.push(path.clone());
                continue;
            }
            let rel = section(ComponentSection::Manifests, &format!("{}-{idx}.yaml", manifest.name));
            let dst = comp_dir.join(&rel);
            if remote {
                fetch_url(path, &dst, None)?;
            } else {
                copy_path(&ctx.resolve(path), &dst)?;
            }
            staged.push(rel);
        }

        for (idx, kustomization) in manifest.kustomizations.iter().enumerate() {
            let renderer = ctx.renderer.ok_or_else(|| {
                staging_error(
                    &component.name,
                    format!("kustomization '{kustomization}' needs a manifest renderer"),
                )
            })?;
            let rel = section(
                ComponentSection::Manifests,
                &format!("kustomization-{}-{idx}.yaml", manifest.name),
            );
            let dst = comp_dir.join(&rel);
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent).map_err(io_at(parent))?;
            }
            let target = if is_url(kustomization) || kustomization.contains("://") {
                kustomization.clone()
            } else {
                ctx.resolve(kustomization).to_string_lossy().into_owned()
            };
            renderer.render(&target, &dst, manifest.kustomize_allow_any_directory)?;
            staged.push(rel);
        }
        manifest.files = staged;
        manifest.kustomizations.clear();
    }
    Ok(())
}

/// Whether `dir` holds no entries at all.
pub(crate) fn is_empty_dir(dir: &Path) -> Result<bool, CoreError> {
    Ok(fs::read_dir(dir).map_err(io_at(dir))?.next().is_none())
}
