//! Approved package registry and the sandbox module table
//!
//! The registry is a read-only directory of pre-installed packages, one
//! subdirectory per package, each with a `package.json` naming its entry file.
//! Packages are copied into a workspace on request and then loaded once into
//! a [`ModuleTable`], so `require` inside the sandbox is a plain name lookup.

use crate::error::ExecutionError;
use crate::workspace::{validate_relative_path, Workspace};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use verdict_common::types::SourceFile;
use walkdir::WalkDir;

const MANIFEST_FILE: &str = "package.json";
const DEFAULT_MAIN: &str = "index.js";

#[derive(Debug, Deserialize)]
struct PackageManifest {
    #[serde(default)]
    main: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PackageRegistry {
    root: PathBuf,
}

impl PackageRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Names of every installed package. A missing registry is empty.
    pub async fn available(&self) -> Result<BTreeSet<String>, ExecutionError> {
        let mut names = BTreeSet::new();

        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(registry = %self.root.display(), "Package registry does not exist");
                return Ok(names);
            }
            Err(e) => return Err(ExecutionError::workspace("Failed to read package registry", e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ExecutionError::workspace("Failed to read package registry", e))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if is_dir {
                names.insert(entry.file_name().to_string_lossy().into_owned());
            }
        }

        Ok(names)
    }

    /// Reject the request if any name is not installed
    pub async fn authorize(&self, names: &[String]) -> Result<(), ExecutionError> {
        let available = self.available().await?;

        for name in names {
            if !is_plain_package_name(name) || !available.contains(name) {
                info!(package = %name, "Unauthorized package requested");
                return Err(ExecutionError::UnauthorizedPackage {
                    package: name.clone(),
                });
            }
        }

        Ok(())
    }

    /// Authorize, then copy each package tree into the workspace
    pub async fn stage(&self, workspace: &Workspace, names: &[String]) -> Result<(), ExecutionError> {
        self.authorize(names).await?;

        let target_root = workspace.modules_dir();
        tokio::fs::create_dir_all(&target_root)
            .await
            .map_err(|e| ExecutionError::workspace("Failed to create module directory", e))?;

        for name in names {
            let src = self.root.join(name);
            let dest = target_root.join(name);
            tokio::task::spawn_blocking(move || copy_package_tree(&src, &dest))
                .await
                .map_err(|e| ExecutionError::workspace("Package copy task failed", std::io::Error::other(e)))?
                .map_err(|e| ExecutionError::workspace(format!("Failed to stage package {}", name), e))?;
            debug!(workspace_id = %workspace.id(), package = %name, "Package staged");
        }

        Ok(())
    }
}

/// A registry entry name: no separators, no dot segments
fn is_plain_package_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
}

/// Copy a package tree. Symlinks are skipped so a package cannot point
/// outside the registry.
fn copy_package_tree(src: &Path, dest: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(std::io::Error::other)?;
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &target)?;
        }
    }

    Ok(())
}

/// Pre-resolved `require` table: module name to CommonJS source
#[derive(Debug, Clone, Default)]
pub struct ModuleTable {
    modules: BTreeMap<String, String>,
}

impl ModuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load staged packages from the workspace. Unloadable packages are
    /// logged and left out, so `require` reports them as missing.
    pub async fn load_staged(workspace: &Workspace, names: &[String]) -> Self {
        let mut table = Self::new();
        let modules_dir = workspace.modules_dir();

        for name in names {
            match read_package_source(&modules_dir.join(name)).await {
                Ok(source) => {
                    table.modules.insert(name.clone(), source);
                }
                Err(e) => warn!(package = %name, error = %format!("{:#}", e), "Could not load module"),
            }
        }

        table
    }

    /// Make the request's other JavaScript files requirable as `./path`
    pub fn add_local_files(&mut self, files: &[SourceFile], entry_path: &str) {
        for file in files {
            if file.path == entry_path || !file.path.ends_with(".js") {
                continue;
            }
            let relative = file.path.trim_start_matches("./");
            let with_ext = format!("./{}", relative);
            let without_ext = with_ext.trim_end_matches(".js").to_string();
            self.modules.insert(with_ext, file.content.clone());
            self.modules.insert(without_ext, file.content.clone());
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.modules.insert(name.into(), source.into());
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.modules.iter()
    }
}

async fn read_package_source(package_dir: &Path) -> Result<String> {
    let manifest_path = package_dir.join(MANIFEST_FILE);
    let manifest = tokio::fs::read_to_string(&manifest_path)
        .await
        .with_context(|| format!("Failed to read {}", manifest_path.display()))?;
    let manifest: PackageManifest =
        serde_json::from_str(&manifest).context("Failed to parse package manifest")?;

    let main = manifest.main.unwrap_or_else(|| DEFAULT_MAIN.to_string());
    validate_relative_path(&main).map_err(anyhow::Error::msg)?;

    let main_path = package_dir.join(&main);
    tokio::fs::read_to_string(&main_path)
        .await
        .with_context(|| format!("Failed to read module entry {}", main_path.display()))
}
