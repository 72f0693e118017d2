use std::path::{Path, PathBuf};

use crate::config::HarnessConfig;
use crate::packages::PackageSet;

const ARANGOD_SUFFIX: &str = "usr/sbin/arangod";
const STARTER_SUFFIX: &str = "usr/bin/arangodb";
const JS_SUFFIX: &str = "usr/share/arangodb3/js";

/// Binaries and assets inside one extracted package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionPaths {
    pub sub_dir: String, // empty when nothing was extracted
    pub starter: PathBuf,
    pub arangod: PathBuf,
    pub js_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Layout {
    pub packages: PackageSet,
    pub new: VersionPaths,
    pub old: Option<VersionPaths>, // upgrade-test mode only
}

impl Layout {
    pub fn upgrade_test(&self) -> bool {
        self.old.is_some()
    }
}

/// Resolve binary locations for the selected packages.
///
/// Nothing is validated here: a missing or unexpected tree only yields paths
/// that do not exist, and shows up when the starter is launched.
pub fn resolve_layout(config: &HarnessConfig, packages: PackageSet) -> Layout {
    let new = version_paths(&config.new_dir);
    let old = packages
        .upgrade_test()
        .then(|| version_paths(&config.old_dir));
    Layout { packages, new, old }
}

fn version_paths(extract_dir: &Path) -> VersionPaths {
    let sub_dir = first_subdirectory(extract_dir).unwrap_or_else(|| {
        log::warn!("no extracted package found in {}", extract_dir.display());
        String::new()
    });
    let root = extract_dir.join(&sub_dir);
    VersionPaths {
        starter: root.join(STARTER_SUFFIX),
        arangod: root.join(ARANGOD_SUFFIX),
        js_dir: root.join(JS_SUFFIX),
        sub_dir,
    }
}

/// First subdirectory (by name) of `dir`, if `dir` is readable and has one.
fn first_subdirectory(dir: &Path) -> Option<String> {
    let mut dirs: Vec<String> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    dirs.sort();
    dirs.into_iter().next()
}
