use std::path::{Path, PathBuf};
use thiserror::Error;

use semver::Version;

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("could not read package directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("package choice failed: {0}")]
    Prompt(String),
}

/// The archives picked for this run. `old` is only set in upgrade-test mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSet {
    pub new: String,
    pub old: Option<String>,
}

impl PackageSet {
    pub fn upgrade_test(&self) -> bool {
        self.old.is_some()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Selection {
    NoPackages,
    Unsupported(usize),
    Chosen(PackageSet),
}

/// List every entry in the package directory, sorted by name.
pub fn list_packages(dir: &Path) -> Result<Vec<String>, PackageError> {
    let read_err = |source| PackageError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };

    let mut packages = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_err)? {
        let entry = entry.map_err(read_err)?;
        packages.push(entry.file_name().to_string_lossy().into_owned());
    }
    packages.sort();
    Ok(packages)
}

/// Decide which packages to use.
///
/// With exactly two packages `choose_newer` is asked for the index of the newer
/// one; it receives the candidates and a suggested default index. It is never
/// called for any other count.
pub fn select_packages<F>(packages: Vec<String>, choose_newer: F) -> Result<Selection, PackageError>
where
    F: FnOnce(&[String], usize) -> Result<usize, PackageError>,
{
    match packages.len() {
        0 => Ok(Selection::NoPackages),
        1 => {
            let new = packages.into_iter().next().unwrap_or_default();
            Ok(Selection::Chosen(PackageSet { new, old: None }))
        }
        2 => {
            let default = suggest_newer(&packages);
            let chosen = choose_newer(&packages, default)?;
            if chosen > 1 {
                return Err(PackageError::Prompt(format!("invalid choice {chosen}")));
            }
            let mut packages = packages;
            let new = packages.remove(chosen);
            let old = packages.remove(0);
            Ok(Selection::Chosen(PackageSet {
                new,
                old: Some(old),
            }))
        }
        n => Ok(Selection::Unsupported(n)),
    }
}

/// Interactive list prompt on the terminal.
pub fn prompt_newer(packages: &[String], default: usize) -> Result<usize, PackageError> {
    use dialoguer::{theme::ColorfulTheme, Select};

    Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Choose the newer version of ArangoDB")
        .default(default)
        .items(packages)
        .interact()
        .map_err(|e| PackageError::Prompt(e.to_string()))
}

/// Index of the package whose name carries the highest version, 0 if undecidable.
fn suggest_newer(packages: &[String]) -> usize {
    packages
        .iter()
        .enumerate()
        .filter_map(|(i, name)| embedded_version(name).map(|v| (i, v)))
        .max_by(|(_, a), (_, b)| a.cmp(b))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// First `MAJOR.MINOR.PATCH` run inside a file name, e.g.
/// `arangodb3-3.6.0-rc.1.tar.gz` -> 3.6.0-rc.1.
fn embedded_version(name: &str) -> Option<Version> {
    let name = name
        .strip_suffix(".tar.gz")
        .or_else(|| name.strip_suffix(".tgz"))
        .unwrap_or(name);
    let bytes = name.as_bytes();
    for start in 0..bytes.len() {
        if !bytes[start].is_ascii_digit() || (start > 0 && bytes[start - 1].is_ascii_digit()) {
            continue;
        }
        let rest = &name[start..];
        let end = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '.' || c == '-'))
            .unwrap_or(rest.len());
        // Drop trailing segments (".x86", "-linux") until semver accepts what is left.
        let mut candidate = &rest[..end];
        loop {
            if let Ok(v) = Version::parse(candidate) {
                return Some(v);
            }
            match candidate.rfind(|c: char| c == '.' || c == '-') {
                Some(i) => candidate = &candidate[..i],
                None => break,
            }
        }
    }
    None
}
