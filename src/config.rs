use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_PACKAGE_DIR: &str = "arangodb";
const DEFAULT_TMP_DIR: &str = "tmp";

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub package_dir: PathBuf, // ./arangodb (or ARANGO_HARNESS_PACKAGES)
    pub tmp_dir: PathBuf,     // ./tmp (or ARANGO_HARNESS_TMP)
    pub new_dir: PathBuf,     // tmp_dir/new
    pub old_dir: PathBuf,     // tmp_dir/old
    pub database_dir: PathBuf, // tmp_dir/databaseDirectory
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine current directory: {0}")]
    NoCurrentDir(#[from] std::io::Error),
}

pub fn harness_config() -> HarnessConfig {
    let package_dir = std::env::var("ARANGO_HARNESS_PACKAGES")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_PACKAGE_DIR));
    let tmp_dir = std::env::var("ARANGO_HARNESS_TMP")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_TMP_DIR));

    HarnessConfig::new(package_dir, tmp_dir)
}

impl HarnessConfig {
    pub fn new(package_dir: PathBuf, tmp_dir: PathBuf) -> Self {
        Self {
            new_dir: tmp_dir.join("new"),
            old_dir: tmp_dir.join("old"),
            database_dir: tmp_dir.join("databaseDirectory"),
            package_dir,
            tmp_dir,
        }
    }
}

/// Resolve `path` against the current working directory unless it is already absolute.
pub fn make_absolute(path: &Path) -> Result<PathBuf, ConfigError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(absolute_from(&std::env::current_dir()?, path))
}

/// Join `path` onto `base`, dropping a leading `./` so the result reads cleanly in logs.
pub fn absolute_from(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    let trimmed = path.strip_prefix(".").unwrap_or(path);
    base.join(trimmed)
}
