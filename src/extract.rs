use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::HarnessConfig;
use crate::packages::PackageSet;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("could not prepare {path}: {source}")]
    Workspace {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("not able to decompress {archive}: {source}")]
    Decompress {
        archive: PathBuf,
        source: std::io::Error,
    },
}

/// Put the selected packages on disk, or with `keep` reuse whatever an
/// earlier run left in the temp tree without touching it.
pub fn materialize(config: &HarnessConfig, packages: &PackageSet, keep: bool) -> Result<(), ExtractError> {
    if keep {
        log::info!("keeping {}, skipping decompression", config.tmp_dir.display());
        return Ok(());
    }
    prepare_workspace(config)?;
    extract_packages(config, packages)
}

/// Wipe the temp tree and recreate `new/`, `old/` and `databaseDirectory/` under it.
pub fn prepare_workspace(config: &HarnessConfig) -> Result<(), ExtractError> {
    if config.tmp_dir.exists() {
        std::fs::remove_dir_all(&config.tmp_dir).map_err(workspace_err(&config.tmp_dir))?;
    }
    for dir in [
        &config.tmp_dir,
        &config.new_dir,
        &config.old_dir,
        &config.database_dir,
    ] {
        std::fs::create_dir_all(dir).map_err(workspace_err(dir))?;
    }
    Ok(())
}

fn workspace_err(path: &Path) -> impl FnOnce(std::io::Error) -> ExtractError + '_ {
    move |source| ExtractError::Workspace {
        path: path.to_path_buf(),
        source,
    }
}

/// Unpack the selected archives: old into `tmp/old/` (upgrade-test mode only), new into `tmp/new/`.
pub fn extract_packages(config: &HarnessConfig, packages: &PackageSet) -> Result<(), ExtractError> {
    if let Some(old) = &packages.old {
        extract_archive(&config.package_dir.join(old), &config.old_dir)?;
    }
    extract_archive(&config.package_dir.join(&packages.new), &config.new_dir)
}

/// Unpack a `.tar.gz` archive into `dest_dir` using pure Rust.
pub fn extract_archive(archive_path: &Path, dest_dir: &Path) -> Result<(), ExtractError> {
    use flate2::read::GzDecoder;
    use tar::Archive;

    let decompress_err = |source| ExtractError::Decompress {
        archive: archive_path.to_path_buf(),
        source,
    };

    log::info!("decompressing {}", archive_path.display());
    let f = std::fs::File::open(archive_path).map_err(decompress_err)?;
    let gz = GzDecoder::new(f);
    let mut archive = Archive::new(gz);
    archive.set_preserve_permissions(true);
    archive.unpack(dest_dir).map_err(decompress_err)?;
    log::debug!("{} unpacked into {}", archive_path.display(), dest_dir.display());
    Ok(())
}
