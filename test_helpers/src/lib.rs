//! Shared fixtures for the sky map workspace tests.
//!
//! Locates the workspace root, hands out artifact paths under
//! `test_output/` and provides reproducible random number generators.

use once_cell::sync::Lazy;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::env;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[derive(thiserror::Error, Debug)]
pub enum TestHelperError {
    #[error("Workspace root not found: {0}")]
    WorkspaceRootNotFound(String),

    #[error("Could not prepare test directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Walk up from the current directory to the `Cargo.toml` declaring `[workspace]`.
pub fn find_workspace_root() -> Result<PathBuf, TestHelperError> {
    let mut dir = env::current_dir()?;
    loop {
        let manifest = dir.join("Cargo.toml");
        if manifest.exists() && std::fs::read_to_string(&manifest)?.contains("[workspace]") {
            return Ok(dir);
        }
        if !dir.pop() {
            return Err(TestHelperError::WorkspaceRootNotFound(
                "no Cargo.toml with a [workspace] table above the current directory".to_string(),
            ));
        }
    }
}

static WORKSPACE_ROOT: Lazy<PathBuf> =
    Lazy::new(|| find_workspace_root().expect("Failed to find workspace root"));

fn ensure_dir(dir: PathBuf) -> PathBuf {
    if !dir.exists() {
        std::fs::create_dir_all(&dir).expect("Failed to create test output directory");
    }
    dir
}

/// Directory collecting artifacts that outlive a test run (created on demand).
pub fn output_dir() -> PathBuf {
    ensure_dir(WORKSPACE_ROOT.join("test_output"))
}

/// Path of an artifact inside [`output_dir`].
pub fn output_path<P: AsRef<Path>>(path: P) -> PathBuf {
    output_dir().join(path)
}

/// Path of a FITS artifact under `test_output/fits`.
pub fn fits_output_path(name: &str) -> PathBuf {
    ensure_dir(output_dir().join("fits")).join(name)
}

/// Temporary directory removed when the handle drops.
pub fn scratch_dir() -> Result<TempDir, TestHelperError> {
    Ok(tempfile::Builder::new().prefix("skymap-test").tempdir()?)
}

/// Deterministic generator for Monte Carlo tests.
pub fn seeded_rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_workspace_root_has_manifest() {
        let root = find_workspace_root().unwrap();
        assert!(root.join("Cargo.toml").exists());
        assert!(root.join("skymap").is_dir());
    }

    #[test]
    fn test_fits_output_path() {
        let path = fits_output_path("map.fits");
        assert!(path.parent().unwrap().is_dir());
        assert_eq!(path, output_dir().join("fits").join("map.fits"));
    }

    #[test]
    fn test_scratch_dir_is_removed() {
        let dir = scratch_dir().unwrap();
        let path = dir.path().to_path_buf();
        assert!(path.is_dir());
        drop(dir);
        assert!(!path.exists());
    }

    #[test]
    fn test_seeded_rng_is_reproducible() {
        let a: Vec<f64> = seeded_rng(42).sample_iter(rand::distributions::Standard).take(5).collect();
        let b: Vec<f64> = seeded_rng(42).sample_iter(rand::distributions::Standard).take(5).collect();
        assert_eq!(a, b);
    }
}
