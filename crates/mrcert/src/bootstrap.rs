//! Startup directory checks.

use std::io;
use std::path::{Path, PathBuf};

use mrcert_ca::bundle::Category;

use crate::cli::Config;

/// Exit code when a required directory path is taken by a file.
pub const EXIT_DIR_IS_FILE: i32 = 2;
/// Exit code when a required directory cannot be created.
pub const EXIT_DIR_CREATION_FAILED: i32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("{} exists but is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("could not create directory {}: {source}", path.display())]
    CreateFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl BootstrapError {
    pub fn exit_code(&self) -> i32 {
        match self {
            BootstrapError::NotADirectory(_) => EXIT_DIR_IS_FILE,
            BootstrapError::CreateFailed { .. } => EXIT_DIR_CREATION_FAILED,
        }
    }
}

/// Create `path` (and its parents) unless it is already a directory.
pub fn ensure_dir(path: &Path) -> Result<(), BootstrapError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(BootstrapError::NotADirectory(path.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            std::fs::create_dir_all(path).map_err(|source| BootstrapError::CreateFailed {
                path: path.to_path_buf(),
                source,
            })?;
            tracing::info!(path = %path.display(), "Created directory");
            Ok(())
        }
        Err(source) => Err(BootstrapError::CreateFailed {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Storage dir, one directory per category, then the scratch dir.
pub fn prepare(config: &Config) -> Result<(), BootstrapError> {
    ensure_dir(&config.storage_dir)?;
    for category in Category::ALL {
        ensure_dir(&config.category_dir(category))?;
    }
    ensure_dir(&config.scratch_dir)
}
