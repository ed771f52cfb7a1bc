use std::path::PathBuf;

/// Root data directory for mrcert.
///
/// - Linux: `~/.mrcert/`
/// - macOS: `~/Library/Application Support/mrcert/`
/// - Windows: `%LOCALAPPDATA%\mrcert\`
pub fn mrcert_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("mrcert");
        }
    }

    #[cfg(windows)]
    {
        if let Some(local) = std::env::var_os("LOCALAPPDATA") {
            return PathBuf::from(local).join("mrcert");
        }
    }

    #[cfg(not(any(target_os = "macos", windows)))]
    {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(".mrcert");
        }
    }

    // Fallback
    PathBuf::from(".mrcert")
}

/// Default certificate storage directory.
pub fn default_storage_dir() -> PathBuf {
    mrcert_data_dir().join("storage")
}

/// Default scratch directory for in-flight signing operations.
pub fn default_scratch_dir() -> PathBuf {
    mrcert_data_dir().join("scratch")
}
