//! Whole-file async reads and writes.
//!
//! Each helper opens its handle, does one complete read or write, and
//! drops the handle before returning, on success and on error alike.

use std::path::{Path, PathBuf};

use futures_util::future::try_join_all;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Read an entire file into memory.
pub async fn read_file(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents).await?;
    Ok(contents)
}

/// Create or truncate `path` and write `contents` to it.
pub async fn write_file(path: &Path, contents: impl AsRef<[u8]>) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(contents.as_ref()).await?;
    file.flush().await?;
    Ok(())
}

/// Write the concatenation of `sources`, in order, to `out`.
///
/// Sources are read concurrently; order in the output follows the slice.
pub async fn concat_files(out: &Path, sources: &[PathBuf]) -> std::io::Result<()> {
    let contents = try_join_all(sources.iter().map(|p| read_file(p))).await?;
    write_file(out, contents.concat()).await
}

/// Move a file, copying across filesystems when a rename is not possible.
pub async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            if tokio::fs::copy(from, to).await.is_err() {
                return Err(rename_err);
            }
            tokio::fs::remove_file(from).await?;
            tracing::debug!(
                from = %from.display(),
                to = %to.display(),
                "Moved file by copy after rename failed"
            );
            Ok(())
        }
    }
}
