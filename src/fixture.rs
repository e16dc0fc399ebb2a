//! Filler file for demos: a download target that exists without shipping one.

use std::io;
use std::path::Path;

use tokio::fs;
use tokio::io::AsyncWriteExt;

const CHUNK_SIZE: usize = 1024 * 1024;
const FILL_BYTE: u8 = b'x';

/// Creates `path` filled with `size` bytes of `x` unless it already exists.
///
/// Each call writes its own uniquely named `.part` file beside `path` and
/// renames it into place, so concurrent first requests do not share one.
pub async fn ensure_filler(path: &Path, size: u64) -> io::Result<()> {
    if fs::try_exists(path).await? {
        return Ok(());
    }
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).await?;

    let (file, partial) = tempfile::Builder::new()
        .prefix(".filler-")
        .suffix(".part")
        .tempfile_in(parent)?
        .into_parts();
    let mut file = fs::File::from_std(file);
    let chunk = vec![FILL_BYTE; CHUNK_SIZE];
    let mut written = 0u64;
    while written < size {
        let n = std::cmp::min(CHUNK_SIZE as u64, size - written) as usize;
        file.write_all(&chunk[..n]).await?;
        written += n as u64;
    }
    file.flush().await?;
    drop(file);

    partial.persist(path)?;
    tracing::info!(path = %path.display(), size, "created filler file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_creates_filler() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/large-file.bin");

        ensure_filler(&path, 3 * 1024 * 1024 + 17).await.unwrap();

        let data = fs::read(&path).await.unwrap();
        assert_eq!(3 * 1024 * 1024 + 17, data.len());
        assert!(data.iter().all(|&b| b == b'x'));
        assert_eq!(1, std::fs::read_dir(path.parent().unwrap()).unwrap().count());
    }

    #[tokio::test]
    async fn test_concurrent_first_requests() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.bin");
        let size = 2 * 1024 * 1024 + 5;

        let (a, b) = tokio::join!(ensure_filler(&path, size), ensure_filler(&path, size));
        a.unwrap();
        b.unwrap();

        assert_eq!(size, fs::metadata(&path).await.unwrap().len());
        assert_eq!(1, std::fs::read_dir(dir.path()).unwrap().count());
    }

    #[tokio::test]
    async fn test_keeps_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("existing.bin");
        fs::write(&path, b"keep me").await.unwrap();

        ensure_filler(&path, 1024).await.unwrap();

        assert_eq!(b"keep me".to_vec(), fs::read(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_filler() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");

        ensure_filler(&path, 0).await.unwrap();

        assert_eq!(0, fs::metadata(&path).await.unwrap().len());
    }
}
