//! Cache store: the filesystem layout under the cache root directory.
//!
//! Grounded in `original_source/CacheHandler.py`'s `cacheResponses` /
//! `fetchResponses` / `deleteFromCache`, generalized per the REDESIGN FLAG
//! on the source's process-wide `os.chdir` dance: every path here is
//! built absolute from the cache root, so no chdir lock is needed at all.

use crate::error::ProxyError;
use crate::key::{Encoding, ResourceKey};
use bytes::Bytes;
use std::path::{Path, PathBuf};

/// Directory holding every file for `key`, one nested directory per path
/// segment except the last (the last segment becomes part of the filename).
fn entry_dir(root: &Path, key: &ResourceKey) -> PathBuf {
    let segments = key.segments();
    let mut dir = root.to_path_buf();
    if segments.len() > 1 {
        for seg in &segments[..segments.len() - 1] {
            dir.push(seg);
        }
    }
    dir
}

fn chunk_path(root: &Path, key: &ResourceKey, encoding: Encoding, index: u32) -> PathBuf {
    let last = key
        .segments()
        .last()
        .expect("ResourceKey always has at least a host segment");
    let filename = format!("{}, {}, {}", last, encoding.as_filename_fragment(), index);
    entry_dir(root, key).join(filename)
}

async fn ensure_dir_exists(dir: &Path) -> Result<(), ProxyError> {
    tokio::fs::create_dir_all(dir).await.map_err(ProxyError::CacheIo)
}

/// Writes chunks 1..=N for `key` under `encoding`, creating directories
/// as needed. Any filesystem error propagates as `CacheIo`, leaving
/// whatever partial files were written for `Shutdown` to sweep.
pub async fn write_chunks(
    root: &Path,
    key: &ResourceKey,
    encoding: Encoding,
    chunks: &[Bytes],
) -> Result<(), ProxyError> {
    ensure_dir_exists(&entry_dir(root, key)).await?;
    for (i, chunk) in chunks.iter().enumerate() {
        let path = chunk_path(root, key, encoding, (i + 1) as u32);
        tokio::fs::write(&path, chunk).await.map_err(ProxyError::CacheIo)?;
    }
    Ok(())
}

/// Reads chunks 1..=`count` for `key` under `encoding`. A missing file
/// where the index claims one should exist is reported as `CacheCorruption`
/// so the caller can treat it as a miss.
pub async fn read_chunks(
    root: &Path,
    key: &ResourceKey,
    encoding: Encoding,
    count: u32,
) -> Result<Vec<Bytes>, ProxyError> {
    let mut chunks = Vec::with_capacity(count as usize);
    for i in 1..=count {
        let path = chunk_path(root, key, encoding, i);
        match tokio::fs::read(&path).await {
            Ok(data) => chunks.push(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProxyError::CacheCorruption);
            }
            Err(e) => return Err(ProxyError::CacheIo(e)),
        }
    }
    Ok(chunks)
}

/// Removes every chunk file for `key` under `encoding`. Missing files are
/// tolerated (the index's counts may already be stale).
pub async fn remove_chunks(
    root: &Path,
    key: &ResourceKey,
    encoding: Encoding,
    count: u32,
) -> Result<(), ProxyError> {
    for i in 1..=count {
        let path = chunk_path(root, key, encoding, i);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ProxyError::CacheIo(e)),
        }
    }
    Ok(())
}

/// Depth-first walk of the cache root removing any directory left empty
/// by prior deletes. Run once, on `Shutdown`.
pub async fn prune_empty_dirs(root: &Path) -> Result<(), ProxyError> {
    if tokio::fs::metadata(root).await.is_err() {
        return Ok(());
    }
    prune_dir(root, false).await
}

fn prune_dir<'a>(
    dir: &'a Path,
    remove_if_empty: bool,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), ProxyError>> + Send + 'a>> {
    Box::pin(async move {
        let mut read_dir = tokio::fs::read_dir(dir).await.map_err(ProxyError::CacheIo)?;
        let mut subdirs = Vec::new();
        let mut has_files = false;
        while let Some(entry) = read_dir.next_entry().await.map_err(ProxyError::CacheIo)? {
            let file_type = entry.file_type().await.map_err(ProxyError::CacheIo)?;
            if file_type.is_dir() {
                subdirs.push(entry.path());
            } else {
                has_files = true;
            }
        }
        for sub in &subdirs {
            prune_dir(sub, true).await?;
        }
        if remove_if_empty && !has_files {
            let mut remaining = tokio::fs::read_dir(dir).await.map_err(ProxyError::CacheIo)?;
            if remaining.next_entry().await.map_err(ProxyError::CacheIo)?.is_none() {
                tokio::fs::remove_dir(dir).await.map_err(ProxyError::CacheIo)?;
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn key(host: &str, path: &str) -> ResourceKey {
        ResourceKey::new(host, path).unwrap()
    }

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let dir = tempdir().unwrap();
        let k = key("example.com", "/a/b");
        let chunks = vec![Bytes::from_static(b"hello"), Bytes::from_static(b"world")];
        write_chunks(dir.path(), &k, Encoding::Gzip, &chunks).await.unwrap();
        let read = read_chunks(dir.path(), &k, Encoding::Gzip, 2).await.unwrap();
        assert_eq!(read, chunks);
    }

    #[tokio::test]
    async fn read_missing_chunk_is_corruption() {
        let dir = tempdir().unwrap();
        let k = key("example.com", "/missing");
        let err = read_chunks(dir.path(), &k, Encoding::Identity, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::CacheCorruption));
    }

    #[tokio::test]
    async fn remove_then_prune_cleans_empty_dirs() {
        let dir = tempdir().unwrap();
        let k = key("example.com", "/a/b");
        let chunks = vec![Bytes::from_static(b"x")];
        write_chunks(dir.path(), &k, Encoding::None, &chunks).await.unwrap();
        remove_chunks(dir.path(), &k, Encoding::None, 1).await.unwrap();
        prune_empty_dirs(dir.path()).await.unwrap();
        assert!(!dir.path().join("example.com").exists());
    }

    #[tokio::test]
    async fn prune_keeps_directories_with_live_files() {
        let dir = tempdir().unwrap();
        let dead = key("example.com", "/dead");
        let live = key("example.com", "/live");
        write_chunks(dir.path(), &dead, Encoding::None, &[Bytes::from_static(b"x")])
            .await
            .unwrap();
        write_chunks(dir.path(), &live, Encoding::None, &[Bytes::from_static(b"y")])
            .await
            .unwrap();
        remove_chunks(dir.path(), &dead, Encoding::None, 1).await.unwrap();
        prune_empty_dirs(dir.path()).await.unwrap();
        assert!(dir.path().join("example.com").exists());
        let remaining = read_chunks(dir.path(), &live, Encoding::None, 1).await.unwrap();
        assert_eq!(remaining[0], Bytes::from_static(b"y"));
    }
}
