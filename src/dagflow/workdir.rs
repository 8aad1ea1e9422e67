// SPDX-License-Identifier: MIT

//! Per-workflow work directories

use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::dagflow::EngineError;

/// Entry in a work directory listing, path relative to the directory root
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileEntry {
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
}

pub fn workflow_dir(base: &Path, id: &str) -> PathBuf {
    base.join(id)
}

pub async fn create(dir: &Path) -> Result<(), EngineError> {
    tokio::fs::create_dir_all(dir).await?;
    Ok(())
}

/// Remove a directory tree. A missing directory is not an error.
pub async fn remove(dir: &Path) -> Result<(), EngineError> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Recursive listing sorted by path
pub async fn list_files(dir: &Path) -> Result<Vec<FileEntry>, EngineError> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound && current == dir => return Ok(files),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let metadata = entry.metadata().await?;
            let relative = path
                .strip_prefix(dir)
                .unwrap_or(&path)
                .to_string_lossy()
                .into_owned();
            if metadata.is_dir() {
                pending.push(path);
            }
            files.push(FileEntry {
                path: relative,
                is_dir: metadata.is_dir(),
                size: if metadata.is_dir() { 0 } else { metadata.len() },
            });
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_list_remove() {
        let base = tempfile::tempdir().unwrap();
        let dir = workflow_dir(base.path(), "wf-1");
        create(&dir).await.unwrap();
        assert!(list_files(&dir).await.unwrap().is_empty());

        tokio::fs::create_dir_all(dir.join("prepare/fetch")).await.unwrap();
        tokio::fs::write(dir.join("prepare/fetch/stdout.log"), "ok\n")
            .await
            .unwrap();

        let files = list_files(&dir).await.unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["prepare", "prepare/fetch", "prepare/fetch/stdout.log"]
        );
        assert!(files[0].is_dir);
        assert_eq!(files[2].size, 3);

        remove(&dir).await.unwrap();
        assert!(!dir.exists());
        remove(&dir).await.unwrap();
        assert!(list_files(&dir).await.unwrap().is_empty());
    }
}
