//! # Snapshot Stores
//!
//! File-backed state. Each entity class lives in one JSON file under the
//! data directory and is rewritten wholesale on every mutation. A missing
//! file means first run and triggers default seeding.
//!
//! - [`operators`]: operator accounts, presence and task queues
//! - [`dictionaries`]: named reference lists (materials, colors, units...)

pub mod dictionaries;
pub mod operators;

pub use dictionaries::DictionaryStore;
pub use operators::OperatorStore;

use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;

use crate::common::error::{HubError, HubResult};

/// Read and parse a snapshot, `Ok(None)` if the file does not exist.
async fn read_snapshot<T: DeserializeOwned>(path: &Path) -> HubResult<Option<T>> {
    match fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| snapshot_error(path, source)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Replace a snapshot. The data goes to a sibling temp file first, so a
/// failed write leaves the previous snapshot intact.
async fn write_snapshot<T: Serialize + ?Sized>(path: &Path, value: &T) -> HubResult<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| snapshot_error(path, source))?;
    let tmp = temp_path(path);
    fs::write(&tmp, &bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

fn snapshot_error(path: &Path, source: serde_json::Error) -> HubError {
    HubError::Snapshot {
        path: path.to_path_buf(),
        source,
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_snapshot_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let value: Option<Vec<String>> = read_snapshot(&dir.path().join("x.json")).await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn corrupt_snapshot_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("operators.json");
        std::fs::write(&path, b"[{\"username\": ").unwrap();

        let err = read_snapshot::<Vec<String>>(&path).await.unwrap_err();
        match &err {
            HubError::Snapshot { path: reported, .. } => assert_eq!(reported, &path),
            other => panic!("unexpected {:?}", other),
        }
        assert!(err.to_string().starts_with("corrupt snapshot"));
    }

    #[tokio::test]
    async fn write_replaces_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.json");

        write_snapshot(&path, &vec!["a"]).await.unwrap();
        write_snapshot(&path, &vec!["b", "c"]).await.unwrap();

        let value: Option<Vec<String>> = read_snapshot(&path).await.unwrap();
        assert_eq!(value.unwrap(), vec!["b", "c"]);
        assert!(!temp_path(&path).exists());
    }
}
