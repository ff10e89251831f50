//! Named reference lists (materials, colors, speeds...) offered to the
//! manager when composing a task. One `<name>.json` file per list.

use std::path::{Path, PathBuf};

use log::info;
use tokio::sync::Mutex;

use super::{read_snapshot, write_snapshot};
use crate::common::error::{HubError, HubResult};

/// Lists the server knows about, with their first-run contents.
pub const DICTIONARIES: &[(&str, &[&str])] = &[
    ("materials", &[]),
    ("colors", &[]),
    ("speeds", &[]),
    ("temperatures", &[]),
    ("priorities", &["High", "Medium", "Low"]),
    ("units", &["pcs", "kg", "m"]),
];

pub struct DictionaryStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl DictionaryStore {
    pub async fn open(data_dir: impl AsRef<Path>) -> HubResult<Self> {
        let dir = data_dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub async fn load(&self, name: &str) -> HubResult<Vec<String>> {
        let _guard = self.write_lock.lock().await;
        self.load_unlocked(name).await
    }

    pub async fn save(&self, name: &str, values: &[String]) -> HubResult<()> {
        defaults_for(name)?;
        let _guard = self.write_lock.lock().await;
        write_snapshot(&self.path_for(name), values).await
    }

    /// Append `value` unless already present. Returns whether it was added.
    pub async fn add_value(&self, name: &str, value: &str) -> HubResult<bool> {
        let _guard = self.write_lock.lock().await;
        let mut values = self.load_unlocked(name).await?;
        if values.iter().any(|v| v == value) {
            return Ok(false);
        }
        values.push(value.to_string());
        write_snapshot(&self.path_for(name), &values).await?;
        Ok(true)
    }

    /// Returns whether `value` was present.
    pub async fn remove_value(&self, name: &str, value: &str) -> HubResult<bool> {
        let _guard = self.write_lock.lock().await;
        let mut values = self.load_unlocked(name).await?;
        let before = values.len();
        values.retain(|v| v != value);
        if values.len() == before {
            return Ok(false);
        }
        write_snapshot(&self.path_for(name), &values).await?;
        Ok(true)
    }

    /// Create every missing list file.
    pub async fn seed_all(&self) -> HubResult<()> {
        for (name, _) in DICTIONARIES {
            self.load(name).await?;
        }
        Ok(())
    }

    async fn load_unlocked(&self, name: &str) -> HubResult<Vec<String>> {
        let defaults = defaults_for(name)?;
        let path = self.path_for(name);
        match read_snapshot(&path).await? {
            Some(values) => Ok(values),
            None => {
                let values: Vec<String> = defaults.iter().map(|v| v.to_string()).collect();
                write_snapshot(&path, &values).await?;
                info!("🌱 Seeded dictionary '{}' with {} value(s)", name, values.len());
                Ok(values)
            }
        }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }
}

fn defaults_for(name: &str) -> HubResult<&'static [&'static str]> {
    DICTIONARIES
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, defaults)| *defaults)
        .ok_or_else(|| HubError::UnknownDictionary(name.to_string()))
}
