//! # Operator Store
//!
//! Authoritative record of operators, their credentials, presence flag and
//! per-conveyor task lists, persisted as `operators.json`.
//!
//! Every mutation is a full read-modify-write of the snapshot. All of them
//! run under one store-wide lock, so concurrent writers from different
//! connections are serialized and no update is lost. Readers that skip the
//! lock (`find_by_username`) may observe the state just before an in-flight
//! write.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::Deserialize;
use tokio::sync::Mutex;

use super::{read_snapshot, write_snapshot};
use crate::common::error::{HubError, HubResult};
use crate::common::model::{default_operators, ConveyorTasks, Operator};

const SNAPSHOT_FILE: &str = "operators.json";

/// Accepted on-disk layouts. Older snapshots keyed operators by username.
#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotFormat {
    List(Vec<Operator>),
    Legacy(BTreeMap<String, LegacyOperator>),
}

#[derive(Deserialize)]
struct LegacyOperator {
    #[serde(default)]
    password: String,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    tasks: ConveyorTasks,
}

pub struct OperatorStore {
    path: PathBuf,
    /// Serializes every read-modify-write cycle.
    write_lock: Mutex<()>,
}

impl OperatorStore {
    /// Open the store in `data_dir`, creating the directory if needed.
    /// The snapshot itself is created lazily by the first [`load`](Self::load).
    pub async fn open(data_dir: impl AsRef<Path>) -> HubResult<Self> {
        let data_dir = data_dir.as_ref();
        tokio::fs::create_dir_all(data_dir).await?;
        Ok(Self {
            path: data_dir.join(SNAPSHOT_FILE),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All operators. Seeds and persists the default accounts on first run.
    pub async fn load(&self) -> HubResult<Vec<Operator>> {
        let _guard = self.write_lock.lock().await;
        self.load_unlocked().await
    }

    /// Overwrite the snapshot with `operators`.
    pub async fn save(&self, operators: &[Operator]) -> HubResult<()> {
        let _guard = self.write_lock.lock().await;
        self.save_unlocked(operators).await
    }

    pub async fn find_by_username(&self, username: &str) -> HubResult<Option<Operator>> {
        let operators = match read_snapshot::<SnapshotFormat>(&self.path).await? {
            Some(snapshot) => into_list(snapshot),
            None => self.load().await?,
        };
        Ok(operators.into_iter().find(|op| op.username == username))
    }

    pub async fn add_operator(&self, username: &str, password: &str) -> HubResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut operators = self.load_unlocked().await?;

        if operators.iter().any(|op| op.username == username) {
            return Err(HubError::DuplicateOperator(username.to_string()));
        }

        operators.push(Operator::new(username, password));
        self.save_unlocked(&operators).await?;
        info!("👤 Operator '{}' added", username);
        Ok(())
    }

    /// Remove `username`. Absent operators are not an error; the return
    /// value tells whether a record was actually removed.
    pub async fn remove_operator(&self, username: &str) -> HubResult<bool> {
        let _guard = self.write_lock.lock().await;
        let mut operators = self.load_unlocked().await?;

        let before = operators.len();
        operators.retain(|op| op.username != username);
        let removed = operators.len() != before;

        if removed {
            self.save_unlocked(&operators).await?;
            info!("🗑️  Operator '{}' removed", username);
        } else {
            debug!("Operator '{}' not present, nothing to remove", username);
        }
        Ok(removed)
    }

    pub async fn update_status(&self, username: &str, active: bool) -> HubResult<()> {
        self.modify(username, |op| {
            op.active = active;
            Ok(())
        })
        .await
    }

    pub async fn update_tasks(&self, username: &str, tasks: ConveyorTasks) -> HubResult<()> {
        self.modify(username, |op| {
            op.tasks = tasks;
            Ok(())
        })
        .await
    }

    pub async fn update_password(&self, username: &str, new_password: &str) -> HubResult<()> {
        self.modify(username, |op| {
            op.password = new_password.to_string();
            Ok(())
        })
        .await
    }

    /// Run `f` against one operator inside a locked read-modify-write
    /// cycle. The snapshot is only rewritten when `f` succeeds.
    pub async fn modify<T, F>(&self, username: &str, f: F) -> HubResult<T>
    where
        F: FnOnce(&mut Operator) -> HubResult<T>,
    {
        let _guard = self.write_lock.lock().await;
        let mut operators = self.load_unlocked().await?;

        let operator = operators
            .iter_mut()
            .find(|op| op.username == username)
            .ok_or_else(|| HubError::OperatorNotFound(username.to_string()))?;

        let result = f(operator)?;
        self.save_unlocked(&operators).await?;
        Ok(result)
    }

    /// Mark everyone offline. Run at startup: no connection survives a
    /// server restart, so any stored `active = true` is stale.
    pub async fn reset_presence(&self) -> HubResult<usize> {
        let _guard = self.write_lock.lock().await;
        let mut operators = self.load_unlocked().await?;

        let mut reset = 0;
        for op in operators.iter_mut().filter(|op| op.active) {
            op.active = false;
            reset += 1;
        }
        if reset > 0 {
            self.save_unlocked(&operators).await?;
            warn!("⚠️  Cleared stale online flag on {} operator(s)", reset);
        }
        Ok(reset)
    }

    async fn load_unlocked(&self) -> HubResult<Vec<Operator>> {
        match read_snapshot::<SnapshotFormat>(&self.path).await? {
            Some(SnapshotFormat::List(operators)) => Ok(operators),
            Some(legacy @ SnapshotFormat::Legacy(_)) => {
                let operators = into_list(legacy);
                info!("📦 Converting legacy operator snapshot to list format");
                self.save_unlocked(&operators).await?;
                Ok(operators)
            }
            None => {
                let operators = default_operators();
                self.save_unlocked(&operators).await?;
                info!(
                    "🌱 No operator snapshot at {}, seeded {} default operators",
                    self.path.display(),
                    operators.len()
                );
                Ok(operators)
            }
        }
    }

    async fn save_unlocked(&self, operators: &[Operator]) -> HubResult<()> {
        write_snapshot(&self.path, operators).await?;
        debug!("💾 Saved {} operators", operators.len());
        Ok(())
    }
}

fn into_list(snapshot: SnapshotFormat) -> Vec<Operator> {
    match snapshot {
        SnapshotFormat::List(operators) => operators,
        SnapshotFormat::Legacy(map) => map
            .into_iter()
            .map(|(username, legacy)| Operator {
                username,
                password: legacy.password,
                active: legacy.active,
                tasks: legacy.tasks,
            })
            .collect(),
    }
}
