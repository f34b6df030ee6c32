use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use at_types::{validation_error, DataStore, TuneResult, TuningOptions};

/// A tuning session frozen to disk: options plus the full history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub saved_at: DateTime<Utc>,
    pub label: String,
    pub options: TuningOptions,
    pub data: DataStore,
}

impl SessionSnapshot {
    pub fn new(label: impl Into<String>, options: TuningOptions, data: DataStore) -> Self {
        Self {
            id: Uuid::new_v4(),
            saved_at: Utc::now(),
            label: label.into(),
            options,
            data,
        }
    }
}

/// Listing entry for a stored snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotInfo {
    pub id: Uuid,
    pub label: String,
    pub saved_at: DateTime<Utc>,
    pub tasks: usize,
}

/// Snapshot storage under a root directory, one JSON file per snapshot.
#[derive(Debug)]
pub struct SnapshotStore {
    pub data_root: PathBuf,
}

impl SnapshotStore {
    pub fn new<P: AsRef<Path>>(data_root: P) -> TuneResult<Self> {
        let data_root = data_root.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_root)?;

        Ok(Self { data_root })
    }

    fn snapshot_path(&self, id: Uuid) -> PathBuf {
        self.data_root.join(format!("{id}.json"))
    }

    /// Write `snapshot`, replacing any earlier save with the same id.
    pub fn save(&self, snapshot: &SessionSnapshot) -> TuneResult<PathBuf> {
        snapshot.data.validate()?;
        let path = self.snapshot_path(snapshot.id);
        let json = serde_json::to_string_pretty(snapshot)?;
        std::fs::write(&path, json)?;

        info!(
            "Saved snapshot {} ({}) with {} tasks to {}",
            snapshot.id,
            snapshot.label,
            snapshot.data.num_tasks(),
            path.display()
        );
        Ok(path)
    }

    /// Read a snapshot back and check its history and options.
    pub fn load(&self, id: Uuid) -> TuneResult<SessionSnapshot> {
        let path = self.snapshot_path(id);
        let json = std::fs::read_to_string(&path)?;
        let snapshot: SessionSnapshot = serde_json::from_str(&json)?;
        if snapshot.id != id {
            return Err(validation_error!(
                "{} holds snapshot {}, expected {}",
                path.display(),
                snapshot.id,
                id
            ));
        }
        snapshot.data.validate()?;
        snapshot.options.validate()?;

        debug!("Loaded snapshot {} from {}", id, path.display());
        Ok(snapshot)
    }

    /// Stored snapshots, oldest first. Unreadable files are skipped.
    pub fn list(&self) -> TuneResult<Vec<SnapshotInfo>> {
        let mut infos = Vec::new();
        for entry in std::fs::read_dir(&self.data_root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let parsed = std::fs::read_to_string(&path)
                .map_err(at_types::TuneError::from)
                .and_then(|json| Ok(serde_json::from_str::<SessionSnapshot>(&json)?));
            match parsed {
                Ok(snapshot) => infos.push(SnapshotInfo {
                    id: snapshot.id,
                    label: snapshot.label,
                    saved_at: snapshot.saved_at,
                    tasks: snapshot.data.num_tasks(),
                }),
                Err(e) => warn!("Skipping unreadable snapshot {}: {}", path.display(), e),
            }
        }

        infos.sort_by_key(|info| info.saved_at);
        Ok(infos)
    }

    /// The most recently saved snapshot, if any.
    pub fn latest(&self) -> TuneResult<Option<SessionSnapshot>> {
        match self.list()?.last() {
            Some(info) => self.load(info.id).map(Some),
            None => Ok(None),
        }
    }
}
