//! Durable, append-only change log.
//!
//! Reads (`get_by_id`, `last_id`) go straight to a `DashMap` and two atomics and never
//! wait on a writer. Appends and id allocation share one async mutex, which also owns the
//! open log file handle.

use super::types::{ChangeId, DatabaseChange};
use crate::config::ChangeLogSettings;
use crate::error::StoreError;

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub struct ChangeLog {
    changes: DashMap<ChangeId, DatabaseChange>,
    /// Highest id present in `changes`.
    last_id: AtomicU64,
    /// Highest id handed out by `next_id`. Never below `last_id`.
    allocated: AtomicU64,
    /// Serializes allocation + append. `None` until the first append opens the file.
    writer: Mutex<Option<File>>,
    settings: ChangeLogSettings,
}

impl ChangeLog {
    /// Opens (without replaying) the log described by `settings`, creating its directory.
    pub async fn open(settings: ChangeLogSettings) -> Result<Self, StoreError> {
        for path in [&settings.changes_file, &settings.last_change_id_file] {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        Ok(Self {
            changes: DashMap::new(),
            last_id: AtomicU64::new(0),
            allocated: AtomicU64::new(0),
            writer: Mutex::new(None),
            settings,
        })
    }

    /// Allocates the next sequence number.
    ///
    /// Callers that go on to append should prefer [`ChangeLog::commit`], which holds the
    /// append lock across allocation so an id can never be skipped.
    pub fn next_id(&self) -> ChangeId {
        self.allocated.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn last_id(&self) -> ChangeId {
        self.last_id.load(Ordering::SeqCst)
    }

    pub fn get_by_id(&self, id: ChangeId) -> Result<DatabaseChange, StoreError> {
        self.changes
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(format!("change {}", id)))
    }

    pub fn contains(&self, id: ChangeId) -> bool {
        self.changes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Allocates an id, builds the change for it and appends it, all under the log lock.
    pub async fn commit<F>(&self, build: F) -> Result<DatabaseChange, StoreError>
    where
        F: FnOnce(ChangeId) -> DatabaseChange,
    {
        let mut writer = self.writer.lock().await;
        let change = build(self.next_id());
        self.append_locked(&mut writer, &change).await?;
        Ok(change)
    }

    /// Appends a change whose id was assigned elsewhere (the leader).
    ///
    /// The in-memory index is updated before the disk write. A durability failure is
    /// returned as `Unexpected` while the change stays visible to `get_by_id`.
    pub async fn append(&self, change: &DatabaseChange) -> Result<(), StoreError> {
        let mut writer = self.writer.lock().await;
        self.append_locked(&mut writer, change).await
    }

    async fn append_locked(
        &self,
        writer: &mut Option<File>,
        change: &DatabaseChange,
    ) -> Result<(), StoreError> {
        let id = change.id();
        self.changes.insert(id, change.clone());
        self.allocated.fetch_max(id, Ordering::SeqCst);
        self.last_id.fetch_max(id, Ordering::SeqCst);

        if let Err(e) = self.persist(writer, change).await {
            tracing::error!("Failed to persist change {} ({}): {}", id, change.kind(), e);
            // Reopen on the next append rather than writing through a broken handle.
            *writer = None;
            return Err(e);
        }

        tracing::trace!("Appended change {} ({})", id, change.kind());
        Ok(())
    }

    async fn persist(
        &self,
        writer: &mut Option<File>,
        change: &DatabaseChange,
    ) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(change)?;
        line.push(b'\n');

        if writer.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.settings.changes_file)
                .await?;
            *writer = Some(file);
        }

        if let Some(file) = writer.as_mut() {
            file.write_all(&line).await?;
            file.sync_data().await?;
        }

        self.write_marker(self.last_id()).await
    }

    async fn write_marker(&self, id: ChangeId) -> Result<(), StoreError> {
        let marker = &self.settings.last_change_id_file;
        let tmp = marker.with_extension("tmp");
        tokio::fs::write(&tmp, id.to_string()).await?;
        tokio::fs::rename(&tmp, marker).await?;
        Ok(())
    }

    async fn read_marker(&self) -> Option<ChangeId> {
        tokio::fs::read_to_string(&self.settings.last_change_id_file)
            .await
            .ok()
            .and_then(|text| text.trim().parse().ok())
    }

    /// Replays the persisted log in file order and rebuilds the in-memory index.
    ///
    /// The high-water mark becomes the largest id seen, wherever it sits in the file.
    /// A torn final line (crash mid-append) is cut off; any other undecodable line
    /// aborts the replay.
    pub async fn load_all(&self) -> Result<Vec<DatabaseChange>, StoreError> {
        let mut writer = self.writer.lock().await;
        *writer = None;

        let path = &self.settings.changes_file;
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No change log at {}, starting empty", path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut changes = Vec::new();
        let mut max_id = 0;
        let mut valid_len = 0usize;
        let ends_with_newline = content.ends_with('\n');
        let lines: Vec<&str> = content.split_inclusive('\n').collect();

        for (index, raw) in lines.iter().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                valid_len += raw.len();
                continue;
            }

            match serde_json::from_str::<DatabaseChange>(line) {
                Ok(change) => {
                    max_id = max_id.max(change.id());
                    self.changes.insert(change.id(), change.clone());
                    changes.push(change);
                    valid_len += raw.len();
                }
                Err(e) if index + 1 == lines.len() && !ends_with_newline => {
                    tracing::warn!(
                        "Dropping torn tail of change log {} ({} bytes): {}",
                        path.display(),
                        raw.len(),
                        e
                    );
                    let file = OpenOptions::new().write(true).open(path).await?;
                    file.set_len(valid_len as u64).await?;
                }
                Err(e) => {
                    return Err(StoreError::Unexpected(format!(
                        "corrupt change log entry at line {}: {}",
                        index + 1,
                        e
                    )));
                }
            }
        }

        self.last_id.fetch_max(max_id, Ordering::SeqCst);
        self.allocated.fetch_max(max_id, Ordering::SeqCst);

        match self.read_marker().await {
            Some(marker) if marker != max_id => {
                tracing::warn!(
                    "Last change id marker says {}, log says {}; trusting the log",
                    marker,
                    max_id
                );
            }
            _ => {}
        }

        tracing::info!(
            "Replayed {} changes from {} (last id {})",
            changes.len(),
            path.display(),
            max_id
        );

        Ok(changes)
    }
}
