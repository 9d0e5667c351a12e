use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::restore::RestorePoint;
use crate::store::{now_millis, read_optional, write_atomic, StoreError};

/// Reading position in the most recently opened book.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProgressRecord {
    pub path: Option<PathBuf>,
    pub chapter_idx: usize,
    /// Layout units from the top of `chapter_idx`.
    pub offset: f32,
    /// `offset` divided by the chapter height at save time.
    pub offset_ratio: f32,
    pub ts: u64,
}

impl ProgressRecord {
    /// Applies `patch` on top of `previous`. Moving to another chapter without
    /// naming an offset zeroes both offset fields.
    pub fn merge(previous: Option<&ProgressRecord>, patch: &ProgressPatch, ts: u64) -> Self {
        let mut next = previous.cloned().unwrap_or_default();
        let chapter_changed = match (previous, patch.chapter_idx) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(old), Some(idx)) => old.chapter_idx != idx,
        };
        let offset_given = patch.offset.is_some() || patch.offset_ratio.is_some();

        if let Some(path) = &patch.path {
            next.path = Some(path.clone());
        }
        if let Some(idx) = patch.chapter_idx {
            next.chapter_idx = idx;
        }
        if let Some(offset) = patch.offset {
            next.offset = offset;
        }
        if let Some(ratio) = patch.offset_ratio {
            next.offset_ratio = ratio;
        }
        if chapter_changed && !offset_given {
            next.offset = 0.0;
            next.offset_ratio = 0.0;
        }
        next.ts = ts;
        next
    }

    pub fn restore_point(&self) -> RestorePoint {
        RestorePoint {
            offset: self.offset.max(0.0),
            offset_ratio: self.offset_ratio.max(0.0),
        }
    }
}

/// Partial update; `None` fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressPatch {
    pub path: Option<PathBuf>,
    pub chapter_idx: Option<usize>,
    pub offset: Option<f32>,
    pub offset_ratio: Option<f32>,
}

impl ProgressPatch {
    pub fn path(path: &Path) -> Self {
        Self {
            path: Some(path.to_path_buf()),
            ..Self::default()
        }
    }

    pub fn chapter(path: &Path, chapter_idx: usize) -> Self {
        Self {
            chapter_idx: Some(chapter_idx),
            ..Self::path(path)
        }
    }

    pub fn position(path: &Path, chapter_idx: usize, offset: f32, offset_ratio: f32) -> Self {
        Self {
            offset: Some(offset),
            offset_ratio: Some(offset_ratio),
            ..Self::chapter(path, chapter_idx)
        }
    }

    /// Remembers `path` as the last book, positioned at its very start.
    pub fn reset(path: &Path) -> Self {
        Self::position(path, 0, 0.0, 0.0)
    }
}

pub trait ProgressStore: Send + Sync {
    fn get(&self) -> Result<Option<ProgressRecord>, StoreError>;
    fn put(&self, patch: &ProgressPatch) -> Result<ProgressRecord, StoreError>;
    fn clear(&self) -> Result<(), StoreError>;

    /// Saved scroll position of the table-of-contents list for `path`.
    fn toc_scroll(&self, _path: &Path) -> Result<Option<usize>, StoreError> {
        Ok(None)
    }

    fn put_toc_scroll(&self, _path: &Path, _rows: usize) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ProgressFile {
    last: Option<ProgressRecord>,
    toc_scroll: BTreeMap<String, usize>,
}

fn toc_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// JSON file holding the last-book record and per-book TOC offsets.
pub struct FileProgressStore {
    file: PathBuf,
    lock: Mutex<()>,
}

impl FileProgressStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create progress directory at {:?}", root))?;
        Ok(Self {
            file: root.join("progress.json"),
            lock: Mutex::new(()),
        })
    }

    fn read(&self) -> Result<ProgressFile, StoreError> {
        match read_optional(&self.file)? {
            Some(raw) => {
                serde_json::from_str(&raw).map_err(|err| StoreError::serde(&self.file, err))
            }
            None => Ok(ProgressFile::default()),
        }
    }

    fn write(&self, contents: &ProgressFile) -> Result<(), StoreError> {
        let payload = serde_json::to_string_pretty(contents)
            .map_err(|err| StoreError::serde(&self.file, err))?;
        write_atomic(&self.file, payload.as_bytes())
    }
}

impl ProgressStore for FileProgressStore {
    fn get(&self) -> Result<Option<ProgressRecord>, StoreError> {
        let _guard = self.lock.lock();
        Ok(self.read()?.last)
    }

    fn put(&self, patch: &ProgressPatch) -> Result<ProgressRecord, StoreError> {
        let _guard = self.lock.lock();
        let mut contents = self.read()?;
        let record = ProgressRecord::merge(contents.last.as_ref(), patch, now_millis());
        contents.last = Some(record.clone());
        self.write(&contents)?;
        Ok(record)
    }

    fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.lock.lock();
        let mut contents = self.read()?;
        contents.last = None;
        self.write(&contents)
    }

    fn toc_scroll(&self, path: &Path) -> Result<Option<usize>, StoreError> {
        let _guard = self.lock.lock();
        Ok(self.read()?.toc_scroll.get(&toc_key(path)).copied())
    }

    fn put_toc_scroll(&self, path: &Path, rows: usize) -> Result<(), StoreError> {
        let _guard = self.lock.lock();
        let mut contents = self.read()?;
        contents.toc_scroll.insert(toc_key(path), rows);
        self.write(&contents)
    }
}

pub struct MemoryProgressStore {
    inner: Mutex<ProgressFile>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ProgressFile::default()),
        }
    }

    pub fn with_record(record: ProgressRecord) -> Self {
        let store = Self::new();
        store.inner.lock().last = Some(record);
        store
    }
}

impl Default for MemoryProgressStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressStore for MemoryProgressStore {
    fn get(&self) -> Result<Option<ProgressRecord>, StoreError> {
        Ok(self.inner.lock().last.clone())
    }

    fn put(&self, patch: &ProgressPatch) -> Result<ProgressRecord, StoreError> {
        let mut inner = self.inner.lock();
        let record = ProgressRecord::merge(inner.last.as_ref(), patch, now_millis());
        inner.last = Some(record.clone());
        Ok(record)
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.inner.lock().last = None;
        Ok(())
    }

    fn toc_scroll(&self, path: &Path) -> Result<Option<usize>, StoreError> {
        Ok(self.inner.lock().toc_scroll.get(&toc_key(path)).copied())
    }

    fn put_toc_scroll(&self, path: &Path, rows: usize) -> Result<(), StoreError> {
        self.inner.lock().toc_scroll.insert(toc_key(path), rows);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn changing_chapter_without_offset_resets_both_offsets() {
        let store = MemoryProgressStore::new();
        let path = Path::new("/books/a.epub");
        store
            .put(&ProgressPatch::position(path, 2, 340.0, 0.25))
            .unwrap();

        let record = store.put(&ProgressPatch::chapter(path, 3)).unwrap();
        assert_eq!(record.chapter_idx, 3);
        assert_eq!(record.offset, 0.0);
        assert_eq!(record.offset_ratio, 0.0);
    }

    #[test]
    fn same_chapter_without_offset_keeps_position() {
        let store = MemoryProgressStore::new();
        let path = Path::new("/books/a.epub");
        store
            .put(&ProgressPatch::position(path, 2, 340.0, 0.25))
            .unwrap();

        let record = store.put(&ProgressPatch::chapter(path, 2)).unwrap();
        assert_eq!(record.offset, 340.0);
        assert_eq!(record.offset_ratio, 0.25);
    }

    #[test]
    fn path_only_patch_keeps_progress() {
        let store = MemoryProgressStore::new();
        let path = Path::new("/books/a.epub");
        store
            .put(&ProgressPatch::position(path, 4, 12.0, 0.1))
            .unwrap();
        let record = store.put(&ProgressPatch::path(path)).unwrap();
        assert_eq!(record.chapter_idx, 4);
        assert_eq!(record.offset, 12.0);
    }

    #[test]
    fn file_store_survives_reopen_and_clear() {
        let dir = tempdir().unwrap();
        let path = Path::new("/books/b.epub");
        {
            let store = FileProgressStore::new(dir.path().join("state")).unwrap();
            store
                .put(&ProgressPatch::position(path, 5, 150.0, 0.1))
                .unwrap();
            store.put_toc_scroll(path, 7).unwrap();
        }

        let store = FileProgressStore::new(dir.path().join("state")).unwrap();
        let record = store.get().unwrap().unwrap();
        assert_eq!(record.path.as_deref(), Some(path));
        assert_eq!(record.chapter_idx, 5);
        assert_eq!(record.offset, 150.0);
        assert_eq!(store.toc_scroll(path).unwrap(), Some(7));

        store.clear().unwrap();
        assert!(store.get().unwrap().is_none());
        assert_eq!(store.toc_scroll(path).unwrap(), Some(7));
    }

    #[test]
    fn corrupt_file_reports_serde_error() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("state");
        let store = FileProgressStore::new(root.clone()).unwrap();
        std::fs::write(root.join("progress.json"), b"{ not json").unwrap();
        assert!(matches!(store.get(), Err(StoreError::Serde { .. })));
    }
}
