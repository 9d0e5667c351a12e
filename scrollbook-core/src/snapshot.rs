use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::book::ChapterMeta;
use crate::store::{read_optional, write_atomic, StoreError};

pub type BookKey = Uuid;

static SNAPSHOT_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3f0c6a52-8d1e-5b7a-9c44-2e61d0b8a7f3").expect("valid namespace UUID")
});

/// Stable key for the cached copy of a book. The same path and signature
/// always map to the same key.
pub fn book_key(path: &Path, signature: Option<&str>) -> BookKey {
    let name = format!(
        "{}|{}",
        path.to_string_lossy(),
        signature.unwrap_or("plain")
    );
    Uuid::new_v5(&SNAPSHOT_NAMESPACE, name.as_bytes())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub key: BookKey,
    pub path: PathBuf,
    pub signature: Option<String>,
    pub title: String,
    pub chapters: Vec<ChapterMeta>,
    pub ts: u64,
}

/// First-paint copy of a book: metadata plus rendered section markup by
/// chapter index.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub meta: SnapshotMeta,
    pub chapters: BTreeMap<usize, String>,
}

impl Snapshot {
    /// The contiguous run of cached indices containing `preferred`, or the
    /// first run when `preferred` is not cached.
    pub fn contiguous_run(&self, preferred: Option<usize>) -> Option<Range<usize>> {
        let mut runs: Vec<Range<usize>> = Vec::new();
        for &idx in self.chapters.keys() {
            match runs.last_mut() {
                Some(run) if run.end == idx => run.end = idx + 1,
                _ => runs.push(idx..idx + 1),
            }
        }
        preferred
            .and_then(|idx| runs.iter().find(|run| run.contains(&idx)).cloned())
            .or_else(|| runs.first().cloned())
    }
}

pub trait SnapshotStore: Send + Sync {
    fn put_meta(&self, meta: &SnapshotMeta) -> Result<(), StoreError>;
    fn put_chapter(&self, key: BookKey, idx: usize, html: &str) -> Result<(), StoreError>;
    /// Newest snapshot recorded for `path`.
    fn get(&self, path: &Path) -> Result<Option<Snapshot>, StoreError>;
    fn delete(&self, path: &Path) -> Result<(), StoreError>;
}

/// One directory per book key: `meta.json` plus `chapters/<idx>.html`.
pub struct FileSnapshotStore {
    root: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create snapshot directory at {:?}", root))?;
        Ok(Self { root })
    }

    fn book_dir(&self, key: BookKey) -> PathBuf {
        self.root.join(key.to_string())
    }

    fn metas_for(&self, path: &Path) -> Result<Vec<SnapshotMeta>, StoreError> {
        let entries = fs::read_dir(&self.root).map_err(|err| StoreError::io(&self.root, err))?;
        let mut metas = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| StoreError::io(&self.root, err))?;
            if !entry.path().is_dir() {
                continue;
            }
            let meta_path = entry.path().join("meta.json");
            let Some(raw) = read_optional(&meta_path)? else {
                continue;
            };
            match serde_json::from_str::<SnapshotMeta>(&raw) {
                Ok(meta) if meta.path == path => metas.push(meta),
                Ok(_) => {}
                Err(err) => warn!(?err, path = %meta_path.display(), "skipping unreadable snapshot"),
            }
        }
        Ok(metas)
    }

    fn read_chapters(&self, key: BookKey) -> Result<BTreeMap<usize, String>, StoreError> {
        let dir = self.book_dir(key).join("chapters");
        let mut chapters = BTreeMap::new();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(chapters),
            Err(err) => return Err(StoreError::io(&dir, err)),
        };
        for entry in entries {
            let entry = entry.map_err(|err| StoreError::io(&dir, err))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("html") {
                continue;
            }
            let Some(idx) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<usize>().ok())
            else {
                continue;
            };
            let html = fs::read_to_string(&path).map_err(|err| StoreError::io(&path, err))?;
            chapters.insert(idx, html);
        }
        Ok(chapters)
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn put_meta(&self, meta: &SnapshotMeta) -> Result<(), StoreError> {
        let dir = self.book_dir(meta.key);
        fs::create_dir_all(&dir).map_err(|err| StoreError::io(&dir, err))?;
        let path = dir.join("meta.json");
        let payload =
            serde_json::to_string_pretty(meta).map_err(|err| StoreError::serde(&path, err))?;
        write_atomic(&path, payload.as_bytes())
    }

    fn put_chapter(&self, key: BookKey, idx: usize, html: &str) -> Result<(), StoreError> {
        let dir = self.book_dir(key).join("chapters");
        fs::create_dir_all(&dir).map_err(|err| StoreError::io(&dir, err))?;
        write_atomic(&dir.join(format!("{idx}.html")), html.as_bytes())
    }

    fn get(&self, path: &Path) -> Result<Option<Snapshot>, StoreError> {
        let Some(meta) = self
            .metas_for(path)?
            .into_iter()
            .max_by_key(|meta| meta.ts)
        else {
            return Ok(None);
        };
        let chapters = self.read_chapters(meta.key)?;
        Ok(Some(Snapshot { meta, chapters }))
    }

    fn delete(&self, path: &Path) -> Result<(), StoreError> {
        for meta in self.metas_for(path)? {
            let dir = self.book_dir(meta.key);
            fs::remove_dir_all(&dir).map_err(|err| StoreError::io(&dir, err))?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct MemorySnapshots {
    metas: HashMap<BookKey, SnapshotMeta>,
    chapters: HashMap<BookKey, BTreeMap<usize, String>>,
}

pub struct MemorySnapshotStore {
    inner: Mutex<MemorySnapshots>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemorySnapshots::default()),
        }
    }
}

impl Default for MemorySnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn put_meta(&self, meta: &SnapshotMeta) -> Result<(), StoreError> {
        self.inner.lock().metas.insert(meta.key, meta.clone());
        Ok(())
    }

    fn put_chapter(&self, key: BookKey, idx: usize, html: &str) -> Result<(), StoreError> {
        self.inner
            .lock()
            .chapters
            .entry(key)
            .or_default()
            .insert(idx, html.to_string());
        Ok(())
    }

    fn get(&self, path: &Path) -> Result<Option<Snapshot>, StoreError> {
        let inner = self.inner.lock();
        let Some(meta) = inner
            .metas
            .values()
            .filter(|meta| meta.path == path)
            .max_by_key(|meta| meta.ts)
            .cloned()
        else {
            return Ok(None);
        };
        let chapters = inner.chapters.get(&meta.key).cloned().unwrap_or_default();
        Ok(Some(Snapshot { meta, chapters }))
    }

    fn delete(&self, path: &Path) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let keys: Vec<BookKey> = inner
            .metas
            .values()
            .filter(|meta| meta.path == path)
            .map(|meta| meta.key)
            .collect();
        for key in keys {
            inner.metas.remove(&key);
            inner.chapters.remove(&key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn meta(path: &Path, signature: Option<&str>, ts: u64) -> SnapshotMeta {
        SnapshotMeta {
            key: book_key(path, signature),
            path: path.to_path_buf(),
            signature: signature.map(str::to_string),
            title: "Cached".into(),
            chapters: vec![ChapterMeta {
                id: "c0".into(),
                href: "c0.xhtml".into(),
                title: "One".into(),
            }],
            ts,
        }
    }

    #[test]
    fn book_key_is_stable_and_signature_sensitive() {
        let path = Path::new("/books/a.epub");
        assert_eq!(book_key(path, None), book_key(path, None));
        assert_eq!(book_key(path, None), book_key(path, Some("plain")));
        assert_ne!(book_key(path, None), book_key(path, Some("1024-77")));
    }

    #[test]
    fn file_store_round_trips_newest_snapshot() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("snapshots")).unwrap();
        let path = Path::new("/books/a.epub");

        let old = meta(path, Some("old"), 10);
        let new = meta(path, Some("new"), 20);
        store.put_meta(&old).unwrap();
        store.put_meta(&new).unwrap();
        store.put_chapter(old.key, 0, "<p>stale</p>").unwrap();
        store.put_chapter(new.key, 2, "<p>two</p>").unwrap();
        store.put_chapter(new.key, 3, "<p>three</p>").unwrap();

        let snapshot = store.get(path).unwrap().unwrap();
        assert_eq!(snapshot.meta.key, new.key);
        assert_eq!(snapshot.chapters.keys().copied().collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(snapshot.chapters[&3], "<p>three</p>");

        store.delete(path).unwrap();
        assert!(store.get(path).unwrap().is_none());
    }

    #[test]
    fn unknown_path_has_no_snapshot() {
        let store = MemorySnapshotStore::new();
        store.put_meta(&meta(Path::new("/a.epub"), None, 1)).unwrap();
        assert!(store.get(Path::new("/b.epub")).unwrap().is_none());
    }

    #[test]
    fn contiguous_run_prefers_the_run_holding_the_reading_position() {
        let path = Path::new("/a.epub");
        let mut chapters = BTreeMap::new();
        for idx in [1, 2, 5, 6, 7] {
            chapters.insert(idx, String::new());
        }
        let snapshot = Snapshot {
            meta: meta(path, None, 1),
            chapters,
        };
        assert_eq!(snapshot.contiguous_run(Some(6)), Some(5..8));
        assert_eq!(snapshot.contiguous_run(Some(3)), Some(1..3));
        assert_eq!(snapshot.contiguous_run(None), Some(1..3));
    }
}
