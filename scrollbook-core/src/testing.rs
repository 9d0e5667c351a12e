use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::book::{Book, Chapter, DecodeError, DocumentSource};
use crate::config::ReaderConfig;
use crate::controller::ReaderController;
use crate::progress::{MemoryProgressStore, ProgressPatch, ProgressRecord, ProgressStore};
use crate::restore::RestorePoint;
use crate::schedule::ManualClock;
use crate::snapshot::MemorySnapshotStore;
use crate::store::StoreError;
use crate::viewport::{Placement, Rect, Section, Viewport};

/// Sections stacked top to bottom with fixed heights per chapter index.
pub struct FakeViewport {
    sections: Vec<Section>,
    heights: HashMap<usize, f32>,
    default_height: f32,
    client_height: f32,
    scroll_top: f32,
}

impl FakeViewport {
    pub fn new(client_height: f32, default_height: f32) -> Self {
        Self {
            sections: Vec::new(),
            heights: HashMap::new(),
            default_height,
            client_height,
            scroll_top: 0.0,
        }
    }

    pub fn with_height(mut self, idx: usize, height: f32) -> Self {
        self.heights.insert(idx, height);
        self
    }

    /// Late reflow: the scroll offset stays where it was.
    pub fn set_height(&mut self, idx: usize, height: f32) {
        self.heights.insert(idx, height);
        let top = self.scroll_top;
        self.set_scroll_top(top);
    }

    pub fn html(&self, idx: usize) -> Option<&str> {
        self.sections
            .iter()
            .find(|section| section.idx == idx)
            .map(|section| section.html.as_str())
    }

    fn height(&self, idx: usize) -> f32 {
        self.heights
            .get(&idx)
            .copied()
            .unwrap_or(self.default_height)
    }
}

impl Viewport for FakeViewport {
    fn attach(&mut self, placement: Placement, sections: Vec<Section>) {
        match placement {
            Placement::Top => {
                let below = std::mem::replace(&mut self.sections, sections);
                self.sections.extend(below);
            }
            Placement::Bottom => self.sections.extend(sections),
        }
    }

    fn clear(&mut self) {
        self.sections.clear();
        self.scroll_top = 0.0;
    }

    fn measure(&self, idx: usize) -> Option<Rect> {
        let mut offset = 0.0;
        for section in &self.sections {
            let height = self.height(section.idx);
            if section.idx == idx {
                return Some(Rect {
                    top: offset - self.scroll_top,
                    height,
                });
            }
            offset += height;
        }
        None
    }

    fn attached(&self) -> Vec<usize> {
        self.sections.iter().map(|section| section.idx).collect()
    }

    fn scroll_top(&self) -> f32 {
        self.scroll_top
    }

    fn set_scroll_top(&mut self, value: f32) {
        let max = (self.scroll_height() - self.client_height).max(0.0);
        self.scroll_top = value.clamp(0.0, max);
    }

    fn scroll_height(&self) -> f32 {
        self.sections
            .iter()
            .map(|section| self.height(section.idx))
            .sum()
    }

    fn client_height(&self) -> f32 {
        self.client_height
    }
}

pub struct FakeSource {
    books: HashMap<PathBuf, Book>,
    calls: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Self {
        Self {
            books: HashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_book(mut self, book: Book) -> Self {
        if let Some(path) = book.path.clone() {
            self.books.insert(path, book);
        }
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentSource for FakeSource {
    async fn decode(&self, path: &Path) -> Result<Book, DecodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.books
            .get(path)
            .cloned()
            .ok_or(DecodeError::MissingContainer)
    }
}

/// Progress store whose every call fails.
pub struct FailingProgressStore;

impl ProgressStore for FailingProgressStore {
    fn get(&self) -> Result<Option<ProgressRecord>, StoreError> {
        Err(StoreError::Unavailable("progress offline".into()))
    }

    fn put(&self, _patch: &ProgressPatch) -> Result<ProgressRecord, StoreError> {
        Err(StoreError::Unavailable("progress offline".into()))
    }

    fn clear(&self) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("progress offline".into()))
    }
}

pub fn sample_book(path: &str, chapters: usize) -> Book {
    let chapters = (0..chapters)
        .map(|idx| Chapter {
            id: format!("c{idx}"),
            href: format!("text/c{idx}.xhtml"),
            title: format!("Chapter {}", idx + 1),
            html: format!("<p>Body of chapter {}</p>", idx + 1),
        })
        .collect();
    Book::new("Sample", Some(PathBuf::from(path)), chapters).with_signature(Some("42-7".into()))
}

pub struct Harness {
    pub reader: ReaderController<FakeViewport>,
    pub clock: Arc<ManualClock>,
    pub progress: Arc<MemoryProgressStore>,
    pub snapshots: Arc<MemorySnapshotStore>,
}

pub fn harness(viewport: FakeViewport) -> Harness {
    let clock = Arc::new(ManualClock::new());
    let progress = Arc::new(MemoryProgressStore::new());
    let snapshots = Arc::new(MemorySnapshotStore::new());
    let reader = ReaderController::new(
        viewport,
        ReaderConfig::default(),
        progress.clone(),
        snapshots.clone(),
        clock.clone(),
    );
    Harness {
        reader,
        clock,
        progress,
        snapshots,
    }
}

impl Harness {
    pub fn with_progress(mut self, store: Arc<dyn ProgressStore>) -> Self {
        self.reader.progress = store;
        self
    }

    pub fn load(&mut self, book: Book, restore: Option<(usize, RestorePoint)>) {
        let path = book.path.clone().unwrap_or_default();
        self.reader.on_book_loaded(book, &path, restore);
    }

    pub fn frames(&mut self, count: usize) {
        for _ in 0..count {
            self.reader.on_animation_frame();
        }
    }
}

/// Attached sections are exactly `head_idx..next_idx`, in order.
pub fn assert_window_consistent<V: Viewport>(reader: &ReaderController<V>) {
    let state = reader.state();
    assert!(state.head_idx <= state.next_idx);
    let expected: Vec<usize> = state.window().collect();
    assert_eq!(reader.viewport().attached(), expected);
    if let Some(active) = state.active_idx {
        assert!(state.window().contains(&active), "active {active} outside window");
    }
}
