use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::book::Book;
use crate::config::ReaderConfig;
use crate::progress::{ProgressPatch, ProgressStore};
use crate::schedule::{Clock, FrameQueue, Timer};
use crate::snapshot::SnapshotStore;
use crate::state::ReaderViewState;
use crate::toc::TocState;
use crate::tracker::pick_candidate;
use crate::viewport::{Rect, Viewport};

pub const FALLBACK_TITLE: &str = "Scrollbook";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    BookLoaded { title: String, chapters: usize },
    EmptyBook,
    TitleChanged(String),
    TocRefreshed,
    ActiveChapterChanged(usize),
    Status(Option<String>),
}

/// Element whose on-screen position a structural mutation must preserve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Section(usize),
    Container,
}

/// Work deferred to the next display refresh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum FrameTask {
    BatchCorrection {
        generation: u64,
        anchor: Anchor,
        before_top: f32,
    },
    Recenter {
        generation: u64,
        remaining: u8,
    },
    Track,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PendingSave {
    /// Only the chapter index; stored offsets reset.
    Chapter(usize),
    /// Active chapter plus the current offset inside it.
    Capture,
}

#[derive(Debug, Default)]
pub(crate) struct Timers {
    pub navigation: Timer,
    pub restore_settle: Timer,
    pub save: Timer,
    pub status: Timer,
}

/// Owns the view state of one reader and drives the window manager, the
/// active-chapter tracker, the position restorer and the startup sequence.
pub struct ReaderController<V: Viewport> {
    pub(crate) viewport: V,
    pub(crate) state: ReaderViewState,
    pub(crate) book: Book,
    pub(crate) config: ReaderConfig,
    pub(crate) progress: Arc<dyn ProgressStore>,
    pub(crate) snapshots: Arc<dyn SnapshotStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) toc: TocState,
    pub(crate) timers: Timers,
    pub(crate) frames: FrameQueue<FrameTask>,
    pub(crate) tracker_requested: bool,
    pub(crate) pending_save: Option<PendingSave>,
    pub(crate) restore_generation: u64,
    pub(crate) batch_generation: u64,
    /// Jump that arrived while a batch prepend was settling.
    pub(crate) deferred_jump: Option<usize>,
    status: Option<String>,
    title: String,
    events: Arc<Mutex<Vec<ReaderEvent>>>,
}

impl<V: Viewport> ReaderController<V> {
    pub fn new(
        viewport: V,
        config: ReaderConfig,
        progress: Arc<dyn ProgressStore>,
        snapshots: Arc<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            viewport,
            state: ReaderViewState::default(),
            book: Book::empty(),
            config,
            progress,
            snapshots,
            clock,
            toc: TocState::new(),
            timers: Timers::default(),
            frames: FrameQueue::new(),
            tracker_requested: false,
            pending_save: None,
            restore_generation: 0,
            batch_generation: 0,
            deferred_jump: None,
            status: None,
            title: FALLBACK_TITLE.to_string(),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn state(&self) -> &ReaderViewState {
        &self.state
    }

    pub fn book(&self) -> &Book {
        &self.book
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn viewport(&self) -> &V {
        &self.viewport
    }

    pub fn viewport_mut(&mut self) -> &mut V {
        &mut self.viewport
    }

    pub fn toc(&self) -> &TocState {
        &self.toc
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn drain_events(&self) -> Vec<ReaderEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub(crate) fn emit(&self, event: ReaderEvent) {
        self.events.lock().push(event);
    }

    /// Runs the work queued for this display refresh. Anything queued while
    /// it runs waits for the next one.
    pub fn on_animation_frame(&mut self) {
        self.state.programmatic_scroll = false;
        for task in self.frames.take() {
            match task {
                FrameTask::BatchCorrection {
                    generation,
                    anchor,
                    before_top,
                } => self.finish_batch(generation, anchor, before_top),
                FrameTask::Recenter {
                    generation,
                    remaining,
                } => self.run_recenter(generation, remaining),
                FrameTask::Track => {
                    self.tracker_requested = false;
                    self.track_active();
                }
            }
        }
    }

    /// Fires whichever timers are due.
    pub fn tick(&mut self) {
        let now = self.clock.now();
        if self.timers.navigation.fire_if_due(now) {
            debug!("navigation window expired");
            self.state.navigation = None;
            self.request_track();
        }
        if self.timers.restore_settle.fire_if_due(now) {
            self.release_restore();
        }
        if self.timers.save.fire_if_due(now) {
            self.flush_save();
        }
        if self.timers.status.fire_if_due(now) {
            self.status = None;
            self.emit(ReaderEvent::Status(None));
        }
    }

    /// The viewport scrolled. Programmatic scrolls only re-run the tracker.
    pub fn on_scroll(&mut self) {
        self.request_track();
        if self.state.is_programmatic_scroll() {
            return;
        }

        let top = self.viewport.scroll_top();
        let client = self.viewport.client_height();
        if top > self.config.user_scroll_threshold {
            self.state.user_has_scrolled = true;
        }
        if self.state.is_navigating() && top > self.config.navigation_release_scroll {
            self.close_navigation();
        }

        let remaining = self.viewport.scroll_height() - client - top;
        if self.state.user_has_scrolled && remaining < self.config.near_bottom_threshold(client) {
            self.append_next();
        } else if top < self.config.near_top && self.state.head_idx > 0 {
            self.append_prev_keep_viewport();
        }

        self.schedule_save(PendingSave::Capture);
    }

    /// Scrolls on behalf of the user.
    pub fn scroll_by(&mut self, delta: f32) {
        self.viewport.scroll_by(delta);
        self.on_scroll();
    }

    pub fn on_resize(&mut self) {
        self.on_layout_shift();
    }

    /// Writes a pending progress save right away, for shutdown.
    pub fn flush(&mut self) {
        self.flush_save();
        self.remember_toc_scroll();
    }

    pub fn show_status(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.status = Some(message.clone());
        self.timers
            .status
            .arm(self.clock.now(), self.config.status_clear);
        self.emit(ReaderEvent::Status(Some(message)));
    }

    /// Drops the cached copy of the current book.
    pub fn clear_cache(&mut self) {
        let Some(path) = self.state.book_path.clone() else {
            return;
        };
        match self.snapshots.delete(&path) {
            Ok(()) => self.show_status("Cache cleared"),
            Err(err) => warn!(%err, ?path, "failed to clear snapshot"),
        }
    }

    pub fn set_toc_rows(&mut self, rows: usize) {
        self.toc.set_visible_rows(rows);
    }

    pub fn toc_move_selection(&mut self, delta: isize) {
        if self.toc.move_selection(delta) {
            self.remember_toc_scroll();
        }
    }

    pub fn toc_scroll(&mut self, delta: isize) {
        self.toc.scroll_by(delta);
        self.remember_toc_scroll();
    }

    pub fn toc_open_selected(&mut self) {
        if self.toc.is_empty() {
            return;
        }
        self.jump_to(self.toc.selected());
    }

    pub(crate) fn request_track(&mut self) {
        if !self.tracker_requested {
            self.tracker_requested = true;
            self.frames.push(FrameTask::Track);
        }
    }

    /// Scroll the reader makes itself. Scroll events stay ignored until the
    /// next frame.
    pub(crate) fn scroll_programmatically(&mut self, top: f32) {
        self.state.programmatic_scroll = true;
        self.viewport.set_scroll_top(top);
    }

    pub(crate) fn scroll_programmatically_by(&mut self, delta: f32) {
        self.state.programmatic_scroll = true;
        self.viewport.scroll_by(delta);
    }

    pub(crate) fn close_navigation(&mut self) {
        self.timers.navigation.cancel();
        self.state.navigation = None;
    }

    fn attached_rects(&self) -> Vec<(usize, Rect)> {
        self.state
            .window()
            .filter_map(|idx| self.viewport.measure(idx).map(|rect| (idx, rect)))
            .collect()
    }

    pub(crate) fn track_active(&mut self) {
        let sections = self.attached_rects();
        let Some(candidate) = pick_candidate(
            &sections,
            self.viewport.client_height(),
            &self.config.tracker(),
        ) else {
            return;
        };

        if let Some(navigation) = self.state.navigation {
            if candidate != navigation.pending_idx {
                return;
            }
            self.close_navigation();
        }
        if let Some(restore) = self.state.restore {
            if candidate != restore.idx {
                return;
            }
        }
        self.set_active(candidate);
    }

    pub(crate) fn set_active(&mut self, idx: usize) {
        if self.state.active_idx == Some(idx) || !self.state.window().contains(&idx) {
            return;
        }
        self.state.active_idx = Some(idx);
        let restoring = self.state.is_restoring();
        if self.toc.mark_active(idx, !restoring) {
            self.remember_toc_scroll();
        }
        self.push_title();
        self.emit(ReaderEvent::ActiveChapterChanged(idx));
        if !restoring {
            self.schedule_save(PendingSave::Chapter(idx));
        }
    }

    pub(crate) fn compose_title(&self) -> String {
        let book = self.book.title.trim();
        let book = if book.is_empty() { FALLBACK_TITLE } else { book };
        match self
            .state
            .active_idx
            .and_then(|idx| self.book.chapter_title(idx))
        {
            Some(chapter) => format!("{book} - {chapter}"),
            None => book.to_string(),
        }
    }

    pub(crate) fn push_title(&mut self) {
        let title = self.compose_title();
        if title != self.title {
            self.title = title.clone();
            self.emit(ReaderEvent::TitleChanged(title));
        }
    }

    pub(crate) fn render_toc(&mut self) {
        let offset = self
            .state
            .book_path
            .as_deref()
            .and_then(|path| match self.progress.toc_scroll(path) {
                Ok(offset) => offset,
                Err(err) => {
                    warn!(%err, "failed to read toc scroll");
                    None
                }
            });
        self.toc.render(self.book.chapters_meta(), offset);
        if let Some(idx) = self.state.active_idx {
            self.toc.mark_active(idx, false);
        }
        self.emit(ReaderEvent::TocRefreshed);
    }

    fn remember_toc_scroll(&self) {
        let Some(path) = self.state.book_path.as_deref() else {
            return;
        };
        if self.toc.is_empty() {
            return;
        }
        if let Err(err) = self.progress.put_toc_scroll(path, self.toc.scroll_offset()) {
            warn!(%err, "failed to save toc scroll");
        }
    }

    pub(crate) fn schedule_save(&mut self, kind: PendingSave) {
        self.pending_save = match (self.pending_save, kind) {
            (Some(PendingSave::Capture), PendingSave::Chapter(_)) => Some(PendingSave::Capture),
            (_, kind) => Some(kind),
        };
        self.timers
            .save
            .arm(self.clock.now(), self.config.save_debounce);
    }

    fn flush_save(&mut self) {
        self.timers.save.cancel();
        let Some(kind) = self.pending_save.take() else {
            return;
        };
        if self.state.is_restoring() {
            return;
        }
        let Some(path) = self.state.book_path.clone() else {
            return;
        };
        let patch = match kind {
            PendingSave::Chapter(idx) => ProgressPatch::chapter(&path, idx),
            PendingSave::Capture => match self.capture_position(&path) {
                Some(patch) => patch,
                None => return,
            },
        };
        if let Err(err) = self.progress.put(&patch) {
            warn!(%err, "failed to save progress");
        }
    }

    fn capture_position(&self, path: &Path) -> Option<ProgressPatch> {
        let idx = self.state.active_idx?;
        let rect = self.viewport.measure(idx)?;
        let offset = (-rect.top).max(0.0);
        let ratio = if rect.height > 0.0 {
            (offset / rect.height).clamp(0.0, 1.0)
        } else {
            0.0
        };
        Some(ProgressPatch::position(path, idx, offset, ratio))
    }

    /// Forgets everything tied to the current book and view.
    pub(crate) fn reset_session(&mut self) {
        self.timers.navigation.cancel();
        self.timers.restore_settle.cancel();
        self.timers.save.cancel();
        self.pending_save = None;
        self.deferred_jump = None;
        self.frames.clear();
        self.tracker_requested = false;
        self.viewport.clear();
        self.toc.clear();
        self.state = ReaderViewState::default();
    }
}
