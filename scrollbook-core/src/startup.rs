use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use crate::book::{Book, DecodeError, DocumentSource};
use crate::controller::{ReaderController, ReaderEvent};
use crate::progress::{ProgressPatch, ProgressRecord};
use crate::restore::RestorePoint;
use crate::snapshot::{book_key, SnapshotMeta};
use crate::store::now_millis;
use crate::viewport::{Placement, Section, Viewport};

#[derive(Debug, Clone, PartialEq)]
pub enum DecodePurpose {
    /// Authoritative copy of a book already painted from its snapshot.
    Refresh,
    /// Resuming the last book when nothing was cached.
    Restore(ProgressRecord),
    /// Explicit user open.
    Open,
}

/// A decode the host has to run and hand back through
/// [`ReaderController::complete_decode`].
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeRequest {
    pub path: PathBuf,
    pub purpose: DecodePurpose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Nothing to resume.
    Idle,
    /// The book replaced the view.
    Loaded,
    /// Metadata and TOC refreshed under a snapshot-painted view.
    Refreshed,
    Failed,
    /// The view moved on to another book before the decode finished.
    Stale,
}

impl<V: Viewport> ReaderController<V> {
    /// Picks the launch path. A snapshot hit is painted before this returns;
    /// the request, if any, is the decode to run next.
    pub fn begin_launch(&mut self) -> Option<DecodeRequest> {
        let record = match self.progress.get() {
            Ok(record) => record,
            Err(err) => {
                warn!(%err, "failed to read progress");
                None
            }
        };
        let Some(record) = record else {
            info!("no previous book");
            return None;
        };
        let Some(path) = record.path.clone() else {
            info!("no previous book");
            return None;
        };

        if self.hydrate_from_snapshot(&path, &record) {
            info!(?path, "painted from snapshot");
            return Some(DecodeRequest {
                path,
                purpose: DecodePurpose::Refresh,
            });
        }

        info!(?path, "no snapshot, decoding last book");
        self.state.book_path = Some(path.clone());
        Some(DecodeRequest {
            path,
            purpose: DecodePurpose::Restore(record),
        })
    }

    pub fn begin_open(&mut self, path: PathBuf) -> DecodeRequest {
        self.show_status("Decoding...");
        DecodeRequest {
            path,
            purpose: DecodePurpose::Open,
        }
    }

    /// The user dismissed the file picker.
    pub fn cancel_open(&mut self) {
        self.show_status("Cancelled");
    }

    pub fn complete_decode(
        &mut self,
        request: DecodeRequest,
        result: Result<Book, DecodeError>,
    ) -> LoadOutcome {
        let DecodeRequest { path, purpose } = request;
        match purpose {
            DecodePurpose::Refresh => self.finish_refresh(&path, result),
            DecodePurpose::Restore(record) => self.finish_restore(&path, &record, result),
            DecodePurpose::Open => self.finish_open(&path, result),
        }
    }

    #[instrument(skip(self, source))]
    pub async fn launch<S: DocumentSource + ?Sized>(&mut self, source: &S) -> LoadOutcome {
        let Some(request) = self.begin_launch() else {
            return LoadOutcome::Idle;
        };
        let result = source.decode(&request.path).await;
        self.complete_decode(request, result)
    }

    #[instrument(skip(self, source))]
    pub async fn open_book<S: DocumentSource + ?Sized>(
        &mut self,
        source: &S,
        path: PathBuf,
    ) -> LoadOutcome {
        let request = self.begin_open(path);
        let result = source.decode(&request.path).await;
        self.complete_decode(request, result)
    }

    /// Paints the cached contiguous run holding the reading position and
    /// restores into it. Returns false on a cache miss.
    fn hydrate_from_snapshot(&mut self, path: &Path, record: &ProgressRecord) -> bool {
        let snapshot = match self.snapshots.get(path) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return false,
            Err(err) => {
                warn!(%err, ?path, "failed to read snapshot");
                return false;
            }
        };
        let Some(run) = snapshot.contiguous_run(Some(record.chapter_idx)) else {
            return false;
        };
        if run.end > snapshot.meta.chapters.len() {
            debug!(?run, "snapshot chapters outside its metadata");
            return false;
        }

        self.reset_session();
        self.state.book_path = Some(path.to_path_buf());
        self.book = Book::from_snapshot(path, &snapshot.meta);
        self.emit(ReaderEvent::BookLoaded {
            title: self.book.title.clone(),
            chapters: self.book.len(),
        });
        self.render_toc();
        self.push_title();

        let sections = run
            .clone()
            .filter_map(|idx| {
                snapshot.chapters.get(&idx).map(|html| Section {
                    idx,
                    html: html.clone(),
                })
            })
            .collect();
        self.viewport.attach(Placement::Bottom, sections);
        self.state.head_idx = run.start;
        self.state.next_idx = run.end;
        self.state.hydrated_from_cache = true;

        let (target, point) = if run.contains(&record.chapter_idx) {
            (record.chapter_idx, record.restore_point())
        } else {
            (run.start, RestorePoint::chapter_start())
        };
        self.restore_position(target, point);
        self.request_track();
        true
    }

    fn finish_refresh(&mut self, path: &Path, result: Result<Book, DecodeError>) -> LoadOutcome {
        if self.state.book_path.as_deref() != Some(path) {
            debug!(?path, "dropping stale refresh");
            return LoadOutcome::Stale;
        }
        let book = match result {
            Ok(book) => book,
            Err(err) => {
                warn!(%err, ?path, "background decode failed");
                return LoadOutcome::Failed;
            }
        };
        if !self.state.hydrated_from_cache {
            self.on_book_loaded(book, path, None);
            return LoadOutcome::Loaded;
        }

        self.book = with_path(book, path);
        self.emit(ReaderEvent::BookLoaded {
            title: self.book.title.clone(),
            chapters: self.book.len(),
        });
        self.save_snapshot_meta();
        self.render_toc();
        self.push_title();
        info!(?path, chapters = self.book.len(), "refreshed from full decode");
        LoadOutcome::Refreshed
    }

    fn finish_restore(
        &mut self,
        path: &Path,
        record: &ProgressRecord,
        result: Result<Book, DecodeError>,
    ) -> LoadOutcome {
        if self.state.book_path.as_deref() != Some(path) {
            debug!(?path, "dropping stale restore");
            return LoadOutcome::Stale;
        }
        match result {
            Ok(book) => {
                self.on_book_loaded(
                    book,
                    path,
                    Some((record.chapter_idx, record.restore_point())),
                );
                LoadOutcome::Loaded
            }
            Err(err) => {
                warn!(%err, ?path, "failed to restore last book, forgetting it");
                if let Err(err) = self.progress.clear() {
                    warn!(%err, "failed to clear progress");
                }
                self.state.book_path = None;
                self.show_status(format!("Failed to decode: {err}"));
                LoadOutcome::Failed
            }
        }
    }

    fn finish_open(&mut self, path: &Path, result: Result<Book, DecodeError>) -> LoadOutcome {
        match result {
            Ok(book) => {
                self.flush();
                if let Err(err) = self.progress.put(&ProgressPatch::reset(path)) {
                    warn!(%err, "failed to remember book");
                }
                self.on_book_loaded(book, path, None);
                self.show_status("Loaded");
                LoadOutcome::Loaded
            }
            Err(err) => {
                warn!(%err, ?path, "failed to open book");
                self.show_status(format!("Failed to decode: {err}"));
                LoadOutcome::Failed
            }
        }
    }

    /// Replaces the book and the view with a freshly decoded one.
    pub(crate) fn on_book_loaded(
        &mut self,
        book: Book,
        path: &Path,
        restore: Option<(usize, RestorePoint)>,
    ) {
        self.reset_session();
        self.state.book_path = Some(path.to_path_buf());
        self.book = with_path(book, path);
        self.emit(ReaderEvent::BookLoaded {
            title: self.book.title.clone(),
            chapters: self.book.len(),
        });
        self.save_snapshot_meta();
        self.render_toc();
        self.push_title();

        if self.book.is_empty() {
            info!(?path, "book has no chapters");
            self.emit(ReaderEvent::EmptyBook);
            return;
        }
        let (idx, point) = restore.unwrap_or((0, RestorePoint::chapter_start()));
        self.start_from(idx, point);
    }

    fn save_snapshot_meta(&self) {
        if !self.book.is_authoritative() || self.book.is_empty() {
            return;
        }
        let Some(path) = self.state.book_path.as_deref() else {
            return;
        };
        let meta = SnapshotMeta {
            key: book_key(path, self.book.signature.as_deref()),
            path: path.to_path_buf(),
            signature: self.book.signature.clone(),
            title: self.book.title.clone(),
            chapters: self.book.chapters_meta(),
            ts: now_millis(),
        };
        if let Err(err) = self.snapshots.put_meta(&meta) {
            warn!(%err, ?path, "failed to save snapshot metadata");
        }
    }
}

fn with_path(mut book: Book, path: &Path) -> Book {
    if book.path.is_none() {
        book.path = Some(path.to_path_buf());
    }
    book
}
