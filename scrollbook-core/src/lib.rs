pub mod book;
pub mod config;
pub mod controller;
pub mod markup;
pub mod progress;
pub mod restore;
pub mod schedule;
pub mod snapshot;
pub mod startup;
pub mod state;
pub mod store;
pub mod toc;
pub mod tracker;
pub mod viewport;
mod window;

#[cfg(test)]
mod testing;

pub use book::{Book, BookOrigin, Chapter, ChapterMeta, DecodeError, DocumentSource};
pub use config::ReaderConfig;
pub use controller::{Anchor, ReaderController, ReaderEvent, FALLBACK_TITLE};
pub use progress::{
    FileProgressStore, MemoryProgressStore, ProgressPatch, ProgressRecord, ProgressStore,
};
pub use restore::RestorePoint;
pub use schedule::{Clock, ManualClock, SystemClock};
pub use snapshot::{
    book_key, BookKey, FileSnapshotStore, MemorySnapshotStore, Snapshot, SnapshotMeta,
    SnapshotStore,
};
pub use startup::{DecodePurpose, DecodeRequest, LoadOutcome};
pub use state::ReaderViewState;
pub use store::StoreError;
pub use toc::TocState;
pub use viewport::{Placement, Rect, Section, Viewport};
