use std::ops::Range;
use std::path::PathBuf;

use crate::restore::ActiveRestore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationWindow {
    pub pending_idx: usize,
}

/// Everything the controller knows about the live view. The attached
/// chapters are always `head_idx..next_idx`.
#[derive(Debug, Clone, Default)]
pub struct ReaderViewState {
    pub head_idx: usize,
    pub next_idx: usize,
    pub active_idx: Option<usize>,
    /// A structural window mutation is running.
    pub mutation_in_flight: bool,
    /// A batch prepend is waiting for its late correction pass.
    pub batch_in_flight: bool,
    /// Held from a one-shot programmatic scroll until the next frame.
    pub programmatic_scroll: bool,
    pub restore: Option<ActiveRestore>,
    pub navigation: Option<NavigationWindow>,
    pub user_has_scrolled: bool,
    pub hydrated_from_cache: bool,
    pub book_path: Option<PathBuf>,
}

impl ReaderViewState {
    pub fn window(&self) -> Range<usize> {
        self.head_idx..self.next_idx
    }

    pub fn is_empty(&self) -> bool {
        self.head_idx == self.next_idx
    }

    pub fn is_restoring(&self) -> bool {
        self.restore.is_some()
    }

    pub fn is_navigating(&self) -> bool {
        self.navigation.is_some()
    }

    /// Scroll events observed while this holds were caused by the reader.
    pub fn is_programmatic_scroll(&self) -> bool {
        self.programmatic_scroll || self.batch_in_flight || self.is_restoring()
    }

    pub fn reset_window(&mut self, idx: usize) {
        self.head_idx = idx;
        self.next_idx = idx;
        self.mutation_in_flight = false;
        self.batch_in_flight = false;
        self.user_has_scrolled = false;
    }
}
