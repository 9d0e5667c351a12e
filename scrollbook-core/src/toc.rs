use crate::book::ChapterMeta;

/// Table-of-contents list: entries, the highlighted (active) entry, the
/// keyboard selection and the scroll offset of the visible rows.
#[derive(Debug, Clone, Default)]
pub struct TocState {
    entries: Vec<ChapterMeta>,
    highlighted: Option<usize>,
    selected: usize,
    scroll_offset: usize,
    visible_rows: usize,
}

impl TocState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the entries. A stored list offset is applied as-is, which
    /// mirrors restoring the list's own scroll position.
    pub fn render(&mut self, entries: Vec<ChapterMeta>, scroll_offset: Option<usize>) {
        self.entries = entries;
        if self.highlighted.is_some_and(|idx| idx >= self.entries.len()) {
            self.highlighted = None;
        }
        self.selected = self
            .highlighted
            .unwrap_or(0)
            .min(self.entries.len().saturating_sub(1));
        if let Some(offset) = scroll_offset {
            self.scroll_offset = offset;
        }
        self.scroll_offset = self.scroll_offset.min(self.max_offset());
    }

    pub fn clear(&mut self) {
        *self = Self {
            visible_rows: self.visible_rows,
            ..Self::default()
        };
    }

    pub fn entries(&self) -> &[ChapterMeta] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn highlighted(&self) -> Option<usize> {
        self.highlighted
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn scroll_offset(&self) -> usize {
        self.scroll_offset
    }

    pub fn visible_rows(&self) -> usize {
        self.visible_rows
    }

    pub fn set_visible_rows(&mut self, rows: usize) {
        self.visible_rows = rows;
        self.scroll_offset = self.scroll_offset.min(self.max_offset());
    }

    /// Highlights `idx`. The list only scrolls when `allow_scroll` is set and
    /// the entry lies outside the visible rows. Returns whether it scrolled.
    pub fn mark_active(&mut self, idx: usize, allow_scroll: bool) -> bool {
        if idx >= self.entries.len() {
            return false;
        }
        self.highlighted = Some(idx);
        self.selected = idx;
        if !allow_scroll || self.is_visible(idx) {
            return false;
        }
        self.bring_into_view(idx);
        true
    }

    pub fn is_visible(&self, idx: usize) -> bool {
        idx >= self.scroll_offset && idx < self.scroll_offset + self.visible_rows.max(1)
    }

    pub fn move_selection(&mut self, delta: isize) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let len = self.entries.len() as isize;
        let next = (self.selected as isize + delta).clamp(0, len - 1) as usize;
        if next == self.selected {
            return false;
        }
        self.selected = next;
        if !self.is_visible(next) {
            self.bring_into_view(next);
        }
        true
    }

    pub fn scroll_by(&mut self, delta: isize) -> usize {
        let next = (self.scroll_offset as isize + delta).max(0) as usize;
        self.scroll_offset = next.min(self.max_offset());
        self.scroll_offset
    }

    fn bring_into_view(&mut self, idx: usize) {
        let rows = self.visible_rows.max(1);
        if idx < self.scroll_offset {
            self.scroll_offset = idx;
        } else if idx >= self.scroll_offset + rows {
            self.scroll_offset = idx + 1 - rows;
        }
        self.scroll_offset = self.scroll_offset.min(self.max_offset());
    }

    fn max_offset(&self) -> usize {
        self.entries.len().saturating_sub(self.visible_rows.max(1))
    }
}
