use tracing::{debug, warn};

use crate::controller::{Anchor, FrameTask, ReaderController};
use crate::markup::render_section;
use crate::restore::RestorePoint;
use crate::snapshot::book_key;
use crate::state::NavigationWindow;
use crate::viewport::{Placement, Section, Viewport};

impl<V: Viewport> ReaderController<V> {
    /// Resets the window to chapter `idx` alone, topping it up with the next
    /// chapter when the view is not yet filled.
    pub fn start_from(&mut self, idx: usize, point: RestorePoint) {
        if self.book.is_empty() {
            return;
        }
        let idx = idx.min(self.book.len() - 1);

        self.frames.clear();
        self.tracker_requested = false;
        self.deferred_jump = None;
        self.state.restore = None;
        self.timers.restore_settle.cancel();
        self.viewport.clear();
        self.state.reset_window(idx);
        self.state.active_idx = None;
        self.scroll_programmatically(0.0);

        self.append_next();
        if self.viewport.scroll_height()
            <= self.viewport.client_height() + self.config.top_up_slack
        {
            self.append_next();
        }
        if !point.is_chapter_start() {
            self.restore_position(idx, point);
        }
        debug!(idx, head = self.state.head_idx, next = self.state.next_idx, "started window");
        self.request_track();
    }

    /// Attaches chapter `next_idx` below the window.
    pub fn append_next(&mut self) -> bool {
        if self.state.mutation_in_flight || self.state.next_idx >= self.book.len() {
            return false;
        }
        let idx = self.state.next_idx;
        let Some(html) = self.section_markup(idx) else {
            return false;
        };

        self.state.mutation_in_flight = true;
        self.viewport.attach(
            Placement::Bottom,
            vec![Section {
                idx,
                html: html.clone(),
            }],
        );
        self.state.next_idx = idx + 1;
        if idx == 0 {
            self.scroll_programmatically(0.0);
        }
        self.state.mutation_in_flight = false;

        debug!(idx, next = self.state.next_idx, "appended chapter");
        self.persist_section(idx, &html);
        true
    }

    /// Appends chapters until `point` inside `idx` is a reachable scroll
    /// offset. An offset in the last screen of a chapter otherwise clamps to
    /// the bottom of the window.
    pub(crate) fn fill_below(&mut self, idx: usize, point: RestorePoint) {
        while self.state.next_idx < self.book.len() {
            let Some(top) = self.viewport.section_top(idx) else {
                return;
            };
            let Some(rect) = self.viewport.measure(idx) else {
                return;
            };
            let max_top = self.viewport.scroll_height() - self.viewport.client_height();
            if top + point.resolve(rect.height) <= max_top || !self.append_next() {
                return;
            }
        }
    }

    /// Attaches chapter `head_idx - 1` above the window and shifts the scroll
    /// offset by the inserted height so the visible content stays put.
    pub fn append_prev_keep_viewport(&mut self) -> bool {
        if self.state.mutation_in_flight || self.state.head_idx == 0 {
            return false;
        }
        let idx = self.state.head_idx - 1;
        let Some(html) = self.section_markup(idx) else {
            return false;
        };

        self.state.mutation_in_flight = true;
        let before = self.viewport.scroll_height();
        self.viewport.attach(
            Placement::Top,
            vec![Section {
                idx,
                html: html.clone(),
            }],
        );
        self.state.head_idx = idx;
        let delta = self.viewport.scroll_height() - before;
        self.scroll_programmatically_by(delta);
        self.state.mutation_in_flight = false;

        debug!(idx, head = self.state.head_idx, delta, "prepended chapter");
        self.persist_section(idx, &html);
        true
    }

    /// Prepends up to `count` chapters above the window in one mutation,
    /// keeping the anchor where it is on screen. A second correction runs on
    /// the next frame; until then the window stays locked. Returns how many
    /// chapters were attached.
    pub fn batch_prepend_up(&mut self, count: usize, anchor: Option<usize>) -> usize {
        let head = self.state.head_idx;
        if self.state.mutation_in_flight || head == 0 || count == 0 {
            return 0;
        }

        let mut sections = Vec::new();
        for idx in (head.saturating_sub(count)..head).rev() {
            match self.section_markup(idx) {
                Some(html) => sections.push(Section { idx, html }),
                None => break,
            }
        }
        let Some(first) = sections.last().map(|section| section.idx) else {
            return 0;
        };
        sections.reverse();

        let anchor = self.pick_anchor(anchor);
        let Some(before_top) = self.anchor_top(anchor) else {
            return 0;
        };

        self.state.mutation_in_flight = true;
        self.state.batch_in_flight = true;
        let persisted: Vec<(usize, String)> = sections
            .iter()
            .map(|section| (section.idx, section.html.clone()))
            .collect();
        self.viewport.attach(Placement::Top, sections);
        self.state.head_idx = first;
        self.correct_anchor(anchor, before_top, 0.0);

        self.batch_generation += 1;
        self.frames.push(FrameTask::BatchCorrection {
            generation: self.batch_generation,
            anchor,
            before_top,
        });

        debug!(head = first, ?anchor, "batch prepended chapters");
        for (idx, html) in &persisted {
            self.persist_section(*idx, html);
        }
        persisted.len()
    }

    /// Navigates to chapter `idx`, attaching whatever is missing between the
    /// window and the target.
    pub fn jump_to(&mut self, idx: usize) {
        if self.book.is_empty() {
            return;
        }
        let idx = idx.min(self.book.len() - 1);

        self.release_restore();
        self.close_navigation();
        if self.state.batch_in_flight && self.viewport.measure(idx).is_none() {
            debug!(idx, "jump waits for the batch correction");
            self.deferred_jump = Some(idx);
            return;
        }

        if self.state.is_empty() {
            self.start_from(idx, RestorePoint::chapter_start());
        } else if idx < self.state.head_idx {
            self.batch_prepend_up(self.state.head_idx - idx, Some(idx));
        } else {
            while self.state.next_idx <= idx {
                if !self.append_next() {
                    break;
                }
            }
        }

        let Some(top) = self.viewport.section_top(idx) else {
            debug!(idx, "jump target not attached");
            return;
        };
        self.state.navigation = Some(NavigationWindow { pending_idx: idx });
        self.timers
            .navigation
            .arm(self.clock.now(), self.config.navigation_window);
        self.toc.mark_active(idx, true);
        self.scroll_programmatically(top);
        if let Some(rect) = self.viewport.measure(idx) {
            self.rebase_batch_correction(idx, rect.top);
        }
        self.set_active(idx);
        self.request_track();
    }

    pub(crate) fn finish_batch(&mut self, generation: u64, anchor: Anchor, before_top: f32) {
        if generation != self.batch_generation {
            return;
        }
        self.correct_anchor(anchor, before_top, self.config.correction_tolerance);
        self.state.batch_in_flight = false;
        self.state.mutation_in_flight = false;
        if let Some(idx) = self.deferred_jump.take() {
            self.jump_to(idx);
        }
        self.request_track();
    }

    fn pick_anchor(&self, explicit: Option<usize>) -> Anchor {
        let attached_head = (!self.state.is_empty()).then_some(self.state.head_idx);
        [
            self.state.navigation.map(|navigation| navigation.pending_idx),
            explicit,
            self.state.active_idx,
            attached_head,
        ]
        .into_iter()
        .flatten()
        .find(|idx| self.viewport.measure(*idx).is_some())
        .map_or(Anchor::Container, Anchor::Section)
    }

    fn anchor_top(&self, anchor: Anchor) -> Option<f32> {
        match anchor {
            Anchor::Section(idx) => self.viewport.measure(idx).map(|rect| rect.top),
            Anchor::Container => Some(0.0),
        }
    }

    fn correct_anchor(&mut self, anchor: Anchor, before_top: f32, tolerance: f32) {
        let Some(after_top) = self.anchor_top(anchor) else {
            return;
        };
        let delta = after_top - before_top;
        if delta.abs() > tolerance {
            self.scroll_programmatically_by(delta);
        }
    }

    /// A jump landed on `idx` while a batch correction is pending: the late
    /// pass now holds the jump target in place.
    fn rebase_batch_correction(&mut self, idx: usize, top: f32) {
        for task in self.frames.iter_mut() {
            if let FrameTask::BatchCorrection {
                anchor, before_top, ..
            } = task
            {
                *anchor = Anchor::Section(idx);
                *before_top = top;
            }
        }
    }

    fn section_markup(&self, idx: usize) -> Option<String> {
        let chapter = self.book.chapter(idx)?;
        let body = self.book.body(idx)?;
        let title = self
            .book
            .chapter_title(idx)
            .unwrap_or(chapter.href.as_str());
        Some(render_section(title, body))
    }

    fn persist_section(&self, idx: usize, html: &str) {
        let Some(path) = self.state.book_path.as_deref() else {
            return;
        };
        let key = book_key(path, self.book.signature.as_deref());
        if let Err(err) = self.snapshots.put_chapter(key, idx, html) {
            warn!(%err, idx, "failed to cache chapter");
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::book::BookOrigin;
    use crate::markup::EMPTY_CHAPTER;
    use crate::restore::RestorePoint;
    use crate::testing::{assert_window_consistent, harness, sample_book, FakeViewport};
    use crate::viewport::Viewport;

    #[test]
    fn start_from_tops_up_a_short_first_chapter() {
        let mut h = harness(FakeViewport::new(600.0, 1000.0).with_height(0, 300.0));
        h.load(sample_book("/books/a.epub", 5), None);
        assert_eq!(h.reader.state().window(), 0..2);
        assert_window_consistent(&h.reader);
    }

    #[test]
    fn start_from_clamps_out_of_range_index() {
        let mut h = harness(FakeViewport::new(600.0, 1000.0));
        h.load(sample_book("/books/a.epub", 5), Some((42, RestorePoint::chapter_start())));
        assert_eq!(h.reader.state().window(), 4..5);
    }

    #[test]
    fn append_next_at_the_end_changes_nothing() {
        let mut h = harness(FakeViewport::new(600.0, 1000.0));
        h.load(sample_book("/books/a.epub", 2), Some((1, RestorePoint::chapter_start())));
        assert_eq!(h.reader.state().window(), 1..2);
        let attached = h.reader.viewport().attached();

        assert!(!h.reader.append_next());
        assert_eq!(h.reader.state().window(), 1..2);
        assert_eq!(h.reader.viewport().attached(), attached);
    }

    #[test]
    fn missing_chapter_body_is_a_silent_no_op() {
        let mut h = harness(FakeViewport::new(600.0, 1000.0));
        h.load(sample_book("/books/a.epub", 5), Some((2, RestorePoint::chapter_start())));
        h.reader.book.origin = BookOrigin::Snapshot;

        assert!(!h.reader.append_next());
        assert!(!h.reader.append_prev_keep_viewport());
        assert_eq!(h.reader.batch_prepend_up(2, None), 0);
        assert_eq!(h.reader.state().window(), 2..3);
        assert!(!h.reader.state().mutation_in_flight);
    }

    #[test]
    fn prepend_keeps_visible_content_still() {
        let mut h = harness(FakeViewport::new(600.0, 1000.0));
        h.load(sample_book("/books/a.epub", 5), Some((2, RestorePoint::chapter_start())));
        h.reader.viewport_mut().set_scroll_top(120.0);
        let before = h.reader.viewport().measure(2).unwrap().top;

        assert!(h.reader.append_prev_keep_viewport());
        assert_eq!(h.reader.state().window(), 1..3);
        assert_eq!(h.reader.viewport().measure(2).unwrap().top, before);
        assert!(h.reader.state().is_programmatic_scroll());
        assert_window_consistent(&h.reader);
    }

    #[test]
    fn batch_prepend_preserves_anchor_across_late_reflow() {
        for count in 1..=3 {
            let mut h = harness(FakeViewport::new(600.0, 1000.0));
            h.load(sample_book("/books/a.epub", 8), Some((4, RestorePoint::chapter_start())));
            h.reader.viewport_mut().set_scroll_top(250.0);
            let before = h.reader.viewport().measure(4).unwrap().top;

            let attached = h.reader.batch_prepend_up(count, Some(4));
            assert_eq!(attached, count);
            assert_eq!(h.reader.state().head_idx, 4 - count);
            assert!(!h.reader.append_next(), "window is locked until the late pass");

            h.reader.viewport_mut().set_height(4 - count, 1400.0);
            h.reader.on_animation_frame();

            let after = h.reader.viewport().measure(4).unwrap().top;
            assert!((after - before).abs() <= 2.0, "count {count}: {before} vs {after}");
            assert!(!h.reader.state().batch_in_flight);
            assert_window_consistent(&h.reader);
        }
    }

    #[test]
    fn restore_near_chapter_end_appends_until_reachable() {
        let mut h = harness(FakeViewport::new(600.0, 1000.0));
        h.load(sample_book("/books/a.epub", 5), Some((1, RestorePoint::at(700.0))));
        assert_eq!(h.reader.state().window(), 1..3);
        let top = h.reader.viewport().section_top(1).unwrap();
        assert_eq!(h.reader.viewport().scroll_top(), top + 700.0);
        assert_window_consistent(&h.reader);
    }

    #[test]
    fn jump_during_batch_correction_waits_for_the_late_pass() {
        let mut h = harness(FakeViewport::new(600.0, 1000.0));
        h.load(sample_book("/books/a.epub", 8), Some((4, RestorePoint::chapter_start())));
        h.frames(1);
        assert_eq!(h.reader.batch_prepend_up(1, Some(4)), 1);

        h.reader.jump_to(0);
        assert_eq!(h.reader.state().window(), 3..5);
        assert!(!h.reader.state().is_navigating());
        assert_eq!(h.reader.toc().highlighted(), Some(4));

        h.frames(1);
        assert_eq!(h.reader.state().head_idx, 0);
        assert_eq!(h.reader.state().active_idx, Some(0));
        assert_eq!(h.reader.toc().highlighted(), Some(0));
        assert_eq!(h.reader.viewport().scroll_top(), 0.0);

        h.frames(2);
        assert!(!h.reader.state().batch_in_flight);
        assert_window_consistent(&h.reader);
    }

    #[test]
    fn blank_chapter_is_attached_as_placeholder() {
        let mut h = harness(FakeViewport::new(600.0, 1000.0));
        let mut book = sample_book("/books/a.epub", 3);
        book.chapters[1].html.clear();
        h.load(book, None);
        assert!(h.reader.append_next());

        let html = h.reader.viewport().html(1).unwrap();
        assert!(html.contains(EMPTY_CHAPTER));
        assert!(html.contains("Chapter 2"));
    }
}
