use tracing::debug;

use crate::controller::{FrameTask, ReaderController};
use crate::viewport::Viewport;

/// Where inside a chapter to land. A non-zero `offset` wins; otherwise the
/// ratio is applied to the chapter's current height.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RestorePoint {
    pub offset: f32,
    pub offset_ratio: f32,
}

impl RestorePoint {
    pub fn chapter_start() -> Self {
        Self::default()
    }

    pub fn at(offset: f32) -> Self {
        Self {
            offset,
            offset_ratio: 0.0,
        }
    }

    pub fn is_chapter_start(&self) -> bool {
        self.offset <= 0.0 && self.offset_ratio <= 0.0
    }

    pub fn resolve(&self, section_height: f32) -> f32 {
        if self.offset > 0.0 {
            self.offset
        } else {
            (self.offset_ratio * section_height).round()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveRestore {
    pub idx: usize,
    pub point: RestorePoint,
    pub generation: u64,
}

impl<V: Viewport> ReaderController<V> {
    /// Scrolls to `point` inside chapter `idx` and keeps re-applying it while
    /// late layout settles. Returns false when the chapter is not attached.
    pub fn restore_position(&mut self, idx: usize, point: RestorePoint) -> bool {
        if self.viewport.measure(idx).is_none() {
            return false;
        }
        self.fill_below(idx, point);
        self.restore_generation += 1;
        let generation = self.restore_generation;
        self.state.restore = Some(ActiveRestore {
            idx,
            point,
            generation,
        });

        if let Some(target) = self.restore_target() {
            self.viewport.set_scroll_top(target);
        }
        self.frames.push(FrameTask::Recenter {
            generation,
            remaining: 2,
        });
        self.timers
            .restore_settle
            .arm(self.clock.now(), self.config.restore_settle);
        debug!(idx, ?point, "restoring position");
        true
    }

    pub fn on_fonts_ready(&mut self) {
        if self.state.is_restoring() {
            self.recenter();
        }
    }

    /// A section changed size (late images, fonts, reflow).
    pub fn on_layout_shift(&mut self) {
        if self.state.is_restoring() {
            self.recenter();
        }
        self.request_track();
    }

    pub(crate) fn run_recenter(&mut self, generation: u64, remaining: u8) {
        let current = self.state.restore.map(|restore| restore.generation);
        if current != Some(generation) {
            return;
        }
        self.recenter();
        if remaining > 1 {
            self.frames.push(FrameTask::Recenter {
                generation,
                remaining: remaining - 1,
            });
        }
    }

    pub(crate) fn release_restore(&mut self) {
        self.timers.restore_settle.cancel();
        if self.state.restore.take().is_some() {
            debug!("restore settled");
            self.request_track();
        }
    }

    fn restore_target(&self) -> Option<f32> {
        let restore = self.state.restore?;
        let rect = self.viewport.measure(restore.idx)?;
        let top = rect.top + self.viewport.scroll_top();
        Some(top + restore.point.resolve(rect.height))
    }

    fn recenter(&mut self) {
        let Some(target) = self.restore_target() else {
            return;
        };
        let delta = target - self.viewport.scroll_top();
        if delta.abs() > self.config.correction_tolerance {
            self.viewport.scroll_by(delta);
        }
    }
}
