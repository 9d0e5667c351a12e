/// Vertical bounds of an attached section, relative to the top of the
/// visible area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub top: f32,
    pub height: f32,
}

impl Rect {
    pub fn bottom(&self) -> f32 {
        self.top + self.height
    }
}

/// Rendered markup of one chapter, tagged with its index in the book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub idx: usize,
    pub html: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Before the first attached section.
    Top,
    /// After the last attached section.
    Bottom,
}

/// Display surface the reader lays chapters into. Positions are in layout
/// units (pixels for a graphical host, rows for a terminal).
pub trait Viewport {
    /// Inserts `sections` in order as one structural mutation.
    fn attach(&mut self, placement: Placement, sections: Vec<Section>);

    /// Detaches everything and resets the scroll offset.
    fn clear(&mut self);

    /// `None` when `idx` is not attached.
    fn measure(&self, idx: usize) -> Option<Rect>;

    /// Attached chapter indices from top to bottom.
    fn attached(&self) -> Vec<usize>;

    fn scroll_top(&self) -> f32;

    /// Implementations clamp to `[0, scroll_height - client_height]`.
    fn set_scroll_top(&mut self, value: f32);

    fn scroll_by(&mut self, delta: f32) {
        let next = self.scroll_top() + delta;
        self.set_scroll_top(next);
    }

    fn scroll_height(&self) -> f32;

    fn client_height(&self) -> f32;

    /// Distance from the top of the content to the top of section `idx`.
    fn section_top(&self, idx: usize) -> Option<f32> {
        self.measure(idx).map(|rect| rect.top + self.scroll_top())
    }
}
