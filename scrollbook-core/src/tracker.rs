use crate::viewport::Rect;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerParams {
    /// Fraction of the viewport height where the reference line sits.
    pub reference_ratio: f32,
    /// Sections shorter than this fraction of the viewport count as short.
    pub short_chapter_ratio: f32,
    /// Band below the viewport top in which a short section wins outright.
    pub top_band: f32,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            reference_ratio: 0.5,
            short_chapter_ratio: 0.5,
            top_band: 80.0,
        }
    }
}

/// Picks the chapter that should be active for the given section bounds,
/// listed top to bottom. The short-chapter rule is evaluated before the
/// reference-line rule; `None` means keep the current active chapter.
pub fn pick_candidate(
    sections: &[(usize, Rect)],
    viewport_height: f32,
    params: &TrackerParams,
) -> Option<usize> {
    let short_limit = viewport_height * params.short_chapter_ratio;
    let short_near_top = sections.iter().find(|(_, rect)| {
        rect.height < short_limit && rect.top <= params.top_band && rect.bottom() > 0.0
    });
    if let Some((idx, _)) = short_near_top {
        return Some(*idx);
    }

    let reference = viewport_height * params.reference_ratio;
    sections
        .iter()
        .find(|(_, rect)| rect.top <= reference && rect.bottom() >= reference)
        .map(|(idx, _)| *idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(top: f32, height: f32) -> Rect {
        Rect { top, height }
    }

    #[test]
    fn reference_line_picks_the_straddling_section() {
        let sections = [(3, rect(-900.0, 1000.0)), (4, rect(100.0, 1000.0))];
        assert_eq!(pick_candidate(&sections, 600.0, &TrackerParams::default()), Some(4));
    }

    #[test]
    fn short_section_near_top_wins_over_reference_line() {
        let sections = [(0, rect(40.0, 120.0)), (1, rect(160.0, 1000.0))];
        assert_eq!(pick_candidate(&sections, 600.0, &TrackerParams::default()), Some(0));
    }

    #[test]
    fn short_section_scrolled_past_the_top_is_ignored() {
        let sections = [(0, rect(-200.0, 120.0)), (1, rect(-80.0, 1000.0))];
        assert_eq!(pick_candidate(&sections, 600.0, &TrackerParams::default()), Some(1));
    }

    #[test]
    fn half_height_section_is_not_short() {
        let sections = [(0, rect(0.0, 300.0)), (1, rect(300.0, 1000.0))];
        assert_eq!(pick_candidate(&sections, 600.0, &TrackerParams::default()), Some(0));
        let sections = [(0, rect(-10.0, 300.0)), (1, rect(290.0, 1000.0))];
        assert_eq!(pick_candidate(&sections, 600.0, &TrackerParams::default()), Some(1));
    }

    #[test]
    fn no_match_keeps_previous() {
        assert_eq!(pick_candidate(&[], 600.0, &TrackerParams::default()), None);
        let sections = [(0, rect(400.0, 50.0))];
        assert_eq!(pick_candidate(&sections, 600.0, &TrackerParams::default()), None);
    }
}
