use std::io::Write;

use anyhow::Result;
use crossterm::{
    cursor, queue,
    style::{Attribute, Print, SetAttribute},
    terminal::{Clear, ClearType, SetTitle},
};
use scrollbook_core::TocState;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::layout::{Line, LineKind};

/// Terminal geometry handed to the draw calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawParams {
    pub columns: u16,
    pub rows: u16,
}

impl DrawParams {
    pub fn clamped(columns: u16, rows: u16) -> Self {
        Self {
            columns: columns.max(1),
            rows: rows.max(2),
        }
    }

    /// Rows left for content once the status line is reserved.
    pub fn content_rows(&self) -> u16 {
        self.rows.saturating_sub(1).max(1)
    }
}

/// Longest prefix of `text` that fits in `columns` terminal cells.
fn truncate(text: &str, columns: usize) -> &str {
    let mut used = 0;
    for (at, ch) in text.char_indices() {
        let width = ch.width().unwrap_or(0);
        if used + width > columns {
            return &text[..at];
        }
        used += width;
    }
    text
}

pub struct TerminalRenderer<W: Write> {
    writer: W,
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn begin_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026h")?;
        Ok(())
    }

    /// Disables synchronized updates.
    /// The terminal will render all buffered changes at once.
    pub fn end_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026l")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn clear_all(&mut self) -> Result<()> {
        queue!(self.writer, Clear(ClearType::All), cursor::MoveTo(0, 0))?;
        Ok(())
    }

    pub fn set_title(&mut self, title: &str) -> Result<()> {
        queue!(self.writer, SetTitle(title))?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn draw_page(&mut self, lines: &[&Line], params: DrawParams) -> Result<()> {
        for row in 0..params.content_rows() {
            queue!(
                self.writer,
                cursor::MoveTo(0, row),
                Clear(ClearType::CurrentLine)
            )?;
            let Some(line) = lines.get(usize::from(row)) else {
                continue;
            };
            let text = truncate(&line.text, usize::from(params.columns));
            match line.kind {
                LineKind::Marker | LineKind::Heading => queue!(
                    self.writer,
                    SetAttribute(Attribute::Bold),
                    Print(text),
                    SetAttribute(Attribute::Reset)
                )?,
                LineKind::Text | LineKind::Blank => queue!(self.writer, Print(text))?,
            }
        }
        Ok(())
    }

    /// Chapter list with the selection in reverse video and the active
    /// chapter marked.
    pub fn draw_toc(&mut self, toc: &TocState, params: DrawParams) -> Result<()> {
        let start = toc.scroll_offset();
        for row in 0..params.content_rows() {
            queue!(
                self.writer,
                cursor::MoveTo(0, row),
                Clear(ClearType::CurrentLine)
            )?;
            let idx = start + usize::from(row);
            let Some(entry) = toc.entries().get(idx) else {
                continue;
            };
            let marker = if toc.highlighted() == Some(idx) { '>' } else { ' ' };
            let label = format!("{marker} {}", entry.label());
            let text = truncate(&label, usize::from(params.columns));
            if idx == toc.selected() {
                queue!(
                    self.writer,
                    SetAttribute(Attribute::Reverse),
                    Print(text),
                    SetAttribute(Attribute::Reset)
                )?;
            } else {
                queue!(self.writer, Print(text))?;
            }
        }
        Ok(())
    }

    pub fn draw_status(&mut self, left: &str, right: &str, params: DrawParams) -> Result<()> {
        let row = params.rows.saturating_sub(1);
        let width = usize::from(params.columns);
        let right = truncate(right, width);
        let left = truncate(left, width.saturating_sub(right.width() + 1));
        let gap = width.saturating_sub(left.width() + right.width());
        queue!(
            self.writer,
            cursor::MoveTo(0, row),
            Clear(ClearType::CurrentLine),
            SetAttribute(Attribute::Dim),
            Print(format!("{left}{}{right}", " ".repeat(gap))),
            SetAttribute(Attribute::Reset)
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrollbook_core::ChapterMeta;

    fn output<W: Write>(renderer: TerminalRenderer<W>) -> W {
        renderer.writer
    }

    fn line(kind: LineKind, text: &str) -> Line {
        Line {
            kind,
            text: text.to_string(),
        }
    }

    #[test]
    fn set_title_emits_osc_sequence() {
        let mut renderer = TerminalRenderer::new(Vec::new());
        renderer.set_title("Book - Chapter 2").unwrap();
        let written = String::from_utf8(output(renderer)).unwrap();
        assert!(written.starts_with("\u{1b}]0;"));
        assert!(written.contains("Book - Chapter 2"));
    }

    #[test]
    fn page_lines_are_truncated_to_width() {
        let mut renderer = TerminalRenderer::new(Vec::new());
        let lines = [line(LineKind::Marker, "Chapter"), line(LineKind::Text, "abcdefghij")];
        let refs: Vec<&Line> = lines.iter().collect();
        renderer
            .draw_page(&refs, DrawParams::clamped(6, 4))
            .unwrap();
        let written = String::from_utf8(output(renderer)).unwrap();
        assert!(written.contains("Chapte"));
        assert!(written.contains("abcdef"));
        assert!(!written.contains("abcdefg"));
    }

    #[test]
    fn wide_characters_are_cut_at_the_column_limit() {
        assert_eq!(truncate("\u{4e2d}\u{6587}\u{5b57}", 5), "\u{4e2d}\u{6587}");
        assert_eq!(truncate("ab", 5), "ab");

        let mut renderer = TerminalRenderer::new(Vec::new());
        renderer
            .draw_status("\u{4e66}\u{540d}\u{4e66}\u{540d}", "1/9", DrawParams::clamped(8, 4))
            .unwrap();
        let written = String::from_utf8(output(renderer)).unwrap();
        assert!(written.contains("\u{4e66}\u{540d} 1/9"));
        assert!(!written.contains("\u{4e66}\u{540d}\u{4e66}"));
    }

    #[test]
    fn toc_marks_active_entry() {
        let mut toc = TocState::new();
        toc.set_visible_rows(4);
        toc.render(
            (0..3)
                .map(|i| ChapterMeta {
                    id: format!("c{i}"),
                    href: format!("c{i}.xhtml"),
                    title: format!("Part {i}"),
                })
                .collect(),
            None,
        );
        toc.mark_active(1, true);

        let mut renderer = TerminalRenderer::new(Vec::new());
        renderer.draw_toc(&toc, DrawParams::clamped(20, 5)).unwrap();
        let written = String::from_utf8(output(renderer)).unwrap();
        assert!(written.contains("> Part 1"));
        assert!(written.contains("  Part 2"));
    }
}
