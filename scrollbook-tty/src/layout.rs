use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use scrollbook_core::{Placement, ReaderConfig, Rect, Section, Viewport};
use tracing::debug;

static HIDDEN_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<head\b[^>]*>.*?</head>|<style\b[^>]*>.*?</style>|<!--.*?-->")
        .expect("valid hidden block pattern")
});

static SVG_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<svg\b.*?</svg>").expect("valid svg pattern"));

static TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[^>]*>|[^<]+").expect("valid token pattern"));

static TAG_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^</?\s*([A-Za-z0-9:]+)").expect("valid tag name pattern"));

static ENTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(#[xX][0-9a-fA-F]+|#[0-9]+|[A-Za-z]+);").expect("valid entity pattern")
});

const MARKER_CLASS: &str = "chapter-marker";
pub const IMAGE_PLACEHOLDER: &str = "[image]";

/// Approximate pixel height of one terminal row.
pub const ROW_PIXELS: f32 = 20.0;

/// Converts the pixel-based thresholds of `config` to terminal rows.
pub fn row_config(config: &ReaderConfig) -> ReaderConfig {
    let rows = |pixels: f32| (pixels / ROW_PIXELS).max(1.0);
    ReaderConfig {
        top_band: rows(config.top_band),
        top_up_slack: rows(config.top_up_slack),
        near_bottom_min: rows(config.near_bottom_min),
        near_top: rows(config.near_top),
        user_scroll_threshold: rows(config.user_scroll_threshold),
        navigation_release_scroll: rows(config.navigation_release_scroll),
        correction_tolerance: (config.correction_tolerance / ROW_PIXELS).max(0.5),
        ..config.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Marker,
    Heading,
    Text,
    Blank,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub kind: LineKind,
    pub text: String,
}

impl Line {
    fn blank() -> Self {
        Self {
            kind: LineKind::Blank,
            text: String::new(),
        }
    }
}

fn is_block(name: &str) -> bool {
    matches!(
        name,
        "p" | "div"
            | "section"
            | "article"
            | "body"
            | "blockquote"
            | "li"
            | "ul"
            | "ol"
            | "dl"
            | "dt"
            | "dd"
            | "pre"
            | "table"
            | "tr"
            | "figure"
            | "figcaption"
            | "hr"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
    )
}

fn is_heading(name: &str) -> bool {
    matches!(name, "h1" | "h2" | "h3" | "h4" | "h5" | "h6")
}

fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &Captures| {
            let body = &caps[1];
            let decoded = if let Some(hex) = body.strip_prefix("#x").or(body.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = body.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match body {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some(' '),
                    "mdash" => Some('\u{2014}'),
                    "ndash" => Some('\u{2013}'),
                    "hellip" => Some('\u{2026}'),
                    _ => None,
                }
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

/// Wraps to `width` terminal columns. Runs without spaces (CJK) break
/// between characters and overlong words are split.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        return Vec::new();
    }
    textwrap::wrap(&text, width.max(1))
        .into_iter()
        .map(|line| line.into_owned())
        .collect()
}

struct Blocks {
    blocks: Vec<(LineKind, String)>,
    current: String,
    kind: LineKind,
}

impl Blocks {
    fn flush(&mut self) {
        let text = std::mem::take(&mut self.current);
        if !text.trim().is_empty() {
            self.blocks.push((self.kind, text));
        }
    }
}

/// Lays out section markup as terminal lines `width` columns wide.
pub fn layout_html(html: &str, width: usize) -> Vec<Line> {
    let html = HIDDEN_BLOCK.replace_all(html, "");
    let html = SVG_BLOCK.replace_all(&html, "<img>");

    let mut blocks = Blocks {
        blocks: Vec::new(),
        current: String::new(),
        kind: LineKind::Text,
    };
    for token in TOKEN.find_iter(&html).map(|m| m.as_str()) {
        if !token.starts_with('<') {
            blocks.current.push_str(&decode_entities(token));
            continue;
        }
        let closing = token.starts_with("</");
        let name = TAG_NAME
            .captures(token)
            .map(|caps| caps[1].to_ascii_lowercase())
            .unwrap_or_default();

        if !closing && name == "div" && token.contains(MARKER_CLASS) {
            blocks.flush();
            blocks.kind = LineKind::Marker;
        } else if name == "img" || name == "image" {
            blocks.current.push(' ');
            blocks.current.push_str(IMAGE_PLACEHOLDER);
            blocks.current.push(' ');
        } else if name == "br" {
            blocks.flush();
        } else if is_block(&name) {
            blocks.flush();
            blocks.kind = if !closing && is_heading(&name) {
                LineKind::Heading
            } else {
                LineKind::Text
            };
        }
    }
    blocks.flush();

    let mut lines = Vec::new();
    for (kind, text) in blocks.blocks {
        match kind {
            LineKind::Marker => {
                let title = text.split_whitespace().collect::<Vec<_>>().join(" ");
                lines.push(Line {
                    kind,
                    text: format!("\u{2500}\u{2500} {title}"),
                });
                lines.push(Line::blank());
            }
            _ => {
                lines.extend(wrap(&text, width).into_iter().map(|text| Line { kind, text }));
                lines.push(Line::blank());
            }
        }
    }
    if lines.is_empty() {
        lines.push(Line::blank());
    }
    lines
}

#[derive(Debug)]
struct LaidOut {
    idx: usize,
    html: String,
    lines: Vec<Line>,
}

/// Terminal surface for the reader: attached sections laid out as wrapped
/// lines, one row per layout unit.
#[derive(Debug)]
pub struct TextViewport {
    columns: usize,
    rows: usize,
    sections: Vec<LaidOut>,
    scroll: f32,
}

impl TextViewport {
    pub fn new(columns: u16, rows: u16) -> Self {
        Self {
            columns: usize::from(columns.max(1)),
            rows: usize::from(rows.max(1)),
            sections: Vec::new(),
            scroll: 0.0,
        }
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Re-wraps every attached section. The caller reports the layout shift
    /// to the controller afterwards.
    pub fn resize(&mut self, columns: u16, rows: u16) {
        let columns = usize::from(columns.max(1));
        self.rows = usize::from(rows.max(1));
        if columns != self.columns {
            debug!(columns, sections = self.sections.len(), "re-wrapping sections");
            self.columns = columns;
            for section in &mut self.sections {
                section.lines = layout_html(&section.html, columns);
            }
        }
        self.set_scroll_top(self.scroll);
    }

    /// Lines currently on screen, top to bottom.
    pub fn visible_lines(&self) -> Vec<&Line> {
        let first = self.scroll.floor().max(0.0) as usize;
        self.sections
            .iter()
            .flat_map(|section| section.lines.iter())
            .skip(first)
            .take(self.rows)
            .collect()
    }

    fn total_lines(&self) -> usize {
        self.sections.iter().map(|section| section.lines.len()).sum()
    }

    fn lay_out(&self, sections: Vec<Section>) -> Vec<LaidOut> {
        sections
            .into_iter()
            .map(|section| LaidOut {
                idx: section.idx,
                lines: layout_html(&section.html, self.columns),
                html: section.html,
            })
            .collect()
    }
}

impl Viewport for TextViewport {
    fn attach(&mut self, placement: Placement, sections: Vec<Section>) {
        let laid_out = self.lay_out(sections);
        match placement {
            Placement::Bottom => self.sections.extend(laid_out),
            Placement::Top => {
                let below = std::mem::replace(&mut self.sections, laid_out);
                self.sections.extend(below);
            }
        }
    }

    fn clear(&mut self) {
        self.sections.clear();
        self.scroll = 0.0;
    }

    fn measure(&self, idx: usize) -> Option<Rect> {
        let mut offset = 0usize;
        for section in &self.sections {
            if section.idx == idx {
                return Some(Rect {
                    top: offset as f32 - self.scroll,
                    height: section.lines.len() as f32,
                });
            }
            offset += section.lines.len();
        }
        None
    }

    fn attached(&self) -> Vec<usize> {
        self.sections.iter().map(|section| section.idx).collect()
    }

    fn scroll_top(&self) -> f32 {
        self.scroll
    }

    fn set_scroll_top(&mut self, value: f32) {
        let max = (self.scroll_height() - self.client_height()).max(0.0);
        self.scroll = value.clamp(0.0, max).round();
    }

    fn scroll_height(&self) -> f32 {
        self.total_lines() as f32
    }

    fn client_height(&self) -> f32 {
        self.rows as f32
    }
}
