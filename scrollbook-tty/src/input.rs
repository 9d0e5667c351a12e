use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseEventKind};

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    ScrollRows { rows: f32 },
    ScrollPages { pages: f32 },
    FirstChapter,
    LastChapter,
    OpenTableOfContents,
    CloseOverlay,
    TocMoveSelection { delta: isize },
    TocActivateSelection,
    BeginOpen,
    OpenPathChanged { path: String },
    OpenSubmit { path: String },
    OpenCancel,
    ClearCache,
    Resize { columns: u16, rows: u16 },
    Quit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Normal,
    Toc,
    OpenPath,
}

#[derive(Debug, Default)]
pub struct EventMapper {
    pending_count: Option<usize>,
    pending_digits: String,
    mode: InputMode,
    path_buffer: String,
}

impl EventMapper {
    pub const WHEEL_ROWS: f32 = 3.0;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&mut self, mode: InputMode) {
        if self.mode != mode {
            self.reset_count();
            self.path_buffer.clear();
            self.mode = mode;
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Resize(columns, rows) => return UiEvent::Resize { columns, rows },
            Event::Key(KeyEvent {
                kind: KeyEventKind::Release,
                ..
            }) => return UiEvent::None,
            _ => {}
        }
        match self.mode {
            InputMode::Normal => self.map_event_normal(event),
            InputMode::Toc => self.map_event_toc(event),
            InputMode::OpenPath => self.map_event_open(event),
        }
    }

    fn map_event_normal(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(KeyEvent {
                code, modifiers, ..
            }) => match (code, modifiers) {
                (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() => {
                    if let Some(digit) = c.to_digit(10) {
                        self.push_digit(digit as usize);
                    }
                    UiEvent::None
                }
                (KeyCode::Char('o'), modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                    self.reset_count();
                    self.set_mode(InputMode::OpenPath);
                    UiEvent::BeginOpen
                }
                (KeyCode::Char('j'), KeyModifiers::NONE) | (KeyCode::Down, KeyModifiers::NONE) => {
                    let rows = self.take_count() as f32;
                    UiEvent::ScrollRows { rows }
                }
                (KeyCode::Char('k'), KeyModifiers::NONE) | (KeyCode::Up, KeyModifiers::NONE) => {
                    let rows = self.take_count() as f32;
                    UiEvent::ScrollRows { rows: -rows }
                }
                (KeyCode::Char(' '), KeyModifiers::NONE) | (KeyCode::PageDown, _) => {
                    let pages = self.take_count() as f32;
                    UiEvent::ScrollPages { pages }
                }
                (KeyCode::PageUp, _) => {
                    let pages = self.take_count() as f32;
                    UiEvent::ScrollPages { pages: -pages }
                }
                (KeyCode::Char('g'), KeyModifiers::NONE) | (KeyCode::Home, _) => {
                    self.reset_count();
                    UiEvent::FirstChapter
                }
                (KeyCode::Char('G'), _) | (KeyCode::End, _) => {
                    self.reset_count();
                    UiEvent::LastChapter
                }
                (KeyCode::Char('t'), _) | (KeyCode::Char('T'), _) => {
                    self.reset_count();
                    UiEvent::OpenTableOfContents
                }
                (KeyCode::Char('x'), KeyModifiers::NONE) => {
                    self.reset_count();
                    UiEvent::ClearCache
                }
                (KeyCode::Char('q'), _) => {
                    self.reset_count();
                    UiEvent::Quit
                }
                _ => {
                    self.reset_count();
                    UiEvent::None
                }
            },
            Event::Mouse(mouse) => match mouse.kind {
                MouseEventKind::ScrollDown => UiEvent::ScrollRows {
                    rows: Self::WHEEL_ROWS,
                },
                MouseEventKind::ScrollUp => UiEvent::ScrollRows {
                    rows: -Self::WHEEL_ROWS,
                },
                _ => UiEvent::None,
            },
            _ => UiEvent::None,
        }
    }

    fn map_event_toc(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(KeyEvent {
                code, modifiers, ..
            }) => match (code, modifiers) {
                (KeyCode::Esc, _) => UiEvent::CloseOverlay,
                (KeyCode::Char('t'), _) | (KeyCode::Char('T'), _) => UiEvent::CloseOverlay,
                (KeyCode::Enter, _) => UiEvent::TocActivateSelection,
                (KeyCode::Char('j'), KeyModifiers::NONE) | (KeyCode::Down, KeyModifiers::NONE) => {
                    UiEvent::TocMoveSelection { delta: 1 }
                }
                (KeyCode::Char('k'), KeyModifiers::NONE) | (KeyCode::Up, KeyModifiers::NONE) => {
                    UiEvent::TocMoveSelection { delta: -1 }
                }
                (KeyCode::Char('q'), _) => UiEvent::Quit,
                _ => UiEvent::None,
            },
            Event::Mouse(mouse) => match mouse.kind {
                MouseEventKind::ScrollDown => UiEvent::TocMoveSelection { delta: 1 },
                MouseEventKind::ScrollUp => UiEvent::TocMoveSelection { delta: -1 },
                _ => UiEvent::None,
            },
            _ => UiEvent::None,
        }
    }

    fn map_event_open(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(KeyEvent {
                code, modifiers, ..
            }) => match (code, modifiers) {
                (KeyCode::Esc, _) => {
                    self.set_mode(InputMode::Normal);
                    UiEvent::OpenCancel
                }
                (KeyCode::Enter, _) => {
                    let path = self.path_buffer.trim().to_string();
                    self.set_mode(InputMode::Normal);
                    if path.is_empty() {
                        UiEvent::OpenCancel
                    } else {
                        UiEvent::OpenSubmit { path }
                    }
                }
                (KeyCode::Backspace, _) => {
                    self.path_buffer.pop();
                    UiEvent::OpenPathChanged {
                        path: self.path_buffer.clone(),
                    }
                }
                (KeyCode::Char(c), mods) if mods.is_empty() || mods == KeyModifiers::SHIFT => {
                    self.path_buffer.push(c);
                    UiEvent::OpenPathChanged {
                        path: self.path_buffer.clone(),
                    }
                }
                _ => UiEvent::None,
            },
            Event::Paste(text) => {
                self.path_buffer.push_str(text.trim_end_matches(['\r', '\n']));
                UiEvent::OpenPathChanged {
                    path: self.path_buffer.clone(),
                }
            }
            _ => UiEvent::None,
        }
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_count.unwrap_or(0);
        let next = current.saturating_mul(10).saturating_add(digit);
        self.pending_count = Some(next);
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> usize {
        let count = self
            .pending_count
            .take()
            .filter(|&count| count > 0)
            .unwrap_or(1);
        self.pending_digits.clear();
        count
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }

    /// Text for the status line: the path prompt or the pending count.
    pub fn pending_input(&self) -> Option<String> {
        if matches!(self.mode, InputMode::OpenPath) {
            return Some(format!("open: {}", self.path_buffer));
        }
        if self.pending_digits.is_empty() {
            None
        } else {
            Some(self.pending_digits.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyEventState, MouseEvent};

    fn key_event(code: KeyCode) -> Event {
        key_event_with_modifiers(code, KeyModifiers::NONE)
    }

    fn key_event_with_modifiers(code: KeyCode, modifiers: KeyModifiers) -> Event {
        Event::Key(KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        })
    }

    fn wheel(kind: MouseEventKind) -> Event {
        Event::Mouse(MouseEvent {
            kind,
            column: 0,
            row: 0,
            modifiers: KeyModifiers::NONE,
        })
    }

    #[test]
    fn numeric_prefix_scales_row_scroll() {
        let mut mapper = EventMapper::new();
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('1'))), UiEvent::None);
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('2'))), UiEvent::None);
        assert_eq!(mapper.pending_input().as_deref(), Some("12"));

        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('j'))),
            UiEvent::ScrollRows { rows: 12.0 }
        );
        assert!(mapper.pending_input().is_none());
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Up)),
            UiEvent::ScrollRows { rows: -1.0 }
        );
    }

    #[test]
    fn page_keys_and_chapter_jumps() {
        let mut mapper = EventMapper::new();
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char(' '))),
            UiEvent::ScrollPages { pages: 1.0 }
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::PageUp)),
            UiEvent::ScrollPages { pages: -1.0 }
        );
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('g'))), UiEvent::FirstChapter);
        assert_eq!(
            mapper.map_event(key_event_with_modifiers(KeyCode::Char('G'), KeyModifiers::SHIFT)),
            UiEvent::LastChapter
        );
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('x'))), UiEvent::ClearCache);
    }

    #[test]
    fn mouse_wheel_scrolls_three_rows() {
        let mut mapper = EventMapper::new();
        assert_eq!(
            mapper.map_event(wheel(MouseEventKind::ScrollDown)),
            UiEvent::ScrollRows { rows: 3.0 }
        );
        assert_eq!(
            mapper.map_event(wheel(MouseEventKind::ScrollUp)),
            UiEvent::ScrollRows { rows: -3.0 }
        );
    }

    #[test]
    fn toc_mode_maps_navigation_keys() {
        let mut mapper = EventMapper::new();
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('t'))),
            UiEvent::OpenTableOfContents
        );
        mapper.set_mode(InputMode::Toc);

        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('j'))),
            UiEvent::TocMoveSelection { delta: 1 }
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('k'))),
            UiEvent::TocMoveSelection { delta: -1 }
        );
        assert_eq!(mapper.map_event(key_event(KeyCode::Enter)), UiEvent::TocActivateSelection);
        assert_eq!(mapper.map_event(key_event(KeyCode::Esc)), UiEvent::CloseOverlay);
    }

    #[test]
    fn ctrl_o_collects_a_path_until_enter() {
        let mut mapper = EventMapper::new();
        assert_eq!(
            mapper.map_event(key_event_with_modifiers(KeyCode::Char('o'), KeyModifiers::CONTROL)),
            UiEvent::BeginOpen
        );
        assert_eq!(mapper.mode(), InputMode::OpenPath);

        for c in "a.epubx".chars() {
            mapper.map_event(key_event(KeyCode::Char(c)));
        }
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Backspace)),
            UiEvent::OpenPathChanged {
                path: "a.epub".into()
            }
        );
        assert_eq!(mapper.pending_input().as_deref(), Some("open: a.epub"));

        assert_eq!(
            mapper.map_event(key_event(KeyCode::Enter)),
            UiEvent::OpenSubmit {
                path: "a.epub".into()
            }
        );
        assert_eq!(mapper.mode(), InputMode::Normal);
        assert!(mapper.pending_input().is_none());
    }

    #[test]
    fn escape_or_empty_path_cancels_open() {
        let mut mapper = EventMapper::new();
        mapper.set_mode(InputMode::OpenPath);
        mapper.map_event(key_event(KeyCode::Char('b')));
        assert_eq!(mapper.map_event(key_event(KeyCode::Esc)), UiEvent::OpenCancel);

        mapper.set_mode(InputMode::OpenPath);
        assert_eq!(mapper.map_event(key_event(KeyCode::Enter)), UiEvent::OpenCancel);
    }

    #[test]
    fn resize_is_reported_in_every_mode() {
        let mut mapper = EventMapper::new();
        mapper.set_mode(InputMode::Toc);
        assert_eq!(
            mapper.map_event(Event::Resize(80, 24)),
            UiEvent::Resize {
                columns: 80,
                rows: 24
            }
        );
    }
}
