mod input;
mod layout;
mod render;

pub use input::{EventMapper, InputMode, UiEvent};
pub use layout::{layout_html, row_config, Line, LineKind, TextViewport, IMAGE_PLACEHOLDER, ROW_PIXELS};
pub use render::{DrawParams, TerminalRenderer};
