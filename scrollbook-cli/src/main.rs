use std::fs;
use std::io::{self, Stdout};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossterm::cursor;
use crossterm::event::{self, DisableMouseCapture, EnableMouseCapture};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use directories::{BaseDirs, ProjectDirs};
use scrollbook_core::{
    Book, DecodeError, DecodeRequest, FileProgressStore, FileSnapshotStore, ReaderConfig,
    ReaderController, ReaderEvent, SystemClock, Viewport,
};
use scrollbook_epub::decode_file;
use scrollbook_tty::{
    row_config, DrawParams, EventMapper, InputMode, TerminalRenderer, TextViewport, UiEvent,
};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

const FRAME: Duration = Duration::from_millis(16);

type Reader = ReaderController<TextViewport>;
type DecodeResult = (DecodeRequest, Result<Book, DecodeError>);

#[derive(Debug, Parser)]
#[command(
    name = "scrollbook",
    version,
    about = "Continuous-scroll EPUB reader for the terminal"
)]
struct Args {
    /// EPUB file to open. Without it the last book is resumed
    file: Option<PathBuf>,

    /// Config file to use instead of the platform default
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,
}

struct TerminalGuard;

impl TerminalGuard {
    fn new(stdout: &mut Stdout) -> Result<Self> {
        terminal::enable_raw_mode()?;
        crossterm::execute!(stdout, EnterAlternateScreen, EnableMouseCapture, cursor::Hide)?;
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, DisableMouseCapture, LeaveAlternateScreen, cursor::Show);
        let _ = terminal::disable_raw_mode();
    }
}

enum LoopAction {
    Continue,
    ContinueRedraw,
    Quit,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "scrollbook", "scrollbook")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| project_dirs.config_dir().join("config.toml"));
    let config = ReaderConfig::load(&config_path)?;
    info!(?config_path, "configuration loaded");

    let data_dir = project_dirs.data_local_dir();
    let progress = FileProgressStore::new(data_dir.join("progress"))?;
    let snapshots = FileSnapshotStore::new(data_dir.join("snapshots"))?;

    let (columns, rows) = terminal::size().context("failed to query terminal size")?;
    let params = DrawParams::clamped(columns, rows);
    let viewport = TextViewport::new(params.columns, params.content_rows());
    let mut reader = ReaderController::new(
        viewport,
        row_config(&config),
        Arc::new(progress),
        Arc::new(snapshots),
        Arc::new(SystemClock),
    );
    reader.set_toc_rows(usize::from(params.content_rows()));

    let (tx, mut rx) = mpsc::unbounded_channel::<DecodeResult>();
    match args.file {
        Some(path) => {
            let request = reader.begin_open(canonical(path));
            spawn_decode(&tx, request);
        }
        None => {
            if let Some(request) = reader.begin_launch() {
                spawn_decode(&tx, request);
            }
        }
    }

    let mut stdout = io::stdout();
    let _terminal = TerminalGuard::new(&mut stdout)?;
    let mut renderer = TerminalRenderer::new(stdout);
    let mut mapper = EventMapper::new();
    let mut params = params;
    let mut dirty = true;
    // Glyph metrics are settled once a book has been drawn.
    let mut fonts_pending = true;

    renderer.set_title(reader.title())?;
    loop {
        while let Ok((request, result)) = rx.try_recv() {
            let outcome = reader.complete_decode(request, result);
            debug!(?outcome, "decode finished");
            dirty = true;
        }

        let scrolled_from = reader.viewport().scroll_top();
        reader.on_animation_frame();
        reader.tick();
        if reader.viewport().scroll_top() != scrolled_from {
            dirty = true;
        }
        for reader_event in reader.drain_events() {
            if let ReaderEvent::TitleChanged(title) = &reader_event {
                renderer.set_title(title)?;
            }
            if reader_event == ReaderEvent::EmptyBook {
                warn!("book has no readable chapters");
            }
            if matches!(reader_event, ReaderEvent::BookLoaded { .. }) {
                fonts_pending = true;
            }
            dirty = true;
        }

        if dirty {
            redraw(&mut renderer, &reader, &mapper, params)?;
            dirty = false;
            if fonts_pending {
                let drawn_at = reader.viewport().scroll_top();
                reader.on_fonts_ready();
                dirty = reader.viewport().scroll_top() != drawn_at;
                fonts_pending = false;
            }
        }

        if !event::poll(FRAME)? {
            continue;
        }
        let ui_event = mapper.map_event(event::read()?);
        if let UiEvent::Resize { columns, rows } = ui_event {
            params = DrawParams::clamped(columns, rows);
        }
        match handle_event(ui_event, &mut reader, &mut mapper, &tx, params) {
            LoopAction::ContinueRedraw => dirty = true,
            LoopAction::Continue => {}
            LoopAction::Quit => break,
        }
    }

    reader.flush();
    renderer.clear_all()?;
    Ok(())
}

fn handle_event(
    event: UiEvent,
    reader: &mut Reader,
    mapper: &mut EventMapper,
    tx: &UnboundedSender<DecodeResult>,
    params: DrawParams,
) -> LoopAction {
    match event {
        UiEvent::ScrollRows { rows } => reader.scroll_by(rows),
        UiEvent::ScrollPages { pages } => {
            let page = page_rows(reader.viewport().client_height());
            reader.scroll_by(pages * page);
        }
        UiEvent::FirstChapter => {
            if !reader.book().is_empty() {
                reader.jump_to(0);
            }
        }
        UiEvent::LastChapter => {
            if !reader.book().is_empty() {
                reader.jump_to(reader.book().len() - 1);
            }
        }
        UiEvent::OpenTableOfContents => {
            if reader.toc().is_empty() {
                reader.show_status("No contents");
            } else {
                mapper.set_mode(InputMode::Toc);
            }
        }
        UiEvent::CloseOverlay => mapper.set_mode(InputMode::Normal),
        UiEvent::TocMoveSelection { delta } => reader.toc_move_selection(delta),
        UiEvent::TocActivateSelection => {
            reader.toc_open_selected();
            mapper.set_mode(InputMode::Normal);
        }
        UiEvent::BeginOpen | UiEvent::OpenPathChanged { .. } => {}
        UiEvent::OpenSubmit { path } => {
            let request = reader.begin_open(canonical(expand_home(&path)));
            spawn_decode(tx, request);
        }
        UiEvent::OpenCancel => reader.cancel_open(),
        UiEvent::ClearCache => reader.clear_cache(),
        UiEvent::Resize { .. } => {
            reader
                .viewport_mut()
                .resize(params.columns, params.content_rows());
            reader.set_toc_rows(usize::from(params.content_rows()));
            reader.on_resize();
        }
        UiEvent::Quit => return LoopAction::Quit,
        UiEvent::None => return LoopAction::Continue,
    }
    LoopAction::ContinueRedraw
}

/// Runs the decode off the event loop and reports back through `tx`.
fn spawn_decode(tx: &UnboundedSender<DecodeResult>, request: DecodeRequest) {
    info!(path = ?request.path, purpose = ?request.purpose, "decoding");
    let tx = tx.clone();
    tokio::task::spawn_blocking(move || {
        let result = decode_file(&request.path);
        if tx.send((request, result)).is_err() {
            debug!("reader closed before decode finished");
        }
    });
}

fn redraw(
    renderer: &mut TerminalRenderer<Stdout>,
    reader: &Reader,
    mapper: &EventMapper,
    params: DrawParams,
) -> Result<()> {
    renderer.begin_sync_update()?;
    if mapper.mode() == InputMode::Toc {
        renderer.draw_toc(reader.toc(), params)?;
    } else {
        renderer.draw_page(&reader.viewport().visible_lines(), params)?;
    }
    let left = mapper
        .pending_input()
        .or_else(|| reader.status().map(str::to_string))
        .unwrap_or_else(|| reader.title().to_string());
    renderer.draw_status(&left, &position_label(reader), params)?;
    renderer.end_sync_update()?;
    Ok(())
}

fn position_label(reader: &Reader) -> String {
    match reader.state().active_idx {
        Some(idx) if !reader.book().is_empty() => format!("{}/{}", idx + 1, reader.book().len()),
        _ => String::new(),
    }
}

/// Rows a page scroll moves: the visible height minus two rows of overlap.
fn page_rows(client_height: f32) -> f32 {
    (client_height - 2.0).max(1.0)
}

fn expand_home(raw: &str) -> PathBuf {
    let raw = raw.trim().trim_matches(['"', '\'']);
    match (raw.strip_prefix("~/"), BaseDirs::new()) {
        (Some(rest), Some(base)) => base.home_dir().join(rest),
        _ => PathBuf::from(raw),
    }
}

/// Progress is keyed by path, so the same file always maps to one key.
fn canonical(path: PathBuf) -> PathBuf {
    fs::canonicalize(&path).unwrap_or(path)
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "scrollbook.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
