mod app;
mod input;
mod ui;

use anyhow::{anyhow, Context, Result};
use app::{App, InputMode};
use clap::Parser;
use connview::config::ViewConfig;
use connview::constants::POLL_INTERVAL_MS;
use connview::source::{start_source, FeedSource, SourceEvent};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyModifiers, MouseEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "connview")]
#[command(about = "Live view of proxy connections and rules")]
struct Cli {
    #[arg(help = "JSON-lines feed to follow (reads from stdin if not provided)")]
    file: Option<PathBuf>,

    #[arg(short = 'l', long = "listen", help = "Listen on TCP port for a JSON-lines feed")]
    port: Option<u16>,

    #[arg(short = 'c', long = "config", help = "View configuration (JSON)")]
    config: Option<PathBuf>,

    #[arg(long = "log-file", help = "Write diagnostics to this file")]
    log_file: Option<PathBuf>,
}

/// The terminal belongs to the UI, so diagnostics go to a file or nowhere.
fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let Some(path) = log_file else {
        return Ok(());
    };
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening log file {}", path.display()))?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(file))
        .try_init()
        .map_err(|err| anyhow!(err))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref())?;

    let config = match &cli.config {
        Some(path) => ViewConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ViewConfig::default(),
    };

    let (tx, rx) = mpsc::channel::<SourceEvent>();

    let source = if let Some(port) = cli.port {
        eprintln!("Listening on port {}...", port);
        FeedSource::Network(port)
    } else if let Some(path) = cli.file {
        FeedSource::File(path)
    } else {
        FeedSource::Stdin
    };
    let label = source.describe();
    start_source(source, tx)?;
    let app = App::new(rx, label, config)?;

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, app);

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
    }
    info!("exiting");

    Ok(())
}

fn run_app(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, mut app: App) -> Result<()> {
    loop {
        let now = Instant::now();
        let rows = ui::table_rows_for(terminal.size()?.height);
        app.dashboard.set_viewport_height(rows as f64, now);
        app.poll_source(now);
        app.dashboard.tick(now);

        terminal.draw(|f| ui::draw(f, &app))?;

        // Wake early when a reveal batch is due.
        let mut timeout = Duration::from_millis(POLL_INTERVAL_MS);
        if let Some(deadline) = app.dashboard.next_deadline() {
            timeout = timeout.min(deadline.saturating_duration_since(Instant::now()));
        }
        if !event::poll(timeout)? {
            continue;
        }

        let now = Instant::now();
        let page = rows.max(1) as f64;
        match event::read()? {
            Event::Key(key) => {
                app.status_message = None;
                if app.input_mode == InputMode::Search {
                    app.handle_search_key(key.code, key.modifiers, now);
                    continue;
                }
                match key.code {
                    KeyCode::Char('q') => return Ok(()),
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        return Ok(())
                    }
                    KeyCode::Char('/') => app.begin_search(),
                    KeyCode::Esc => app.clear_query(now),
                    KeyCode::Tab => app.toggle_tab(),
                    KeyCode::Char('n') => app.cycle_network(now),
                    KeyCode::Char('s') => app.cycle_status(now),
                    KeyCode::Char('o') => app.cycle_sort_key(now),
                    KeyCode::Char('r') => app.flip_sort_order(now),
                    KeyCode::Char('m') => app.dashboard.load_more(now),
                    KeyCode::Char('g') | KeyCode::Home => app.dashboard.scroll_to_start(now),
                    KeyCode::Char('G') | KeyCode::End => app.dashboard.scroll_to_end(now),
                    KeyCode::Up | KeyCode::Char('k') => app.dashboard.scroll_by(-1.0, now),
                    KeyCode::Down | KeyCode::Char('j') => app.dashboard.scroll_by(1.0, now),
                    KeyCode::PageUp => app.dashboard.scroll_by(-page, now),
                    KeyCode::PageDown => app.dashboard.scroll_by(page, now),
                    _ => {}
                }
            }
            Event::Mouse(mouse) => match mouse.kind {
                MouseEventKind::ScrollUp => app.dashboard.scroll_by(-3.0, now),
                MouseEventKind::ScrollDown => app.dashboard.scroll_by(3.0, now),
                _ => {}
            },
            _ => {}
        }
    }
}
