#![forbid(unsafe_code)]

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use dfm_core::settings_io::{load_settings, settings_path};
use dfm_core::{
    AppCommand, AppState, ApplyResult, JobEvent, KeyContext, SearchEvent, ShutdownMode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use tracing_subscriber::EnvFilter;

type Tui = Terminal<CrosstermBackend<io::Stdout>>;

#[derive(Debug, Parser)]
#[command(version, about = "Dual-pane terminal file manager with background jobs")]
struct Cli {
    #[arg(long, default_value_t = 200)]
    tick_rate_ms: u64,
    /// Directory both panels start in.
    #[arg(long)]
    path: Option<PathBuf>,
    /// Log file (defaults to ~/.cache/dfm/dfm.log).
    #[arg(long)]
    log_file: Option<PathBuf>,
    /// Settings file (defaults to ~/.config/dfm/settings.ini).
    #[arg(long)]
    config: Option<PathBuf>,
}

struct EventChannels {
    jobs: Receiver<JobEvent>,
    searches: Receiver<SearchEvent>,
    jobs_disconnected: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref())?;

    let start_path = match cli.path {
        Some(path) => path,
        None => std::env::current_dir().context("failed to resolve current directory")?,
    };
    let config_path = cli.config.or_else(settings_path);
    let settings = load_settings(config_path.as_deref()).with_context(|| {
        format!(
            "failed to load settings from {}",
            config_path
                .as_deref()
                .map(Path::display)
                .map(|path| path.to_string())
                .unwrap_or_default()
        )
    })?;

    let (job_tx, job_rx) = mpsc::channel();
    let (search_tx, search_rx) = mpsc::channel();
    let mut state = AppState::new(start_path, settings, job_tx, search_tx)
        .context("failed to initialize app state")?;
    let mut channels = EventChannels {
        jobs: job_rx,
        searches: search_rx,
        jobs_disconnected: false,
    };

    run_app(
        &mut state,
        &mut channels,
        Duration::from_millis(cli.tick_rate_ms),
    )
}

/// Installs a file-backed subscriber. Nothing is ever logged to the terminal.
fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let path = log_file.map_or_else(
        || default_log_path(std::env::var_os("HOME")),
        Path::to_path_buf,
    );
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dfm=info,warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init();
    Ok(())
}

fn default_log_path(home: Option<OsString>) -> PathBuf {
    home.map(|home| PathBuf::from(home).join(".cache").join("dfm"))
        .unwrap_or_else(std::env::temp_dir)
        .join("dfm.log")
}

fn run_app(state: &mut AppState, channels: &mut EventChannels, tick_rate: Duration) -> Result<()> {
    enable_raw_mode().context("failed to enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("failed to enter alternate screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("failed to create terminal backend")?;
    terminal.clear().context("failed to clear terminal")?;

    let loop_result = run_event_loop(&mut terminal, state, channels, tick_rate);
    let mode = match &loop_result {
        Ok(mode) => *mode,
        Err(_) => ShutdownMode::Abandon,
    };
    let shutdown_result = shutdown_jobs(&mut terminal, state, mode);
    let restore_result = restore_terminal(&mut terminal);

    loop_result?;
    shutdown_result?;
    restore_result?;
    Ok(())
}

/// Waits for or abandons the job worker. Waiting redraws once so the user
/// sees why the program has not exited yet.
fn shutdown_jobs(terminal: &mut Tui, state: &mut AppState, mode: ShutdownMode) -> Result<()> {
    if mode == ShutdownMode::Wait && state.queue.is_busy() {
        state.set_status(format!(
            "Waiting for {} job(s) to finish...",
            state.queue.total()
        ));
        terminal
            .draw(|frame| dfm_ui::render(frame, state))
            .context("failed to draw frame")?;
    }
    let report = state.shutdown(mode);
    if report.discarded > 0 {
        tracing::info!(discarded = report.discarded, "abandoned queued jobs");
    }
    Ok(())
}

fn restore_terminal(terminal: &mut Tui) -> Result<()> {
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("failed to leave alternate screen")?;
    terminal.show_cursor().context("failed to restore cursor")?;
    Ok(())
}

fn run_event_loop(
    terminal: &mut Tui,
    state: &mut AppState,
    channels: &mut EventChannels,
    tick_rate: Duration,
) -> Result<ShutdownMode> {
    let mut last_tick = Instant::now();

    loop {
        drain_events(state, channels);
        if state.fatal_quit_requested() {
            tracing::error!("out of memory, abandoning jobs");
            return Ok(ShutdownMode::Abandon);
        }

        terminal
            .draw(|frame| dfm_ui::render(frame, state))
            .context("failed to draw frame")?;

        let timeout = tick_rate.saturating_sub(last_tick.elapsed());
        if event::poll(timeout).context("failed to poll input")?
            && let Event::Key(key_event) = event::read().context("failed to read input event")?
            && key_event.kind == KeyEventKind::Press
            && let Some(command) = map_key(state.key_context(), key_event)
        {
            match state.apply(command) {
                Ok(ApplyResult::Quit(mode)) => return Ok(mode),
                Ok(ApplyResult::Continue) => {}
                Err(error) => state.set_status(format!("Error: {error}")),
            }
        }

        if last_tick.elapsed() >= tick_rate {
            last_tick = Instant::now();
        }
    }
}

fn drain_events(state: &mut AppState, channels: &mut EventChannels) {
    loop {
        match channels.jobs.try_recv() {
            Ok(event) => state.handle_job_event(event),
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => {
                if !channels.jobs_disconnected {
                    state.set_status("Job event channel disconnected");
                    channels.jobs_disconnected = true;
                }
                break;
            }
        }
    }
    // The search sender lives in the app state, so this never disconnects.
    while let Ok(event) = channels.searches.try_recv() {
        state.handle_search_event(event);
    }
}

fn map_key(context: KeyContext, key: KeyEvent) -> Option<AppCommand> {
    let shortcut = key
        .modifiers
        .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER);
    match context {
        KeyContext::FileManager => map_file_manager_key(key, shortcut),
        KeyContext::Dialog => match key.code {
            KeyCode::Enter => Some(AppCommand::DialogAccept),
            KeyCode::Esc => Some(AppCommand::DialogCancel),
            KeyCode::Tab | KeyCode::BackTab | KeyCode::Left | KeyCode::Right => {
                Some(AppCommand::DialogFocusNext)
            }
            _ => None,
        },
        KeyContext::Input => match key.code {
            KeyCode::Enter => Some(AppCommand::DialogAccept),
            KeyCode::Esc => Some(AppCommand::DialogCancel),
            KeyCode::Backspace => Some(AppCommand::DialogBackspace),
            KeyCode::Char(ch) if !shortcut => Some(AppCommand::DialogInputChar(ch)),
            _ => None,
        },
        KeyContext::SearchResults => match key.code {
            KeyCode::Up | KeyCode::Char('k') => Some(AppCommand::ResultsUp),
            KeyCode::Down | KeyCode::Char('j') => Some(AppCommand::ResultsDown),
            KeyCode::Enter => Some(AppCommand::ResultsOpen),
            KeyCode::Esc | KeyCode::Char('q') => Some(AppCommand::ResultsClose),
            _ => None,
        },
    }
}

fn map_file_manager_key(key: KeyEvent, shortcut: bool) -> Option<AppCommand> {
    if shortcut {
        return None;
    }
    let command = match key.code {
        KeyCode::Up | KeyCode::Char('k') => AppCommand::MoveUp,
        KeyCode::Down | KeyCode::Char('j') => AppCommand::MoveDown,
        KeyCode::PageUp => AppCommand::PageUp,
        KeyCode::PageDown => AppCommand::PageDown,
        KeyCode::Home => AppCommand::MoveHome,
        KeyCode::End => AppCommand::MoveEnd,
        KeyCode::Enter | KeyCode::Right => AppCommand::OpenEntry,
        KeyCode::Backspace | KeyCode::Left => AppCommand::CdUp,
        KeyCode::Tab => AppCommand::SwitchPanel,
        KeyCode::Char(' ') | KeyCode::Insert => AppCommand::ToggleSelect,
        KeyCode::Char('x') => AppCommand::CutSelection,
        KeyCode::Char('u') => AppCommand::ClearSelection,
        KeyCode::Char('v') => AppCommand::PasteSelection,
        KeyCode::Char('d') | KeyCode::Delete => AppCommand::RemoveSelection,
        KeyCode::Char('a') => AppCommand::ArchiveSelection,
        KeyCode::Char('e') => AppCommand::ExtractArchive,
        KeyCode::Char('/') => AppCommand::Search,
        KeyCode::Char('.') => AppCommand::ToggleHidden,
        KeyCode::Char('r') => AppCommand::Reread,
        KeyCode::Char('q') => AppCommand::Quit,
        _ => return None,
    };
    Some(command)
}
