#![forbid(unsafe_code)]

pub mod dialog;
pub mod error;
pub mod jobs;
pub mod panel;
pub mod path_set;
pub mod queue;
pub mod search;
pub mod settings;
pub mod settings_io;
pub mod walker;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

use tokio_util::sync::CancellationToken;

pub use dialog::{DialogButtonFocus, DialogKind, DialogResult, DialogState};
pub use error::{EntryFailure, JobError, JobResult};
pub use jobs::{
    DEFAULT_ARCHIVE_NAME, JOB_CANCELED_MESSAGE, Job, JobEvent, JobId, JobKind, JobManager,
    JobOutcome, JobRecord, JobRequest, JobStatus, JobStatusCounts, JobTicket,
};
pub use panel::{ActivePanel, FileEntry, PanelState};
pub use path_set::{PathEntry, PathSet, PathTag, Toggled};
pub use queue::{JobQueue, ShutdownMode, ShutdownReport};
pub use search::{SearchEvent, spawn_search};
pub use settings::{JobSettings, PanelSettings, SearchSettings, Settings};
pub use walker::{ArchiveFormat, SEARCH_CAPACITY, SearchMatch, SearchRequest, SearchResults};

use crate::dialog::{DialogEvent, DialogTransition};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AppCommand {
    Quit,
    SwitchPanel,
    MoveUp,
    MoveDown,
    PageUp,
    PageDown,
    MoveHome,
    MoveEnd,
    OpenEntry,
    CdUp,
    Reread,
    ToggleHidden,
    ToggleSelect,
    CutSelection,
    ClearSelection,
    PasteSelection,
    RemoveSelection,
    ArchiveSelection,
    ExtractArchive,
    Search,
    DialogAccept,
    DialogCancel,
    DialogFocusNext,
    DialogBackspace,
    DialogInputChar(char),
    ResultsUp,
    ResultsDown,
    ResultsOpen,
    ResultsClose,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyContext {
    FileManager,
    Dialog,
    Input,
    SearchResults,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ApplyResult {
    Continue,
    Quit(ShutdownMode),
}

#[derive(Clone, Debug)]
pub struct SearchResultsState {
    pub root: PathBuf,
    pub prefix: String,
    pub results: SearchResults,
    pub cursor: usize,
}

impl SearchResultsState {
    pub fn selected(&self) -> Option<&SearchMatch> {
        self.results.matches.get(self.cursor)
    }

    fn move_cursor(&mut self, delta: isize) {
        let last = self.results.matches.len().saturating_sub(1);
        self.cursor = if delta.is_negative() {
            self.cursor.saturating_sub(delta.unsigned_abs())
        } else {
            self.cursor.saturating_add(delta.unsigned_abs()).min(last)
        };
    }
}

/// Overlays stacked above the two panels.
#[derive(Clone, Debug)]
pub enum Route {
    Dialog(DialogState),
    SearchResults(SearchResultsState),
}

#[derive(Clone, Debug)]
enum PendingDialogAction {
    ConfirmRemove { cwd: PathBuf, fallback: Option<PathBuf> },
    ArchiveName { cwd: PathBuf, fallback: Option<PathBuf> },
    SearchPrefix { root: PathBuf },
    QuitWithJobs,
}

/// Everything the UI thread owns. The worker only sees the job queue's
/// shared half and talks back through [`JobEvent`]s.
#[derive(Debug)]
pub struct AppState {
    pub panels: [PanelState; 2],
    pub active_panel: ActivePanel,
    pub status_line: String,
    pub jobs: JobManager,
    pub queue: JobQueue,
    pub settings: Settings,
    routes: Vec<Route>,
    pending_dialog_action: Option<PendingDialogAction>,
    search_events: Sender<SearchEvent>,
    search_cancel: CancellationToken,
}

impl AppState {
    pub fn new(
        start_path: PathBuf,
        settings: Settings,
        job_events: Sender<JobEvent>,
        search_events: Sender<SearchEvent>,
    ) -> io::Result<Self> {
        let show_hidden = settings.panels.show_hidden;
        let left = PanelState::new(start_path.clone(), show_hidden)?;
        let right = PanelState::new(start_path, show_hidden)?;

        Ok(Self {
            panels: [left, right],
            active_panel: ActivePanel::Left,
            status_line: String::from(
                "Space select | u unselect all | x cut | v paste | d remove | a archive | e extract | / search | q quit",
            ),
            jobs: JobManager::new(),
            queue: JobQueue::new(job_events),
            settings,
            routes: Vec::new(),
            pending_dialog_action: None,
            search_events,
            search_cancel: CancellationToken::new(),
        })
    }

    pub fn active_panel(&self) -> &PanelState {
        &self.panels[self.active_panel.index()]
    }

    pub fn active_panel_mut(&mut self) -> &mut PanelState {
        let index = self.active_panel.index();
        &mut self.panels[index]
    }

    pub fn set_status(&mut self, message: impl Into<String>) {
        self.status_line = message.into();
    }

    pub fn top_route(&self) -> Option<&Route> {
        self.routes.last()
    }

    pub fn key_context(&self) -> KeyContext {
        match self.top_route() {
            None => KeyContext::FileManager,
            Some(Route::Dialog(dialog)) if dialog.is_input() => KeyContext::Input,
            Some(Route::Dialog(_)) => KeyContext::Dialog,
            Some(Route::SearchResults(_)) => KeyContext::SearchResults,
        }
    }

    /// The out-of-memory flag raised by the selection or a job.
    pub fn fatal_quit_requested(&self) -> bool {
        self.queue.fatal_quit_requested()
    }

    pub fn jobs_line(&self) -> String {
        let remaining = self.jobs.remaining();
        match self.jobs.last_job() {
            Some(job) => {
                let status = match job.status {
                    JobStatus::Queued => "queued",
                    JobStatus::Running => "running",
                    JobStatus::Succeeded => "done",
                    JobStatus::Failed => "failed",
                };
                format!("jobs: {remaining} remaining | last: #{} {} ({status})", job.id, job.summary)
            }
            None => format!("jobs: {remaining} remaining"),
        }
    }

    pub fn handle_job_event(&mut self, event: JobEvent) {
        self.jobs.handle_event(&event);
        match event {
            JobEvent::Started { id, remaining, .. } => {
                let summary = self
                    .jobs
                    .job(id)
                    .map(|job| job.summary.clone())
                    .unwrap_or_default();
                self.set_status(format!("Job #{id} started: {summary} ({remaining} remaining)"));
            }
            JobEvent::Finished {
                id,
                kind,
                outcome,
                skipped,
                dirs_changed,
                ..
            } => {
                self.refresh_changed_dirs(&dirs_changed);
                let (success, failure) = kind.messages();
                match outcome.error() {
                    None if skipped > 0 => self.set_status(format!(
                        "Job #{id}: {success} {skipped} item(s) skipped, already in destination"
                    )),
                    None => self.set_status(format!("Job #{id}: {success}")),
                    Some(JobError::Canceled) => self.set_status(format!("Job #{id} canceled")),
                    Some(error) => self.set_status(format!("Job #{id}: {failure}: {error}")),
                }
                if self.fatal_quit_requested() {
                    self.set_status("Out of memory, quitting");
                }
            }
        }
    }

    pub fn handle_search_event(&mut self, event: SearchEvent) {
        let SearchEvent::Finished {
            root,
            prefix,
            result,
        } = event;
        match result {
            Ok(results) => {
                let count = results.matches.len();
                self.set_status(if results.truncated {
                    format!("Search '{prefix}': too many results, showing first {count}")
                } else {
                    format!("Search '{prefix}': {count} match(es)")
                });
                if count > 0 {
                    self.routes.push(Route::SearchResults(SearchResultsState {
                        root,
                        prefix,
                        results,
                        cursor: 0,
                    }));
                }
            }
            Err(JobError::Canceled) => {
                tracing::debug!(prefix = %prefix, "superseded search dropped");
            }
            Err(error) => self.set_status(format!("Search '{prefix}' failed: {error}")),
        }
    }

    /// Rereads every panel showing one of `dirs`; a panel whose directory
    /// vanished falls back to its nearest existing ancestor.
    fn refresh_changed_dirs(&mut self, dirs: &[PathBuf]) {
        for panel in &mut self.panels {
            if !dirs.iter().any(|dir| panel.shows(dir)) {
                continue;
            }
            if let Err(error) = panel.refresh() {
                tracing::debug!(dir = %panel.cwd.display(), "refresh failed: {error}");
                let fallback = panel
                    .cwd
                    .ancestors()
                    .skip(1)
                    .find(|dir| dir.is_dir())
                    .map(Path::to_path_buf);
                if let Some(dir) = fallback
                    && let Err(error) = panel.change_dir(dir)
                {
                    tracing::warn!("panel fallback failed: {error}");
                }
            }
        }
    }

    pub fn apply(&mut self, command: AppCommand) -> io::Result<ApplyResult> {
        match command {
            AppCommand::Quit => return Ok(self.request_quit()),
            AppCommand::SwitchPanel => {
                self.active_panel.toggle();
                let cwd = self.active_panel().cwd.display().to_string();
                self.set_status(cwd);
            }
            AppCommand::MoveUp => self.active_panel_mut().move_cursor(-1),
            AppCommand::MoveDown => self.active_panel_mut().move_cursor(1),
            AppCommand::PageUp => self.active_panel_mut().move_cursor_page(-1),
            AppCommand::PageDown => self.active_panel_mut().move_cursor_page(1),
            AppCommand::MoveHome => self.active_panel_mut().move_cursor_home(),
            AppCommand::MoveEnd => self.active_panel_mut().move_cursor_end(),
            AppCommand::OpenEntry => {
                if !self.active_panel_mut().open_selected_directory()? {
                    self.set_status("Not a directory");
                }
            }
            AppCommand::CdUp => {
                if !self.active_panel_mut().go_parent()? {
                    self.set_status("Already at filesystem root");
                }
            }
            AppCommand::Reread => {
                self.active_panel_mut().refresh()?;
                self.set_status("Reread directory");
            }
            AppCommand::ToggleHidden => {
                let shown = self.active_panel_mut().toggle_hidden()?;
                self.set_status(if shown {
                    "Showing hidden files"
                } else {
                    "Hiding hidden files"
                });
            }
            AppCommand::ToggleSelect => self.toggle_select(),
            AppCommand::CutSelection => {
                let count = self.queue.tag_selection(PathTag::Cut);
                self.set_status(if count == 0 {
                    String::from("Nothing selected")
                } else {
                    format!("Cut {count} item(s)")
                });
            }
            AppCommand::ClearSelection => {
                let cleared = self.queue.clear_selection();
                self.set_status(if cleared == 0 {
                    String::from("Nothing selected")
                } else {
                    format!("Cleared {cleared} selected item(s)")
                });
            }
            AppCommand::PasteSelection => self.paste_selection(),
            AppCommand::RemoveSelection => self.start_remove_confirmation(),
            AppCommand::ArchiveSelection => self.start_archive_dialog(),
            AppCommand::ExtractArchive => self.extract_under_cursor(),
            AppCommand::Search => {
                let root = self.active_panel().cwd.clone();
                self.open_dialog(
                    PendingDialogAction::SearchPrefix { root },
                    DialogState::input("Search", "File name prefix:", ""),
                );
            }
            AppCommand::DialogAccept => return self.handle_dialog_event(DialogEvent::Accept),
            AppCommand::DialogCancel => return self.handle_dialog_event(DialogEvent::Cancel),
            AppCommand::DialogFocusNext => return self.handle_dialog_event(DialogEvent::FocusNext),
            AppCommand::DialogBackspace => return self.handle_dialog_event(DialogEvent::Backspace),
            AppCommand::DialogInputChar(ch) => {
                return self.handle_dialog_event(DialogEvent::InsertChar(ch));
            }
            AppCommand::ResultsUp => self.move_results_cursor(-1),
            AppCommand::ResultsDown => self.move_results_cursor(1),
            AppCommand::ResultsOpen => self.open_search_result()?,
            AppCommand::ResultsClose => {
                if matches!(self.top_route(), Some(Route::SearchResults(_))) {
                    self.routes.pop();
                }
            }
        }
        Ok(ApplyResult::Continue)
    }

    /// Stops background work before exit.
    pub fn shutdown(&mut self, mode: ShutdownMode) -> ShutdownReport {
        self.search_cancel.cancel();
        let report = self.queue.shutdown(mode);
        if mode == ShutdownMode::Abandon {
            self.jobs.discard_queued();
        }
        tracing::info!(
            ?mode,
            discarded = report.discarded,
            "file manager shutting down"
        );
        report
    }

    fn request_quit(&mut self) -> ApplyResult {
        let live = self.queue.total();
        if live == 0 || !self.settings.jobs.confirm_quit {
            return ApplyResult::Quit(ShutdownMode::Wait);
        }
        self.open_dialog(
            PendingDialogAction::QuitWithJobs,
            DialogState::choice(
                "Quit",
                format!("{live} job(s) still running. Wait for them or abandon?"),
                "Wait",
                "Abandon",
            ),
        );
        ApplyResult::Continue
    }

    fn cursor_path(&self) -> Option<PathBuf> {
        self.active_panel()
            .selected_entry()
            .filter(|entry| !entry.is_parent)
            .map(|entry| entry.path.clone())
    }

    fn toggle_select(&mut self) {
        let Some(path) = self.cursor_path() else {
            self.set_status("Parent entry cannot be selected");
            return;
        };
        match self.queue.toggle_selection(&path) {
            Ok(_) => {
                let count = self.queue.selection_len();
                self.set_status(format!("{count} item(s) selected"));
                self.active_panel_mut().move_cursor(1);
            }
            Err(error) => self.set_status(format!("Selection failed: {error}")),
        }
    }

    fn paste_selection(&mut self) {
        if self.queue.selection_len() == 0 {
            self.set_status("Nothing selected");
            return;
        }
        let cwd = self.active_panel().cwd.clone();
        let request = if self.queue.selection_has_tag(PathTag::Cut) {
            JobRequest::move_to(cwd)
        } else {
            JobRequest::paste(cwd)
        };
        let queued = self.queue.enqueue_selection(request);
        self.track_queued(queued);
    }

    fn start_remove_confirmation(&mut self) {
        let selected = self.queue.selection_len();
        let fallback = if selected == 0 {
            self.cursor_path()
        } else {
            None
        };
        let count = match (&fallback, selected) {
            (None, 0) => {
                self.set_status("Nothing to remove");
                return;
            }
            (Some(_), _) => 1,
            (None, count) => count,
        };
        let cwd = self.active_panel().cwd.clone();
        self.open_dialog(
            PendingDialogAction::ConfirmRemove { cwd, fallback },
            DialogState::confirm("Remove", format!("Remove {count} item(s)?")),
        );
    }

    fn start_archive_dialog(&mut self) {
        let fallback = if self.queue.selection_len() == 0 {
            match self.cursor_path() {
                Some(path) => Some(path),
                None => {
                    self.set_status("Nothing to archive");
                    return;
                }
            }
        } else {
            None
        };
        let cwd = self.active_panel().cwd.clone();
        let default_name = self.settings.jobs.archive_name.clone();
        self.open_dialog(
            PendingDialogAction::ArchiveName { cwd, fallback },
            DialogState::input("Archive", "Archive name:", default_name),
        );
    }

    fn extract_under_cursor(&mut self) {
        let Some(entry) = self.active_panel().selected_entry() else {
            self.set_status("No entry selected");
            return;
        };
        if entry.is_dir || ArchiveFormat::detect(&entry.path).is_none() {
            self.set_status("Not a .tar, .tar.gz or .tgz archive");
            return;
        }
        let request = JobRequest::extract(entry.path.clone(), self.active_panel().cwd.clone());
        let queued = self.queue.enqueue(request, PathSet::new());
        self.track_queued(queued);
    }

    /// Queues a job over the selection, or over `fallback` when nothing is
    /// selected.
    fn enqueue_with_fallback(&mut self, request: JobRequest, fallback: Option<PathBuf>) {
        let queued = match fallback {
            Some(path) if self.queue.selection_len() == 0 => {
                self.queue.enqueue(request, [path].into_iter().collect())
            }
            _ => self.queue.enqueue_selection(request),
        };
        self.track_queued(queued);
    }

    fn track_queued(&mut self, queued: JobResult<JobTicket>) {
        match queued {
            Ok(ticket) => {
                self.set_status(format!("Queued job #{}: {}", ticket.id, ticket.summary));
                self.jobs.track(ticket);
            }
            Err(error) => self.set_status(format!("Could not queue job: {error}")),
        }
    }

    fn start_search(&mut self, root: PathBuf, prefix: String) {
        if prefix.is_empty() {
            self.set_status("Search prefix is empty");
            return;
        }
        let request = SearchRequest {
            root,
            prefix,
            archive_aware: self.settings.search.archive_aware,
            capacity: self.settings.search.capacity,
        };
        let label = request.prefix.clone();
        self.search_cancel.cancel();
        self.search_cancel = CancellationToken::new();
        match spawn_search(request, self.search_cancel.clone(), self.search_events.clone()) {
            Ok(_) => self.set_status(format!("Searching for '{label}'...")),
            Err(error) => self.set_status(format!("Could not start search: {error}")),
        }
    }

    fn move_results_cursor(&mut self, delta: isize) {
        if let Some(Route::SearchResults(results)) = self.routes.last_mut() {
            results.move_cursor(delta);
        }
    }

    fn open_search_result(&mut self) -> io::Result<()> {
        let Some(Route::SearchResults(results)) = self.routes.last() else {
            return Ok(());
        };
        let Some(found) = results.selected() else {
            return Ok(());
        };
        let dir = found.containing_dir();
        let focus = match &found.archive {
            Some(archive) => archive.file_name(),
            None => Path::new(found.path.trim_end_matches(std::path::MAIN_SEPARATOR)).file_name(),
        }
        .map(|name| name.to_string_lossy().into_owned());

        self.routes.pop();
        let panel = self.active_panel_mut();
        panel.change_dir(dir)?;
        if let Some(name) = focus {
            panel.focus_name(&name);
        }
        Ok(())
    }

    fn open_dialog(&mut self, action: PendingDialogAction, dialog: DialogState) {
        self.pending_dialog_action = Some(action);
        self.routes.push(Route::Dialog(dialog));
    }

    fn handle_dialog_event(&mut self, event: DialogEvent) -> io::Result<ApplyResult> {
        let Some(Route::Dialog(dialog)) = self.routes.last_mut() else {
            return Ok(ApplyResult::Continue);
        };
        let DialogTransition::Close(result) = dialog.handle_event(event) else {
            return Ok(ApplyResult::Continue);
        };
        self.routes.pop();
        let Some(action) = self.pending_dialog_action.take() else {
            return Ok(ApplyResult::Continue);
        };
        Ok(self.finish_dialog_action(action, result))
    }

    fn finish_dialog_action(
        &mut self,
        action: PendingDialogAction,
        result: DialogResult,
    ) -> ApplyResult {
        match (action, result) {
            (PendingDialogAction::QuitWithJobs, DialogResult::ConfirmAccepted) => {
                return ApplyResult::Quit(ShutdownMode::Wait);
            }
            (PendingDialogAction::QuitWithJobs, DialogResult::ConfirmDeclined) => {
                return ApplyResult::Quit(ShutdownMode::Abandon);
            }
            (PendingDialogAction::ConfirmRemove { cwd, fallback }, DialogResult::ConfirmAccepted) => {
                self.enqueue_with_fallback(JobRequest::remove(cwd), fallback);
            }
            (
                PendingDialogAction::ArchiveName { cwd, fallback },
                DialogResult::InputSubmitted(name),
            ) => {
                self.enqueue_with_fallback(JobRequest::archive(cwd, name), fallback);
            }
            (PendingDialogAction::SearchPrefix { root }, DialogResult::InputSubmitted(prefix)) => {
                self.start_search(root, prefix);
            }
            _ => self.set_status("Canceled"),
        }
        ApplyResult::Continue
    }
}
