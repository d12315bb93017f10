use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::error::{EntryFailure, JobError, JobResult};
use crate::path_set::{PathSet, PathTag};
use crate::walker::{
    ArchiveFormat, CopyReport, archive_tree, copy_tree, extract_archive, remove_tree,
};

pub const JOB_CANCELED_MESSAGE: &str = "job canceled";
pub const DEFAULT_ARCHIVE_NAME: &str = "archive";
const ARCHIVE_NAME_ATTEMPTS: usize = 32;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobKind {
    Move,
    Paste,
    Remove,
    Archive,
    Extract,
}

impl JobKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Move => "move",
            Self::Paste => "paste",
            Self::Remove => "remove",
            Self::Archive => "archive",
            Self::Extract => "extract",
        }
    }

    /// Status line texts for a successful and a failed run.
    pub fn messages(self) -> (&'static str, &'static str) {
        match self {
            Self::Move => ("Files moved.", "Could not move every file"),
            Self::Paste => ("Files pasted.", "Could not paste every file"),
            Self::Remove => ("Files removed.", "Could not remove every file"),
            Self::Archive => ("Archive ready.", "Could not create archive"),
            Self::Extract => ("Archive extracted.", "Could not extract archive"),
        }
    }
}

/// What the UI asks for; the queue turns it into a [`Job`] with an id.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobRequest {
    pub kind: JobKind,
    pub origin_dir: PathBuf,
    pub target_name: Option<String>,
    pub source_archive: Option<PathBuf>,
}

impl JobRequest {
    pub fn paste(destination_dir: impl Into<PathBuf>) -> Self {
        Self::plain(JobKind::Paste, destination_dir)
    }

    pub fn move_to(destination_dir: impl Into<PathBuf>) -> Self {
        Self::plain(JobKind::Move, destination_dir)
    }

    pub fn remove(cwd: impl Into<PathBuf>) -> Self {
        Self::plain(JobKind::Remove, cwd)
    }

    pub fn archive(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            target_name: Some(name.into()),
            ..Self::plain(JobKind::Archive, dir)
        }
    }

    pub fn extract(archive: impl Into<PathBuf>, destination_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_archive: Some(archive.into()),
            ..Self::plain(JobKind::Extract, destination_dir)
        }
    }

    fn plain(kind: JobKind, origin_dir: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            origin_dir: origin_dir.into(),
            target_name: None,
            source_archive: None,
        }
    }
}

#[derive(Debug)]
pub enum JobOutcome {
    Pending,
    Succeeded,
    Failed(JobError),
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    pub fn error(&self) -> Option<&JobError> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }
}

impl From<JobResult<()>> for JobOutcome {
    fn from(result: JobResult<()>) -> Self {
        match result {
            Ok(()) => Self::Succeeded,
            Err(error) => Self::Failed(error),
        }
    }
}

#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub files: PathSet,
    pub origin_dir: PathBuf,
    pub target_name: Option<String>,
    pub source_archive: Option<PathBuf>,
    pub outcome: JobOutcome,
}

impl Job {
    pub fn new(id: JobId, request: JobRequest, files: PathSet) -> Self {
        Self {
            id,
            kind: request.kind,
            files,
            origin_dir: request.origin_dir,
            target_name: request.target_name,
            source_archive: request.source_archive,
            outcome: JobOutcome::Pending,
        }
    }

    pub fn summary(&self) -> String {
        let count = self.files.len();
        let origin = self.origin_dir.to_string_lossy();
        match self.kind {
            JobKind::Move => format!("move {count} item(s) -> {origin}"),
            JobKind::Paste => format!("paste {count} item(s) -> {origin}"),
            JobKind::Remove => format!("remove {count} item(s)"),
            JobKind::Archive => format!(
                "archive {count} item(s) -> {}",
                self.target_name.as_deref().unwrap_or(DEFAULT_ARCHIVE_NAME)
            ),
            JobKind::Extract => format!(
                "extract {} -> {origin}",
                self.source_archive
                    .as_deref()
                    .and_then(Path::file_name)
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default()
            ),
        }
    }

    /// Entries left alone because they already live in the destination.
    pub fn skipped(&self) -> usize {
        self.files
            .iter()
            .filter(|entry| entry.tag == PathTag::CannotPasteSameDir)
            .count()
    }

    /// Directories whose listings are stale once this job ran.
    pub fn changed_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.origin_dir.clone()];
        if matches!(self.kind, JobKind::Move | JobKind::Remove) {
            self.files.for_each(|entry| {
                if let Some(parent) = entry.path.parent()
                    && !dirs.iter().any(|dir| dir == parent)
                {
                    dirs.push(parent.to_path_buf());
                }
            });
        }
        dirs
    }

    /// Runs the tree operation bound to this job's kind.
    pub fn execute(&mut self, cancel: &CancellationToken) -> JobResult<()> {
        match self.kind {
            JobKind::Paste => paste_files(&mut self.files, &self.origin_dir, cancel),
            JobKind::Move => move_files(&mut self.files, &self.origin_dir, cancel),
            JobKind::Remove => remove_files(&self.files, cancel),
            JobKind::Archive => {
                let name = self.target_name.as_deref().unwrap_or(DEFAULT_ARCHIVE_NAME);
                let archive_path = unique_archive_path(&self.origin_dir, name)?;
                archive_tree(&self.files, &archive_path, cancel).map(|_| ())
            }
            JobKind::Extract => {
                let Some(archive) = self.source_archive.as_deref() else {
                    return Err(JobError::archive("no archive to extract"));
                };
                extract_archive(archive, &self.origin_dir, cancel).map(|_| ())
            }
        }
    }
}

fn is_same_dir(path: &Path, dir: &Path) -> bool {
    path.parent().is_some_and(|parent| parent == dir)
}

fn same_dir_error(dir: &Path) -> JobError {
    JobError::io(
        dir,
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "cannot paste into the directory the files come from",
        ),
    )
}

/// Copies one selected root into `destination`, folding a refused or failed
/// root into `report` so the remaining roots still run. Returns whether the
/// root copied cleanly.
fn copy_root(
    report: &mut CopyReport,
    source: &Path,
    destination: &Path,
    cancel: &CancellationToken,
) -> JobResult<bool> {
    match copy_tree(source, destination, cancel) {
        Ok(copied) => {
            let clean = copied.failures.is_empty();
            report.merge(copied);
            Ok(clean)
        }
        Err(error @ (JobError::Canceled | JobError::Allocation)) => Err(error),
        Err(error) => {
            report.fail(EntryFailure::new(source, error.to_string()));
            Ok(false)
        }
    }
}

/// Moves `source` where rename cannot: copy, then remove the original only
/// if every entry arrived. Returns whether the source is gone.
fn copy_then_remove(
    report: &mut CopyReport,
    source: &Path,
    destination: &Path,
    cancel: &CancellationToken,
) -> JobResult<bool> {
    if !copy_root(report, source, destination, cancel)? {
        return Ok(false);
    }
    match remove_tree(source, cancel) {
        Ok(()) => Ok(true),
        Err(JobError::Canceled) => Err(JobError::Canceled),
        Err(error) => {
            report.fail(EntryFailure::new(source, error.to_string()));
            Ok(false)
        }
    }
}

fn paste_files(files: &mut PathSet, destination: &Path, cancel: &CancellationToken) -> JobResult<()> {
    let mut report = CopyReport::default();
    let mut attempted = 0usize;

    for entry in files.iter_mut() {
        if is_same_dir(&entry.path, destination) {
            entry.tag = PathTag::CannotPasteSameDir;
            continue;
        }
        attempted += 1;
        copy_root(&mut report, &entry.path, destination, cancel)?;
    }

    if attempted == 0 && !files.is_empty() {
        return Err(same_dir_error(destination));
    }
    report.into_result().map(|_| ())
}

fn move_files(files: &mut PathSet, destination: &Path, cancel: &CancellationToken) -> JobResult<()> {
    let mut report = CopyReport::default();
    let mut attempted = 0usize;

    for entry in files.iter_mut() {
        if cancel.is_cancelled() {
            return Err(JobError::Canceled);
        }
        if is_same_dir(&entry.path, destination) {
            entry.tag = PathTag::CannotPasteSameDir;
            continue;
        }
        attempted += 1;

        let Some(name) = entry.path.file_name() else {
            report.fail(EntryFailure::new(&entry.path, "source has no file name"));
            continue;
        };
        let target = destination.join(name);
        if fs::symlink_metadata(&target).is_ok() {
            report.fail(EntryFailure::new(&target, "destination already exists"));
            continue;
        }

        match fs::rename(&entry.path, &target) {
            Ok(()) => {
                entry.tag = PathTag::MovedAlready;
                report.copied += 1;
            }
            Err(error) if is_cross_device_error(&error) => {
                if copy_then_remove(&mut report, &entry.path, destination, cancel)? {
                    entry.tag = PathTag::MovedAlready;
                }
            }
            Err(error) => report.fail(EntryFailure::new(&entry.path, error.to_string())),
        }
    }

    if attempted == 0 && !files.is_empty() {
        return Err(same_dir_error(destination));
    }
    report.into_result().map(|_| ())
}

fn remove_files(files: &PathSet, cancel: &CancellationToken) -> JobResult<()> {
    let mut last_error = None;
    for entry in files {
        match remove_tree(&entry.path, cancel) {
            Ok(()) => {}
            Err(JobError::Canceled) => return Err(JobError::Canceled),
            Err(error) => {
                tracing::warn!(path = %entry.path.display(), "remove failed: {error}");
                last_error = Some(error);
            }
        }
    }
    match last_error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

/// Picks `dir/name.tar.gz`, then `name1`, `name2`, ... when taken.
pub fn unique_archive_path(dir: &Path, name: &str) -> JobResult<PathBuf> {
    let name = if name.trim().is_empty() {
        DEFAULT_ARCHIVE_NAME
    } else {
        name.trim()
    };
    let lower = name.to_ascii_lowercase();
    let (stem, extension) = if lower.ends_with(".tgz") {
        (&name[..name.len() - 4], "tgz")
    } else if lower.ends_with(".tar.gz") {
        (&name[..name.len() - 7], ArchiveFormat::TarGz.extension())
    } else if lower.ends_with(".tar") {
        (&name[..name.len() - 4], ArchiveFormat::Tar.extension())
    } else {
        (name, ArchiveFormat::TarGz.extension())
    };

    for attempt in 0..ARCHIVE_NAME_ATTEMPTS {
        let candidate = if attempt == 0 {
            dir.join(format!("{stem}.{extension}"))
        } else {
            dir.join(format!("{stem}{attempt}.{extension}"))
        };
        if fs::symlink_metadata(&candidate).is_err() {
            return Ok(candidate);
        }
    }
    Err(JobError::CapacityExceeded {
        limit: ARCHIVE_NAME_ATTEMPTS,
    })
}

fn is_cross_device_error(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::CrossesDevices || error.raw_os_error() == Some(18)
}

#[derive(Debug)]
pub enum JobEvent {
    Started {
        id: JobId,
        kind: JobKind,
        remaining: usize,
    },
    Finished {
        id: JobId,
        kind: JobKind,
        outcome: JobOutcome,
        remaining: usize,
        /// Entries skipped because they were already in the destination.
        skipped: usize,
        dirs_changed: Vec<PathBuf>,
    },
}

impl JobEvent {
    pub fn id(&self) -> JobId {
        match self {
            Self::Started { id, .. } | Self::Finished { id, .. } => *id,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobTicket {
    pub id: JobId,
    pub kind: JobKind,
    pub summary: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobRecord {
    pub id: JobId,
    pub kind: JobKind,
    pub summary: String,
    pub status: JobStatus,
    pub last_error: Option<String>,
}

/// UI-side history of the jobs handed to the queue.
#[derive(Debug, Default)]
pub struct JobManager {
    jobs: Vec<JobRecord>,
    index_by_id: HashMap<JobId, usize>,
    remaining: usize,
}

impl JobManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, ticket: JobTicket) {
        self.index_by_id.insert(ticket.id, self.jobs.len());
        self.jobs.push(JobRecord {
            id: ticket.id,
            kind: ticket.kind,
            summary: ticket.summary,
            status: JobStatus::Queued,
            last_error: None,
        });
        self.remaining = self.remaining.saturating_add(1);
    }

    pub fn handle_event(&mut self, event: &JobEvent) {
        match event {
            JobEvent::Started { id, remaining, .. } => {
                self.remaining = *remaining;
                if let Some(job) = self.job_mut(*id) {
                    job.status = JobStatus::Running;
                    job.last_error = None;
                }
            }
            JobEvent::Finished {
                id,
                outcome,
                remaining,
                ..
            } => {
                self.remaining = *remaining;
                if let Some(job) = self.job_mut(*id) {
                    match outcome.error() {
                        None => {
                            job.status = JobStatus::Succeeded;
                            job.last_error = None;
                        }
                        Some(error) => {
                            job.status = JobStatus::Failed;
                            job.last_error = Some(error.to_string());
                        }
                    }
                }
            }
        }
    }

    /// Drops everything still queued, as after an abandon.
    pub fn discard_queued(&mut self) {
        for job in &mut self.jobs {
            if matches!(job.status, JobStatus::Queued | JobStatus::Running) {
                job.status = JobStatus::Failed;
                job.last_error = Some(String::from(JOB_CANCELED_MESSAGE));
            }
        }
        self.remaining = 0;
    }

    pub fn status_counts(&self) -> JobStatusCounts {
        let mut counts = JobStatusCounts::default();
        for job in &self.jobs {
            match job.status {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Succeeded => counts.succeeded += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn jobs(&self) -> &[JobRecord] {
        &self.jobs
    }

    pub fn job(&self, id: JobId) -> Option<&JobRecord> {
        self.index_by_id.get(&id).and_then(|index| self.jobs.get(*index))
    }

    pub fn last_job(&self) -> Option<&JobRecord> {
        self.jobs.last()
    }

    fn job_mut(&mut self, id: JobId) -> Option<&mut JobRecord> {
        let index = *self.index_by_id.get(&id)?;
        self.jobs.get_mut(index)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct JobStatusCounts {
    pub queued: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}
