use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::error::{JobError, JobResult};
use crate::jobs::{Job, JobEvent, JobId, JobOutcome, JobRequest, JobTicket};
use crate::path_set::{PathSet, PathTag, Toggled};

/// State both the UI thread and the worker touch, always under one lock.
#[derive(Debug, Default)]
struct QueueState {
    selection: PathSet,
    pending: VecDeque<Job>,
    current: Option<JobId>,
    /// Queued jobs plus the one executing.
    total: usize,
    next_id: u64,
    worker_running: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<QueueState>,
    cancel: CancellationToken,
    fatal: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShutdownMode {
    /// Let the worker drain the queue, then join it.
    Wait,
    /// Drop queued jobs and stop the running one at its next entry.
    Abandon,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ShutdownReport {
    pub discarded: usize,
    pub worker_joined: bool,
}

/// FIFO of jobs drained by at most one background worker thread.
///
/// Owned by the UI thread. Enqueueing spawns the worker only when none is
/// alive; a live worker picks new jobs up on its next iteration.
#[derive(Debug)]
pub struct JobQueue {
    shared: Arc<Shared>,
    events: Sender<JobEvent>,
    worker: Option<JoinHandle<()>>,
}

impl JobQueue {
    pub fn new(events: Sender<JobEvent>) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            events,
            worker: None,
        }
    }

    /// Selects or deselects `path`. Running out of memory raises the fatal
    /// quit flag.
    pub fn toggle_selection(&self, path: &Path) -> JobResult<Toggled> {
        let result = self.shared.lock().selection.insert(path);
        if let Err(error) = &result {
            if error.is_fatal() {
                self.shared.fatal.store(true, Ordering::SeqCst);
            }
        }
        result
    }

    pub fn is_selected(&self, path: &Path) -> bool {
        self.shared.lock().selection.contains(path)
    }

    pub fn selection_len(&self) -> usize {
        self.shared.lock().selection.len()
    }

    pub fn selection_has_tag(&self, tag: PathTag) -> bool {
        self.shared.lock().selection.has_tag(tag)
    }

    pub fn selection(&self) -> PathSet {
        self.shared.lock().selection.clone()
    }

    pub fn tag_selection(&self, tag: PathTag) -> usize {
        let mut state = self.shared.lock();
        state.selection.tag_all(tag);
        state.selection.len()
    }

    /// Empties the selection and returns how many entries it held.
    pub fn clear_selection(&self) -> usize {
        let mut state = self.shared.lock();
        let cleared = state.selection.len();
        state.selection.clear();
        cleared
    }

    /// Number of jobs queued or executing.
    pub fn total(&self) -> usize {
        self.shared.lock().total
    }

    pub fn is_busy(&self) -> bool {
        self.shared.lock().worker_running
    }

    pub fn fatal_quit_requested(&self) -> bool {
        self.shared.fatal.load(Ordering::SeqCst)
    }

    /// Builds a job from the live selection, emptying it in the same critical
    /// section.
    pub fn enqueue_selection(&mut self, request: JobRequest) -> JobResult<JobTicket> {
        let ticket = {
            let mut state = self.shared.lock();
            let files = PathSet::snapshot_and_clear(&mut state.selection);
            push_job(&mut state, request, files)
        };
        self.ensure_worker()?;
        Ok(ticket)
    }

    pub fn enqueue(&mut self, request: JobRequest, files: PathSet) -> JobResult<JobTicket> {
        let ticket = push_job(&mut self.shared.lock(), request, files);
        self.ensure_worker()?;
        Ok(ticket)
    }

    /// Appends several jobs at once; the worker cannot start any of them
    /// before all are queued.
    pub fn enqueue_all<I>(&mut self, jobs: I) -> JobResult<Vec<JobTicket>>
    where
        I: IntoIterator<Item = (JobRequest, PathSet)>,
    {
        let tickets = {
            let mut state = self.shared.lock();
            jobs.into_iter()
                .map(|(request, files)| push_job(&mut state, request, files))
                .collect()
        };
        self.ensure_worker()?;
        Ok(tickets)
    }

    fn ensure_worker(&mut self) -> JobResult<()> {
        {
            let mut state = self.shared.lock();
            if state.worker_running || state.pending.is_empty() {
                return Ok(());
            }
            state.worker_running = true;
        }

        // A previous worker has already released the queue; reap it.
        if let Some(previous) = self.worker.take() {
            if previous.join().is_err() {
                tracing::warn!("previous job worker panicked");
            }
        }

        let shared = Arc::clone(&self.shared);
        let events = self.events.clone();
        let spawned = thread::Builder::new()
            .name(String::from("dfm-worker"))
            .spawn(move || run_worker(shared, events));

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(error) => {
                let mut state = self.shared.lock();
                state.worker_running = false;
                let dropped = state.pending.len();
                state.pending.clear();
                state.total = state.total.saturating_sub(dropped);
                tracing::warn!(dropped, "failed to spawn job worker: {error}");
                Err(JobError::io(
                    "dfm-worker",
                    io::Error::new(error.kind(), format!("failed to spawn worker: {error}")),
                ))
            }
        }
    }

    /// Stops the worker according to `mode` and waits for its thread.
    pub fn shutdown(&mut self, mode: ShutdownMode) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        if mode == ShutdownMode::Abandon {
            self.shared.cancel.cancel();
            let mut state = self.shared.lock();
            report.discarded = state.pending.len();
            state.pending.clear();
            state.total = usize::from(state.current.is_some());
        }

        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::warn!("job worker panicked");
            }
            report.worker_joined = true;
        }
        tracing::debug!(
            ?mode,
            discarded = report.discarded,
            joined = report.worker_joined,
            "job queue shut down"
        );
        report
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.shutdown(ShutdownMode::Abandon);
        }
    }
}

fn push_job(state: &mut QueueState, request: JobRequest, files: PathSet) -> JobTicket {
    state.next_id = state.next_id.saturating_add(1);
    let job = Job::new(JobId(state.next_id), request, files);
    let ticket = JobTicket {
        id: job.id,
        kind: job.kind,
        summary: job.summary(),
    };
    state.pending.push_back(job);
    state.total = state.total.saturating_add(1);
    ticket
}

fn run_worker(shared: Arc<Shared>, events: Sender<JobEvent>) {
    loop {
        let (mut job, remaining) = {
            let mut state = shared.lock();
            if shared.cancel.is_cancelled() {
                state.pending.clear();
                state.current = None;
                state.total = 0;
                state.worker_running = false;
                return;
            }
            let Some(job) = state.pending.pop_front() else {
                state.total = 0;
                state.worker_running = false;
                return;
            };
            state.current = Some(job.id);
            (job, state.total)
        };

        let id = job.id;
        let kind = job.kind;
        send_event(&events, JobEvent::Started { id, kind, remaining });

        let started = Instant::now();
        job.outcome = JobOutcome::from(job.execute(&shared.cancel));
        tracing::debug!(
            job_id = %id,
            job_kind = kind.label(),
            succeeded = job.outcome.is_success(),
            elapsed_ms = started.elapsed().as_millis(),
            "job finished"
        );
        if job.outcome.error().is_some_and(JobError::is_fatal) {
            shared.fatal.store(true, Ordering::SeqCst);
        }

        let remaining = {
            let mut state = shared.lock();
            state.current = None;
            state.total = state.total.saturating_sub(1);
            state.total
        };
        let dirs_changed = job.changed_dirs();
        let skipped = job.skipped();
        send_event(
            &events,
            JobEvent::Finished {
                id,
                kind,
                outcome: job.outcome,
                remaining,
                skipped,
                dirs_changed,
            },
        );
    }
}

fn send_event(events: &Sender<JobEvent>, event: JobEvent) {
    if events.send(event).is_err() {
        tracing::warn!("job event receiver is gone");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn selection_toggles_and_snapshots_into_jobs() {
        let (event_tx, event_rx) = mpsc::channel();
        let mut queue = JobQueue::new(event_tx);

        let path = std::env::temp_dir().join("dfm-queue-never-created");
        assert_eq!(queue.toggle_selection(&path).expect("toggle"), Toggled::Added);
        assert!(queue.is_selected(&path));
        assert_eq!(queue.toggle_selection(&path).expect("toggle"), Toggled::Removed);
        assert_eq!(queue.selection_len(), 0);

        queue.toggle_selection(&path).expect("toggle");
        let ticket = queue
            .enqueue_selection(JobRequest::remove(std::env::temp_dir()))
            .expect("enqueue");
        assert_eq!(ticket.id, JobId(1));
        assert_eq!(ticket.summary, "remove 1 item(s)");
        assert_eq!(queue.selection_len(), 0);

        loop {
            let event = event_rx
                .recv_timeout(Duration::from_secs(5))
                .expect("worker should emit job events");
            if let JobEvent::Finished { outcome, .. } = event {
                assert!(outcome.error().is_some(), "missing path cannot be removed");
                break;
            }
        }
        queue.shutdown(ShutdownMode::Wait);
        assert_eq!(queue.total(), 0);
        assert!(!queue.is_busy());
    }

    #[test]
    fn empty_queue_never_spawns_a_worker() {
        let (event_tx, _event_rx) = mpsc::channel();
        let mut queue = JobQueue::new(event_tx);
        let tickets = queue.enqueue_all(Vec::new()).expect("nothing queued");
        assert!(tickets.is_empty());
        assert!(!queue.is_busy());
        let report = queue.shutdown(ShutdownMode::Wait);
        assert!(!report.worker_joined);
    }
}
