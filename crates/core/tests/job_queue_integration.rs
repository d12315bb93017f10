#![forbid(unsafe_code)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dfm_core::{
    JobError, JobEvent, JobId, JobKind, JobManager, JobQueue, JobRequest, JobStatus, PathSet,
    ShutdownMode,
};

fn make_temp_dir(label: &str) -> PathBuf {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time should be monotonic")
        .as_nanos();
    let root = env::temp_dir().join(format!("dfm-queue-it-{label}-{stamp}"));
    fs::create_dir_all(&root).expect("temp root should be creatable");
    root
}

fn new_queue() -> (JobQueue, Receiver<JobEvent>) {
    let (event_tx, event_rx) = mpsc::channel();
    (JobQueue::new(event_tx), event_rx)
}

fn files(paths: &[PathBuf]) -> PathSet {
    paths.iter().cloned().collect()
}

fn next_finished(event_rx: &Receiver<JobEvent>, manager: &mut JobManager) -> JobEvent {
    loop {
        let event = event_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("worker should emit job events");
        manager.handle_event(&event);
        if matches!(event, JobEvent::Finished { .. }) {
            return event;
        }
    }
}

fn write_file(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("parent should be creatable");
    }
    fs::write(path, contents).expect("file should be writable");
}

#[test]
fn jobs_run_in_enqueue_order() {
    let root = make_temp_dir("fifo");
    let dest = root.join("dest");
    fs::create_dir_all(&dest).expect("dest should exist");
    let sources: Vec<PathBuf> = ["a", "b", "c"]
        .iter()
        .map(|name| root.join("src").join(format!("{name}.txt")))
        .collect();
    for source in &sources {
        write_file(source, "payload");
    }

    let (mut queue, event_rx) = new_queue();
    let mut manager = JobManager::new();
    for source in &sources {
        let ticket = queue
            .enqueue(JobRequest::paste(&dest), files(std::slice::from_ref(source)))
            .expect("job should queue");
        manager.track(ticket);
    }

    let order: Vec<JobId> = (0..3)
        .map(|_| next_finished(&event_rx, &mut manager).id())
        .collect();
    assert_eq!(order, vec![JobId(1), JobId(2), JobId(3)]);
    assert_eq!(manager.status_counts().succeeded, 3);
    for name in ["a.txt", "b.txt", "c.txt"] {
        assert!(dest.join(name).is_file(), "{name} should be pasted");
    }

    queue.shutdown(ShutdownMode::Wait);
    fs::remove_dir_all(&root).expect("temp tree should be removable");
}

#[test]
fn remaining_counter_drops_by_one_per_finished_job() {
    let root = make_temp_dir("counter");
    let (mut queue, event_rx) = new_queue();
    let batch = (0..101).map(|_| (JobRequest::paste(&root), PathSet::new()));
    let tickets = queue.enqueue_all(batch).expect("batch should queue");
    assert_eq!(tickets.len(), 101);

    let mut started = Vec::new();
    let mut finished = Vec::new();
    while finished.len() < 101 {
        match event_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("worker should emit job events")
        {
            JobEvent::Started { remaining, .. } => started.push(remaining),
            JobEvent::Finished {
                remaining, outcome, ..
            } => {
                assert!(outcome.is_success(), "empty paste should succeed");
                finished.push(remaining);
            }
        }
    }

    assert_eq!(started, (1..=101).rev().collect::<Vec<_>>());
    assert_eq!(finished, (0..101).rev().collect::<Vec<_>>());
    queue.shutdown(ShutdownMode::Wait);
    assert_eq!(queue.total(), 0);

    fs::remove_dir_all(&root).expect("temp tree should be removable");
}

#[test]
fn failed_job_does_not_stop_the_queue() {
    let root = make_temp_dir("keep-going");
    write_file(&root.join("src/ok.txt"), "ok");
    let dest = root.join("dest");
    fs::create_dir_all(&dest).expect("dest should exist");

    let (mut queue, event_rx) = new_queue();
    let mut manager = JobManager::new();
    manager.track(
        queue
            .enqueue(JobRequest::remove(&root), files(&[root.join("missing")]))
            .expect("remove should queue"),
    );
    manager.track(
        queue
            .enqueue(JobRequest::paste(&dest), files(&[root.join("src/ok.txt")]))
            .expect("paste should queue"),
    );

    let JobEvent::Finished { kind, outcome, .. } = next_finished(&event_rx, &mut manager) else {
        panic!("expected a finished event");
    };
    assert_eq!(kind, JobKind::Remove);
    assert!(outcome.error().is_some());

    let JobEvent::Finished {
        kind,
        outcome,
        dirs_changed,
        ..
    } = next_finished(&event_rx, &mut manager)
    else {
        panic!("expected a finished event");
    };
    assert_eq!(kind, JobKind::Paste);
    assert!(outcome.is_success());
    assert_eq!(dirs_changed, vec![dest.clone()]);

    let failed = manager.job(JobId(1)).expect("first job should be tracked");
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.last_error.is_some());

    queue.shutdown(ShutdownMode::Wait);
    fs::remove_dir_all(&root).expect("temp tree should be removable");
}

#[test]
fn selection_is_snapshotted_when_the_job_is_created() {
    let root = make_temp_dir("snapshot");
    write_file(&root.join("src/one.txt"), "1");
    write_file(&root.join("src/two.txt"), "2");
    write_file(&root.join("src/late.txt"), "3");
    let dest = root.join("dest");
    fs::create_dir_all(&dest).expect("dest should exist");

    let (mut queue, event_rx) = new_queue();
    let mut manager = JobManager::new();
    queue
        .toggle_selection(&root.join("src/one.txt"))
        .expect("select");
    queue
        .toggle_selection(&root.join("src/two.txt"))
        .expect("select");

    let ticket = queue
        .enqueue_selection(JobRequest::paste(&dest))
        .expect("job should queue");
    assert_eq!(ticket.summary, format!("paste 2 item(s) -> {}", dest.display()));
    assert_eq!(queue.selection_len(), 0);
    manager.track(ticket);

    queue
        .toggle_selection(&root.join("src/late.txt"))
        .expect("select");
    next_finished(&event_rx, &mut manager);

    assert!(dest.join("one.txt").is_file());
    assert!(dest.join("two.txt").is_file());
    assert!(!dest.join("late.txt").exists());
    assert!(queue.is_selected(&root.join("src/late.txt")));

    queue.shutdown(ShutdownMode::Wait);
    fs::remove_dir_all(&root).expect("temp tree should be removable");
}

#[test]
fn worker_is_respawned_after_draining() {
    let root = make_temp_dir("respawn");
    let (mut queue, event_rx) = new_queue();
    let mut manager = JobManager::new();

    manager.track(
        queue
            .enqueue(JobRequest::paste(&root), PathSet::new())
            .expect("first job should queue"),
    );
    next_finished(&event_rx, &mut manager);

    manager.track(
        queue
            .enqueue(JobRequest::paste(&root), PathSet::new())
            .expect("second job should queue"),
    );
    let second = next_finished(&event_rx, &mut manager);
    assert_eq!(second.id(), JobId(2));

    queue.shutdown(ShutdownMode::Wait);
    assert!(!queue.is_busy());
    fs::remove_dir_all(&root).expect("temp tree should be removable");
}

#[test]
fn wait_shutdown_drains_every_queued_job() {
    let root = make_temp_dir("wait");
    let (mut queue, event_rx) = new_queue();
    let batch = (0..5).map(|_| (JobRequest::paste(&root), PathSet::new()));
    queue.enqueue_all(batch).expect("batch should queue");

    let report = queue.shutdown(ShutdownMode::Wait);
    assert_eq!(report.discarded, 0);
    let finished = event_rx
        .try_iter()
        .filter(|event| matches!(event, JobEvent::Finished { .. }))
        .count();
    assert_eq!(finished, 5);
    assert_eq!(queue.total(), 0);

    fs::remove_dir_all(&root).expect("temp tree should be removable");
}

#[test]
fn abandon_shutdown_discards_queued_jobs() {
    let root = make_temp_dir("abandon");
    let source = root.join("big");
    for index in 0..400 {
        write_file(&source.join(format!("dir{}/file{index}.txt", index % 20)), "x");
    }
    let dest = root.join("dest");
    fs::create_dir_all(&dest).expect("dest should exist");

    let (mut queue, event_rx) = new_queue();
    let mut batch = vec![(JobRequest::paste(&dest), files(std::slice::from_ref(&source)))];
    batch.extend((0..5).map(|_| (JobRequest::paste(&root), PathSet::new())));
    queue.enqueue_all(batch).expect("batch should queue");

    let report = queue.shutdown(ShutdownMode::Abandon);
    assert!(report.worker_joined);
    let finished: Vec<JobEvent> = event_rx
        .try_iter()
        .filter(|event| matches!(event, JobEvent::Finished { .. }))
        .collect();
    assert_eq!(finished.len() + report.discarded, 6);
    assert!(report.discarded >= 5, "only the running job may finish");
    for event in &finished {
        if let JobEvent::Finished { outcome, .. } = event {
            assert!(outcome.is_success() || matches!(outcome.error(), Some(JobError::Canceled)));
        }
    }
    assert_eq!(queue.total(), 0);
    assert!(!queue.is_busy());

    fs::remove_dir_all(&root).expect("temp tree should be removable");
}

#[cfg(unix)]
#[test]
fn fifo_in_pasted_tree_neither_stalls_the_queue_nor_abandon() {
    use nix::sys::stat::Mode;
    use std::os::unix::fs::FileTypeExt;

    let root = make_temp_dir("fifo");
    let source = root.join("src");
    write_file(&source.join("a.txt"), "a");
    nix::unistd::mkfifo(source.join("pipe").as_path(), Mode::S_IRUSR | Mode::S_IWUSR)
        .expect("fifo should be creatable");
    let dest = root.join("dest");
    fs::create_dir_all(&dest).expect("dest should exist");

    let (mut queue, event_rx) = new_queue();
    let mut manager = JobManager::new();
    manager.track(
        queue
            .enqueue(JobRequest::paste(&dest), files(std::slice::from_ref(&source)))
            .expect("paste should queue"),
    );
    manager.track(
        queue
            .enqueue(JobRequest::paste(&root), PathSet::new())
            .expect("follow-up should queue"),
    );

    let JobEvent::Finished { outcome, .. } = next_finished(&event_rx, &mut manager) else {
        panic!("expected a finished event");
    };
    assert!(outcome.is_success(), "{:?}", outcome.error());
    let follow_up = next_finished(&event_rx, &mut manager);
    assert_eq!(follow_up.id(), JobId(2));
    assert!(
        fs::symlink_metadata(dest.join("src/pipe"))
            .expect("fifo should be recreated")
            .file_type()
            .is_fifo()
    );

    let (done_tx, done_rx) = mpsc::channel();
    let shutdown = std::thread::spawn(move || {
        let _ = done_tx.send(queue.shutdown(ShutdownMode::Abandon));
    });
    let report = done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("abandon should return");
    shutdown.join().expect("shutdown thread should not panic");
    assert_eq!(report.discarded, 0);

    fs::remove_dir_all(&root).expect("temp tree should be removable");
}
