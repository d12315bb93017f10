use std::io;
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::error::JobResult;
use crate::walker::{SearchRequest, SearchResults, search_tree};

#[derive(Debug)]
pub enum SearchEvent {
    Finished {
        root: PathBuf,
        prefix: String,
        result: JobResult<SearchResults>,
    },
}

/// Runs one search on a short-lived thread, outside the job queue.
pub fn spawn_search(
    request: SearchRequest,
    cancel: CancellationToken,
    events: Sender<SearchEvent>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(String::from("dfm-search"))
        .spawn(move || {
            let started = Instant::now();
            let result = search_tree(&request, &cancel);
            tracing::debug!(
                root = %request.root.display(),
                prefix = %request.prefix,
                matches = result.as_ref().map_or(0, |found| found.matches.len()),
                elapsed_ms = started.elapsed().as_millis(),
                "search finished"
            );
            let event = SearchEvent::Finished {
                root: request.root,
                prefix: request.prefix,
                result,
            };
            if events.send(event).is_err() {
                tracing::warn!("search event receiver is gone");
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;
    use std::sync::mpsc;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    #[test]
    fn search_thread_posts_its_results() {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();
        let root = env::temp_dir().join(format!("dfm-search-thread-{stamp}"));
        fs::create_dir_all(root.join("nested")).expect("tree should be creatable");
        fs::write(root.join("nested/needle.txt"), "n").expect("file should be writable");

        let (event_tx, event_rx) = mpsc::channel();
        let handle = spawn_search(
            SearchRequest {
                root: root.clone(),
                prefix: String::from("needle"),
                archive_aware: false,
                capacity: 10,
            },
            CancellationToken::new(),
            event_tx,
        )
        .expect("search thread should spawn");

        let SearchEvent::Finished {
            root: searched,
            result,
            ..
        } = event_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("search should report");
        handle.join().expect("search thread should exit cleanly");

        assert_eq!(searched, root);
        let results = result.expect("search should succeed");
        assert_eq!(results.matches.len(), 1);
        assert!(results.matches[0].path.ends_with("needle.txt"));

        fs::remove_dir_all(&root).expect("temp tree should be removable");
    }
}
