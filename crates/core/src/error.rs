use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Failure of one job, one tree walk, or one selection mutation.
///
/// Everything except [`JobError::Allocation`] is recoverable: the job that
/// produced it is marked failed and the queue moves on.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}: permission denied", path.display())]
    Permission { path: PathBuf },

    #[error("archive error: {reason}")]
    Archive { reason: String },

    #[error("too many entries (limit {limit})")]
    CapacityExceeded { limit: usize },

    #[error("out of memory")]
    Allocation,

    #[error("{}", crate::JOB_CANCELED_MESSAGE)]
    Canceled,

    #[error("{failed} entries failed, last: {last}")]
    PartialFailure { failed: usize, last: String },
}

impl JobError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn archive(reason: impl Into<String>) -> Self {
        Self::Archive {
            reason: reason.into(),
        }
    }

    pub fn archive_io(path: &Path, source: io::Error) -> Self {
        Self::Archive {
            reason: format!("{}: {source}", path.display()),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Allocation)
    }
}

/// One entry a walk could not process while the walk itself went on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EntryFailure {
    pub path: PathBuf,
    pub message: String,
}

impl EntryFailure {
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

pub type JobResult<T> = Result<T, JobError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_allocation_is_fatal() {
        assert!(JobError::Allocation.is_fatal());
        assert!(!JobError::Canceled.is_fatal());
        assert!(!JobError::CapacityExceeded { limit: 3 }.is_fatal());
        assert!(
            !JobError::io("/tmp/x", io::Error::from(io::ErrorKind::NotFound)).is_fatal()
        );
    }

    #[test]
    fn io_error_message_names_path_and_reason() {
        let error = JobError::io(
            "/tmp/missing",
            io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
        );
        assert_eq!(error.to_string(), "/tmp/missing: No such file or directory");
    }
}
