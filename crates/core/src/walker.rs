use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tokio_util::sync::CancellationToken;
use walkdir::{DirEntry, WalkDir};

use crate::error::{EntryFailure, JobError, JobResult};
use crate::path_set::PathSet;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

pub const SEARCH_CAPACITY: usize = 100;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WalkOrder {
    /// A directory is visited before anything below it.
    ParentsFirst,
    /// Everything below a directory is visited before the directory itself.
    ContentsFirst,
}

/// Depth-first physical walk of `root`.
///
/// Symlinks are reported, never followed (the root included), and the walk
/// stays on the filesystem `root` lives on. Entries that cannot be read are
/// handed to `visit` as errors so each algorithm decides whether they are
/// fatal. `cancel` is checked before every entry.
pub fn walk_tree<F>(
    root: &Path,
    order: WalkOrder,
    cancel: &CancellationToken,
    mut visit: F,
) -> JobResult<()>
where
    F: FnMut(JobResult<&DirEntry>) -> JobResult<ControlFlow<()>>,
{
    let walker = WalkDir::new(root)
        .follow_links(false)
        .follow_root_links(false)
        .same_file_system(true)
        .contents_first(order == WalkOrder::ContentsFirst);

    for item in walker {
        if cancel.is_cancelled() {
            return Err(JobError::Canceled);
        }
        let flow = match item {
            Ok(entry) => visit(Ok(&entry))?,
            Err(error) => {
                let path = error
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| root.to_path_buf());
                let source = error
                    .into_io_error()
                    .unwrap_or_else(|| io::Error::other("filesystem loop detected"));
                visit(Err(JobError::io(path, source)))?
            }
        };
        if flow.is_break() {
            break;
        }
    }
    Ok(())
}

/// Directory that entries of a walk rooted at `root` are made relative to.
///
/// Stripping the parent keeps the root's own name in every relative path, so
/// several roots copied or archived side by side keep their folder names.
fn walk_base(root: &Path) -> &Path {
    root.parent().unwrap_or(root)
}

fn relative_to<'a>(path: &'a Path, base: &Path) -> JobResult<&'a Path> {
    path.strip_prefix(base).map_err(|_| {
        JobError::io(
            path,
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("entry is outside of {}", base.display()),
            ),
        )
    })
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CopyReport {
    pub copied: usize,
    pub failures: Vec<EntryFailure>,
}

impl CopyReport {
    pub fn into_result(self) -> JobResult<usize> {
        match self.failures.last() {
            None => Ok(self.copied),
            Some(last) => Err(JobError::PartialFailure {
                failed: self.failures.len(),
                last: format!("{}: {}", last.path.display(), last.message),
            }),
        }
    }

    pub(crate) fn merge(&mut self, other: CopyReport) {
        self.copied += other.copied;
        self.failures.extend(other.failures);
    }

    pub(crate) fn fail(&mut self, failure: EntryFailure) {
        tracing::warn!(path = %failure.path.display(), "{}", failure.message);
        self.failures.push(failure);
    }
}

/// Recreates `src_root` (and everything below it) inside `dest_dir`.
///
/// A failing entry does not stop the walk; it is recorded in the report and
/// the remaining entries are still copied.
pub fn copy_tree(
    src_root: &Path,
    dest_dir: &Path,
    cancel: &CancellationToken,
) -> JobResult<CopyReport> {
    if dest_dir.starts_with(src_root) {
        return Err(JobError::io(
            src_root,
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot copy into itself: {}", dest_dir.display()),
            ),
        ));
    }

    let base = walk_base(src_root);
    let mut report = CopyReport::default();
    let mut directories = Vec::new();

    walk_tree(src_root, WalkOrder::ParentsFirst, cancel, |item| {
        let outcome = item.and_then(|entry| {
            let target = dest_dir.join(relative_to(entry.path(), base)?);
            copy_entry(entry, &target, &mut directories)
        });
        match outcome {
            Ok(()) => report.copied += 1,
            Err(error) => {
                let path = failure_path(&error).unwrap_or(src_root).to_path_buf();
                tracing::warn!(path = %path.display(), "copy entry failed: {error}");
                report.failures.push(EntryFailure::new(path, error.to_string()));
            }
        }
        Ok(ControlFlow::Continue(()))
    })?;

    // Directory modes are applied last so read-only directories can still be
    // filled, deepest first.
    for (target, permissions) in directories.into_iter().rev() {
        if let Err(source) = fs::set_permissions(&target, permissions) {
            tracing::warn!(path = %target.display(), "failed to apply directory mode: {source}");
            report
                .failures
                .push(EntryFailure::new(target, source.to_string()));
        }
    }

    Ok(report)
}

fn failure_path(error: &JobError) -> Option<&Path> {
    match error {
        JobError::Io { path, .. } | JobError::Permission { path } => Some(path),
        _ => None,
    }
}

fn copy_entry(
    entry: &DirEntry,
    target: &Path,
    directories: &mut Vec<(PathBuf, fs::Permissions)>,
) -> JobResult<()> {
    let source = entry.path();
    let metadata = entry
        .metadata()
        .map_err(|error| JobError::io(source, io::Error::other(error.to_string())))?;
    let file_type = entry.file_type();

    if file_type.is_dir() {
        match fs::create_dir(target) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists && target.is_dir() => {}
            Err(error) => return Err(JobError::io(target, error)),
        }
        directories.push((target.to_path_buf(), metadata.permissions()));
        return Ok(());
    }

    if file_type.is_symlink() {
        let link = fs::read_link(source).map_err(|error| JobError::io(source, error))?;
        return copy_symlink(&link, target).map_err(|error| JobError::io(target, error));
    }

    if file_type.is_file() {
        copy_file_contents(source, target, &metadata)?;
    } else if is_fifo(&file_type) {
        make_fifo(target, &metadata)?;
    } else {
        // Sockets and devices never reach open(); reading them can block forever.
        return Err(JobError::io(
            source,
            io::Error::new(io::ErrorKind::Unsupported, "unsupported file type"),
        ));
    }
    let modified = filetime::FileTime::from_last_modification_time(&metadata);
    filetime::set_file_mtime(target, modified).map_err(|error| JobError::io(target, error))
}

#[cfg(unix)]
fn is_fifo(file_type: &fs::FileType) -> bool {
    use std::os::unix::fs::FileTypeExt;
    file_type.is_fifo()
}

#[cfg(not(unix))]
fn is_fifo(_file_type: &fs::FileType) -> bool {
    false
}

/// Recreates a named pipe instead of opening it.
#[cfg(unix)]
fn make_fifo(target: &Path, metadata: &fs::Metadata) -> JobResult<()> {
    use nix::sys::stat::Mode;
    use std::os::unix::fs::PermissionsExt;

    let bits = metadata.permissions().mode() & 0o7777;
    let mode = Mode::from_bits_truncate(bits as nix::libc::mode_t);
    nix::unistd::mkfifo(target, mode)
        .map_err(|errno| JobError::io(target, io::Error::from(errno)))?;
    fs::set_permissions(target, metadata.permissions()).map_err(|error| JobError::io(target, error))
}

#[cfg(not(unix))]
fn make_fifo(target: &Path, _metadata: &fs::Metadata) -> JobResult<()> {
    Err(JobError::io(
        target,
        io::Error::new(io::ErrorKind::Unsupported, "unsupported file type"),
    ))
}

fn copy_file_contents(source: &Path, target: &Path, metadata: &fs::Metadata) -> JobResult<()> {
    let mut reader = File::open(source).map_err(|error| JobError::io(source, error))?;

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        options.mode(metadata.permissions().mode());
    }
    let mut writer = options
        .open(target)
        .map_err(|error| JobError::io(target, error))?;

    // io::copy picks copy_file_range/sendfile when both ends allow it and
    // otherwise loops over a fixed-size buffer.
    io::copy(&mut reader, &mut writer).map_err(|error| JobError::io(target, error))?;
    writer.flush().map_err(|error| JobError::io(target, error))?;
    fs::set_permissions(target, metadata.permissions()).map_err(|error| JobError::io(target, error))
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(link, target)
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, _target: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("symlink copy is not supported: {}", link.display()),
    ))
}

/// Removes `root` and everything below it, children before parents.
///
/// Every entry is attempted; the last failure, if any, is returned.
pub fn remove_tree(root: &Path, cancel: &CancellationToken) -> JobResult<()> {
    check_write_access(root)?;

    let mut last_error = None;
    walk_tree(root, WalkOrder::ContentsFirst, cancel, |item| {
        let result = item.and_then(|entry| {
            let path = entry.path();
            let removed = if entry.file_type().is_dir() {
                fs::remove_dir(path)
            } else {
                fs::remove_file(path)
            };
            removed.map_err(|error| JobError::io(path, error))
        });
        if let Err(error) = result {
            tracing::warn!("remove entry failed: {error}");
            last_error = Some(error);
        }
        Ok(ControlFlow::Continue(()))
    })?;

    match last_error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

fn check_write_access(root: &Path) -> JobResult<()> {
    let metadata = fs::symlink_metadata(root).map_err(|error| JobError::io(root, error))?;
    if metadata.file_type().is_symlink() {
        return Ok(());
    }

    #[cfg(unix)]
    {
        use nix::unistd::{AccessFlags, access};
        access(root, AccessFlags::W_OK).map_err(|_| JobError::Permission {
            path: root.to_path_buf(),
        })
    }
    #[cfg(not(unix))]
    {
        if metadata.permissions().readonly() {
            return Err(JobError::Permission {
                path: root.to_path_buf(),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
}

impl ArchiveFormat {
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Tar => "tar",
            Self::TarGz => "tar.gz",
        }
    }
}

enum ArchiveWriter {
    Plain(File),
    Gzip(GzEncoder<File>),
}

impl ArchiveWriter {
    fn finish(self) -> io::Result<()> {
        match self {
            Self::Plain(mut file) => file.flush(),
            Self::Gzip(encoder) => encoder.finish().and_then(|mut file| file.flush()),
        }
    }
}

impl Write for ArchiveWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(file) => file.write(buf),
            Self::Gzip(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(file) => file.flush(),
            Self::Gzip(encoder) => encoder.flush(),
        }
    }
}

/// Writes every root of `roots` into a new archive at `archive_path`.
///
/// Paths inside the archive keep each root's own folder name. A failed
/// archive is deleted rather than left truncated.
pub fn archive_tree(
    roots: &PathSet,
    archive_path: &Path,
    cancel: &CancellationToken,
) -> JobResult<usize> {
    let format = ArchiveFormat::detect(archive_path).unwrap_or(ArchiveFormat::TarGz);
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(archive_path)
        .map_err(|error| JobError::archive_io(archive_path, error))?;
    let writer = match format {
        ArchiveFormat::Tar => ArchiveWriter::Plain(file),
        ArchiveFormat::TarGz => ArchiveWriter::Gzip(GzEncoder::new(file, Compression::default())),
    };
    let mut builder = tar::Builder::new(writer);
    builder.follow_symlinks(false);

    let mut written = 0usize;
    let appended = roots.iter().try_for_each(|root| -> JobResult<()> {
        written += append_root(&mut builder, &root.path, archive_path, cancel)?;
        Ok(())
    });
    let result = match appended {
        Ok(()) => builder
            .into_inner()
            .and_then(ArchiveWriter::finish)
            .map_err(|error| JobError::archive_io(archive_path, error)),
        Err(error) => {
            drop(builder);
            Err(error)
        }
    };

    if let Err(error) = result {
        if let Err(remove_error) = fs::remove_file(archive_path) {
            tracing::warn!(
                path = %archive_path.display(),
                "failed to remove incomplete archive: {remove_error}"
            );
        }
        return Err(error);
    }
    Ok(written)
}

fn append_root<W: Write>(
    builder: &mut tar::Builder<W>,
    root: &Path,
    archive_path: &Path,
    cancel: &CancellationToken,
) -> JobResult<usize> {
    let base = walk_base(root);
    let mut written = 0usize;

    walk_tree(root, WalkOrder::ParentsFirst, cancel, |item| {
        let entry = item?;
        let path = entry.path();
        if path == archive_path {
            return Ok(ControlFlow::Continue(()));
        }
        let name = relative_to(path, base)?;
        if name.as_os_str().is_empty() {
            return Ok(ControlFlow::Continue(()));
        }

        let appended = if entry.file_type().is_dir() {
            builder.append_dir(name, path)
        } else {
            builder.append_path_with_name(path, name)
        };
        appended.map_err(|error| JobError::io(path, error))?;
        written += 1;
        Ok(ControlFlow::Continue(()))
    })?;

    Ok(written)
}

fn open_archive_reader(archive_path: &Path) -> JobResult<tar::Archive<Box<dyn Read>>> {
    let format = ArchiveFormat::detect(archive_path).ok_or_else(|| {
        JobError::archive(format!(
            "unsupported archive format: {}",
            archive_path.display()
        ))
    })?;
    let file = File::open(archive_path).map_err(|error| JobError::archive_io(archive_path, error))?;
    let reader: Box<dyn Read> = match format {
        ArchiveFormat::Tar => Box::new(file),
        ArchiveFormat::TarGz => Box::new(GzDecoder::new(file)),
    };
    Ok(tar::Archive::new(reader))
}

/// Unpacks every entry of `archive_path` below `dest_dir`.
///
/// The first entry that cannot be written aborts the extraction. Directory
/// entries are applied after everything else so their modes cannot block
/// their own contents.
pub fn extract_archive(
    archive_path: &Path,
    dest_dir: &Path,
    cancel: &CancellationToken,
) -> JobResult<usize> {
    let mut archive = open_archive_reader(archive_path)?;
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    archive.set_unpack_xattrs(true);

    let entries = archive
        .entries()
        .map_err(|error| JobError::archive_io(archive_path, error))?;
    let mut directories = Vec::new();
    let mut extracted = 0usize;

    for entry in entries {
        if cancel.is_cancelled() {
            return Err(JobError::Canceled);
        }
        let entry = entry.map_err(|error| JobError::archive_io(archive_path, error))?;
        if entry.header().entry_type().is_dir() {
            directories.push(entry);
            continue;
        }
        unpack_entry(entry, dest_dir)?;
        extracted += 1;
    }

    directories.sort_by(|left, right| right.path_bytes().cmp(&left.path_bytes()));
    for directory in directories {
        unpack_entry(directory, dest_dir)?;
        extracted += 1;
    }

    Ok(extracted)
}

fn unpack_entry<R: Read>(mut entry: tar::Entry<'_, R>, dest_dir: &Path) -> JobResult<()> {
    let stored = entry
        .path()
        .map(|path| path.into_owned())
        .map_err(|error| JobError::archive(error.to_string()))?;
    let target = dest_dir.join(&stored);
    let unpacked = entry
        .unpack_in(dest_dir)
        .map_err(|error| JobError::io(&target, error))?;
    if !unpacked {
        return Err(JobError::archive(format!(
            "entry escapes destination: {}",
            stored.display()
        )));
    }
    Ok(())
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SearchMatch {
    /// Full path; directories end with a separator. Entries found inside an
    /// archive are `archive_path/internal_path`.
    pub path: String,
    pub is_dir: bool,
    pub archive: Option<PathBuf>,
}

impl SearchMatch {
    /// Directory a panel should open to show this match.
    pub fn containing_dir(&self) -> PathBuf {
        if let Some(archive) = &self.archive {
            return archive
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| archive.clone());
        }
        let path = PathBuf::from(self.path.trim_end_matches(std::path::MAIN_SEPARATOR));
        path.parent().map(Path::to_path_buf).unwrap_or(path)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SearchResults {
    pub matches: Vec<SearchMatch>,
    pub truncated: bool,
}

impl SearchResults {
    /// Records a match, or flags truncation when `capacity` is already used.
    fn record(&mut self, found: SearchMatch, capacity: usize) -> JobResult<ControlFlow<()>> {
        if self.matches.len() >= capacity {
            self.truncated = true;
            return Ok(ControlFlow::Break(()));
        }
        self.matches
            .try_reserve(1)
            .map_err(|_| JobError::Allocation)?;
        self.matches.push(found);
        Ok(ControlFlow::Continue(()))
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SearchRequest {
    pub root: PathBuf,
    pub prefix: String,
    pub archive_aware: bool,
    pub capacity: usize,
}

/// Finds entries below `request.root` whose file name starts with the prefix.
///
/// The root itself is never reported. Unreadable directories are skipped.
pub fn search_tree(request: &SearchRequest, cancel: &CancellationToken) -> JobResult<SearchResults> {
    let mut results = SearchResults::default();
    if request.prefix.is_empty() || request.capacity == 0 {
        return Ok(results);
    }

    walk_tree(&request.root, WalkOrder::ParentsFirst, cancel, |item| {
        let Ok(entry) = item else {
            return Ok(ControlFlow::Continue(()));
        };
        if entry.depth() == 0 {
            return Ok(ControlFlow::Continue(()));
        }

        let path = entry.path();
        if request.archive_aware
            && entry.file_type().is_file()
            && ArchiveFormat::detect(path).is_some()
        {
            match search_archive(path, &request.prefix, request.capacity, &mut results) {
                Ok(flow) => return Ok(flow),
                Err(JobError::Allocation) => return Err(JobError::Allocation),
                Err(error) => {
                    tracing::debug!(path = %path.display(), "archive not searchable: {error}");
                }
            }
        }

        let name = entry.file_name().to_string_lossy();
        if !name.starts_with(request.prefix.as_str()) {
            return Ok(ControlFlow::Continue(()));
        }
        let is_dir = entry.file_type().is_dir();
        let mut display = path.to_string_lossy().into_owned();
        if is_dir {
            display.push(std::path::MAIN_SEPARATOR);
        }
        results.record(
            SearchMatch {
                path: display,
                is_dir,
                archive: None,
            },
            request.capacity,
        )
    })?;

    Ok(results)
}

fn search_archive(
    archive_path: &Path,
    prefix: &str,
    capacity: usize,
    results: &mut SearchResults,
) -> JobResult<ControlFlow<()>> {
    let mut archive = open_archive_reader(archive_path)?;
    let entries = archive
        .entries()
        .map_err(|error| JobError::archive_io(archive_path, error))?;

    for entry in entries {
        let entry = entry.map_err(|error| JobError::archive_io(archive_path, error))?;
        let is_dir = entry.header().entry_type().is_dir();
        let internal = entry
            .path()
            .map_err(|error| JobError::archive(error.to_string()))?
            .to_string_lossy()
            .trim_end_matches('/')
            .to_string();
        let name = internal.rsplit('/').next().unwrap_or(internal.as_str());
        if !name.starts_with(prefix) {
            continue;
        }

        let mut display = format!("{}/{internal}", archive_path.to_string_lossy());
        if is_dir {
            display.push('/');
        }
        let flow = results.record(
            SearchMatch {
                path: display,
                is_dir,
                archive: Some(archive_path.to_path_buf()),
            },
            capacity,
        )?;
        if flow.is_break() {
            return Ok(flow);
        }
    }

    Ok(ControlFlow::Continue(()))
}
