use std::path::{Path, PathBuf};
use std::slice;

use crate::error::{JobError, JobResult};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum PathTag {
    #[default]
    None,
    Cut,
    MovedAlready,
    CannotPasteSameDir,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PathEntry {
    pub path: PathBuf,
    pub tag: PathTag,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Toggled {
    Added,
    Removed,
}

/// Insertion-ordered, duplicate-free list of paths.
///
/// Used for the live selection and for the files attached to a job. Order is
/// significant: jobs rebuild trees in the order entries were inserted.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PathSet {
    entries: Vec<PathEntry>,
}

impl PathSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Selects `path`, or deselects it when it is already present.
    pub fn insert(&mut self, path: impl Into<PathBuf>) -> JobResult<Toggled> {
        let path = path.into();
        if let Some(index) = self.position(&path) {
            self.entries.remove(index);
            return Ok(Toggled::Removed);
        }

        self.entries
            .try_reserve(1)
            .map_err(|_| JobError::Allocation)?;
        self.entries.push(PathEntry {
            path,
            tag: PathTag::None,
        });
        Ok(Toggled::Added)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.position(path).is_some()
    }

    pub fn tag_of(&self, path: &Path) -> Option<PathTag> {
        self.position(path).map(|index| self.entries[index].tag)
    }

    pub fn tag_all(&mut self, tag: PathTag) {
        for entry in &mut self.entries {
            entry.tag = tag;
        }
    }

    pub fn has_tag(&self, tag: PathTag) -> bool {
        self.entries.iter().any(|entry| entry.tag == tag)
    }

    /// Moves every entry out of `source` into a new set, leaving `source` empty.
    pub fn snapshot_and_clear(source: &mut PathSet) -> PathSet {
        std::mem::take(source)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> slice::Iter<'_, PathEntry> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> slice::IterMut<'_, PathEntry> {
        self.entries.iter_mut()
    }

    /// Visits entries in insertion order.
    pub fn for_each<F>(&self, f: F)
    where
        F: FnMut(&PathEntry),
    {
        self.entries.iter().for_each(f);
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(|entry| entry.path.as_path())
    }

    fn position(&self, path: &Path) -> Option<usize> {
        self.entries.iter().position(|entry| entry.path == path)
    }
}

impl<'a> IntoIterator for &'a PathSet {
    type Item = &'a PathEntry;
    type IntoIter = slice::Iter<'a, PathEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<PathBuf> for PathSet {
    fn from_iter<I: IntoIterator<Item = PathBuf>>(iter: I) -> Self {
        let mut set = PathSet::new();
        for path in iter {
            if !set.contains(&path) {
                set.entries.push(PathEntry {
                    path,
                    tag: PathTag::None,
                });
            }
        }
        set
    }
}
