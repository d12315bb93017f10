use std::cmp::Ordering;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const PAGE_STEP: usize = 10;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ActivePanel {
    Left,
    Right,
}

impl ActivePanel {
    pub const fn index(self) -> usize {
        match self {
            Self::Left => 0,
            Self::Right => 1,
        }
    }

    pub const fn other(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }

    pub fn toggle(&mut self) {
        *self = self.other();
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileEntry {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
    pub is_parent: bool,
    pub is_symlink: bool,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

impl FileEntry {
    fn parent(path: PathBuf) -> Self {
        Self {
            name: String::from(".."),
            path,
            is_dir: true,
            is_parent: true,
            is_symlink: false,
            size: 0,
            modified: None,
        }
    }

    pub fn is_hidden(&self) -> bool {
        !self.is_parent && self.name.starts_with('.')
    }
}

/// One pane: a directory listing with a cursor.
#[derive(Clone, Debug)]
pub struct PanelState {
    pub cwd: PathBuf,
    pub entries: Vec<FileEntry>,
    pub cursor: usize,
    pub show_hidden: bool,
}

impl PanelState {
    pub fn new(cwd: PathBuf, show_hidden: bool) -> io::Result<Self> {
        let mut panel = Self {
            cwd,
            entries: Vec::new(),
            cursor: 0,
            show_hidden,
        };
        panel.refresh()?;
        Ok(panel)
    }

    /// Rereads the listing, keeping the cursor on the same name when it
    /// still exists.
    pub fn refresh(&mut self) -> io::Result<()> {
        let focused = self.selected_entry().map(|entry| entry.name.clone());
        self.entries = read_entries(&self.cwd, self.show_hidden)?;
        if let Some(name) = focused
            && let Some(index) = self.entries.iter().position(|entry| entry.name == name)
        {
            self.cursor = index;
        }
        self.clamp_cursor();
        Ok(())
    }

    pub fn shows(&self, dir: &Path) -> bool {
        self.cwd == dir
    }

    pub fn toggle_hidden(&mut self) -> io::Result<bool> {
        self.show_hidden = !self.show_hidden;
        self.refresh()?;
        Ok(self.show_hidden)
    }

    pub fn move_cursor(&mut self, delta: isize) {
        if self.entries.is_empty() {
            self.cursor = 0;
            return;
        }

        let last = self.entries.len() - 1;
        self.cursor = if delta.is_negative() {
            self.cursor.saturating_sub(delta.unsigned_abs())
        } else {
            self.cursor.saturating_add(delta.unsigned_abs()).min(last)
        };
    }

    pub fn move_cursor_page(&mut self, pages: isize) {
        self.move_cursor(pages.saturating_mul(PAGE_STEP as isize));
    }

    pub fn move_cursor_home(&mut self) {
        self.cursor = 0;
    }

    pub fn move_cursor_end(&mut self) {
        self.cursor = self.entries.len().saturating_sub(1);
    }

    pub fn selected_entry(&self) -> Option<&FileEntry> {
        self.entries.get(self.cursor)
    }

    pub fn open_selected_directory(&mut self) -> io::Result<bool> {
        let Some(entry) = self.selected_entry() else {
            return Ok(false);
        };
        if !entry.is_dir {
            return Ok(false);
        }
        if entry.is_parent {
            return self.go_parent();
        }

        let target = entry.path.clone();
        self.change_dir(target)?;
        Ok(true)
    }

    pub fn go_parent(&mut self) -> io::Result<bool> {
        let Some(parent) = self.cwd.parent().map(Path::to_path_buf) else {
            return Ok(false);
        };
        let child = self.cwd.file_name().map(|name| name.to_string_lossy().into_owned());

        self.change_dir(parent)?;
        if let Some(name) = child
            && let Some(index) = self.entries.iter().position(|entry| entry.name == name)
        {
            self.cursor = index;
        }
        Ok(true)
    }

    /// Switches to `dir`; on failure the panel keeps its old directory.
    pub fn change_dir(&mut self, dir: PathBuf) -> io::Result<()> {
        let entries = read_entries(&dir, self.show_hidden)?;
        self.cwd = dir;
        self.entries = entries;
        self.cursor = 0;
        Ok(())
    }

    /// Puts the cursor on the entry called `name`, if listed.
    pub fn focus_name(&mut self, name: &str) -> bool {
        match self.entries.iter().position(|entry| entry.name == name) {
            Some(index) => {
                self.cursor = index;
                true
            }
            None => false,
        }
    }

    fn clamp_cursor(&mut self) {
        if self.entries.is_empty() {
            self.cursor = 0;
        } else if self.cursor >= self.entries.len() {
            self.cursor = self.entries.len() - 1;
        }
    }
}

fn read_entries(dir: &Path, show_hidden: bool) -> io::Result<Vec<FileEntry>> {
    let mut entries = Vec::new();
    for entry_result in fs::read_dir(dir)? {
        let entry = entry_result?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !show_hidden && name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        let file_type = entry.file_type()?;
        let is_symlink = file_type.is_symlink();
        // Symlinked directories list as directories; walkers still treat them as links.
        let is_dir = if is_symlink {
            fs::metadata(&path).is_ok_and(|meta| meta.is_dir())
        } else {
            file_type.is_dir()
        };
        let metadata = entry.metadata().ok();
        let size = match &metadata {
            Some(meta) if !is_dir => meta.len(),
            _ => 0,
        };
        let modified = metadata.as_ref().and_then(|meta| meta.modified().ok());
        entries.push(FileEntry {
            name,
            path,
            is_dir,
            is_parent: false,
            is_symlink,
            size,
            modified,
        });
    }

    entries.sort_by(|left, right| match (left.is_dir, right.is_dir) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => left
            .name
            .to_lowercase()
            .cmp(&right.name.to_lowercase())
            .then_with(|| left.name.cmp(&right.name)),
    });

    if let Some(parent) = dir.parent() {
        entries.insert(0, FileEntry::parent(parent.to_path_buf()));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn make_temp_dir(label: &str) -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();
        let root = env::temp_dir().join(format!("dfm-panel-{label}-{stamp}"));
        fs::create_dir_all(&root).expect("must create temp root");
        root
    }

    fn names(panel: &PanelState) -> Vec<&str> {
        panel.entries.iter().map(|entry| entry.name.as_str()).collect()
    }

    #[test]
    fn toggle_panel_flips_between_left_and_right() {
        let mut panel = ActivePanel::Left;
        panel.toggle();
        assert_eq!(panel, ActivePanel::Right);
        assert_eq!(panel.other(), ActivePanel::Left);
    }

    #[test]
    fn listing_puts_parent_then_directories_then_files() {
        let root = make_temp_dir("order");
        fs::create_dir(root.join("zeta")).expect("dir");
        fs::create_dir(root.join("Alpha")).expect("dir");
        fs::write(root.join("b.txt"), "b").expect("file");
        fs::write(root.join("a.txt"), "a").expect("file");
        fs::write(root.join(".hidden"), "h").expect("file");

        let mut panel = PanelState::new(root.clone(), false).expect("panel should load");
        assert_eq!(names(&panel), vec!["..", "Alpha", "zeta", "a.txt", "b.txt"]);

        assert!(panel.toggle_hidden().expect("reread"));
        assert!(names(&panel).contains(&".hidden"));

        fs::remove_dir_all(&root).expect("must remove temp tree");
    }

    #[test]
    fn move_cursor_stays_in_bounds() {
        let root = make_temp_dir("cursor");
        fs::write(root.join("only.txt"), "x").expect("file");
        let mut panel = PanelState::new(root.clone(), false).expect("panel should load");

        panel.move_cursor(-1);
        assert_eq!(panel.cursor, 0);
        panel.move_cursor(99);
        assert_eq!(panel.cursor, 1);
        panel.move_cursor_page(-1);
        assert_eq!(panel.cursor, 0);
        panel.move_cursor_end();
        assert_eq!(panel.selected_entry().map(|entry| entry.name.as_str()), Some("only.txt"));

        fs::remove_dir_all(&root).expect("must remove temp tree");
    }

    #[test]
    fn entering_and_leaving_directories_restores_focus() {
        let root = make_temp_dir("nav");
        fs::create_dir(root.join("inner")).expect("dir");
        fs::write(root.join("inner/file.txt"), "f").expect("file");
        let mut panel = PanelState::new(root.clone(), false).expect("panel should load");

        assert!(panel.focus_name("inner"));
        assert!(panel.open_selected_directory().expect("enter"));
        assert_eq!(panel.cwd, root.join("inner"));
        assert_eq!(names(&panel), vec!["..", "file.txt"]);

        assert!(panel.go_parent().expect("leave"));
        assert_eq!(panel.cwd, root);
        assert_eq!(panel.selected_entry().map(|entry| entry.name.as_str()), Some("inner"));

        fs::remove_dir_all(&root).expect("must remove temp tree");
    }

    #[test]
    fn refresh_keeps_cursor_on_the_same_name() {
        let root = make_temp_dir("refresh");
        fs::write(root.join("b.txt"), "b").expect("file");
        let mut panel = PanelState::new(root.clone(), false).expect("panel should load");
        assert!(panel.focus_name("b.txt"));

        fs::write(root.join("a.txt"), "a").expect("file");
        panel.refresh().expect("reread");
        assert_eq!(panel.selected_entry().map(|entry| entry.name.as_str()), Some("b.txt"));

        fs::remove_dir_all(&root).expect("must remove temp tree");
    }

    #[test]
    fn failed_change_dir_keeps_old_listing() {
        let root = make_temp_dir("bad-cd");
        let mut panel = PanelState::new(root.clone(), false).expect("panel should load");
        assert!(panel.change_dir(root.join("missing")).is_err());
        assert_eq!(panel.cwd, root);

        fs::remove_dir_all(&root).expect("must remove temp tree");
    }
}
