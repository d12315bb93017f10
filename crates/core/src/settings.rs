use crate::jobs::DEFAULT_ARCHIVE_NAME;
use crate::walker::SEARCH_CAPACITY;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Settings {
    pub jobs: JobSettings,
    pub search: SearchSettings,
    pub panels: PanelSettings,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobSettings {
    /// Ask whether to wait for or abandon live jobs on quit.
    pub confirm_quit: bool,
    pub archive_name: String,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            confirm_quit: true,
            archive_name: String::from(DEFAULT_ARCHIVE_NAME),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SearchSettings {
    pub capacity: usize,
    pub archive_aware: bool,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            capacity: SEARCH_CAPACITY,
            archive_aware: false,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PanelSettings {
    pub show_hidden: bool,
}
