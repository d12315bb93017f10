use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::Settings;

/// `$HOME/.config/dfm/settings.ini`, when `HOME` is set.
pub fn settings_path() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .map(|home| home.join(".config/dfm/settings.ini"))
}

/// Reads settings from `path`; a missing file yields the defaults.
pub fn load_settings(path: Option<&Path>) -> io::Result<Settings> {
    let mut settings = Settings::default();
    let Some(path) = path else {
        return Ok(settings);
    };

    match fs::read_to_string(path) {
        Ok(source) => apply_settings_ini(&mut settings, &source),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no settings file, using defaults");
        }
        Err(error) => return Err(error),
    }
    Ok(settings)
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_ini_section_name(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.starts_with('[') && line.ends_with(']') {
        return Some(line[1..line.len() - 1].trim());
    }
    None
}

pub fn apply_settings_ini(settings: &mut Settings, source: &str) {
    let mut section = String::new();

    for (index, raw_line) in source.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(section_name) = parse_ini_section_name(line) {
            section = section_name.to_ascii_lowercase();
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            tracing::warn!(line = index + 1, "ignoring settings line without '='");
            continue;
        };
        let key = raw_key.trim().to_ascii_lowercase();
        let value = raw_value.trim();

        let applied = match (section.as_str(), key.as_str()) {
            ("jobs", "confirm_quit") => {
                parse_bool(value).map(|parsed| settings.jobs.confirm_quit = parsed)
            }
            ("jobs", "archive_name") => (!value.is_empty())
                .then(|| settings.jobs.archive_name = value.to_string()),
            ("search", "capacity") => value
                .parse::<usize>()
                .ok()
                .map(|parsed| settings.search.capacity = parsed.max(1)),
            ("search", "archive_aware") => {
                parse_bool(value).map(|parsed| settings.search.archive_aware = parsed)
            }
            ("panels", "show_hidden") => {
                parse_bool(value).map(|parsed| settings.panels.show_hidden = parsed)
            }
            _ => Some(()),
        };

        if applied.is_none() {
            tracing::warn!(
                line = index + 1,
                section = %section,
                key = %key,
                value,
                "malformed settings value, keeping default"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn ini_values_override_defaults() {
        let mut settings = Settings::default();
        apply_settings_ini(
            &mut settings,
            "\
# comment
[Jobs]
confirm_quit = no
archive_name = backup

[search]
capacity=25
archive_aware=on

; another comment
[panels]
show_hidden=1
",
        );
        assert!(!settings.jobs.confirm_quit);
        assert_eq!(settings.jobs.archive_name, "backup");
        assert_eq!(settings.search.capacity, 25);
        assert!(settings.search.archive_aware);
        assert!(settings.panels.show_hidden);
    }

    #[test]
    fn malformed_and_unknown_values_keep_defaults() {
        let mut settings = Settings::default();
        apply_settings_ini(
            &mut settings,
            "[search]\ncapacity=lots\nunknown=1\n[jobs]\nconfirm_quit=maybe\n",
        );
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn missing_file_loads_defaults() {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();
        let path = env::temp_dir().join(format!("dfm-missing-settings-{stamp}.ini"));
        let settings = load_settings(Some(&path)).expect("missing file is not an error");
        assert_eq!(settings, Settings::default());
        assert_eq!(
            load_settings(None).expect("no path is not an error"),
            Settings::default()
        );
    }

    #[test]
    fn load_settings_reads_file_from_disk() {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();
        let path = env::temp_dir().join(format!("dfm-settings-{stamp}.ini"));
        fs::write(&path, "[search]\ncapacity=7\n").expect("test ini should be written");

        let settings = load_settings(Some(&path)).expect("settings should load");
        assert_eq!(settings.search.capacity, 7);

        fs::remove_file(&path).expect("test ini should be removed");
    }
}
