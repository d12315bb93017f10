#![forbid(unsafe_code)]

use std::time::SystemTime;

use chrono::{DateTime, Local};
use dfm_core::{
    ActivePanel, AppState, DialogButtonFocus, DialogKind, DialogState, FileEntry, PanelState,
    PathSet, PathTag, Route, SearchResultsState,
};
use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{
    Block, Borders, Cell, Clear, List, ListItem, ListState, Paragraph, Row, Table, TableState,
};

const BASE: Style = Style::new().fg(Color::White).bg(Color::Blue);
const HEADER: Style = Style::new().fg(Color::Yellow).bg(Color::Blue);
const CURSOR: Style = Style::new().fg(Color::Black).bg(Color::Cyan);
const MARKED: Style = Style::new().fg(Color::Yellow).bg(Color::Blue).add_modifier(Modifier::BOLD);
const CUT: Style = Style::new().fg(Color::LightRed).bg(Color::Blue).add_modifier(Modifier::BOLD);
const STATUS: Style = Style::new().fg(Color::Black).bg(Color::Cyan);
const DIALOG: Style = Style::new().fg(Color::Black).bg(Color::Gray);
const DIALOG_FOCUS: Style = Style::new().fg(Color::White).bg(Color::Cyan);
const HINT: Style = Style::new().fg(Color::DarkGray).bg(Color::Gray);

pub fn render(frame: &mut Frame, state: &AppState) {
    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(1),
            Constraint::Length(1),
            Constraint::Length(1),
        ])
        .split(frame.area());

    let panel_areas = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(root[0]);

    // One lock for the whole frame instead of one per row.
    let selection = state.queue.selection();
    render_panel(
        frame,
        panel_areas[0],
        &state.panels[0],
        &selection,
        state.active_panel == ActivePanel::Left,
    );
    render_panel(
        frame,
        panel_areas[1],
        &state.panels[1],
        &selection,
        state.active_panel == ActivePanel::Right,
    );

    frame.render_widget(
        Paragraph::new(state.status_line.as_str()).style(STATUS),
        root[1],
    );
    frame.render_widget(Paragraph::new(state.jobs_line()).style(BASE), root[2]);

    match state.top_route() {
        Some(Route::Dialog(dialog)) => render_dialog(frame, dialog),
        Some(Route::SearchResults(results)) => render_search_results(frame, results),
        None => {}
    }
}

fn render_panel(
    frame: &mut Frame,
    area: Rect,
    panel: &PanelState,
    selection: &PathSet,
    active: bool,
) {
    let selected_here = panel
        .entries
        .iter()
        .filter(|entry| selection.contains(&entry.path))
        .count();
    let title = format!(
        " {} | selected:{}/{} ",
        panel.cwd.to_string_lossy(),
        selected_here,
        selection.len()
    );
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(if active { HEADER } else { BASE })
        .style(BASE);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    if panel.entries.is_empty() {
        frame.render_widget(Paragraph::new("<empty>").style(BASE), inner);
        return;
    }

    let rows: Vec<Row<'_>> = panel
        .entries
        .iter()
        .map(|entry| {
            let tag = selection.tag_of(&entry.path);
            Row::new(vec![
                Cell::from(entry_label(entry, tag)),
                Cell::from(size_label(entry)),
                Cell::from(format_modified(entry.modified)),
            ])
            .style(entry_style(entry, tag))
        })
        .collect();
    let header = Row::new(vec![
        Cell::from("Name"),
        Cell::from("Size"),
        Cell::from("Modify"),
    ])
    .style(HEADER);

    let table = Table::new(
        rows,
        [
            Constraint::Fill(1),
            Constraint::Length(10),
            Constraint::Length(12),
        ],
    )
    .header(header)
    .style(BASE)
    .highlight_style(if active { CURSOR } else { BASE })
    .column_spacing(1);

    let mut table_state = TableState::default();
    table_state.select(Some(panel.cursor));
    frame.render_stateful_widget(table, inner, &mut table_state);
}

fn entry_label(entry: &FileEntry, tag: Option<PathTag>) -> String {
    let marker = match tag {
        None => ' ',
        Some(PathTag::Cut) => '-',
        Some(_) => '*',
    };
    let label = if entry.is_parent {
        String::from("/..")
    } else if entry.is_dir {
        format!("/{}", entry.name)
    } else if entry.is_symlink {
        format!("@{}", entry.name)
    } else {
        entry.name.clone()
    };
    format!("{marker}{label}")
}

fn entry_style(entry: &FileEntry, tag: Option<PathTag>) -> Style {
    match tag {
        Some(PathTag::Cut) => CUT,
        Some(_) => MARKED,
        None if entry.is_dir => BASE.add_modifier(Modifier::BOLD),
        None if entry.is_hidden() => BASE.fg(Color::Gray),
        None => BASE,
    }
}

fn size_label(entry: &FileEntry) -> String {
    if entry.is_parent {
        String::from("UP--DIR")
    } else if entry.is_dir {
        String::from("DIR")
    } else {
        format_size(entry.size)
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["K", "M", "G", "T"];
    if bytes < 10_000 {
        return bytes.to_string();
    }
    let mut value = bytes as f64;
    let mut unit = "";
    for next in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }
    format!("{value:.1}{unit}")
}

fn format_modified(modified: Option<SystemTime>) -> String {
    modified
        .map(|time| {
            let local: DateTime<Local> = DateTime::from(time);
            local.format("%b %e %H:%M").to_string()
        })
        .unwrap_or_default()
}

fn render_dialog(frame: &mut Frame, dialog: &DialogState) {
    let area = centered_rect(frame.area(), 56, 9);
    frame.render_widget(Clear, area);

    let block = Block::default()
        .title(format!(" {} ", dialog.title))
        .borders(Borders::ALL)
        .style(DIALOG);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Length(3),
            Constraint::Length(1),
        ])
        .split(inner);

    match &dialog.kind {
        DialogKind::Confirm(confirm) => {
            frame.render_widget(
                Paragraph::new(confirm.message.as_str()).alignment(Alignment::Center),
                layout[0],
            );

            let button = |label: &str, focused: bool| {
                Span::styled(
                    format!(" [ {label} ] "),
                    if focused { DIALOG_FOCUS } else { DIALOG },
                )
            };
            let buttons = Line::from(vec![
                button(
                    &confirm.accept_label,
                    confirm.focus == DialogButtonFocus::Accept,
                ),
                Span::raw("  "),
                button(
                    &confirm.decline_label,
                    confirm.focus == DialogButtonFocus::Decline,
                ),
            ]);
            frame.render_widget(
                Paragraph::new(buttons).alignment(Alignment::Center),
                layout[1],
            );
            frame.render_widget(
                Paragraph::new("Enter accept | Tab switch | Esc cancel")
                    .style(HINT)
                    .alignment(Alignment::Center),
                layout[2],
            );
        }
        DialogKind::Input(input) => {
            frame.render_widget(Paragraph::new(input.prompt.as_str()), layout[0]);
            frame.render_widget(
                Paragraph::new(input.value.as_str()).block(
                    Block::default()
                        .borders(Borders::ALL)
                        .border_style(DIALOG_FOCUS),
                ),
                layout[1],
            );
            frame.render_widget(
                Paragraph::new("Enter accept | Backspace delete | Esc cancel").style(HINT),
                layout[2],
            );
        }
    }
}

fn render_search_results(frame: &mut Frame, results: &SearchResultsState) {
    let area = centered_rect(frame.area(), 96, 28);
    frame.render_widget(Clear, area);

    let title = format!(
        " Search '{}' in {} ({}{}) ",
        results.prefix,
        results.root.to_string_lossy(),
        results.results.matches.len(),
        if results.results.truncated { ", truncated" } else { "" }
    );
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .style(DIALOG);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(1)])
        .split(inner);

    let items: Vec<ListItem<'_>> = results
        .results
        .matches
        .iter()
        .map(|found| ListItem::new(found.path.as_str()))
        .collect();
    let list = List::new(items)
        .style(DIALOG)
        .highlight_style(DIALOG_FOCUS)
        .highlight_symbol(">> ");
    let mut state = ListState::default();
    if !results.results.matches.is_empty() {
        state.select(Some(results.cursor));
    }
    frame.render_stateful_widget(list, layout[0], &mut state);

    frame.render_widget(
        Paragraph::new("Enter locate | Up/Down move | Esc close").style(HINT),
        layout[1],
    );
}

fn centered_rect(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width.saturating_sub(2));
    let height = height.min(area.height.saturating_sub(2));

    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Fill(1),
            Constraint::Length(width),
            Constraint::Fill(1),
        ])
        .split(area);

    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Fill(1),
            Constraint::Length(height),
            Constraint::Fill(1),
        ])
        .split(horizontal[1]);

    vertical[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use dfm_core::{AppCommand, Settings};
    use ratatui::Terminal;
    use ratatui::backend::TestBackend;
    use std::env;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::mpsc;
    use std::time::UNIX_EPOCH;

    fn render_to_text(state: &AppState, width: u16, height: u16) -> String {
        let backend = TestBackend::new(width, height);
        let mut terminal = Terminal::new(backend).expect("test backend should initialize");
        terminal
            .draw(|frame| render(frame, state))
            .expect("render should succeed");
        let buffer = terminal.backend().buffer();
        let area = buffer.area;
        let mut out = String::new();
        for y in 0..area.height {
            for x in 0..area.width {
                out.push_str(buffer[(x, y)].symbol());
            }
            out.push('\n');
        }
        out
    }

    fn temp_root(label: &str) -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();
        let path = env::temp_dir().join(format!("dfm-ui-test-{label}-{stamp}"));
        fs::create_dir_all(&path).expect("temp root should be creatable");
        path
    }

    fn app(root: &std::path::Path) -> AppState {
        let (job_tx, _job_rx) = mpsc::channel();
        let (search_tx, _search_rx) = mpsc::channel();
        AppState::new(root.to_path_buf(), Settings::default(), job_tx, search_tx)
            .expect("app should initialize")
    }

    #[test]
    fn render_draws_both_panels_and_jobs_line() {
        let root = temp_root("panels");
        fs::write(root.join("entry.txt"), "demo").expect("file should be creatable");
        let state = app(&root);
        let frame = render_to_text(&state, 100, 20);
        assert!(frame.contains("entry.txt"), "frame should list panel entries");
        assert!(frame.contains("jobs: 0 remaining"), "frame should show the jobs line");
        fs::remove_dir_all(root).expect("temp root should be removable");
    }

    #[test]
    fn render_marks_selected_entries_and_dialogs() {
        let root = temp_root("marks");
        fs::write(root.join("picked.txt"), "p").expect("file should be creatable");
        let mut state = app(&root);
        assert!(state.active_panel_mut().focus_name("picked.txt"));
        state
            .apply(AppCommand::ToggleSelect)
            .expect("select should apply");
        let frame = render_to_text(&state, 100, 20);
        assert!(frame.contains("*picked.txt"), "selected entry should be marked");

        state
            .apply(AppCommand::RemoveSelection)
            .expect("remove prompt should open");
        let frame = render_to_text(&state, 100, 20);
        assert!(frame.contains("Remove 1 item(s)?"));
        assert!(frame.contains("[ Yes ]"));
        fs::remove_dir_all(root).expect("temp root should be removable");
    }

    #[test]
    fn large_sizes_are_abbreviated() {
        assert_eq!(format_size(512), "512");
        assert_eq!(format_size(2 * 1024 * 1024), "2.0M");
    }
}
