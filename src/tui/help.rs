use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

fn key_line(key: &'static str, pad: usize, what: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(key, Style::default().fg(Color::Magenta)),
        Span::raw(" ".repeat(pad)),
        Span::raw(what),
    ])
}

pub fn draw_help(area: Rect, f: &mut Frame) {
    let p = Paragraph::new(vec![
        Line::from("Keybinds:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("q", Style::default().fg(Color::Magenta)),
            Span::raw(" / "),
            Span::styled("Ctrl-C", Style::default().fg(Color::Magenta)),
            Span::raw("  Quit (press twice while processing)"),
        ]),
        key_line("r", 11, "Start processing (re-upload if needed)"),
        key_line("s", 11, "Stop processing"),
        key_line("d", 11, "Download results"),
        key_line("y", 11, "Copy download link to clipboard"),
        key_line("tab", 9, "Switch tabs"),
        key_line("?", 11, "Show this help"),
        Line::from(""),
        Line::from("Columns:"),
        Line::from(
            "  Address, city, state and ZIP columns are picked from the CSV headers.",
        ),
        Line::from(
            "  Override them with --address-column, --city-column, --state-column, --zip-column.",
        ),
        Line::from(""),
        Line::from("Log:"),
        Line::from("  The newest 50 entries of the service log are shown, newest at the bottom."),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
