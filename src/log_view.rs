//! Bounded client-side view of the server's results log.
//!
//! The server log is append-only and unbounded; the client only ever renders the newest
//! [`LOG_WINDOW`] entries, replacing the whole set on each snapshot.

use crate::model::LogEntry;

pub const LOG_WINDOW: usize = 50;

#[derive(Debug, Clone, Default)]
pub struct LogWindow {
    entries: Vec<LogEntry>,
    /// Length of the server log the current window was cut from.
    total: usize,
}

impl LogWindow {
    /// Replace the rendered set with the tail of `log`. Returns true when the view changed.
    pub fn reconcile(&mut self, log: &[LogEntry]) -> bool {
        let start = log.len().saturating_sub(LOG_WINDOW);
        let tail = &log[start..];
        if self.total == log.len() && self.entries.as_slice() == tail {
            return false;
        }
        self.entries = tail.to_vec();
        self.total = log.len();
        true
    }

    /// Adopt a window already cut elsewhere, e.g. from a `LogUpdated` event.
    pub fn mirror(&mut self, entries: Vec<LogEntry>, total: usize) {
        let start = entries.len().saturating_sub(LOG_WINDOW);
        self.entries = entries;
        self.entries.drain(..start);
        self.total = total.max(self.entries.len());
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.total = 0;
    }

    /// First entry index to render so the newest entry sits on the last visible row.
    pub fn scroll_to_newest(&self, visible_rows: usize) -> usize {
        self.entries.len().saturating_sub(visible_rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LogKind;

    fn log(n: usize) -> Vec<LogEntry> {
        (0..n)
            .map(|i| LogEntry {
                timestamp: format!("12:00:{:02}", i % 60),
                message: format!("row {i}"),
                kind: if i % 3 == 0 { LogKind::Error } else { LogKind::Success },
            })
            .collect()
    }

    #[test]
    fn keeps_last_fifty_in_order() {
        let full = log(200);
        let mut w = LogWindow::default();
        assert!(w.reconcile(&full));
        assert_eq!(w.entries().len(), 50);
        assert_eq!(w.entries(), &full[150..]);
        assert_eq!(w.entries()[0].message, "row 150");
        assert_eq!(w.entries()[49].message, "row 199");
        assert_eq!(w.total(), 200);
    }

    #[test]
    fn short_log_is_rendered_whole() {
        let mut w = LogWindow::default();
        w.reconcile(&log(3));
        assert_eq!(w.entries().len(), 3);
    }

    #[test]
    fn each_update_replaces_the_view() {
        let mut w = LogWindow::default();
        w.reconcile(&log(60));
        assert!(w.reconcile(&log(5)));
        assert_eq!(w.entries(), &log(5)[..]);
        assert!(!w.reconcile(&log(5)), "identical log is not a change");
    }

    #[test]
    fn mirrored_window_is_capped() {
        let mut w = LogWindow::default();
        w.mirror(log(60), 60);
        assert_eq!(w.entries().len(), 50);
        assert_eq!(w.entries()[0].message, "row 10");
        assert_eq!(w.total(), 60);
    }

    #[test]
    fn scroll_offset_pins_newest_entry() {
        let mut w = LogWindow::default();
        w.reconcile(&log(50));
        assert_eq!(w.scroll_to_newest(10), 40);
        assert_eq!(w.scroll_to_newest(80), 0);
        w.clear();
        assert_eq!(w.scroll_to_newest(10), 0);
    }
}
