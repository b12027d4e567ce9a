//! Session history with per-entry scroll offsets.

use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub url: Url,
    /// Vertical scroll offset saved when the entry was left.
    pub scroll_y: f64,
}

/// A linear back/forward stack. Pushing drops every forward entry.
#[derive(Debug, Clone)]
pub struct History {
    entries: Vec<HistoryEntry>,
    index: usize,
}

impl History {
    pub fn new(initial: Url) -> Self {
        Self { entries: vec![HistoryEntry { url: initial, scroll_y: 0.0 }], index: 0 }
    }

    pub fn current(&self) -> &HistoryEntry {
        &self.entries[self.index]
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, url: Url) {
        self.entries.truncate(self.index + 1);
        self.entries.push(HistoryEntry { url, scroll_y: 0.0 });
        self.index = self.entries.len() - 1;
    }

    /// Overwrite the current entry's URL, keeping its position and saved scroll.
    pub fn replace(&mut self, url: Url) {
        self.entries[self.index].url = url;
    }

    /// Record the scroll offset of the entry being left.
    pub fn save_scroll(&mut self, scroll_y: f64) {
        self.entries[self.index].scroll_y = scroll_y;
    }

    pub fn can_go_back(&self) -> bool {
        self.index > 0
    }

    pub fn can_go_forward(&self) -> bool {
        self.index + 1 < self.entries.len()
    }

    pub fn back(&mut self) -> Option<HistoryEntry> {
        if !self.can_go_back() {
            return None;
        }
        self.index -= 1;
        Some(self.current().clone())
    }

    pub fn forward(&mut self) -> Option<HistoryEntry> {
        if !self.can_go_forward() {
            return None;
        }
        self.index += 1;
        Some(self.current().clone())
    }
}
