use std::collections::VecDeque;

/// Bounded ring of previously entered lines. Once full, the oldest line is
/// dropped; numbering keeps counting from the first line ever entered.
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<String>,
    capacity: usize,
    total: usize,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        History { entries: VecDeque::with_capacity(capacity), capacity, total: 0 }
    }

    pub fn push(&mut self, line: &str) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(line.to_string());
        self.total += 1;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest first, paired with each line's 1-based number.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        let first = self.total - self.entries.len() + 1;
        self.entries.iter().enumerate().map(move |(i, line)| (first + i, line.as_str()))
    }
}
