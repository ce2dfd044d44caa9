use serde::Serialize;

use crate::marker::{decode_line, TaskLine};
use crate::record::RecordId;

/// A task line found in a document, not yet reconciled with the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskCandidate {
    /// 0-based line position; only used to place the rewritten line.
    pub line_index: usize,
    pub description: String,
    pub external_id: Option<RecordId>,
    /// Original line text without its line ending.
    pub raw_line: String,
    pub indent: String,
    pub bullet: String,
    pub checked: bool,
}

impl TaskCandidate {
    fn from_task_line(line_index: usize, raw_line: &str, line: TaskLine) -> Self {
        Self {
            line_index,
            description: line.description,
            external_id: line.id,
            raw_line: raw_line.to_string(),
            indent: line.indent,
            bullet: line.bullet,
            checked: line.checked,
        }
    }

    /// Marker for this candidate carrying `id`, `checked` and `description`
    /// while keeping the line's indent and bullet.
    pub fn to_task_line(&self, id: RecordId, checked: bool, description: &str) -> TaskLine {
        TaskLine {
            indent: self.indent.clone(),
            bullet: self.bullet.clone(),
            checked,
            id: Some(id),
            description: description.to_string(),
        }
    }
}

/// Lazily parse every task line of `text`.
///
/// Never fails: lines that do not match the marker grammar, malformed marker
/// lines and lines inside fenced code blocks are skipped.
pub fn parse(text: &str) -> Candidates<'_> {
    Candidates {
        lines: Lines::new(text),
        fence: None,
    }
}

#[derive(Debug, Clone)]
pub struct Candidates<'a> {
    lines: Lines<'a>,
    fence: Option<Fence>,
}

impl Iterator for Candidates<'_> {
    type Item = TaskCandidate;

    fn next(&mut self) -> Option<TaskCandidate> {
        for (index, line, _ending) in self.lines.by_ref() {
            if let Some(open) = &self.fence {
                if open.is_closed_by(line) {
                    self.fence = None;
                }
                continue;
            }
            if let Some(fence) = Fence::open(line) {
                self.fence = Some(fence);
                continue;
            }
            if let Some(task) = decode_line(line) {
                return Some(TaskCandidate::from_task_line(index, line, task));
            }
        }
        None
    }
}

/// Splits text into `(index, line, ending)` where `ending` is `"\n"`,
/// `"\r\n"`, a lone `"\r"` or `""` for a final unterminated line. Concatenating every
/// `line` and `ending` gives back the input.
#[derive(Debug, Clone)]
pub(crate) struct Lines<'a> {
    rest: &'a str,
    index: usize,
}

impl<'a> Lines<'a> {
    pub(crate) fn new(text: &'a str) -> Self {
        Self {
            rest: text,
            index: 0,
        }
    }
}

impl<'a> Iterator for Lines<'a> {
    type Item = (usize, &'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        let (line, ending, rest) = match self.rest.find(|c: char| c == '\n' || c == '\r') {
            Some(pos) => {
                let end = if self.rest[pos..].starts_with("\r\n") {
                    pos + 2
                } else {
                    pos + 1
                };
                (&self.rest[..pos], &self.rest[pos..end], &self.rest[end..])
            }
            None => (self.rest, "", ""),
        };
        self.rest = rest;
        let index = self.index;
        self.index += 1;
        Some((index, line, ending))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Fence {
    marker: char,
    len: usize,
}

impl Fence {
    fn open(line: &str) -> Option<Fence> {
        let trimmed = line.trim_start();
        let marker = trimmed.chars().next().filter(|c| *c == '`' || *c == '~')?;
        let len = trimmed.chars().take_while(|c| *c == marker).count();
        if len < 3 {
            return None;
        }
        Some(Fence { marker, len })
    }

    fn is_closed_by(&self, line: &str) -> bool {
        let trimmed = line.trim();
        let len = trimmed.chars().take_while(|c| *c == self.marker).count();
        len >= self.len && len == trimmed.chars().count()
    }
}
