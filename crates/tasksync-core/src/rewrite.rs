use std::collections::HashMap;

use crate::marker::encode_line;
use crate::parser::Lines;
use crate::reconcile::{SyncResult, SyncedTask};

/// Rebuild `original` with every synced line re-rendered.
///
/// Lines without a synced task, and every line ending, are copied as is.
pub fn rewrite(original: &str, result: &SyncResult) -> String {
    let by_line: HashMap<usize, &SyncedTask> = result
        .tasks
        .iter()
        .map(|task| (task.candidate.line_index, task))
        .collect();

    let mut out = String::with_capacity(original.len() + result.tasks.len() * 40);
    for (index, line, ending) in Lines::new(original) {
        match by_line.get(&index) {
            Some(task) => out.push_str(&render(task)),
            None => out.push_str(line),
        }
        out.push_str(ending);
    }
    out
}

/// Canonical text for one synced line: the line's own indent and bullet,
/// the record's state, id and description.
pub fn render(task: &SyncedTask) -> String {
    let line = task.candidate.to_task_line(
        task.record.id.clone(),
        task.record.status.is_completed(),
        &task.record.description,
    );
    encode_line(&line)
}
