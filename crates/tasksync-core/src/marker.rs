//! Task-line marker grammar.
//!
//! ```text
//! task line := indent bullet ws+ "[" state "]" (ws+ [id-tag ws+] description)?
//! indent    := [ \t]*
//! bullet    := "-" | "*" | "+" | digit{1,9} ("." | ")")
//! state     := " " | "x" | "X"
//! id-tag    := "#" ( uuid | digit+ )
//! ```
//!
//! [`encode_line`] renders the canonical form
//! `{indent}{bullet} [{ |x}] #{id} {description}` and [`decode_line`] reads it
//! back to the same id and description. A new line whose description starts
//! with a `#digits` word is read as carrying that id (see [`decode_line`]).

use std::sync::OnceLock;

use regex::Regex;

use crate::record::RecordId;

pub const TASK_LINE_PATTERN: &str =
    r"^(?P<indent>[ \t]*)(?P<bullet>[-*+]|[0-9]{1,9}[.)])[ \t]+\[(?P<state>[ xX])\](?:[ \t]+(?P<body>[^\r\n]*))?$";

/// Record ids accepted in a tag: a UUID or a run of digits.
pub const ID_PATTERN: &str =
    r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}|[0-9]+";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskLine {
    pub indent: String,
    pub bullet: String,
    pub checked: bool,
    pub id: Option<RecordId>,
    pub description: String,
}

fn task_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(TASK_LINE_PATTERN).expect("task line regex"))
}

fn id_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"^#(?P<id>{})(?:[ \t]+(?P<rest>[^\r\n]*))?$", ID_PATTERN))
            .expect("id tag regex")
    })
}

fn id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(&format!("^(?:{})$", ID_PATTERN)).expect("id regex"))
}

/// Decode one line (without its line ending).
///
/// Returns `None` for ordinary text and for marker lines with an empty
/// description.
///
/// A leading `#digits` word is always taken as the id tag, so on a new line
/// `- [ ] #2024 plans` reads as id `2024` with description `plans`. When the
/// store does not know that id the line gets a new record and the rewrite
/// drops `#2024`. Write the word later in the line (`- [ ] plans #2024`) to
/// keep it; once a line carries its real tag, a `#digits` word after the tag
/// stays in the description.
pub fn decode_line(line: &str) -> Option<TaskLine> {
    let caps = task_line_regex().captures(line)?;
    let indent = caps.name("indent").map(|m| m.as_str()).unwrap_or_default();
    let bullet = caps.name("bullet").map(|m| m.as_str()).unwrap_or_default();
    let checked = caps
        .name("state")
        .map(|m| m.as_str().eq_ignore_ascii_case("x"))
        .unwrap_or(false);
    let body = caps.name("body").map(|m| m.as_str()).unwrap_or_default();

    let (id, rest) = match id_tag_regex().captures(body) {
        Some(tag) => (
            tag.name("id").map(|m| RecordId::new(m.as_str())),
            tag.name("rest").map(|m| m.as_str()).unwrap_or_default(),
        ),
        None => (None, body),
    };

    let description = normalize_description(rest);
    if description.is_empty() {
        return None;
    }

    Some(TaskLine {
        indent: indent.to_string(),
        bullet: bullet.to_string(),
        checked,
        id,
        description,
    })
}

pub fn encode_line(line: &TaskLine) -> String {
    let state = if line.checked { 'x' } else { ' ' };
    match &line.id {
        Some(id) => format!(
            "{}{} [{}] #{} {}",
            line.indent, line.bullet, state, id, line.description
        ),
        None => format!(
            "{}{} [{}] {}",
            line.indent, line.bullet, state, line.description
        ),
    }
}

/// Trim and collapse whitespace runs to single spaces.
pub fn normalize_description(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// True when `value` is a well-formed id tag body (digits or a UUID).
pub fn is_valid_id(value: &str) -> bool {
    id_regex().is_match(value)
}
