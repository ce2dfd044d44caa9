#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use tasksync_core::store::{TaskwarriorOptions, TaskwarriorStore};
use tasksync_core::{sync, Scope, StoreError, SyncError, TaskStore};

const UUID: &str = "0f8fad5b-d9cb-469f-a165-70867728950e";

// Single-record stand-in for `task`: remembers the last added task and
// answers export/modify/done for it.
const FAKE_TASK: &str = r#"#!/bin/sh
dir="$(dirname "$0")"
echo "$*" >> "$dir/calls.log"
mode=""
desc=""
status=""
scope=""
after=0
for arg in "$@"; do
  if [ "$after" = 1 ]; then desc="$arg"; continue; fi
  case "$arg" in
    --) after=1 ;;
    add) mode=add ;;
    export) mode=export ;;
    modify) mode=modify ;;
    done) mode=done ;;
    status:*) status="${arg#status:}" ;;
    docpath:*) scope="${arg#docpath:}" ;;
  esac
done
write_state() {
  printf '[{"id":1,"uuid":"%s","description":"%s","status":"%s","docpath":"%s"}]\n' \
    "__UUID__" "$(cat "$dir/desc")" "$(cat "$dir/status")" "$(cat "$dir/scope")" > "$dir/state.json"
}
case "$mode" in
  add)
    if [ "$desc" = "REJECT ME" ]; then echo "Description rejected." >&2; exit 1; fi
    printf '%s' "$desc" > "$dir/desc"
    printf '%s' "$scope" > "$dir/scope"
    printf 'pending' > "$dir/status"
    write_state
    echo "Created task __UUID__."
    ;;
  export)
    if [ -f "$dir/state.json" ]; then cat "$dir/state.json"; else echo "[]"; fi
    ;;
  modify)
    if [ -n "$desc" ]; then printf '%s' "$desc" > "$dir/desc"; fi
    if [ -n "$status" ]; then printf '%s' "$status" > "$dir/status"; fi
    write_state
    ;;
  done)
    printf 'completed' > "$dir/status"
    write_state
    ;;
  *)
    echo "unsupported" >&2
    exit 2
    ;;
esac
"#;

fn fake_store(dir: &Path) -> TaskwarriorStore {
    let script = dir.join("task.sh");
    fs::write(&script, FAKE_TASK.replace("__UUID__", UUID)).expect("write script");
    store_for(script)
}

fn store_for(script: PathBuf) -> TaskwarriorStore {
    TaskwarriorStore::new(TaskwarriorOptions {
        command: vec!["sh".to_string(), script.to_string_lossy().to_string()],
        ..TaskwarriorOptions::default()
    })
    .expect("store")
}

fn write_calls(dir: &Path) -> usize {
    fs::read_to_string(dir.join("calls.log"))
        .unwrap_or_default()
        .lines()
        .filter(|line| {
            line.split_whitespace()
                .any(|word| word == "add" || word == "modify" || word == "done")
        })
        .count()
}

#[test]
fn sync_creates_then_leaves_unchanged_document_alone() {
    let temp = TempDir::new().expect("tempdir");
    let mut store = fake_store(temp.path());
    let scope = Scope::new("notes/today.md");

    let first = sync("# Today\n- [ ] buy milk\n", &scope, &mut store).expect("first sync");
    assert_eq!(first.text, format!("# Today\n- [ ] #{} buy milk\n", UUID));
    assert_eq!(write_calls(temp.path()), 1);

    let second = sync(&first.text, &scope, &mut store).expect("second sync");
    assert_eq!(second.text, first.text);
    assert_eq!(write_calls(temp.path()), 1);
}

#[test]
fn edits_and_checkmarks_become_modify_and_done() {
    let temp = TempDir::new().expect("tempdir");
    let mut store = fake_store(temp.path());
    let scope = Scope::new("notes/today.md");
    sync("- [ ] buy milk\n", &scope, &mut store).expect("seed");

    let edited = format!("- [x] #{} buy oat milk\n", UUID);
    let outcome = sync(&edited, &scope, &mut store).expect("sync edit");

    assert_eq!(outcome.text, edited);
    let records = store.query(&scope).expect("query");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].description, "buy oat milk");
    assert!(records[0].status.is_completed());
    // add, modify, done
    assert_eq!(write_calls(temp.path()), 3);
}

#[test]
fn query_ignores_records_from_other_documents() {
    let temp = TempDir::new().expect("tempdir");
    let mut store = fake_store(temp.path());
    store
        .create(&Scope::new("notes/other.md"), "elsewhere")
        .expect("create");

    assert!(store
        .query(&Scope::new("notes/today.md"))
        .expect("query")
        .is_empty());
    assert_eq!(
        store.query(&Scope::new("notes/other.md")).expect("query").len(),
        1
    );
}

#[test]
fn refused_add_is_rejected() {
    let temp = TempDir::new().expect("tempdir");
    let mut store = fake_store(temp.path());

    let err = sync("- [ ] REJECT ME\n", &Scope::new("a.md"), &mut store).expect_err("rejected");

    match err {
        SyncError::Failed { source, .. } => match source {
            StoreError::Rejected(message) => assert!(message.contains("Description rejected")),
            other => panic!("unexpected store error: {other}"),
        },
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn broken_store_output_is_unavailable() {
    let temp = TempDir::new().expect("tempdir");
    let script = temp.path().join("task.sh");
    fs::write(&script, "#!/bin/sh\necho 'not json'\n").expect("write script");
    let store = store_for(script);

    let err = store.query(&Scope::new("a.md")).expect_err("malformed");
    assert!(matches!(err, StoreError::Unavailable(_)));

    let script = temp.path().join("failing.sh");
    fs::write(&script, "#!/bin/sh\necho 'database locked' >&2\nexit 1\n").expect("write script");
    let store = store_for(script);

    let err = store.query(&Scope::new("a.md")).expect_err("non-zero exit");
    match err {
        StoreError::Unavailable(message) => assert!(message.contains("database locked")),
        other => panic!("unexpected store error: {other}"),
    }
}

#[test]
fn update_of_unknown_uuid_is_not_found() {
    let temp = TempDir::new().expect("tempdir");
    let mut store = fake_store(temp.path());

    let err = store
        .update(&UUID.into(), "anything", None)
        .expect_err("nothing exported");
    assert!(matches!(err, StoreError::NotFound(_)));
}
