use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::parser::TaskCandidate;
use crate::record::{RecordId, Scope, StoreRecord, TaskStatus};
use crate::store::{StoreError, TaskStore};
use crate::sync::HostError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreOperation {
    Query,
    Create,
    Update,
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreOperation::Query => "query",
            StoreOperation::Create => "create",
            StoreOperation::Update => "update",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{operation} failed{}: {source}", describe_candidate(.line, .description))]
    Failed {
        operation: StoreOperation,
        /// 1-based line of the candidate being written; `None` for the query.
        line: Option<usize>,
        description: Option<String>,
        /// Writes that completed before the failure. They are not rolled back.
        progress: SyncReport,
        #[source]
        source: StoreError,
    },
    #[error("document host error: {0}")]
    Host(#[from] HostError),
}

fn describe_candidate(line: &Option<usize>, description: &Option<String>) -> String {
    match (line, description) {
        (Some(line), Some(description)) => format!(" at line {} ({:?})", line, description),
        (Some(line), None) => format!(" at line {}", line),
        _ => String::new(),
    }
}

impl SyncError {
    fn failed(
        operation: StoreOperation,
        candidate: &TaskCandidate,
        progress: &SyncReport,
        source: StoreError,
    ) -> Self {
        SyncError::Failed {
            operation,
            line: Some(candidate.line_index + 1),
            description: Some(candidate.description.clone()),
            progress: progress.clone(),
            source,
        }
    }
}

/// What a sync will do (or did) to the store, by outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Lines whose id was unknown to the store and got a new record.
    pub replaced: usize,
}

impl SyncReport {
    pub fn writes(&self) -> usize {
        self.created + self.updated + self.replaced
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} replaced, {} unchanged",
            self.created, self.updated, self.replaced, self.unchanged
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlannedAction {
    /// Record already matches the line.
    Keep { record: StoreRecord },
    Update {
        record: StoreRecord,
        status: Option<TaskStatus>,
    },
    /// New record; `stale_id` is the unknown id the line carried, if any.
    Create {
        stale_id: Option<RecordId>,
        complete: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedTask {
    pub candidate: TaskCandidate,
    pub action: PlannedAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncPlan {
    pub scope: Scope,
    pub tasks: Vec<PlannedTask>,
}

impl SyncPlan {
    pub fn report(&self) -> SyncReport {
        let mut report = SyncReport::default();
        for task in &self.tasks {
            match &task.action {
                PlannedAction::Keep { .. } => report.unchanged += 1,
                PlannedAction::Update { .. } => report.updated += 1,
                PlannedAction::Create { stale_id: None, .. } => report.created += 1,
                PlannedAction::Create { stale_id: Some(_), .. } => report.replaced += 1,
            }
        }
        report
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Unchanged,
    Updated,
    Created,
    Replaced { stale_id: RecordId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncedTask {
    pub candidate: TaskCandidate,
    pub record: StoreRecord,
    pub outcome: Outcome,
}

/// Every candidate of one document paired with its post-sync record, in
/// line order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub scope: Scope,
    pub tasks: Vec<SyncedTask>,
}

impl SyncResult {
    pub fn report(&self) -> SyncReport {
        let mut report = SyncReport::default();
        for task in &self.tasks {
            match task.outcome {
                Outcome::Unchanged => report.unchanged += 1,
                Outcome::Updated => report.updated += 1,
                Outcome::Created => report.created += 1,
                Outcome::Replaced { .. } => report.replaced += 1,
            }
        }
        report
    }
}

/// Decide, without touching the store, what each candidate needs.
///
/// Ids are matched exactly; lines without an id always get a new record.
/// The first line carrying an id claims it, later lines with the same id are
/// treated like unknown ids.
pub fn plan(
    candidates: impl IntoIterator<Item = TaskCandidate>,
    scope: &Scope,
    existing: Vec<StoreRecord>,
) -> SyncPlan {
    let mut by_id: HashMap<RecordId, StoreRecord> = existing
        .into_iter()
        .map(|record| (record.id.clone(), record))
        .collect();
    let mut claimed: HashSet<RecordId> = HashSet::new();
    let mut candidates: Vec<TaskCandidate> = candidates.into_iter().collect();
    candidates.sort_by_key(|candidate| candidate.line_index);

    let mut tasks: Vec<PlannedTask> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let action = match &candidate.external_id {
            Some(id) => match by_id.remove(id) {
                Some(record) => {
                    claimed.insert(id.clone());
                    plan_existing(&candidate, record)
                }
                None => {
                    if claimed.contains(id) {
                        warn!(%id, line = candidate.line_index + 1, "duplicate task id, creating a new record");
                    } else {
                        warn!(%id, line = candidate.line_index + 1, "unknown task id, creating a new record");
                    }
                    PlannedAction::Create {
                        stale_id: Some(id.clone()),
                        complete: candidate.checked,
                    }
                }
            },
            None => PlannedAction::Create {
                stale_id: None,
                complete: candidate.checked,
            },
        };
        debug!(line = candidate.line_index + 1, ?action, "planned");
        tasks.push(PlannedTask { candidate, action });
    }

    SyncPlan {
        scope: scope.clone(),
        tasks,
    }
}

fn plan_existing(candidate: &TaskCandidate, record: StoreRecord) -> PlannedAction {
    let complete = candidate.checked && !record.status.is_completed();
    if record.description != candidate.description || complete {
        PlannedAction::Update {
            record,
            status: complete.then_some(TaskStatus::Completed),
        }
    } else {
        PlannedAction::Keep { record }
    }
}

/// Execute a plan against the store, one write at a time.
///
/// Stops at the first failing write. An update whose record disappeared
/// since the query falls back to a create.
pub fn apply<S: TaskStore + ?Sized>(plan: SyncPlan, store: &mut S) -> Result<SyncResult, SyncError> {
    let SyncPlan { scope, tasks } = plan;
    let mut progress = SyncReport::default();
    let mut synced = Vec::with_capacity(tasks.len());

    for PlannedTask { candidate, action } in tasks {
        let (record, outcome) = match action {
            PlannedAction::Keep { record } => {
                progress.unchanged += 1;
                (record, Outcome::Unchanged)
            }
            PlannedAction::Update { record, status } => {
                match store.update(&record.id, &candidate.description, status) {
                    Ok(updated) => {
                        progress.updated += 1;
                        (updated, Outcome::Updated)
                    }
                    Err(StoreError::NotFound(stale_id)) => {
                        warn!(id = %stale_id, "record vanished before update, creating a new one");
                        let created = create_record(
                            store,
                            &scope,
                            &candidate,
                            candidate.checked,
                            &mut progress,
                            true,
                        )?;
                        (created, Outcome::Replaced { stale_id })
                    }
                    Err(source) => {
                        return Err(SyncError::failed(
                            StoreOperation::Update,
                            &candidate,
                            &progress,
                            source,
                        ))
                    }
                }
            }
            PlannedAction::Create { stale_id, complete } => {
                let created = create_record(
                    store,
                    &scope,
                    &candidate,
                    complete,
                    &mut progress,
                    stale_id.is_some(),
                )?;
                let outcome = match stale_id {
                    Some(stale_id) => Outcome::Replaced { stale_id },
                    None => Outcome::Created,
                };
                (created, outcome)
            }
        };
        synced.push(SyncedTask {
            candidate,
            record,
            outcome,
        });
    }

    Ok(SyncResult {
        scope,
        tasks: synced,
    })
}

fn create_record<S: TaskStore + ?Sized>(
    store: &mut S,
    scope: &Scope,
    candidate: &TaskCandidate,
    complete: bool,
    progress: &mut SyncReport,
    replaces: bool,
) -> Result<StoreRecord, SyncError> {
    let record = store
        .create(scope, &candidate.description)
        .map_err(|source| SyncError::failed(StoreOperation::Create, candidate, progress, source))?;
    if replaces {
        progress.replaced += 1;
    } else {
        progress.created += 1;
    }
    if !complete || record.status.is_completed() {
        return Ok(record);
    }
    store
        .update(&record.id, &record.description, Some(TaskStatus::Completed))
        .map_err(|source| SyncError::failed(StoreOperation::Update, candidate, progress, source))
}

/// Query the scope once and apply the resulting plan.
pub fn reconcile<S: TaskStore + ?Sized>(
    candidates: impl IntoIterator<Item = TaskCandidate>,
    scope: &Scope,
    store: &mut S,
) -> Result<SyncResult, SyncError> {
    let existing = query_scope(store, scope)?;
    apply(plan(candidates, scope, existing), store)
}

pub(crate) fn query_scope<S: TaskStore + ?Sized>(
    store: &S,
    scope: &Scope,
) -> Result<Vec<StoreRecord>, SyncError> {
    store.query(scope).map_err(|source| SyncError::Failed {
        operation: StoreOperation::Query,
        line: None,
        description: None,
        progress: SyncReport::default(),
        source,
    })
}
