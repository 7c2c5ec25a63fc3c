//! Invocation Service
//!
//! Starts one pipeline invocation per accepted event and keeps every
//! invocation's latest report and logs in memory. A push supersedes any
//! invocation still running for an earlier push to the same branch.
//!
//! Only the newest finished invocations are retained; older ones are
//! dropped when a new event is accepted. Running invocations are never
//! dropped.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use sluice_core::domain::event::{Event, EventKind};
use sluice_core::domain::job::JobRun;
use sluice_core::domain::pipeline::{InvocationStatus, PipelineReport};
use sluice_core::dto::event::EventAccepted;
use sluice_core::dto::invocation::{CancelResponse, InvocationSummary};
use sluice_core::dto::log::{InvocationLogs, JobLogs};
use sluice_runner::{CancelHandle, InMemoryLogBuffer, LogBufferService, PipelineExecutor};

/// Service error type
#[derive(Debug)]
pub enum InvocationError {
    NotFound(Uuid),
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, InvocationError>;

/// Finished invocations kept in memory unless configured otherwise
pub const DEFAULT_RETENTION: usize = 100;

struct Invocation {
    report: PipelineReport,
    cancel: CancelHandle,
    logs: InMemoryLogBuffer,
}

type Store = Arc<Mutex<HashMap<Uuid, Invocation>>>;

fn lock(store: &Store) -> MutexGuard<'_, HashMap<Uuid, Invocation>> {
    store.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct InvocationService {
    executor: Arc<PipelineExecutor>,
    invocations: Store,
    retention: usize,
}

impl InvocationService {
    pub fn new(executor: Arc<PipelineExecutor>) -> Self {
        Self {
            executor,
            invocations: Arc::new(Mutex::new(HashMap::new())),
            retention: DEFAULT_RETENTION,
        }
    }

    /// Caps how many finished invocations stay queryable
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    /// Starts an invocation for `event` in the background
    pub fn submit(&self, event: Event) -> Result<EventAccepted> {
        validate_event(&event)?;

        let id = Uuid::new_v4();
        let (cancel, signal) = CancelHandle::new();
        let logs = InMemoryLogBuffer::new();

        let superseded = {
            let mut invocations = lock(&self.invocations);

            evict_finished(&mut invocations, self.retention);

            let superseded = if event.kind == EventKind::Push {
                supersede(&invocations, &event.branch)
            } else {
                None
            };

            invocations.insert(
                id,
                Invocation {
                    report: self.initial_report(id, &event),
                    cancel,
                    logs: logs.clone(),
                },
            );
            superseded
        };

        if let Some(previous) = superseded {
            tracing::info!(
                "Invocation {} supersedes {} on branch {}",
                id,
                previous,
                event.branch
            );
        }

        let executor = self.executor.clone();
        let store = self.invocations.clone();
        tokio::spawn(async move {
            let observer = move |report: &PipelineReport| {
                if let Some(invocation) = lock(&store).get_mut(&report.invocation_id) {
                    invocation.report = report.clone();
                }
            };
            executor
                .execute(id, event, signal, Arc::new(logs), &observer)
                .await;
        });

        Ok(EventAccepted {
            invocation_id: id,
            superseded,
        })
    }

    /// Summaries of every invocation, newest first
    pub fn list(&self) -> Vec<InvocationSummary> {
        let invocations = lock(&self.invocations);
        let mut reports: Vec<&PipelineReport> = invocations.values().map(|i| &i.report).collect();
        reports.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        reports.into_iter().map(InvocationSummary::from).collect()
    }

    pub fn get(&self, id: Uuid) -> Result<PipelineReport> {
        lock(&self.invocations)
            .get(&id)
            .map(|i| i.report.clone())
            .ok_or(InvocationError::NotFound(id))
    }

    /// Logs collected so far, grouped by job in report order
    pub fn logs(&self, id: Uuid) -> Result<InvocationLogs> {
        let invocations = lock(&self.invocations);
        let invocation = invocations.get(&id).ok_or(InvocationError::NotFound(id))?;

        let mut jobs: Vec<JobLogs> = invocation
            .report
            .runs
            .iter()
            .map(|r| JobLogs {
                job: r.job.clone(),
                entries: Vec::new(),
            })
            .collect();

        for line in invocation.logs.snapshot() {
            match jobs.iter_mut().find(|j| j.job == line.job) {
                Some(job) => job.entries.push(line.entry),
                None => jobs.push(JobLogs {
                    job: line.job,
                    entries: vec![line.entry],
                }),
            }
        }

        Ok(InvocationLogs {
            invocation_id: id,
            jobs,
        })
    }

    /// Requests cancellation of a running invocation
    pub fn cancel(&self, id: Uuid) -> Result<CancelResponse> {
        let invocations = lock(&self.invocations);
        let invocation = invocations.get(&id).ok_or(InvocationError::NotFound(id))?;

        let cancelled = !invocation.report.status.is_terminal() && invocation.cancel.cancel();

        Ok(CancelResponse {
            id,
            cancelled,
            status: invocation.report.status,
        })
    }

    fn initial_report(&self, id: Uuid, event: &Event) -> PipelineReport {
        PipelineReport {
            invocation_id: id,
            pipeline: self.executor.pipeline().name.clone(),
            event: event.clone(),
            status: InvocationStatus::Running,
            runs: self
                .executor
                .graph()
                .order()
                .map(|j| JobRun::pending(&j.name))
                .collect(),
            error: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }
}

/// Cancels the running push invocation on `branch`, returning the most
/// recent one cancelled
fn supersede(invocations: &HashMap<Uuid, Invocation>, branch: &str) -> Option<Uuid> {
    let mut running: Vec<(&Uuid, &Invocation)> = invocations
        .iter()
        .filter(|(_, i)| {
            i.report.event.kind == EventKind::Push
                && i.report.event.branch == branch
                && !i.report.status.is_terminal()
        })
        .collect();
    running.sort_by(|a, b| a.1.report.started_at.cmp(&b.1.report.started_at));

    let mut latest = None;
    for (id, invocation) in running {
        invocation.cancel.cancel();
        latest = Some(*id);
    }
    latest
}

/// Drops the oldest finished invocations beyond `retention`
fn evict_finished(invocations: &mut HashMap<Uuid, Invocation>, retention: usize) {
    let mut finished: Vec<(Uuid, chrono::DateTime<Utc>)> = invocations
        .iter()
        .filter(|(_, i)| i.report.status.is_terminal())
        .map(|(id, i)| (*id, i.report.started_at))
        .collect();
    if finished.len() <= retention {
        return;
    }

    finished.sort_by(|a, b| b.1.cmp(&a.1));
    for (id, _) in finished.split_off(retention) {
        invocations.remove(&id);
        tracing::debug!("Evicted finished invocation {}", id);
    }
}

fn validate_event(event: &Event) -> Result<()> {
    if event.branch.trim().is_empty() {
        return Err(InvocationError::ValidationError(
            "Event branch cannot be empty".to_string(),
        ));
    }

    if event.revision.trim().is_empty() {
        return Err(InvocationError::ValidationError(
            "Event revision cannot be empty".to_string(),
        ));
    }

    if event.target.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(InvocationError::ValidationError(
            "Event target cannot be empty when given".to_string(),
        ));
    }

    Ok(())
}
