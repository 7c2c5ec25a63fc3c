//! Log buffer service
//!
//! Collects the log entries of an invocation, tagged with the job that
//! produced them. The orchestrator reads snapshots while the invocation is
//! still running; the CLI prints them as they are drained.

use sluice_core::domain::log::LogEntry;
use std::sync::{Arc, Mutex};

/// A log entry and the job it belongs to
#[derive(Debug, Clone)]
pub struct JobLogEntry {
    pub job: String,
    pub entry: LogEntry,
}

pub trait LogBufferService: Send + Sync {
    fn add_entry(&self, job: &str, entry: LogEntry);

    /// Copies every entry without clearing the buffer
    fn snapshot(&self) -> Vec<JobLogEntry>;

    /// Returns every entry and clears the buffer
    fn drain(&self) -> Vec<JobLogEntry>;
}

/// In-memory implementation of LogBufferService
///
/// Uses Arc<Mutex<Vec<_>>> for thread-safe access across tasks.
#[derive(Clone, Default)]
pub struct InMemoryLogBuffer {
    buffer: Arc<Mutex<Vec<JobLogEntry>>>,
}

impl InMemoryLogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<JobLogEntry>> {
        // A panic while holding the lock cannot leave a Vec half-written
        self.buffer.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl LogBufferService for InMemoryLogBuffer {
    fn add_entry(&self, job: &str, entry: LogEntry) {
        self.lock().push(JobLogEntry {
            job: job.to_string(),
            entry,
        });
    }

    fn snapshot(&self) -> Vec<JobLogEntry> {
        self.lock().clone()
    }

    fn drain(&self) -> Vec<JobLogEntry> {
        self.lock().drain(..).collect()
    }
}
