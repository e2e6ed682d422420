//! Replay of the full event log.
//!
//! Replay reads one snapshot of the log and re-drives every record, in position order, through
//! the engine in `Replaying` mode. Handlers and processors run again; nothing is appended, not
//! even events they raise along the way. Stream state is *not* reset first: processors continue
//! from whatever they accumulated before the replay.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use encore_events::{DispatchError, EngineMode, EventStore, Execution, HandlerResolver};

use crate::dispatcher::DispatchEngine;

/// Summary of a completed replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    /// Number of log records re-driven (nested events raised during replay are not counted).
    pub events_replayed: u64,
    /// Position of the last record re-driven, if the log was not empty.
    pub last_position: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Drives [`DispatchEngine`] over the stored history.
#[derive(Debug)]
pub struct ReplayController<'a, S, R> {
    engine: &'a DispatchEngine<S, R>,
}

impl<'a, S, R> ReplayController<'a, S, R>
where
    S: EventStore,
    R: HandlerResolver,
{
    pub fn new(engine: &'a DispatchEngine<S, R>) -> Self {
        Self { engine }
    }

    /// Re-drive every stored event. Stops at the first error, which is returned unchanged.
    pub fn replay_all(&self) -> Result<ReplayReport, DispatchError> {
        let started_at = self.engine.clock().now();
        let history = self.engine.store().read_all()?;
        info!(events = history.len(), "replay started");

        let mut report = ReplayReport {
            events_replayed: 0,
            last_position: None,
            started_at,
            finished_at: started_at,
        };

        for record in history {
            self.engine
                .dispatch_shared(record.event, Execution::root(EngineMode::Replaying))?;
            report.events_replayed += 1;
            report.last_position = Some(record.position);
        }

        report.finished_at = self.engine.clock().now();
        info!(
            events_replayed = report.events_replayed,
            last_position = ?report.last_position,
            "replay finished"
        );
        Ok(report)
    }
}
