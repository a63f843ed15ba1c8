//! Reference [`ChangeHandler`] for the CLI: logs each transaction batch via
//! `tracing` and always acknowledges. Real deployments are expected to
//! supply their own handler through the library; this one exists so `pgcdc
//! run` is useful out of the box for inspection and debugging.

use pgcdc_core::{ChangeHandler, EventKind, HandlerOutcome, TransactionBatch};
use tracing::info;

pub struct LoggingHandler;

impl ChangeHandler for LoggingHandler {
    async fn handle(&self, batch: &TransactionBatch) -> HandlerOutcome {
        for event in &batch.events {
            match event.kind {
                EventKind::Commit => continue,
                _ => info!(
                    kind = ?event.kind,
                    schema = %event.schema_name,
                    table = %event.table_name,
                    lsn = event.lsn,
                    changed_columns = ?event.changed_columns,
                    body = ?event.body,
                    "row changed"
                ),
            }
        }
        HandlerOutcome::Success
    }

    async fn ready(&self) {
        info!("replication stream ready");
    }
}
