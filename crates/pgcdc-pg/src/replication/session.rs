//! The replication session state machine.
//!
//! Owns the replication connection, drives setup DDL, runs the receive
//! loop, assembles transaction batches, invokes the handler, sends standby
//! acknowledgements, responds to keepalives, and persists the cursor. A
//! single logical task: no concurrent mutation of the relation set or the
//! in-flight batch is possible, which removes every ordering question from
//! the decoder.

use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio_postgres::Client;
use tracing::{debug, info, warn};

use pgcdc_core::{
    format_lsn, ChangeHandler, ConfigError, CursorError, HandlerOutcome, Lsn, RowEvent,
    SchemaError, TransactionBatch, TransportError,
};
use pgcdc_store::CursorStore;

use super::envelope::{build_standby_status, parse_server_frame, ServerFrame};
use super::identity::{set_replica_identity, ReplicaIdentityMode};
use super::pgoutput::{self, PgOutputMessage};
use super::publication::create_publication;
use super::relation_set::RelationSet;
use super::slot::create_slot;

/// Read-wait deadline before continuing (not an error) while STREAMING.
const READ_TIMEOUT: Duration = Duration::from_secs(10);
/// Standby-status send retry policy on transient network failure.
const STANDBY_STATUS_RETRIES: usize = 10;
const STANDBY_STATUS_RETRY_SPACING: Duration = Duration::from_secs(1);

/// Validated configuration for one replication session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub slot_name: String,
    pub connection_string: String,
    /// Empty means publish ALL TABLES.
    pub tables: Vec<String>,
    /// Tables to elevate to `REPLICA IDENTITY FULL` before starting.
    pub identity_full_tables: Vec<String>,
    /// If set and `tables` is empty, configuration is rejected.
    pub require_column_diff: bool,
}

impl SessionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_slot_name(&self.slot_name) {
            return Err(ConfigError::InvalidSlotName(self.slot_name.clone()));
        }
        if self.require_column_diff && self.tables.is_empty() {
            return Err(ConfigError::ColumnDiffRequiresTables);
        }
        Ok(())
    }
}

fn is_valid_slot_name(name: &str) -> bool {
    let len_ok = (3..=64).contains(&name.len());
    len_ok
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

/// Long-running driver for one replication session. Consumes itself on
/// `run`: a session is single-use, matching the "single logical task" rule.
pub struct ReplicationSession<H, C> {
    config: SessionConfig,
    handler: H,
    cursor_store: C,
    relations: RelationSet,
    last_confirmed_lsn: Lsn,
}

impl<H: ChangeHandler, C: CursorStore> ReplicationSession<H, C> {
    pub fn new(config: SessionConfig, handler: H, cursor_store: C) -> Result<Self, pgcdc_core::CdcError> {
        config.validate()?;
        Ok(Self {
            config,
            handler,
            cursor_store,
            relations: RelationSet::new(),
            last_confirmed_lsn: 0,
        })
    }

    /// Drive the session to completion: SETUP, STREAMING until a fatal
    /// error, cancellation, or handler `Fatal`, then CLOSING.
    pub async fn run(mut self, cancel: tokio_util::sync::CancellationToken) -> pgcdc_core::CdcResult<()> {
        let control = crate::connect::connect_control(&self.config.connection_string).await?;
        self.setup(&control).await?;
        drop(control);

        let replication_client =
            crate::connect::connect_replication(&self.config.connection_string).await?;

        self.last_confirmed_lsn = self
            .cursor_store
            .get(&self.config.slot_name)
            .await?
            .unwrap_or(0);

        let query = format!(
            "START_REPLICATION SLOT {} LOGICAL {} (\"proto_version\" '1', \"publication_names\" {})",
            super::publication::quote_ident(&self.config.slot_name),
            format_lsn(self.last_confirmed_lsn),
            super::publication::quote_literal(&self.config.slot_name),
        );

        let stream = replication_client
            .copy_both_simple::<Bytes>(&query)
            .await
            .map_err(TransportError::from)?;
        tokio::pin!(stream);

        self.handler.ready().await;

        let mut batch = TransactionBatch::new();
        let result = self.stream_loop(&mut stream, &mut batch, cancel).await;

        self.cursor_store.close().await?;
        result
    }

    async fn setup(&self, client: &Client) -> pgcdc_core::CdcResult<()> {
        info!(slot = %self.config.slot_name, "setting up replication");

        if !self.config.identity_full_tables.is_empty() {
            set_replica_identity(
                client,
                &self.config.identity_full_tables,
                ReplicaIdentityMode::Full,
            )
            .await?;
        }

        create_publication(client, &self.config.slot_name, &self.config.tables).await?;
        create_slot(client, &self.config.slot_name).await?;

        Ok(())
    }

    async fn stream_loop<S>(
        &mut self,
        stream: &mut std::pin::Pin<&mut S>,
        batch: &mut TransactionBatch,
        cancel: tokio_util::sync::CancellationToken,
    ) -> pgcdc_core::CdcResult<()>
    where
        S: futures_util::Stream<Item = Result<Bytes, tokio_postgres::Error>>
            + futures_util::Sink<Bytes, Error = tokio_postgres::Error>,
    {
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("cancellation observed, closing session");
                    return Ok(());
                }
                next = tokio::time::timeout(READ_TIMEOUT, stream.next()) => {
                    match next {
                        Err(_elapsed) => continue, // idle timeout is not an error
                        Ok(None) => {
                            return Err(TransportError::Read("replication stream closed".into()).into())
                        }
                        Ok(Some(Err(e))) => return Err(TransportError::from(e).into()),
                        Ok(Some(Ok(bytes))) => bytes,
                    }
                }
            };

            let parsed = parse_server_frame(&frame).map_err(pgcdc_core::CdcError::from)?;

            match parsed {
                ServerFrame::PrimaryKeepalive {
                    reply_requested, ..
                } => {
                    if reply_requested {
                        self.send_standby_status(stream, self.last_confirmed_lsn, true)
                            .await?;
                    }
                }
                ServerFrame::WalData {
                    start_lsn, payload, ..
                } => {
                    if self.handle_wal_data(start_lsn, &payload, batch).await? {
                        let outcome = self.handler.handle(batch).await;
                        match outcome {
                            HandlerOutcome::Success => {
                                self.send_standby_status(stream, batch.commit_lsn, false)
                                    .await?;
                                self.cursor_store
                                    .set(&self.config.slot_name, batch.commit_lsn)
                                    .await?;
                                self.last_confirmed_lsn = batch.commit_lsn;
                            }
                            HandlerOutcome::Continue => {}
                            HandlerOutcome::Fatal(e) => return Err(e),
                        }
                        *batch = TransactionBatch::new();
                    }
                }
            }
        }
    }

    /// Dispatch one pgoutput payload; returns `true` when a non-empty
    /// transaction just closed and is ready for handler delivery.
    async fn handle_wal_data(
        &mut self,
        start_lsn: Lsn,
        payload: &Bytes,
        batch: &mut TransactionBatch,
    ) -> pgcdc_core::CdcResult<bool> {
        let message = pgoutput::decode(payload)?;

        match message {
            PgOutputMessage::Begin(_) => {
                *batch = TransactionBatch::new();
            }
            PgOutputMessage::Relation(relation) => {
                self.relations.add(&relation);
            }
            PgOutputMessage::Insert(insert) => {
                let descriptor = self.relations.lookup(insert.relation_id)?;
                let body = self.relations.decode(insert.relation_id, &insert.tuple)?;
                batch.push(RowEvent {
                    lsn: start_lsn,
                    relation_id: insert.relation_id,
                    kind: pgcdc_core::EventKind::Insert,
                    schema_name: descriptor.schema_name.clone(),
                    table_name: descriptor.table_name.clone(),
                    body,
                    changed_columns: None,
                });
            }
            PgOutputMessage::Update(update) => {
                let descriptor = self.relations.lookup(update.relation_id)?;
                let (new_body, unchanged_toast) = self
                    .relations
                    .decode_with_toasted(update.relation_id, &update.new_tuple)?;

                let changed_columns = match &update.old_tuple {
                    Some(old_tuple) => {
                        let old_body = self.relations.decode(update.relation_id, old_tuple)?;
                        let diff = self.relations.changed_columns(
                            update.relation_id,
                            &new_body,
                            &old_body,
                            &unchanged_toast,
                        );
                        if diff.is_empty() {
                            // No-op update: the new row equals the old row.
                            return Ok(false);
                        }
                        Some(diff)
                    }
                    None => None,
                };

                batch.push(RowEvent {
                    lsn: start_lsn,
                    relation_id: update.relation_id,
                    kind: pgcdc_core::EventKind::Update,
                    schema_name: descriptor.schema_name.clone(),
                    table_name: descriptor.table_name.clone(),
                    body: new_body,
                    changed_columns,
                });
            }
            PgOutputMessage::Delete(delete) => {
                let descriptor = self.relations.lookup(delete.relation_id)?;
                let body = self.relations.decode(delete.relation_id, &delete.old_tuple)?;
                batch.push(RowEvent {
                    lsn: start_lsn,
                    relation_id: delete.relation_id,
                    kind: pgcdc_core::EventKind::Delete,
                    schema_name: descriptor.schema_name.clone(),
                    table_name: descriptor.table_name.clone(),
                    body,
                    changed_columns: None,
                });
            }
            PgOutputMessage::Truncate(truncate) => {
                for relation_id in truncate.relation_ids {
                    let descriptor = match self.relations.lookup(relation_id) {
                        Ok(d) => d,
                        Err(SchemaError { relation_id }) => {
                            warn!(relation_id, "truncate for unseen relation, skipping");
                            continue;
                        }
                    };
                    batch.push(RowEvent {
                        lsn: start_lsn,
                        relation_id,
                        kind: pgcdc_core::EventKind::Truncate,
                        schema_name: descriptor.schema_name.clone(),
                        table_name: descriptor.table_name.clone(),
                        body: Default::default(),
                        changed_columns: None,
                    });
                }
            }
            PgOutputMessage::Commit(commit) => {
                if batch.is_empty() {
                    // Empty transactions are dropped silently and never
                    // advance the cursor.
                    *batch = TransactionBatch::new();
                    return Ok(false);
                }
                batch.commit_lsn = commit.commit_lsn;
                batch.push(RowEvent::commit_marker(commit.commit_lsn));
                return Ok(true);
            }
            PgOutputMessage::Type(_) | PgOutputMessage::Origin(_) => {}
        }

        Ok(false)
    }

    async fn send_standby_status<S>(
        &self,
        stream: &mut std::pin::Pin<&mut S>,
        lsn: Lsn,
        reply_requested: bool,
    ) -> pgcdc_core::CdcResult<()>
    where
        S: futures_util::Sink<Bytes, Error = tokio_postgres::Error>,
    {
        let frame = build_standby_status(lsn, reply_requested);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match stream.send(frame.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < STANDBY_STATUS_RETRIES => {
                    warn!(attempt, error = %e, "standby status send failed, retrying");
                    tokio::time::sleep(STANDBY_STATUS_RETRY_SPACING).await;
                }
                Err(e) => {
                    return Err(CursorError::Write(format!(
                        "standby status send failed after {attempt} attempts: {e}"
                    ))
                    .into())
                }
            }
        }
    }
}
