//! Consumer-side protocol for a moving, reorg-prone log tip.
//!
//! The reader drives a [`LogsCursor`] through a four-phase loop — request,
//! drain, deliver, confirm — and guarantees the downstream consumer sees
//! every retraction before any addition that could depend on it.
//!
//! Index arithmetic: `cursor_index` is the index of the next log the reader
//! expects. Every retraction moves it back by the retracted count; a
//! confirmed batch moves it forward by the batch length. A retraction that
//! would move it below zero means the cursor and reader have lost each
//! other, which is fatal.

use std::time::Duration;

use ramp_interface::cancel::Cancel;
use ramp_interface::cursor::{LogConsumer, LogValue, LogsCursor};
use tracing::{debug, warn};

/// Reader failures. Only the embedding decides whether to restart; the
/// reader itself never retries anything but the poll loop.
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    /// The cursor refused a confirmation but surfaced no retractions: a
    /// protocol violation, fatal to the reader.
    #[error("cursor rejected confirmation but surfaced no deleted logs")]
    MissingExpectedDeletedLogs,
    /// The cursor retracted more entries than the reader ever saw.
    #[error("cursor retracted {retracted} logs at index {index}")]
    RetractedPastOrigin {
        /// Where the reader stood.
        index: u64,
        /// How many entries the cursor took back.
        retracted: u64,
    },
    /// The cursor side failed.
    #[error("cursor failure: {0}")]
    Cursor(#[source] anyhow::Error),
    /// The downstream consumer failed.
    #[error("consumer failure: {0}")]
    Consumer(#[source] anyhow::Error),
    /// The cancellation token fired.
    #[error("cancelled")]
    Cancelled,
}

/// Reader tuning.
#[derive(Clone, Copy, Debug)]
pub struct LogReaderConfig {
    /// Upper bound on logs per request.
    pub max_count: u64,
    /// Pause when the cursor has neither additions nor retractions.
    pub poll_interval: Duration,
}

impl Default for LogReaderConfig {
    fn default() -> Self {
        Self {
            max_count: 100,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Pulls confirmed logs from a cursor and feeds a consumer, tolerating
/// retractions of the tip.
pub struct LogReader<K: LogsCursor, C: LogConsumer> {
    cursor: K,
    consumer: C,
    cursor_index: u64,
    config: LogReaderConfig,
}

impl<K: LogsCursor, C: LogConsumer> LogReader<K, C> {
    /// A reader starting at `start_index`.
    pub fn new(cursor: K, consumer: C, start_index: u64, config: LogReaderConfig) -> Self {
        Self {
            cursor,
            consumer,
            cursor_index: start_index,
            config,
        }
    }

    /// Index of the next log the reader expects.
    pub fn cursor_index(&self) -> u64 {
        self.cursor_index
    }

    /// Run batch cycles until cancelled or a fatal error.
    pub async fn run(&mut self, cancel: &Cancel) -> Result<(), ReaderError> {
        loop {
            if cancel.is_cancelled() {
                return Err(ReaderError::Cancelled);
            }
            self.process_batch(cancel).await?;
        }
    }

    /// One request → drain → deliver → confirm cycle.
    pub async fn process_batch(&mut self, cancel: &Cancel) -> Result<(), ReaderError> {
        self.cursor
            .request(self.cursor_index, self.config.max_count)
            .await
            .map_err(ReaderError::Cursor)?;

        // Drain: loop until new logs arrive. Retractions may surface first
        // and are collected (and accounted) without sleeping; only a fully
        // idle cursor earns a backoff pause.
        let mut deleted: Vec<LogValue> = Vec::new();
        let added = loop {
            match self
                .cursor
                .get_logs(self.cursor_index)
                .await
                .map_err(ReaderError::Cursor)?
            {
                Some(logs) if !logs.is_empty() => break logs,
                _ => {}
            }

            match self
                .cursor
                .get_deleted_logs(self.cursor_index)
                .await
                .map_err(ReaderError::Cursor)?
            {
                Some(more) if !more.is_empty() => {
                    self.retract(more.len() as u64)?;
                    deleted.extend(more);
                    continue;
                }
                _ => {}
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = cancel.cancelled() => return Err(ReaderError::Cancelled),
            }
        };

        // Deliver, retractions strictly first: the consumer must unwind a
        // retracted suffix before any addition that replaces it.
        if !deleted.is_empty() {
            debug!(count = deleted.len(), "delivering retracted logs");
            self.consumer
                .delete_logs(&deleted)
                .await
                .map_err(ReaderError::Consumer)?;
        }
        debug!(count = added.len(), index = self.cursor_index, "delivering logs");
        self.consumer
            .add_logs(&added)
            .await
            .map_err(ReaderError::Consumer)?;

        // Confirm. A refusal means a reorg slipped in after the drain; the
        // cursor owes us the extra retractions before we try again.
        loop {
            if self
                .cursor
                .confirm_received(self.cursor_index)
                .await
                .map_err(ReaderError::Cursor)?
            {
                self.cursor_index += added.len() as u64;
                return Ok(());
            }

            warn!(index = self.cursor_index, "confirmation refused, draining retractions");
            let followup = self
                .cursor
                .get_deleted_logs(self.cursor_index)
                .await
                .map_err(ReaderError::Cursor)?;
            match followup {
                Some(logs) if !logs.is_empty() => {
                    self.retract(logs.len() as u64)?;
                    self.consumer
                        .delete_logs(&logs)
                        .await
                        .map_err(ReaderError::Consumer)?;
                }
                _ => return Err(ReaderError::MissingExpectedDeletedLogs),
            }
        }
    }

    fn retract(&mut self, count: u64) -> Result<(), ReaderError> {
        self.cursor_index =
            self.cursor_index
                .checked_sub(count)
                .ok_or(ReaderError::RetractedPastOrigin {
                    index: self.cursor_index,
                    retracted: count,
                })?;
        Ok(())
    }
}
