//! The log-cursor protocol seams.
//!
//! A [`LogsCursor`] hands out confirmed logs from the aggregator side and may
//! retract previously handed-out entries when the settlement chain
//! reorganises. A [`LogConsumer`] is the downstream that must see every
//! retraction before any addition that could depend on it.

use async_trait::async_trait;

/// An aggregator log blob. The serialisation is owned by the VM subsystem
/// and opaque to everything in this workspace.
pub type LogValue = Vec<u8>;

/// Cursor over a moving, reorg-prone log tip.
///
/// The contract mirrors the four-phase reader loop: `request` reserves a
/// window, `get_logs`/`get_deleted_logs` drain it (`None` means "nothing
/// yet", an empty vec is a valid answer), and `confirm_received` advances the
/// cursor — returning `false` when a reorg slipped in between, in which case
/// the extra retractions are surfaced by a follow-up `get_deleted_logs`.
#[async_trait]
pub trait LogsCursor: Send + Sync {
    /// Ask for up to `max_count` logs starting at `cursor_index`.
    async fn request(&self, cursor_index: u64, max_count: u64) -> anyhow::Result<()>;

    /// Poll for the requested logs.
    async fn get_logs(&self, cursor_index: u64) -> anyhow::Result<Option<Vec<LogValue>>>;

    /// Poll for retractions that occurred since the request.
    async fn get_deleted_logs(&self, cursor_index: u64) -> anyhow::Result<Option<Vec<LogValue>>>;

    /// Confirm receipt of everything drained so far. `false` signals a reorg
    /// between request and confirmation.
    async fn confirm_received(&self, cursor_index: u64) -> anyhow::Result<bool>;
}

#[async_trait]
impl<T: LogsCursor + ?Sized> LogsCursor for std::sync::Arc<T> {
    async fn request(&self, cursor_index: u64, max_count: u64) -> anyhow::Result<()> {
        (**self).request(cursor_index, max_count).await
    }

    async fn get_logs(&self, cursor_index: u64) -> anyhow::Result<Option<Vec<LogValue>>> {
        (**self).get_logs(cursor_index).await
    }

    async fn get_deleted_logs(&self, cursor_index: u64) -> anyhow::Result<Option<Vec<LogValue>>> {
        (**self).get_deleted_logs(cursor_index).await
    }

    async fn confirm_received(&self, cursor_index: u64) -> anyhow::Result<bool> {
        (**self).confirm_received(cursor_index).await
    }
}

/// Downstream receiver of cursor output.
///
/// Deliveries are at-least-once: a consumer that saw a batch before a crash
/// will see the identical batch again after restart.
#[async_trait]
pub trait LogConsumer: Send {
    /// Deliver newly confirmed logs, in cursor order.
    async fn add_logs(&mut self, logs: &[LogValue]) -> anyhow::Result<()>;

    /// Deliver retracted logs. Always called before any `add_logs` whose
    /// content could depend on the retracted suffix.
    async fn delete_logs(&mut self, logs: &[LogValue]) -> anyhow::Result<()>;
}
