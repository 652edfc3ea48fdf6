// Notification queue - fire-and-forget hand-off to a single dispatcher worker.
//
// Producers hold a cloneable `NotificationQueue`. `enqueue` filters by the
// current settings and pushes onto a bounded channel with `try_send`, so it
// never blocks and never waits on delivery. Exactly one `DispatchWorker`
// drains the channel; there is no second loop and no "running" flag. Retry
// sweeps travel through the same FIFO so they never race a fresh delivery
// for the same key.

use super::dispatcher::{
    MessageSender, NotificationDispatcher, NotificationError, NotificationStore,
};
use super::notification_models::{NotificationEvent, RetrySummary};
use crate::core::moderation::RelaySettings;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};

/// Commands buffered between producers and the worker.
pub const QUEUE_CAPACITY: usize = 1024;

/// Work items for the dispatcher worker.
#[derive(Debug)]
pub enum DispatchCommand {
    Deliver(NotificationEvent),
    RetrySweep(oneshot::Sender<RetrySummary>),
}

/// Receiving half, handed to the worker.
pub type QueueReceiver = mpsc::Receiver<DispatchCommand>;

#[derive(Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<DispatchCommand>,
    settings: Arc<watch::Sender<RelaySettings>>,
}

impl NotificationQueue {
    pub fn new(settings: RelaySettings) -> (Self, QueueReceiver) {
        Self::with_capacity(settings, QUEUE_CAPACITY)
    }

    pub fn with_capacity(settings: RelaySettings, capacity: usize) -> (Self, QueueReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (settings_tx, _) = watch::channel(settings);
        (
            Self {
                tx,
                settings: Arc::new(settings_tx),
            },
            rx,
        )
    }

    /// Queue an event for delivery. Returns `false` when it was filtered out,
    /// the queue is full or the worker is gone; callers are not expected to
    /// act on that.
    pub fn enqueue(&self, event: NotificationEvent) -> bool {
        let kind = event.kind();
        if !self.settings.borrow().accepts(kind) {
            tracing::debug!(kind = %kind, "Notification kind disabled, dropping event");
            return false;
        }

        match self.tx.try_send(DispatchCommand::Deliver(event)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::error!(kind = %kind, "Notification queue full, event lost");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::error!(kind = %kind, "Notification worker stopped, event lost");
                false
            }
        }
    }

    /// Ask the worker to run a retry sweep and wait for its summary.
    pub async fn trigger_retry_sweep(&self) -> Result<RetrySummary, NotificationError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(DispatchCommand::RetrySweep(reply_tx))
            .await
            .map_err(|_| NotificationError::WorkerStopped)?;
        reply_rx.await.map_err(|_| NotificationError::WorkerStopped)
    }

    /// Publish new settings; later `enqueue` calls see them immediately.
    pub fn apply_settings(&self, settings: RelaySettings) {
        self.settings.send_replace(settings);
    }

    pub fn settings(&self) -> RelaySettings {
        self.settings.borrow().clone()
    }
}

/// The one task that owns the dispatcher.
pub struct DispatchWorker<S: NotificationStore, M: MessageSender> {
    rx: QueueReceiver,
    dispatcher: NotificationDispatcher<S, M>,
}

impl<S: NotificationStore, M: MessageSender> DispatchWorker<S, M> {
    pub fn new(rx: QueueReceiver, dispatcher: NotificationDispatcher<S, M>) -> Self {
        Self { rx, dispatcher }
    }

    /// Drain until every `NotificationQueue` handle is dropped.
    pub async fn run(mut self) {
        tracing::info!("Notification worker started");
        while let Some(command) = self.rx.recv().await {
            match command {
                DispatchCommand::Deliver(event) => {
                    if let Err(e) = self.dispatcher.dispatch(&event).await {
                        tracing::error!(
                            kind = %event.kind(),
                            error = %e,
                            "Failed to record notification"
                        );
                    }
                }
                DispatchCommand::RetrySweep(reply) => {
                    let summary = match self.dispatcher.retry_sweep(Utc::now()).await {
                        Ok(summary) => summary,
                        Err(e) => {
                            tracing::error!(error = %e, "Retry sweep failed");
                            RetrySummary::default()
                        }
                    };
                    // The requester may have given up waiting.
                    let _ = reply.send(summary);
                }
            }
        }
        tracing::info!("Notification worker stopped");
    }
}
