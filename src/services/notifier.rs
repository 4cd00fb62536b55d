//! In-process outbox between the state machine and the notification
//! dispatcher. Transitions enqueue and move on; a dedicated task drains
//! the channel and talks to the external dispatcher. Losing a
//! notification is acceptable, losing a transition is not.

use crate::providers::{NotificationDispatcher, NotificationRequest};
use std::sync::Arc;
use tokio::sync::mpsc;

const OUTBOX_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct NotificationOutbox {
    sender: mpsc::Sender<NotificationRequest>,
}

impl NotificationOutbox {
    /// Creates the outbox and spawns its dispatcher task.
    pub fn spawn(dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        let (sender, receiver) = mpsc::channel(OUTBOX_CAPACITY);
        tokio::spawn(run_dispatcher(receiver, dispatcher));
        Self { sender }
    }

    /// Fire-and-forget enqueue. A full or closed channel is logged and
    /// swallowed; the triggering transition already committed.
    pub fn enqueue(&self, request: NotificationRequest) {
        if let Err(e) = self.sender.try_send(request) {
            tracing::warn!("Dropping notification, outbox unavailable: {}", e);
        }
    }
}

async fn run_dispatcher(
    mut receiver: mpsc::Receiver<NotificationRequest>,
    dispatcher: Arc<dyn NotificationDispatcher>,
) {
    while let Some(request) = receiver.recv().await {
        let kind = request.kind;
        if let Err(e) = dispatcher.notify(&request).await {
            tracing::warn!("Notification delivery failed for {:?}: {}", kind, e);
        }
    }
}
