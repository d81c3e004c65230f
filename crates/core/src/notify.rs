use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::domain::ids::{ChainId, UserId};

/// Outbound event emitted after a terminal or level-advance transition has
/// committed. Fire-and-forget: the engine never waits on the sink and never
/// depends on its success.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainNotification {
    LevelOpened { chain_id: ChainId, level_number: u32, approvers: Vec<UserId> },
    ChainApproved { chain_id: ChainId },
    ChainRejected { chain_id: ChainId, rejected_by: UserId },
    ChainCancelled { chain_id: ChainId, cancelled_by: UserId },
    ChainBlocked { chain_id: ChainId, reason: String },
}

pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: ChainNotification);
}

/// Sink that drops everything. Default for embedders without a delivery
/// channel.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNotificationSink;

impl NotificationSink for NoopNotificationSink {
    fn notify(&self, _notification: ChainNotification) {}
}

#[derive(Clone, Default)]
pub struct InMemoryNotificationSink {
    notifications: Arc<Mutex<Vec<ChainNotification>>>,
}

impl InMemoryNotificationSink {
    pub fn notifications(&self) -> Vec<ChainNotification> {
        match self.notifications.lock() {
            Ok(notifications) => notifications.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl NotificationSink for InMemoryNotificationSink {
    fn notify(&self, notification: ChainNotification) {
        match self.notifications.lock() {
            Ok(mut notifications) => notifications.push(notification),
            Err(poisoned) => poisoned.into_inner().push(notification),
        }
    }
}
