//! Event bus for inter-component communication.
//!
//! Delivery is best-effort: events published while no subscriber is
//! registered are dropped, and a subscriber that falls behind loses the
//! oldest events. There is no replay and no persistence.

use crate::log::LogLine;
use crate::state::{ContainerId, Status};
use tokio::sync::broadcast;

const BUS_CAPACITY: usize = 256;

/// System events.
#[derive(Debug, Clone)]
pub enum Event {
    /// A container moved to a new status.
    StatusChange {
        container_id: ContainerId,
        status: Status,
    },
    /// A log line was appended to a container.
    LogAppend {
        container_id: ContainerId,
        line: LogLine,
    },
    /// The set of installed containers changed.
    ContainersChange,
    /// The server finished starting.
    ServerStart,
    /// The server is shutting down.
    ServerStop,
    /// The server state was reset.
    ServerHardReset,
    /// External dependencies (catalog, packages, client) were updated.
    DependenciesUpdated,
}

/// In-memory publisher fanning events out to all live subscribers.
///
/// Subscriptions are scoped resources: dropping the receiver unsubscribes.
/// Registrations do not survive a process restart.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Creates a new event bus.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    /// Publishes an event to every current subscriber.
    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    /// Subscribes to events published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
