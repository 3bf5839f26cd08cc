//! Fan-out of session snapshots and status changes to streaming subscribers.
mod messages;
mod state;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::domain::SessionId;
use crate::metrics::AggregateSnapshot;

pub use messages::{HubEvent, MetricsUpdate, StatusEvent, StatusUpdate};
use state::HubState;

/// Bound of each subscriber's outbound queue.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 64;

pub type SubscriberId = u64;
pub type SubscriberReceiver = mpsc::Receiver<Arc<HubEvent>>;

#[derive(Debug)]
enum HubCommand {
    Register {
        subscriber: SubscriberId,
        tx: mpsc::Sender<Arc<HubEvent>>,
    },
    Subscribe {
        subscriber: SubscriberId,
        session_id: SessionId,
    },
    Unsubscribe {
        subscriber: SubscriberId,
        session_id: SessionId,
    },
    Disconnect {
        subscriber: SubscriberId,
    },
    Publish {
        session_id: SessionId,
        snapshot: Box<AggregateSnapshot>,
    },
    Status {
        session_id: SessionId,
        update: StatusUpdate,
    },
    Forget {
        session_id: SessionId,
    },
}

/// Handle to the hub task. Every method is non-blocking; the task applies
/// commands in the order they were sent.
#[derive(Debug, Clone)]
pub struct BroadcastHub {
    tx: mpsc::UnboundedSender<HubCommand>,
    next_subscriber: Arc<AtomicU64>,
}

impl BroadcastHub {
    /// Start the hub task. Intermediate snapshots for a session are delivered
    /// at most once per `min_publish_interval`.
    #[must_use]
    pub fn spawn(min_publish_interval: Duration) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let interval = min_publish_interval.max(Duration::from_millis(1));
        let handle = tokio::spawn(run_hub(rx, interval));
        (
            Self {
                tx,
                next_subscriber: Arc::new(AtomicU64::new(1)),
            },
            handle,
        )
    }

    /// Create a subscriber and the queue its events arrive on.
    #[must_use]
    pub fn register(&self) -> (SubscriberId, SubscriberReceiver) {
        let subscriber = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        self.send(HubCommand::Register { subscriber, tx });
        (subscriber, rx)
    }

    /// Follow a session. The subscriber immediately receives the latest
    /// snapshot and status, if any.
    pub fn subscribe(&self, subscriber: SubscriberId, session_id: SessionId) {
        self.send(HubCommand::Subscribe {
            subscriber,
            session_id,
        });
    }

    pub fn unsubscribe(&self, subscriber: SubscriberId, session_id: SessionId) {
        self.send(HubCommand::Unsubscribe {
            subscriber,
            session_id,
        });
    }

    /// Drop a subscriber from every session it follows.
    pub fn disconnect(&self, subscriber: SubscriberId) {
        self.send(HubCommand::Disconnect { subscriber });
    }

    pub fn publish(&self, session_id: SessionId, snapshot: AggregateSnapshot) {
        self.send(HubCommand::Publish {
            session_id,
            snapshot: Box::new(snapshot),
        });
    }

    /// Report a lifecycle change. Terminal updates flush the latest snapshot
    /// first and are delivered even to slow subscribers.
    pub fn publish_status(&self, session_id: SessionId, update: StatusUpdate) {
        self.send(HubCommand::Status { session_id, update });
    }

    /// Discard retained state for an evicted session.
    pub fn forget(&self, session_id: SessionId) {
        self.send(HubCommand::Forget { session_id });
    }

    fn send(&self, command: HubCommand) {
        if self.tx.send(command).is_err() {
            debug!("Broadcast hub stopped; dropping command.");
        }
    }
}

async fn run_hub(mut rx: mpsc::UnboundedReceiver<HubCommand>, interval: Duration) {
    let mut state = HubState::new(interval);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            command = rx.recv() => {
                let Some(command) = command else {
                    break;
                };
                state.apply(command);
            }
            _ = ticker.tick() => state.flush_pending(),
        }
    }
    info!("Broadcast hub stopped.");
}
