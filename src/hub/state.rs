use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tracing::debug;

use super::{HubCommand, HubEvent, MetricsUpdate, StatusEvent, StatusUpdate, SubscriberId};
use crate::domain::SessionId;

#[derive(Debug, Default)]
struct Topic {
    latest: Option<Arc<HubEvent>>,
    sequence: u64,
    status: Option<Arc<HubEvent>>,
    pending: bool,
    last_flush: Option<Instant>,
    terminal: bool,
    subscribers: HashSet<SubscriberId>,
}

impl Topic {
    fn is_idle(&self) -> bool {
        self.subscribers.is_empty() && self.latest.is_none() && self.status.is_none()
    }
}

#[derive(Debug)]
struct Subscriber {
    tx: mpsc::Sender<Arc<HubEvent>>,
    /// Last metrics sequence delivered per session.
    delivered: HashMap<SessionId, u64>,
}

enum Delivery {
    Sent,
    Full,
    Closed,
}

fn try_deliver(tx: &mpsc::Sender<Arc<HubEvent>>, event: &Arc<HubEvent>) -> Delivery {
    match tx.try_send(Arc::clone(event)) {
        Ok(()) => Delivery::Sent,
        Err(TrySendError::Full(_)) => Delivery::Full,
        Err(TrySendError::Closed(_)) => Delivery::Closed,
    }
}

/// Subscription registry and per-session delivery state, owned by the hub task.
#[derive(Debug)]
pub(super) struct HubState {
    interval: Duration,
    topics: HashMap<SessionId, Topic>,
    subscribers: HashMap<SubscriberId, Subscriber>,
}

impl HubState {
    pub(super) fn new(interval: Duration) -> Self {
        Self {
            interval,
            topics: HashMap::new(),
            subscribers: HashMap::new(),
        }
    }

    pub(super) fn apply(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register { subscriber, tx } => {
                self.subscribers.insert(
                    subscriber,
                    Subscriber {
                        tx,
                        delivered: HashMap::new(),
                    },
                );
            }
            HubCommand::Subscribe {
                subscriber,
                session_id,
            } => self.subscribe(subscriber, session_id),
            HubCommand::Unsubscribe {
                subscriber,
                session_id,
            } => self.unsubscribe(subscriber, &session_id),
            HubCommand::Disconnect { subscriber } => self.disconnect(subscriber),
            HubCommand::Publish {
                session_id,
                snapshot,
            } => {
                let interval = self.interval;
                let Some(topic) = self.topic_for_publish(&session_id) else {
                    return;
                };
                topic.sequence = topic.sequence.saturating_add(1);
                topic.latest = Some(Arc::new(HubEvent::MetricsUpdate(MetricsUpdate::new(
                    session_id.clone(),
                    topic.sequence,
                    &snapshot,
                ))));
                let due = topic
                    .last_flush
                    .is_none_or(|at| at.elapsed() >= interval);
                topic.pending = true;
                if due {
                    self.flush_topic(&session_id);
                }
            }
            HubCommand::Status { session_id, update } => self.status(session_id, update),
            HubCommand::Forget { session_id } => {
                if let Some(topic) = self.topics.remove(&session_id) {
                    for subscriber in topic.subscribers {
                        if let Some(entry) = self.subscribers.get_mut(&subscriber) {
                            entry.delivered.remove(&session_id);
                        }
                    }
                }
            }
        }
    }

    /// Deliver coalesced snapshots whose throttle window has elapsed.
    pub(super) fn flush_pending(&mut self) {
        let due: Vec<SessionId> = self
            .topics
            .iter()
            .filter(|(_, topic)| {
                topic.pending && topic.last_flush.is_none_or(|at| at.elapsed() >= self.interval)
            })
            .map(|(session_id, _)| session_id.clone())
            .collect();
        for session_id in due {
            self.flush_topic(&session_id);
        }
    }

    fn topic_for_publish(&mut self, session_id: &SessionId) -> Option<&mut Topic> {
        let topic = self.topics.entry(session_id.clone()).or_default();
        if topic.terminal {
            debug!("Ignoring snapshot for terminal test {}", session_id);
            return None;
        }
        Some(topic)
    }

    fn flush_topic(&mut self, session_id: &SessionId) {
        let Some(topic) = self.topics.get_mut(session_id) else {
            return;
        };
        topic.last_flush = Some(Instant::now());
        topic.pending = false;
        let Some(latest) = topic.latest.clone() else {
            return;
        };
        let sequence = topic.sequence;
        let mut closed = Vec::new();
        let mut retry = false;
        for subscriber_id in &topic.subscribers {
            let Some(subscriber) = self.subscribers.get_mut(subscriber_id) else {
                continue;
            };
            if subscriber
                .delivered
                .get(session_id)
                .is_some_and(|last| *last >= sequence)
            {
                continue;
            }
            match try_deliver(&subscriber.tx, &latest) {
                Delivery::Sent => {
                    subscriber.delivered.insert(session_id.clone(), sequence);
                }
                Delivery::Full => retry = true,
                Delivery::Closed => closed.push(*subscriber_id),
            }
        }
        topic.pending = retry;
        for subscriber_id in closed {
            self.disconnect(subscriber_id);
        }
    }

    fn status(&mut self, session_id: SessionId, update: StatusUpdate) {
        let topic = self.topics.entry(session_id.clone()).or_default();
        if topic.terminal {
            return;
        }
        let terminal = update.status.is_terminal();
        let event = Arc::new(HubEvent::TestStatus(StatusEvent {
            test_id: session_id.clone(),
            status: update.status,
            progress: update.progress,
            message: update.message,
            report_url: update.report_url,
        }));
        topic.status = Some(Arc::clone(&event));

        if !terminal {
            let mut closed = Vec::new();
            for subscriber_id in &topic.subscribers {
                if let Some(subscriber) = self.subscribers.get(subscriber_id)
                    && matches!(try_deliver(&subscriber.tx, &event), Delivery::Closed)
                {
                    closed.push(*subscriber_id);
                }
            }
            for subscriber_id in closed {
                self.disconnect(subscriber_id);
            }
            return;
        }

        topic.terminal = true;
        topic.pending = false;
        let latest = topic.latest.clone();
        let sequence = topic.sequence;
        for subscriber_id in &topic.subscribers {
            let Some(subscriber) = self.subscribers.get_mut(subscriber_id) else {
                continue;
            };
            let mut batch = Vec::with_capacity(2);
            if let Some(latest) = latest.as_ref()
                && subscriber
                    .delivered
                    .get(&session_id)
                    .is_none_or(|last| *last < sequence)
            {
                batch.push(Arc::clone(latest));
                subscriber.delivered.insert(session_id.clone(), sequence);
            }
            batch.push(Arc::clone(&event));
            let tx = subscriber.tx.clone();
            tokio::spawn(async move {
                for item in batch {
                    if tx.send(item).await.is_err() {
                        // Subscriber disconnected.
                        break;
                    }
                }
            });
        }
    }

    fn subscribe(&mut self, subscriber_id: SubscriberId, session_id: SessionId) {
        let Some(subscriber) = self.subscribers.get_mut(&subscriber_id) else {
            debug!("Subscribe from unknown subscriber {}", subscriber_id);
            return;
        };
        let topic = self.topics.entry(session_id.clone()).or_default();
        topic.subscribers.insert(subscriber_id);

        let mut open = true;
        if let Some(latest) = topic.latest.as_ref() {
            match try_deliver(&subscriber.tx, latest) {
                Delivery::Sent => {
                    subscriber
                        .delivered
                        .insert(session_id.clone(), topic.sequence);
                }
                Delivery::Full => topic.pending = true,
                Delivery::Closed => open = false,
            }
        }
        if open
            && let Some(status) = topic.status.as_ref()
            && matches!(try_deliver(&subscriber.tx, status), Delivery::Closed)
        {
            open = false;
        }
        if !open {
            self.disconnect(subscriber_id);
        }
    }

    fn unsubscribe(&mut self, subscriber_id: SubscriberId, session_id: &SessionId) {
        if let Some(subscriber) = self.subscribers.get_mut(&subscriber_id) {
            subscriber.delivered.remove(session_id);
        }
        self.detach(subscriber_id, session_id);
    }

    fn disconnect(&mut self, subscriber_id: SubscriberId) {
        if self.subscribers.remove(&subscriber_id).is_none() {
            return;
        }
        let followed: Vec<SessionId> = self
            .topics
            .iter()
            .filter(|(_, topic)| topic.subscribers.contains(&subscriber_id))
            .map(|(session_id, _)| session_id.clone())
            .collect();
        for session_id in followed {
            self.detach(subscriber_id, &session_id);
        }
        debug!("Subscriber {} removed.", subscriber_id);
    }

    fn detach(&mut self, subscriber_id: SubscriberId, session_id: &SessionId) {
        let remove = match self.topics.get_mut(session_id) {
            Some(topic) => {
                topic.subscribers.remove(&subscriber_id);
                topic.is_idle()
            }
            None => false,
        };
        if remove {
            self.topics.remove(session_id);
        }
    }
}
