use super::*;
use crate::domain::{SessionId, SessionState};
use crate::error::{AppError, AppResult};
use crate::metrics::AggregateSnapshot;
use crate::test_support::run_async_test;
use std::time::Duration;

fn snapshot(total_requests: u64) -> AggregateSnapshot {
    AggregateSnapshot {
        sequence: total_requests,
        progress: total_requests.min(100),
        total_requests,
        ..AggregateSnapshot::default()
    }
}

fn status(state: SessionState) -> StatusUpdate {
    StatusUpdate {
        status: state,
        progress: 50,
        message: None,
        report_url: None,
    }
}

async fn next_event(rx: &mut SubscriberReceiver) -> AppResult<Arc<HubEvent>> {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .map_err(|_elapsed| AppError::server("Timed out waiting for hub event"))?
        .ok_or_else(|| AppError::server("Subscriber queue closed"))
}

async fn drain_for(rx: &mut SubscriberReceiver, window: Duration) -> Vec<Arc<HubEvent>> {
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now().checked_add(window);
    while let Some(deadline) = deadline {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(event)) => events.push(event),
            Ok(None) | Err(_) => break,
        }
    }
    events
}

fn metrics_sequence(event: &HubEvent) -> Option<(u64, u64)> {
    match event {
        HubEvent::MetricsUpdate(update) => Some((update.sequence, update.metrics.total_requests)),
        HubEvent::TestStatus(_) => None,
    }
}

#[test]
fn late_subscriber_receives_latest_snapshot() -> AppResult<()> {
    run_async_test(async {
        let (hub, _task) = BroadcastHub::spawn(Duration::from_millis(100));
        let id = SessionId::from("late");
        for total in 1..=5_u64 {
            hub.publish(id.clone(), snapshot(total.saturating_mul(10)));
        }
        hub.publish_status(id.clone(), status(SessionState::Running));

        let (subscriber, mut rx) = hub.register();
        hub.subscribe(subscriber, id.clone());

        let first = next_event(&mut rx).await?;
        if metrics_sequence(&first) != Some((5, 50)) {
            return Err(AppError::server(format!("Unexpected catch-up: {:?}", first)));
        }
        match &*next_event(&mut rx).await? {
            HubEvent::TestStatus(event) if event.status == SessionState::Running => Ok(()),
            other => Err(AppError::server(format!("Expected status, got {:?}", other))),
        }
    })
}

#[test]
fn bursts_are_coalesced_to_latest() -> AppResult<()> {
    run_async_test(async {
        let (hub, _task) = BroadcastHub::spawn(Duration::from_millis(200));
        let id = SessionId::from("burst");
        let (subscriber, mut rx) = hub.register();
        hub.subscribe(subscriber, id.clone());
        for total in 1..=10 {
            hub.publish(id.clone(), snapshot(total));
        }
        let events = drain_for(&mut rx, Duration::from_millis(700)).await;
        let sequences: Vec<u64> = events
            .iter()
            .filter_map(|event| metrics_sequence(event).map(|(seq, _)| seq))
            .collect();
        if sequences != vec![1, 10] {
            return Err(AppError::server(format!(
                "Expected first and latest only, got {:?}",
                sequences
            )));
        }
        Ok(())
    })
}

#[test]
fn terminal_status_follows_final_snapshot() -> AppResult<()> {
    run_async_test(async {
        let (hub, _task) = BroadcastHub::spawn(Duration::from_secs(5));
        let id = SessionId::from("final");
        let (subscriber, mut rx) = hub.register();
        hub.subscribe(subscriber, id.clone());
        hub.publish(id.clone(), snapshot(1));
        hub.publish(id.clone(), snapshot(7));
        hub.publish_status(id.clone(), status(SessionState::Completed));
        hub.publish(id.clone(), snapshot(9));

        let events = drain_for(&mut rx, Duration::from_millis(300)).await;
        let summary: Vec<String> = events
            .iter()
            .map(|event| match &**event {
                HubEvent::MetricsUpdate(update) => format!("m{}", update.metrics.total_requests),
                HubEvent::TestStatus(event) => event.status.to_string(),
            })
            .collect();
        if summary != vec!["m1", "m7", "completed"] {
            return Err(AppError::server(format!("Unexpected delivery: {:?}", summary)));
        }
        Ok(())
    })
}

#[test]
fn closed_subscriber_does_not_affect_others() -> AppResult<()> {
    run_async_test(async {
        let (hub, _task) = BroadcastHub::spawn(Duration::from_millis(10));
        let id = SessionId::from("shared");
        let (gone, gone_rx) = hub.register();
        let (kept, mut kept_rx) = hub.register();
        hub.subscribe(gone, id.clone());
        hub.subscribe(kept, id.clone());
        drop(gone_rx);

        hub.publish(id.clone(), snapshot(3));
        let event = next_event(&mut kept_rx).await?;
        if metrics_sequence(&event) != Some((1, 3)) {
            return Err(AppError::server(format!("Unexpected event: {:?}", event)));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        hub.publish(id.clone(), snapshot(4));
        let event = next_event(&mut kept_rx).await?;
        if metrics_sequence(&event) != Some((2, 4)) {
            return Err(AppError::server(format!("Unexpected event: {:?}", event)));
        }
        Ok(())
    })
}

#[test]
fn slow_subscriber_still_gets_terminal_status() -> AppResult<()> {
    run_async_test(async {
        let (hub, _task) = BroadcastHub::spawn(Duration::from_millis(10));
        let id = SessionId::from("slow");
        let (subscriber, mut rx) = hub.register();
        hub.subscribe(subscriber, id.clone());
        for _ in 0..(SUBSCRIBER_QUEUE_CAPACITY.saturating_mul(2)) {
            hub.publish_status(id.clone(), status(SessionState::Running));
        }
        hub.publish_status(id.clone(), status(SessionState::Failed));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let events = drain_for(&mut rx, Duration::from_millis(300)).await;
        if events.len() > SUBSCRIBER_QUEUE_CAPACITY.saturating_add(1) {
            return Err(AppError::server(format!(
                "Queue exceeded its bound: {}",
                events.len()
            )));
        }
        match events.last().map(|event| &**event) {
            Some(HubEvent::TestStatus(event)) if event.status == SessionState::Failed => Ok(()),
            other => Err(AppError::server(format!("Missing terminal status: {:?}", other))),
        }
    })
}

#[test]
fn sequences_never_go_backward_across_resubscribe() -> AppResult<()> {
    run_async_test(async {
        let (hub, _task) = BroadcastHub::spawn(Duration::from_millis(10));
        let id = SessionId::from("rejoin");
        let (subscriber, mut rx) = hub.register();
        hub.subscribe(subscriber, id.clone());
        hub.publish(id.clone(), snapshot(1));
        let mut seen = vec![next_event(&mut rx).await?];
        hub.unsubscribe(subscriber, id.clone());
        hub.publish(id.clone(), snapshot(2));
        hub.subscribe(subscriber, id.clone());
        seen.push(next_event(&mut rx).await?);
        tokio::time::sleep(Duration::from_millis(20)).await;
        hub.publish(id.clone(), snapshot(3));
        seen.push(next_event(&mut rx).await?);

        let sequences: Vec<u64> = seen
            .iter()
            .filter_map(|event| metrics_sequence(event).map(|(seq, _)| seq))
            .collect();
        if sequences != vec![1, 2, 3] {
            return Err(AppError::server(format!("Unexpected sequences: {:?}", sequences)));
        }
        Ok(())
    })
}
