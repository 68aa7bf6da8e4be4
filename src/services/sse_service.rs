use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc, watch,
};
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tracing::{debug, info, warn};

use crate::{
    dto::sse::{Handshake, ServerEvent, SystemStatus},
    services::events::EVENT_SYSTEM_STATUS,
    state::{ChannelId, SharedState},
};

const EVENT_HANDSHAKE: &str = "handshake";

/// Subscribe to `channel` and stream its events to the client.
pub fn open_stream(
    state: &SharedState,
    channel: ChannelId,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + use<>> {
    to_sse_stream(spawn_forwarder(state.clone(), channel))
}

/// Forward bus events for one subscriber into a bounded queue. The queue starts
/// with a handshake and also carries `system_status` whenever degraded mode flips.
/// The task ends once the client side of the queue is dropped, releasing the
/// bus channel when it was the last subscriber.
pub fn spawn_forwarder(state: SharedState, channel: ChannelId) -> mpsc::Receiver<ServerEvent> {
    let (tx, rx) = mpsc::channel::<ServerEvent>(8);
    let receiver = state.bus().subscribe(&channel);
    let degraded = state.degraded_watcher();

    tokio::spawn(async move {
        let receiver = forward(&tx, receiver, degraded, &channel).await;
        state.bus().unsubscribe(&channel, receiver);
        info!(%channel, "SSE stream disconnected");
    });

    rx
}

/// Pump events into `tx` until either side closes; hands the bus receiver back.
async fn forward(
    tx: &mpsc::Sender<ServerEvent>,
    mut receiver: broadcast::Receiver<ServerEvent>,
    mut degraded: watch::Receiver<bool>,
    channel: &ChannelId,
) -> broadcast::Receiver<ServerEvent> {
    let handshake = Handshake {
        channel: channel.to_string(),
        degraded: *degraded.borrow_and_update(),
    };
    match ServerEvent::json(Some(EVENT_HANDSHAKE.to_string()), &handshake) {
        Ok(event) => {
            if tx.send(event).await.is_err() {
                return receiver;
            }
        }
        Err(err) => warn!(%channel, error = %err, "failed to serialise handshake"),
    }

    let mut watching = true;
    loop {
        tokio::select! {
            _ = tx.closed() => break,
            recv_result = receiver.recv() => {
                match recv_result {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(skipped)) => {
                        // Clients resync through the snapshot endpoint.
                        debug!(%channel, skipped, "subscriber lagged; events dropped");
                        continue;
                    }
                }
            }
            changed = degraded.changed(), if watching => {
                if changed.is_err() {
                    watching = false;
                    continue;
                }
                let status = SystemStatus { degraded: *degraded.borrow_and_update() };
                let Ok(event) = ServerEvent::json(Some(EVENT_SYSTEM_STATUS.to_string()), &status) else {
                    continue;
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        }
    }

    receiver
}

/// Wrap a queue of server events into an SSE response with keep-alive comments.
pub fn to_sse_stream(
    events: mpsc::Receiver<ServerEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // axum drops this stream when the client disconnects, which closes the queue.
    let stream = ReceiverStream::new(events).map(|payload| {
        let mut event = Event::default().data(payload.data);
        if let Some(name) = payload.event {
            event = event.event(name);
        }
        Ok::<_, Infallible>(event)
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::{config::AppConfig, state::AppState};

    async fn next(rx: &mut mpsc::Receiver<ServerEvent>) -> ServerEvent {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("event in time")
            .expect("stream open")
    }

    #[tokio::test]
    async fn handshake_comes_first_then_channel_events() {
        let state = AppState::new(AppConfig::default());
        let channel = ChannelId::User("p1".into());
        let mut rx = spawn_forwarder(state.clone(), channel.clone());

        let handshake = next(&mut rx).await;
        assert_eq!(handshake.event.as_deref(), Some(EVENT_HANDSHAKE));
        let body: serde_json::Value = serde_json::from_str(&handshake.data).unwrap();
        assert_eq!(body["channel"], "user:p1");
        assert_eq!(body["degraded"], true);

        state
            .bus()
            .publish(&channel, ServerEvent::new("target_player_vote", "{}"));
        let event = next(&mut rx).await;
        assert_eq!(event.event.as_deref(), Some("target_player_vote"));
    }

    #[tokio::test]
    async fn degraded_flip_is_pushed_as_system_status() {
        let state = AppState::new(AppConfig::default());
        let channel = ChannelId::Game(uuid::Uuid::new_v4());
        let mut rx = spawn_forwarder(state.clone(), channel);
        next(&mut rx).await;

        state.update_degraded(false);
        let status = next(&mut rx).await;
        assert_eq!(status.event.as_deref(), Some(EVENT_SYSTEM_STATUS));
        assert_eq!(status.data, r#"{"degraded":false}"#);
    }

    #[tokio::test]
    async fn disconnect_removes_idle_channel_without_publishing() {
        let state = AppState::new(AppConfig::default());
        let channel = ChannelId::User("p2".into());
        let mut rx = spawn_forwarder(state.clone(), channel);
        next(&mut rx).await;
        assert_eq!(state.bus().channel_count(), 1);
        drop(rx);

        for _ in 0..50 {
            if state.bus().channel_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("user channel still registered after client disconnect");
    }

    #[tokio::test]
    async fn stream_does_not_borrow_state() {
        let channel = ChannelId::Game(uuid::Uuid::new_v4());
        let sse = {
            let state = AppState::new(AppConfig::default());
            open_stream(&state, channel)
        };
        drop(sse);
    }
}
