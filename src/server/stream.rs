use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::domain::SessionId;
use crate::error::ServerError;
use crate::hub::{BroadcastHub, SubscriberId};
use crate::shutdown::ShutdownReceiver;

/// Messages a streaming client may send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum ClientMessage {
    Subscribe {
        #[serde(rename = "testId", alias = "test_id")]
        test_id: SessionId,
    },
    Unsubscribe {
        #[serde(rename = "testId", alias = "test_id")]
        test_id: SessionId,
    },
}

/// Accept WebSocket subscribers until shutdown is signalled.
pub async fn serve_stream(listener: TcpListener, hub: BroadcastHub, mut shutdown_rx: ShutdownReceiver) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Stream server shutting down.");
                break;
            }
            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(result) => result,
                    Err(err) => {
                        warn!("Failed to accept stream connection: {}", err);
                        continue;
                    }
                };
                let hub = hub.clone();
                let shutdown_rx = shutdown_rx.resubscribe();
                tokio::spawn(async move {
                    if let Err(err) = handle_stream_connection(socket, &hub, shutdown_rx).await {
                        debug!("Stream connection from {} ended: {}", peer, err);
                    }
                });
            }
        }
    }
}

async fn handle_stream_connection(
    socket: TcpStream,
    hub: &BroadcastHub,
    mut shutdown_rx: ShutdownReceiver,
) -> Result<(), ServerError> {
    let ws = accept_async(socket)
        .await
        .map_err(|err| ServerError::WebSocket {
            source: Box::new(err),
        })?;
    let (mut sink, mut source) = ws.split();
    let (subscriber, mut events) = hub.register();
    debug!("Stream subscriber {} connected.", subscriber);

    let result = loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                if sink.send(Message::Close(None)).await.is_err() {
                    // Peer already gone.
                }
                break Ok(());
            }
            event = events.recv() => {
                let Some(event) = event else {
                    break Ok(());
                };
                let payload = match serde_json::to_string(&*event) {
                    Ok(payload) => payload,
                    Err(err) => {
                        break Err(ServerError::Serialize {
                            context: "stream event",
                            source: err,
                        });
                    }
                };
                if let Err(err) = sink.send(Message::Text(payload)).await {
                    break Err(ServerError::WebSocket {
                        source: Box::new(err),
                    });
                }
            }
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => handle_client_message(hub, subscriber, &text),
                Some(Ok(Message::Close(_))) | None => break Ok(()),
                Some(Ok(
                    Message::Binary(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_),
                )) => {}
                Some(Err(err)) => {
                    break Err(ServerError::WebSocket {
                        source: Box::new(err),
                    });
                }
            },
        }
    };

    hub.disconnect(subscriber);
    debug!("Stream subscriber {} disconnected.", subscriber);
    result
}

fn handle_client_message(hub: &BroadcastHub, subscriber: SubscriberId, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Subscribe { test_id }) => {
            debug!("Subscriber {} joined test {}.", subscriber, test_id);
            hub.subscribe(subscriber, test_id);
        }
        Ok(ClientMessage::Unsubscribe { test_id }) => {
            debug!("Subscriber {} left test {}.", subscriber, test_id);
            hub.unsubscribe(subscriber, test_id);
        }
        Err(err) => {
            debug!("Ignoring malformed message from subscriber {}: {}", subscriber, err);
        }
    }
}
