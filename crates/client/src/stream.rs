//! Push-channel supervisor.
//!
//! [`EventStreamClient`] owns the single process-wide push connection. Its
//! supervisor task connects, forwards parsed [`StreamMessage`]s to the
//! engine, and reconnects with backoff whenever the connection drops, until
//! cancelled. [`EventStreamClient::connect`] is idempotent: while a
//! connection is open, opening, or waiting to reconnect, further calls are
//! no-ops, so there is never more than one live connection.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use crate::connection::StreamEndpoint;
use crate::messages::{parse_message, StreamMessage};
use crate::reconnect::{reconnect_loop, Backoff, ReconnectConfig};

/// Lifecycle of the push connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No supervisor is running.
    Idle,
    /// Opening, or waiting to retry after a failure or disconnect.
    Connecting,
    /// A connection is open and delivering messages.
    Open,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The remote side closed, errored, or the stream ended.
    Disconnected,
    /// Nobody is consuming messages any more.
    ReceiverGone,
}

/// Handle on the push channel.
pub struct EventStreamClient {
    endpoint: Arc<StreamEndpoint>,
    reconnect: ReconnectConfig,
    state: Arc<watch::Sender<ConnectionState>>,
    messages: mpsc::Sender<StreamMessage>,
}

impl EventStreamClient {
    /// * `messages` - where parsed messages are delivered, in arrival order.
    pub fn new(
        endpoint: StreamEndpoint,
        reconnect: ReconnectConfig,
        messages: mpsc::Sender<StreamMessage>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            endpoint: Arc::new(endpoint),
            reconnect,
            state: Arc::new(state),
            messages,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Observe connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Start the supervisor unless one is already running.
    ///
    /// Returns `true` if a new supervisor was spawned. The supervisor runs
    /// until `cancel` fires or the message receiver is dropped, then returns
    /// the state to [`ConnectionState::Idle`].
    pub fn connect(&self, cancel: &CancellationToken) -> bool {
        let claimed = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Idle {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });

        if !claimed {
            tracing::debug!(state = ?self.state(), "Push channel already active, connect ignored");
            return false;
        }

        let endpoint = Arc::clone(&self.endpoint);
        let state = Arc::clone(&self.state);
        let messages = self.messages.clone();
        let backoff = Backoff::new(self.reconnect.clone());
        let cancel = cancel.clone();

        tokio::spawn(async move {
            supervise(&endpoint, backoff, &state, &messages, &cancel).await;
            state.send_replace(ConnectionState::Idle);
            tracing::info!("Push channel supervisor exited");
        });

        true
    }
}

/// Connect -> process -> reconnect, until cancelled.
async fn supervise(
    endpoint: &StreamEndpoint,
    mut backoff: Backoff,
    state: &watch::Sender<ConnectionState>,
    messages: &mpsc::Sender<StreamMessage>,
    cancel: &CancellationToken,
) {
    loop {
        state.send_replace(ConnectionState::Connecting);

        let Some(mut ws_stream) = reconnect_loop(endpoint, &mut backoff, cancel).await else {
            return; // cancelled
        };

        state.send_replace(ConnectionState::Open);

        let end = tokio::select! {
            _ = cancel.cancelled() => return,
            end = process_messages(&mut ws_stream, messages) => end,
        };

        if end == SessionEnd::ReceiverGone {
            tracing::info!("Message receiver dropped, stopping push channel");
            return;
        }

        // Messages sent during the outage are lost; the backend does not replay.
        tracing::warn!(ws_url = %endpoint.ws_url(), "Push channel lost, reconnecting");
        state.send_replace(ConnectionState::Connecting);

        let delay = backoff.next_wait();
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Read frames until the connection ends, forwarding parsed messages.
///
/// Malformed frames are logged and skipped. Binary frames are ignored.
pub async fn process_messages<S>(ws_stream: &mut S, messages: &mpsc::Sender<StreamMessage>) -> SessionEnd
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(frame) = ws_stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match parse_message(&text) {
                Ok(Some(message)) => {
                    tracing::trace!(kind = message.kind(), "Push message received");
                    if messages.send(message).await.is_err() {
                        return SessionEnd::ReceiverGone;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, raw_message = %text, "Failed to parse push message");
                }
            },
            Ok(Message::Binary(_)) => {
                tracing::trace!("Ignoring binary push frame");
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {
                // Handled automatically by tungstenite.
            }
            Ok(Message::Close(frame)) => {
                tracing::info!(?frame, "Push channel closed by server");
                return SessionEnd::Disconnected;
            }
            Ok(Message::Frame(_)) => {}
            Err(e) => {
                tracing::error!(error = %e, "Push channel receive error");
                return SessionEnd::Disconnected;
            }
        }
    }

    SessionEnd::Disconnected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::StatusData;

    fn text(s: &str) -> Result<Message, tungstenite::Error> {
        Ok(Message::Text(s.to_string()))
    }

    #[tokio::test]
    async fn forwards_valid_messages_and_skips_garbage() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut frames = futures::stream::iter(vec![
            text("not json"),
            text(r#"{"origin":"engine","type":"unknown","data":{}}"#),
            Ok(Message::Binary(vec![1, 2, 3])),
            text(r#"{"origin":"engine","type":"status","data":{"queueRemaining":2}}"#),
        ]);

        let end = process_messages(&mut frames, &tx).await;

        assert_eq!(end, SessionEnd::Disconnected);
        assert_eq!(
            rx.recv().await,
            Some(StreamMessage::Status(StatusData { queue_remaining: 2 }))
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn close_frame_ends_session() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut frames = futures::stream::iter(vec![
            Ok(Message::Close(None)),
            text(r#"{"origin":"engine","type":"status","data":{"queueRemaining":1}}"#),
        ]);

        assert_eq!(process_messages(&mut frames, &tx).await, SessionEnd::Disconnected);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_receiver_stops_processing() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut frames = futures::stream::iter(vec![text(
            r#"{"origin":"engine","type":"status","data":{"queueRemaining":1}}"#,
        )]);

        assert_eq!(process_messages(&mut frames, &tx).await, SessionEnd::ReceiverGone);
    }

    #[tokio::test]
    async fn second_connect_is_a_noop() {
        let (tx, _rx) = mpsc::channel(8);
        let client = EventStreamClient::new(
            StreamEndpoint::new("ws://127.0.0.1:9/ws"),
            ReconnectConfig::default(),
            tx,
        );
        let cancel = CancellationToken::new();

        assert!(client.connect(&cancel));
        assert_ne!(client.state(), ConnectionState::Idle);
        assert!(!client.connect(&cancel));

        let mut state = client.watch_state();
        cancel.cancel();
        state
            .wait_for(|s| *s == ConnectionState::Idle)
            .await
            .expect("supervisor should return to idle");
    }
}
