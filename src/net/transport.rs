//! TCP connection to the lobby server
//!
//! One reader task decodes frames into envelopes and posts them to the
//! inbound queue; the connection loop itself drains outbound commands onto
//! the socket. Every (re)connect starts with a `lobby/list` so the mirror is
//! rebuilt from a fresh snapshot.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::metrics::Metrics;
use crate::net::dispatch::QueueSender;
use crate::net::framing::{read_message, write_message, FramingError};
use crate::net::protocol::{decode, encode, ClientMessage};

/// Upper bound on the reconnect delay
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Fire-and-forget handle for outbound commands
#[derive(Clone, Debug)]
pub struct OutboundSender {
    tx: mpsc::UnboundedSender<ClientMessage>,
}

impl OutboundSender {
    /// Queue a command for the connection. Commands sent while no connection
    /// is up are dropped; the server state arrives with the next snapshot.
    pub fn send(&self, message: ClientMessage) {
        if let Err(e) = self.tx.send(message) {
            debug!("Outbound channel closed, dropping {:?}", e.0);
        }
    }
}

/// Create the outbound channel
pub fn outbound_channel() -> (OutboundSender, mpsc::UnboundedReceiver<ClientMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (OutboundSender { tx }, rx)
}

/// How a connected session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Server closed the stream or a read failed
    Disconnected,
    /// Every outbound sender was dropped; the client is shutting down
    OutboundClosed,
    /// The inbound queue consumer is gone
    QueueClosed,
}

/// Delay before reconnect attempt `attempt` (1-based): doubles from `base`
/// up to [`MAX_RECONNECT_DELAY`], plus up to 10% jitter
pub fn reconnect_delay(attempt: u32, base: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let delay = base
        .saturating_mul(1u32 << exponent)
        .min(MAX_RECONNECT_DELAY);
    let jitter_ms = (delay.as_millis() / 10) as u64;
    let jitter = if jitter_ms > 0 {
        rand::thread_rng().gen_range(0..=jitter_ms)
    } else {
        0
    };
    delay + Duration::from_millis(jitter)
}

/// Connect, run, and reconnect until the outbound channel or the inbound
/// queue closes
pub async fn run_connection(
    addr: SocketAddr,
    base_delay: Duration,
    queue: QueueSender,
    mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
    metrics: Arc<Metrics>,
) -> anyhow::Result<()> {
    let mut attempt: u32 = 0;

    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                attempt = 0;
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Failed to set TCP_NODELAY: {}", e);
                }
                info!(%addr, "Connected to lobby server");
                metrics.connected.store(1, Ordering::Relaxed);

                let (reader, writer) = stream.into_split();
                let result = run_session(reader, writer, &queue, &mut outbound, &metrics).await;
                metrics.connected.store(0, Ordering::Relaxed);

                match result {
                    Ok(SessionEnd::OutboundClosed) | Ok(SessionEnd::QueueClosed) => {
                        info!("Lobby connection shut down");
                        return Ok(());
                    }
                    Ok(SessionEnd::Disconnected) => warn!(%addr, "Disconnected from lobby server"),
                    Err(e) => warn!(%addr, "Lobby connection failed: {}", e),
                }
            }
            Err(e) => warn!(%addr, attempt, "Connect failed: {}", e),
        }

        attempt = attempt.saturating_add(1);
        metrics.reconnects.fetch_add(1, Ordering::Relaxed);
        let delay = reconnect_delay(attempt, base_delay);
        debug!(?delay, attempt, "Waiting before reconnect");

        // Commands issued while offline are dropped, shutdown is not
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                msg = outbound.recv() => match msg {
                    Some(msg) => debug!("Not connected, dropping {:?}", msg),
                    None => return Ok(()),
                },
            }
        }
    }
}

/// Drive one connected stream until either side ends it
pub async fn run_session<R, W>(
    reader: R,
    mut writer: W,
    queue: &QueueSender,
    outbound: &mut mpsc::UnboundedReceiver<ClientMessage>,
    metrics: &Arc<Metrics>,
) -> Result<SessionEnd, FramingError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    // Re-establish convergence before anything else
    write_command(&mut writer, &ClientMessage::ListGames, metrics).await?;

    let mut reader_task = ReaderTask(tokio::spawn(read_loop(reader, queue.clone(), metrics.clone())));

    let end = loop {
        tokio::select! {
            msg = outbound.recv() => match msg {
                Some(msg) => write_command(&mut writer, &msg, metrics).await?,
                None => break SessionEnd::OutboundClosed,
            },
            result = &mut reader_task.0 => {
                break match result {
                    Ok(end) => end,
                    Err(e) => {
                        warn!("Reader task failed: {}", e);
                        SessionEnd::Disconnected
                    }
                };
            }
        }
    };

    Ok(end)
}

/// Reader task handle that stops the task when the session ends, however
/// it ends
struct ReaderTask(tokio::task::JoinHandle<SessionEnd>);

impl Drop for ReaderTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn write_command<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &ClientMessage,
    metrics: &Metrics,
) -> Result<(), FramingError> {
    let bytes = match encode(message) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to encode {:?}: {}", message, e);
            return Ok(());
        }
    };
    write_message(writer, &bytes).await?;
    metrics.messages_sent.fetch_add(1, Ordering::Relaxed);
    Ok(())
}

async fn read_loop<R: AsyncRead + Unpin>(
    mut reader: R,
    queue: QueueSender,
    metrics: Arc<Metrics>,
) -> SessionEnd {
    loop {
        let frame = match read_message(&mut reader).await {
            Ok(frame) => frame,
            Err(FramingError::ConnectionClosed) => {
                debug!("Server closed the stream");
                return SessionEnd::Disconnected;
            }
            Err(e) => {
                warn!("Stream read error: {}", e);
                return SessionEnd::Disconnected;
            }
        };

        metrics.messages_received.fetch_add(1, Ordering::Relaxed);
        metrics
            .bytes_received
            .fetch_add(frame.len() as u64, Ordering::Relaxed);

        let envelope = match decode(&frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                metrics.messages_rejected.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to decode frame: {}", e);
                continue;
            }
        };

        if queue.post_async(envelope).await.is_err() {
            return SessionEnd::QueueClosed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::dispatch::Dispatcher;
    use crate::net::protocol::Envelope;
    use serde_json::{json, Value};

    #[test]
    fn test_reconnect_delay_doubles_and_caps() {
        let base = Duration::from_millis(1000);
        for (attempt, expected_ms) in [(1, 1000u64), (2, 2000), (3, 4000), (6, 30_000), (40, 30_000)] {
            let delay = reconnect_delay(attempt, base);
            let min = Duration::from_millis(expected_ms);
            let max = min + Duration::from_millis(expected_ms / 10);
            assert!(delay >= min && delay <= max, "attempt {attempt}: {delay:?}");
        }
    }

    #[test]
    fn test_outbound_send_after_close_is_silent() {
        let (tx, rx) = outbound_channel();
        drop(rx);
        tx.send(ClientMessage::ListGames);
    }

    async fn read_command<R: AsyncRead + Unpin>(reader: &mut R) -> Value {
        let frame = read_message(reader).await.unwrap();
        serde_json::from_slice(&frame).unwrap()
    }

    #[tokio::test]
    async fn test_session_requests_snapshot_and_forwards_frames() {
        let (client, server) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client);
        let (mut server_read, mut server_write) = tokio::io::split(server);

        let (mut dispatcher, queue) = Dispatcher::<Vec<Envelope>>::new(16);
        dispatcher
            .register("games/list", |seen: &mut Vec<Envelope>, data| {
                seen.push(Envelope::new("games/list", data));
                Ok(())
            })
            .unwrap();

        let (outbound_tx, mut outbound_rx) = outbound_channel();
        let metrics = Arc::new(Metrics::new());

        let session = tokio::spawn({
            let metrics = metrics.clone();
            async move {
                run_session(client_read, client_write, &queue, &mut outbound_rx, &metrics).await
            }
        });

        assert_eq!(read_command(&mut server_read).await, json!({"type": "lobby/list"}));

        write_message(&mut server_write, br#"{"type":"games/list","data":[]}"#)
            .await
            .unwrap();
        write_message(&mut server_write, b"garbage").await.unwrap();
        while metrics.messages_received.load(Ordering::Relaxed) < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        outbound_tx.send(ClientMessage::Leave {
            gameid: "g1".to_string(),
        });
        assert_eq!(
            read_command(&mut server_read).await,
            json!({"type": "lobby/leave", "data": {"gameid": "g1"}})
        );

        drop(outbound_tx);
        assert_eq!(session.await.unwrap().unwrap(), SessionEnd::OutboundClosed);

        let mut seen = Vec::new();
        dispatcher.dispatch_pending(&mut seen);
        assert_eq!(seen, vec![Envelope::new("games/list", json!([]))]);
        assert_eq!(metrics.messages_sent.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.messages_rejected.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_session_ends_when_server_closes() {
        let (client, server) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client);

        let (_dispatcher, queue) = Dispatcher::<()>::new(4);
        let (_outbound_tx, mut outbound_rx) = outbound_channel();
        let metrics = Arc::new(Metrics::new());

        let session = tokio::spawn(async move {
            run_session(client_read, client_write, &queue, &mut outbound_rx, &metrics).await
        });

        let (mut server_read, server_write) = tokio::io::split(server);
        read_command(&mut server_read).await;
        drop(server_write);
        drop(server_read);

        assert_eq!(session.await.unwrap().unwrap(), SessionEnd::Disconnected);
    }

    #[tokio::test]
    async fn test_session_ends_when_queue_consumer_gone() {
        let (client, server) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client);
        let (mut server_read, mut server_write) = tokio::io::split(server);

        let (dispatcher, queue) = Dispatcher::<()>::new(4);
        drop(dispatcher);
        let (_outbound_tx, mut outbound_rx) = outbound_channel();
        let metrics = Arc::new(Metrics::new());

        let session = tokio::spawn(async move {
            run_session(client_read, client_write, &queue, &mut outbound_rx, &metrics).await
        });

        read_command(&mut server_read).await;
        write_message(&mut server_write, br#"{"type":"games/list","data":[]}"#)
            .await
            .unwrap();

        assert_eq!(session.await.unwrap().unwrap(), SessionEnd::QueueClosed);
    }

    #[tokio::test]
    async fn test_run_connection_stops_when_outbound_closed() {
        // Nothing listens on this port; the loop must still exit once the
        // client drops its outbound handle
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (_dispatcher, queue) = Dispatcher::<()>::new(4);
        let (outbound_tx, outbound_rx) = outbound_channel();
        drop(outbound_tx);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            run_connection(addr, Duration::from_millis(10), queue, outbound_rx, Arc::new(Metrics::new())),
        )
        .await;
        assert!(matches!(result, Ok(Ok(()))));
    }
}
