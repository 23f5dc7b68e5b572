//! One WebSocket client.
//!
//! Each connection runs two paths. The receive path decodes frames and hands
//! them to the hub. The send path drains the outbound queue filled by the hub
//! and pings the peer on a timer. The receive path owns deregistration: it
//! sends exactly one `deregister` when it ends, whatever the reason.

use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{
    select,
    sync::{mpsc, oneshot},
    time::{Instant, interval_at, sleep_until, timeout},
};
use tracing::{debug, trace, warn};

use crate::{
    hub::{ClientHandle, ClientId, HubHandle},
    message::Envelope,
};

/// Timing and size limits applied to every connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Upper bound on a single frame write.
    pub write_wait: Duration,
    /// How long the peer may go without answering a ping.
    pub pong_wait: Duration,
    /// Largest inbound message accepted, in bytes.
    pub max_message_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            write_wait: Duration::from_secs(10),
            pong_wait: Duration::from_secs(60),
            max_message_size: 512,
        }
    }
}

impl ConnectionConfig {
    /// Pings go out at 9/10 of the pong window so a healthy peer always
    /// answers before its deadline.
    pub fn ping_period(&self) -> Duration {
        (self.pong_wait * 9 / 10).max(Duration::from_millis(1))
    }
}

/// Registers `socket` with the hub and runs it until either side gives up.
pub async fn serve(socket: WebSocket, hub: HubHandle, config: ConnectionConfig) {
    let (client, outbound) = ClientHandle::new();
    let client_id = client.id().clone();

    // Registration is queued before any inbound message can be, so the hub
    // always knows the source of what it receives.
    if let Err(err) = hub.register(client) {
        warn!(client_id = %client_id, error = ?err, "could not register client");
        return;
    }

    let (sink, stream) = socket.split();
    let (writer_done, writer_closed) = oneshot::channel();
    let writer = tokio::spawn(send_loop(
        sink,
        outbound,
        config.clone(),
        client_id.clone(),
        writer_done,
    ));

    receive_loop(stream, &hub, &client_id, config.pong_wait, writer_closed).await;

    if let Err(err) = hub.deregister(client_id.clone()) {
        debug!(client_id = %client_id, error = ?err, "hub gone before deregistration");
    }
    if let Err(err) = writer.await {
        warn!(client_id = %client_id, error = ?err, "write task panicked");
    }
}

async fn receive_loop(
    mut stream: SplitStream<WebSocket>,
    hub: &HubHandle,
    client_id: &ClientId,
    pong_wait: Duration,
    mut writer_closed: oneshot::Receiver<()>,
) {
    trace!(client_id = %client_id, "starting read task");
    let mut deadline = Instant::now() + pong_wait;

    loop {
        let frame = select! {
            _ = &mut writer_closed => {
                debug!(client_id = %client_id, "write task ended");
                break;
            }
            _ = sleep_until(deadline) => {
                warn!(client_id = %client_id, "no pong before read deadline");
                break;
            }
            frame = stream.next() => frame,
        };

        let text = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(err) => {
                    warn!(client_id = %client_id, error = ?err, "could not decode message");
                    continue;
                }
            },
            Some(Ok(Message::Pong(_))) => {
                deadline = Instant::now() + pong_wait;
                continue;
            }
            Some(Ok(Message::Ping(_))) => continue,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(err)) => {
                warn!(client_id = %client_id, error = ?err, "unexpected socket close");
                break;
            }
        };

        let message = match Envelope::decode(&text) {
            Ok(message) => message,
            Err(err) => {
                warn!(client_id = %client_id, error = ?err, "could not decode message");
                continue;
            }
        };

        if hub.dispatch(client_id.clone(), message).is_err() {
            debug!(client_id = %client_id, "hub stopped, closing read task");
            break;
        }
    }

    debug!(client_id = %client_id, "closing read task");
}

// `_done` is dropped when this returns, waking the receive path.
async fn send_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    config: ConnectionConfig,
    client_id: ClientId,
    _done: oneshot::Sender<()>,
) {
    trace!(client_id = %client_id, "starting write task");
    let period = config.ping_period();
    let mut ticker = interval_at(Instant::now() + period, period);

    loop {
        let result = select! {
            _ = ticker.tick() => write_frame(&mut sink, Message::Ping(Vec::new()), config.write_wait).await,
            queued = outbound.recv() => match queued {
                Some(text) => write_frame(&mut sink, Message::Text(text), config.write_wait).await,
                None => {
                    // Hub closed the queue.
                    let _ = write_frame(&mut sink, Message::Close(None), config.write_wait).await;
                    break;
                }
            },
        };

        if let Err(err) = result {
            debug!(client_id = %client_id, error = ?err, "write failed");
            break;
        }
    }

    let _ = timeout(config.write_wait, sink.close()).await;
    debug!(client_id = %client_id, "closing write task");
}

async fn write_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    frame: Message,
    write_wait: Duration,
) -> Result<()> {
    timeout(write_wait, sink.send(frame))
        .await
        .context("write deadline exceeded")??;
    Ok(())
}
