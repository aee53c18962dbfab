//! Push channel: a Socket.IO client over a plain websocket that forwards
//! decoded events and sends room joins. Reconnects on its own.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use crate::modules::events::{PushEvent, RoomCommand};
use crate::modules::socketio::{
    CONNECT_DEFAULT_NAMESPACE, Frame, FrameError, PONG, decode_frame, encode_event,
};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(10);
/// Used when the server handshake does not announce its ping cadence.
const FALLBACK_PING_WINDOW: Duration = Duration::from_secs(45);

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("websocket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("expected an engine.io open packet, got {0:?}")]
    Handshake(String),
    #[error("server refused the namespace: {0}")]
    Refused(String),
    #[error("no ping from server within {0:?}")]
    Timeout(Duration),
    #[error("cannot derive push endpoint from {0}")]
    Endpoint(String),
}

/// `ws(s)://host[:port]/socket.io/?EIO=4&transport=websocket` for the
/// service at `base`.
pub fn socket_endpoint(base: &Url) -> Result<Url, ChannelError> {
    let mut url = base.clone();
    let scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(ChannelError::Endpoint(format!("{base} (scheme {other})"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| ChannelError::Endpoint(base.to_string()))?;
    url.set_path("/socket.io/");
    url.set_query(Some("EIO=4&transport=websocket"));
    url.set_fragment(None);
    Ok(url)
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

/// How a session ended.
enum SessionEnd {
    /// The command sender was dropped; the panel is shutting down.
    Shutdown,
    Lost,
}

/// Handle held by the panel.
pub struct PushChannel {
    pub events: mpsc::UnboundedReceiver<PushEvent>,
    pub commands: mpsc::UnboundedSender<RoomCommand>,
}

impl PushChannel {
    /// Spawns the connection loop on the current runtime.
    pub fn spawn(endpoint: Url) -> Self {
        let (event_tx, events) = mpsc::unbounded_channel();
        let (commands, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_channel(endpoint, event_tx, command_rx));
        Self { events, commands }
    }
}

/// Connects, serves one session, and reconnects with a capped backoff until
/// either side of the panel goes away. Room joins queue up while
/// disconnected and go out once the namespace is connected again.
pub async fn run_channel(
    endpoint: Url,
    events: mpsc::UnboundedSender<PushEvent>,
    mut commands: mpsc::UnboundedReceiver<RoomCommand>,
) {
    let mut backoff = MIN_BACKOFF;
    loop {
        if events.is_closed() {
            return;
        }
        let mut ws = match connect_async(endpoint.as_str()).await {
            Ok((ws, _)) => ws,
            Err(err) => {
                warn!("Push channel connect to {endpoint} failed: {err}, retrying in {backoff:?}");
                sleep(backoff).await;
                backoff = next_backoff(backoff);
                continue;
            }
        };
        info!("Push channel connected to {endpoint}");
        backoff = MIN_BACKOFF;

        let mut joined = false;
        let end = serve(&mut ws, &events, &mut commands, &mut joined).await;
        let _ = ws.close(None).await;
        if joined {
            let _ = events.send(PushEvent::Disconnected);
        }
        match end {
            Ok(SessionEnd::Shutdown) => return,
            Ok(SessionEnd::Lost) => info!("Push channel closed by server"),
            Err(err) => warn!("Push channel dropped: {err}"),
        }
        sleep(backoff).await;
        backoff = next_backoff(backoff);
    }
}

async fn serve(
    ws: &mut Socket,
    events: &mpsc::UnboundedSender<PushEvent>,
    commands: &mut mpsc::UnboundedReceiver<RoomCommand>,
    joined: &mut bool,
) -> Result<SessionEnd, ChannelError> {
    let window = match ws.next().await {
        Some(Ok(Message::Text(text))) => match decode_frame(&text)? {
            Frame::Open(handshake) => {
                debug!("Engine.IO session {}", handshake.sid);
                let announced = handshake.ping_interval + handshake.ping_timeout;
                if announced == 0 { FALLBACK_PING_WINDOW } else { Duration::from_millis(announced) }
            }
            other => return Err(ChannelError::Handshake(format!("{other:?}"))),
        },
        Some(Ok(other)) => return Err(ChannelError::Handshake(format!("{other:?}"))),
        Some(Err(err)) => return Err(err.into()),
        None => return Ok(SessionEnd::Lost),
    };
    ws.send(Message::Text(CONNECT_DEFAULT_NAMESPACE.to_string())).await?;

    let mut deadline = Instant::now() + window;
    loop {
        tokio::select! {
            message = ws.next() => {
                deadline = Instant::now() + window;
                let text = match message {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Lost),
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => return Err(err.into()),
                };
                let frame = match decode_frame(&text) {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!("Skipping undecodable frame {text:?}: {err}");
                        continue;
                    }
                };
                match frame {
                    Frame::Ping => ws.send(Message::Text(PONG.to_string())).await?,
                    Frame::Connect => {
                        *joined = true;
                        if events.send(PushEvent::Connected).is_err() {
                            return Ok(SessionEnd::Shutdown);
                        }
                    }
                    Frame::Event { name, data } => match PushEvent::from_named(&name, data) {
                        Ok(Some(event)) => {
                            if events.send(event).is_err() {
                                return Ok(SessionEnd::Shutdown);
                            }
                        }
                        Ok(None) => debug!("Ignoring event {name}"),
                        Err(err) => warn!("Malformed {name} event: {err}"),
                    },
                    Frame::ConnectError(message) => return Err(ChannelError::Refused(message)),
                    Frame::Disconnect | Frame::Close => return Ok(SessionEnd::Lost),
                    Frame::Open(_) | Frame::Pong | Frame::Noop | Frame::Ignored => {}
                }
            }
            command = commands.recv(), if *joined => {
                let Some(command) = command else {
                    return Ok(SessionEnd::Shutdown);
                };
                debug!("-> {} {:?}", command.name(), command.payload());
                let text = encode_event(command.name(), command.payload().as_ref());
                ws.send(Message::Text(text)).await?;
            }
            _ = sleep_until(deadline) => return Err(ChannelError::Timeout(window)),
        }
    }
}
