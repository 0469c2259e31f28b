//! Gateway session: owns the WebSocket, identifies with the token,
//! reconnects with exponential backoff and fans events out to subscribers.
//!
//! A session is constructed explicitly, started with [`Session::connect`]
//! after login and stopped with [`Session::disconnect`] on logout.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use carnet_types::events::{CLOSE_UNAUTHORIZED, GatewayCommand, GatewayEvent};

use crate::error::ClientError;
use crate::subscription::{EventHub, Subscription};

const DEFAULT_RECONNECT_MIN: Duration = Duration::from_secs(1);
const DEFAULT_RECONNECT_MAX: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// e.g. `ws://127.0.0.1:3000/gateway`
    pub gateway_url: String,
    pub token: String,
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,
}

impl SessionConfig {
    pub fn new(gateway_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            gateway_url: gateway_url.into(),
            token: token.into(),
            reconnect_min: DEFAULT_RECONNECT_MIN,
            reconnect_max: DEFAULT_RECONNECT_MAX,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A socket is being opened.
    Connecting,
    /// Frame from the server, starting with `Ready`.
    Event(GatewayEvent),
    /// The socket is gone; a retry is scheduled.
    Disconnected,
    /// The server refused the token. No retry follows; `Closed` comes next.
    Unauthorized,
    /// The session stopped for good.
    Closed,
}

struct Running {
    commands: mpsc::UnboundedSender<GatewayCommand>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct Session {
    config: SessionConfig,
    events: EventHub<SessionEvent>,
    running: Option<Running>,
    rejected: Arc<AtomicBool>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            events: EventHub::new(),
            running: None,
            rejected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> Subscription<SessionEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.as_ref().is_some_and(|r| !r.task.is_finished())
    }

    /// Start the background connection task. No-op if already running.
    pub fn connect(&mut self) {
        if self.is_running() {
            return;
        }
        self.rejected.store(false, Ordering::Relaxed);

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run(
            self.config.clone(),
            self.events.clone(),
            self.rejected.clone(),
            commands_rx,
            shutdown_rx,
        ));
        self.running = Some(Running {
            commands,
            shutdown,
            task,
        });
    }

    /// Queue a command for the live socket. Commands issued while the
    /// socket is down are discarded on reconnect.
    pub fn send(&self, command: GatewayCommand) -> Result<(), ClientError> {
        if self.is_unauthorized() {
            return Err(ClientError::Unauthorized);
        }
        let running = self.running.as_ref().ok_or(ClientError::Closed)?;
        running.commands.send(command).map_err(|_| ClientError::Closed)
    }

    /// The server refused the token; a new login is required.
    pub fn is_unauthorized(&self) -> bool {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Close the socket and wait for the task to finish.
    pub async fn disconnect(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let _ = running.shutdown.send(());
        if let Err(e) = running.task.await {
            warn!("Session task ended abnormally: {}", e);
        }
    }
}

enum Exit {
    Shutdown,
    Lost,
    Unauthorized,
}

async fn run(
    config: SessionConfig,
    events: EventHub<SessionEvent>,
    rejected: Arc<AtomicBool>,
    mut commands: mpsc::UnboundedReceiver<GatewayCommand>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut backoff = config.reconnect_min;

    loop {
        events.publish(SessionEvent::Connecting);
        let mut ready = false;

        match connect_once(&config, &events, &mut commands, &mut shutdown, &mut ready).await {
            Ok(Exit::Shutdown) => break,
            Ok(Exit::Unauthorized) => {
                warn!("Gateway rejected the session token");
                rejected.store(true, Ordering::Relaxed);
                events.publish(SessionEvent::Unauthorized);
                break;
            }
            Ok(Exit::Lost) => info!("Gateway connection closed"),
            Err(e) => warn!("Gateway connection failed: {}", e),
        }
        events.publish(SessionEvent::Disconnected);

        if ready {
            backoff = config.reconnect_min;
        }
        debug!("Reconnecting in {:?}", backoff);
        tokio::select! {
            _ = &mut shutdown => break,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(config.reconnect_max);
    }

    events.publish(SessionEvent::Closed);
    debug!("Session closed");
}

/// One socket lifetime: connect, identify, then pump frames both ways.
async fn connect_once(
    config: &SessionConfig,
    events: &EventHub<SessionEvent>,
    commands: &mut mpsc::UnboundedReceiver<GatewayCommand>,
    shutdown: &mut oneshot::Receiver<()>,
    ready: &mut bool,
) -> Result<Exit, ClientError> {
    let (ws, _) = tokio::select! {
        _ = &mut *shutdown => return Ok(Exit::Shutdown),
        result = tokio_tungstenite::connect_async(config.gateway_url.as_str()) => result?,
    };
    let (mut sink, mut stream) = ws.split();

    let identify = GatewayCommand::Identify {
        token: config.token.clone(),
    };
    sink.send(WsMessage::Text(serde_json::to_string(&identify)?.into()))
        .await?;

    // Typing edges queued while offline are stale
    while commands.try_recv().is_ok() {}

    loop {
        tokio::select! {
            _ = &mut *shutdown => {
                let _ = sink.send(WsMessage::Close(None)).await;
                return Ok(Exit::Shutdown);
            }

            command = commands.recv() => {
                let Some(command) = command else {
                    // Session handle dropped
                    return Ok(Exit::Shutdown);
                };
                if !*ready {
                    debug!("Dropping {:?} sent before Ready", command);
                    continue;
                }
                sink.send(WsMessage::Text(serde_json::to_string(&command)?.into()))
                    .await?;
            }

            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    match serde_json::from_str::<GatewayEvent>(text.as_str()) {
                        Ok(event) => {
                            if let GatewayEvent::Ready { user_id } = &event {
                                info!("Gateway ready as {}", user_id);
                                *ready = true;
                            }
                            events.publish(SessionEvent::Event(event));
                        }
                        Err(e) => warn!("Ignoring unparseable gateway frame: {}", e),
                    }
                }
                Some(Ok(WsMessage::Close(Some(frame))))
                    if u16::from(frame.code) == CLOSE_UNAUTHORIZED =>
                {
                    return Ok(Exit::Unauthorized);
                }
                Some(Ok(WsMessage::Close(_))) | None => return Ok(Exit::Lost),
                // Pings are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }
}
