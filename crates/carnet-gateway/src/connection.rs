use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use carnet_db::Database;
use carnet_types::api::Claims;
use carnet_types::events::{CLOSE_UNAUTHORIZED, GatewayCommand, GatewayEvent};
use carnet_types::models::UserInfo;

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Time allowed for the client to send `Identify` after the upgrade.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle a single WebSocket connection: Identify handshake, Ready, then the
/// event loop until either side goes away.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Wait for Identify command with JWT
    let claims = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Identify::Accepted(claims) => claims,
        Identify::Rejected => {
            warn!("WebSocket client sent an invalid token, closing");
            let close = CloseFrame {
                code: CLOSE_UNAUTHORIZED,
                reason: "invalid token".into(),
            };
            let _ = sender.send(Message::Close(Some(close))).await;
            return;
        }
        Identify::Abandoned => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };
    let user = claims.user_info();

    info!("{} ({}) connected to gateway", user.name, user.id);

    // Step 2: Send Ready event
    if !send_event(&mut sender, &GatewayEvent::Ready { user_id: user.id }).await {
        return;
    }

    run_connection_loop(sender, receiver, dispatcher, db, user).await;
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    user: UserInfo,
) {
    // Send existing online users to this client so they see who's already here
    for uid in dispatcher.online_users().await {
        let event = GatewayEvent::PresenceUpdate {
            user_id: uid,
            online: true,
        };
        if !send_event(&mut sender, &event).await {
            return;
        }
    }

    // Subscribe before going online so our own presence event is not missed
    let mut broadcast_rx = dispatcher.subscribe();
    let (conn_id, mut user_rx) = dispatcher.connect(user.id).await;

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts + targeted events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} events", n);
                            continue;
                        }
                        Err(_) => break,
                    };
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let Some(event) = result else { break };
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let dispatcher_recv = dispatcher.clone();
    let user_recv = user.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => handle_command(&dispatcher_recv, &db, &user_recv, cmd).await,
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            user_recv.name,
                            user_recv.id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.disconnect(user.id, conn_id).await;
    info!("{} ({}) disconnected from gateway", user.name, user.id);
}

enum Identify {
    Accepted(Claims),
    Rejected,
    /// Socket closed or timed out before a valid `Identify` arrived.
    Abandoned,
}

async fn wait_for_identify(receiver: &mut SplitStream<WebSocket>, jwt_secret: &str) -> Identify {
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    return match decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    ) {
                        Ok(token_data) => Identify::Accepted(token_data.claims),
                        Err(e) => {
                            debug!("Identify token rejected: {}", e);
                            Identify::Rejected
                        }
                    };
                }
            }
        }
        Identify::Abandoned
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, identify)
        .await
        .unwrap_or(Identify::Abandoned)
}

async fn handle_command(dispatcher: &Dispatcher, db: &Arc<Database>, user: &UserInfo, cmd: GatewayCommand) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::TypingStart { conversation_id } => {
            if let Some(peer) = conversation_peer(db, conversation_id, user.id).await {
                dispatcher
                    .send_to_user(
                        peer,
                        GatewayEvent::TypingStart {
                            conversation_id,
                            user: user.clone(),
                        },
                    )
                    .await;
            }
        }

        GatewayCommand::TypingStop { conversation_id } => {
            if let Some(peer) = conversation_peer(db, conversation_id, user.id).await {
                dispatcher
                    .send_to_user(
                        peer,
                        GatewayEvent::TypingStop {
                            conversation_id,
                            user_id: user.id,
                        },
                    )
                    .await;
            }
        }
    }
}

/// The other participant of `conversation_id`, if `user_id` takes part in it.
/// Typing events are only ever relayed to this peer, never back to the typer.
async fn conversation_peer(db: &Arc<Database>, conversation_id: Uuid, user_id: Uuid) -> Option<Uuid> {
    let db = db.clone();
    let cid = conversation_id.to_string();
    let row = match tokio::task::spawn_blocking(move || db.get_conversation(&cid)).await {
        Ok(Ok(row)) => row?,
        Ok(Err(e)) => {
            error!("DB get_conversation error: {}", e);
            return None;
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            return None;
        }
    };

    let uid = user_id.to_string();
    let peer = if row.patient_id == uid {
        &row.doctor_id
    } else if row.doctor_id == uid {
        &row.patient_id
    } else {
        debug!("{} is not a participant of {}, dropping typing event", user_id, conversation_id);
        return None;
    };
    peer.parse().ok()
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &GatewayEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to serialize gateway event: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}
