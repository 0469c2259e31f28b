//! Async shell around [`Messenger`].
//!
//! The driver task is the single owner of the state machine. User intents,
//! gateway events and REST completions all arrive through one input channel
//! and are applied in arrival order. Every [`ClientAction`] is executed here:
//! gateway frames go to the [`Session`], REST calls run as spawned tasks
//! whose results come back as inputs. After each input the current state is
//! published on a `watch` channel for the UI.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::action::ClientAction;
use crate::api::ApiClient;
use crate::error::ClientError;
use crate::event::ClientEvent;
use crate::messenger::{Attachment, Messenger};
use crate::session::{Session, SessionEvent};

/// How often typing deadlines are checked.
const TICK_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub enum Intent {
    OpenConversation(Uuid),
    CloseConversation,
    SendMessage {
        content: String,
        attachment: Option<Attachment>,
        reply_to: Option<Uuid>,
    },
    InputChanged(String),
    ToggleReaction { message_id: Uuid, emoji: String },
    ClearError,
}

enum Input {
    Intent(Intent),
    Event(ClientEvent),
    Shutdown,
}

/// Handle held by the UI. Cloning is cheap; the driver stops when
/// [`DriverHandle::shutdown`] is called.
#[derive(Clone)]
pub struct DriverHandle {
    inputs: mpsc::UnboundedSender<Input>,
    state: watch::Receiver<Messenger>,
}

impl DriverHandle {
    pub fn submit(&self, intent: Intent) -> Result<(), ClientError> {
        self.inputs
            .send(Input::Intent(intent))
            .map_err(|_| ClientError::Closed)
    }

    pub fn open_conversation(&self, conversation_id: Uuid) -> Result<(), ClientError> {
        self.submit(Intent::OpenConversation(conversation_id))
    }

    pub fn send_message(&self, content: impl Into<String>) -> Result<(), ClientError> {
        self.submit(Intent::SendMessage {
            content: content.into(),
            attachment: None,
            reply_to: None,
        })
    }

    pub fn input_changed(&self, text: impl Into<String>) -> Result<(), ClientError> {
        self.submit(Intent::InputChanged(text.into()))
    }

    pub fn toggle_reaction(&self, message_id: Uuid, emoji: impl Into<String>) -> Result<(), ClientError> {
        self.submit(Intent::ToggleReaction {
            message_id,
            emoji: emoji.into(),
        })
    }

    /// Latest published state.
    pub fn snapshot(&self) -> Messenger {
        self.state.borrow().clone()
    }

    /// Wait until `predicate` holds for the published state.
    pub async fn wait_for(
        &mut self,
        predicate: impl FnMut(&Messenger) -> bool,
    ) -> Result<Messenger, ClientError> {
        let state = self
            .state
            .wait_for(predicate)
            .await
            .map_err(|_| ClientError::Closed)?;
        Ok(state.clone())
    }

    pub fn shutdown(&self) {
        let _ = self.inputs.send(Input::Shutdown);
    }
}

pub struct Driver {
    messenger: Messenger,
    api: ApiClient,
    session: Session,
    inputs_tx: mpsc::UnboundedSender<Input>,
    inputs: mpsc::UnboundedReceiver<Input>,
    state: watch::Sender<Messenger>,
}

impl Driver {
    /// Connect `session` and start driving a fresh [`Messenger`] for `me`.
    pub fn spawn(me: Uuid, api: ApiClient, mut session: Session) -> (DriverHandle, JoinHandle<()>) {
        let messenger = Messenger::new(me);
        let (inputs_tx, inputs) = mpsc::unbounded_channel();
        let (state, state_rx) = watch::channel(messenger.clone());

        // Gateway events join the same queue as everything else
        let mut subscription = session.subscribe();
        let forward = inputs_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                let event = match event {
                    SessionEvent::Connecting => ClientEvent::Connecting,
                    SessionEvent::Event(event) => ClientEvent::Gateway(event),
                    SessionEvent::Disconnected => ClientEvent::Disconnected,
                    SessionEvent::Unauthorized => ClientEvent::Unauthorized,
                    SessionEvent::Closed => break,
                };
                if forward.send(Input::Event(event)).is_err() {
                    break;
                }
            }
        });
        session.connect();

        let handle = DriverHandle {
            inputs: inputs_tx.clone(),
            state: state_rx,
        };
        let driver = Driver {
            messenger,
            api,
            session,
            inputs_tx,
            inputs,
            state,
        };
        (handle, tokio::spawn(driver.run()))
    }

    async fn run(mut self) {
        let mut tick = tokio::time::interval(TICK_INTERVAL);

        loop {
            let actions = tokio::select! {
                input = self.inputs.recv() => match input {
                    Some(Input::Intent(intent)) => self.apply(intent),
                    Some(Input::Event(event)) => self.messenger.handle(event, Instant::now()),
                    Some(Input::Shutdown) | None => break,
                },
                _ = tick.tick() => self.messenger.tick(Instant::now()),
            };

            for action in actions {
                self.execute(action);
            }
            self.state.send_replace(self.messenger.clone());
        }

        // Leave the peer with a clean typing state before the socket closes
        for action in self.messenger.close_conversation() {
            self.execute(action);
        }
        self.session.disconnect().await;
        debug!("Driver stopped");
    }

    fn apply(&mut self, intent: Intent) -> Vec<ClientAction> {
        let now = Instant::now();
        match intent {
            Intent::OpenConversation(id) => self.messenger.open_conversation(id),
            Intent::CloseConversation => self.messenger.close_conversation(),
            Intent::SendMessage {
                content,
                attachment,
                reply_to,
            } => self.messenger.send_message(&content, attachment, reply_to),
            Intent::InputChanged(text) => self.messenger.input_changed(&text, now),
            Intent::ToggleReaction { message_id, emoji } => {
                self.messenger.toggle_reaction(message_id, &emoji)
            }
            Intent::ClearError => {
                self.messenger.clear_error();
                vec![]
            }
        }
    }

    fn execute(&self, action: ClientAction) {
        match action {
            ClientAction::Gateway(command) => {
                if let Err(e) = self.session.send(command) {
                    debug!("Gateway command dropped: {}", e);
                }
            }

            ClientAction::FetchConversations => self.spawn_request(|api| async move {
                Some(match api.list_conversations().await {
                    Ok(conversations) => ClientEvent::ConversationsLoaded(conversations),
                    Err(e) => ClientEvent::RequestFailed {
                        error: e.to_string(),
                    },
                })
            }),

            ClientAction::FetchMessages { conversation_id } => self.spawn_request(move |api| async move {
                Some(match api.get_messages(conversation_id, None, None).await {
                    Ok(messages) => ClientEvent::MessagesLoaded {
                        conversation_id,
                        messages,
                    },
                    Err(e) => ClientEvent::RequestFailed {
                        error: e.to_string(),
                    },
                })
            }),

            ClientAction::SendMessage {
                temp_id,
                conversation_id,
                request,
            } => self.spawn_request(move |api| async move {
                Some(match api.send_message(conversation_id, &request).await {
                    Ok(message) => ClientEvent::SendSucceeded { temp_id, message },
                    Err(e) => ClientEvent::SendFailed {
                        temp_id,
                        error: e.to_string(),
                    },
                })
            }),

            // Success is reflected by the MessagesRead push
            ClientAction::MarkRead { conversation_id } => self.spawn_request(move |api| async move {
                if let Err(e) = api.mark_read(conversation_id).await {
                    warn!("Marking {} read failed: {}", conversation_id, e);
                }
                None
            }),

            ClientAction::ToggleReaction {
                conversation_id,
                message_id,
                emoji,
            } => self.spawn_request(move |api| async move {
                api.toggle_reaction(conversation_id, message_id, &emoji)
                    .await
                    .err()
                    .map(|e| ClientEvent::RequestFailed {
                        error: e.to_string(),
                    })
            }),
        }
    }

    /// Run a REST call off the driver loop and feed its result back in.
    fn spawn_request<F, Fut>(&self, request: F)
    where
        F: FnOnce(ApiClient) -> Fut,
        Fut: Future<Output = Option<ClientEvent>> + Send + 'static,
    {
        let inputs = self.inputs_tx.clone();
        let fut = request(self.api.clone());
        tokio::spawn(async move {
            if let Some(event) = fut.await {
                let _ = inputs.send(Input::Event(event));
            }
        });
    }
}
