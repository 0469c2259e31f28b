//! Property-based tests for the Messenger state machine.
//!
//! Arbitrary interleavings of pushes, sends, acknowledgements, failures,
//! reconnects and typing must never break the list invariants.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use carnet_client::{ClientEvent, Messenger};
use carnet_types::events::GatewayEvent;
use carnet_types::models::{Conversation, MediaType, Message, Role, UserInfo};
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use uuid::Uuid;

const CONVERSATIONS: u128 = 3;

fn me() -> Uuid {
    Uuid::from_u128(1)
}

fn peer() -> Uuid {
    Uuid::from_u128(2)
}

fn conversation_id(index: u128) -> Uuid {
    Uuid::from_u128(100 + index)
}

#[derive(Debug, Clone)]
enum Op {
    Open(u128),
    Close,
    /// A pushed message; the same (conversation, slot) always has the same id.
    Push { conversation: u128, slot: u128, from_me: bool },
    Load { conversation: u128, slots: Vec<u128> },
    Send(String),
    /// Server echo plus REST response for the newest pending send.
    Acknowledge(u128),
    Fail,
    Typing { conversation: u128, from_me: bool },
    Disconnect,
    Ready,
    Tick(u64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        2 => (0..CONVERSATIONS).prop_map(Op::Open),
        1 => Just(Op::Close),
        4 => (0..CONVERSATIONS, 0u128..6, any::<bool>())
            .prop_map(|(conversation, slot, from_me)| Op::Push { conversation, slot, from_me }),
        1 => (0..CONVERSATIONS, prop::collection::vec(0u128..6, 0..6))
            .prop_map(|(conversation, slots)| Op::Load { conversation, slots }),
        3 => "[a-z]{0,6}".prop_map(Op::Send),
        2 => (0u128..1000).prop_map(Op::Acknowledge),
        1 => Just(Op::Fail),
        2 => (0..CONVERSATIONS, any::<bool>())
            .prop_map(|(conversation, from_me)| Op::Typing { conversation, from_me }),
        1 => Just(Op::Disconnect),
        1 => Just(Op::Ready),
        2 => (0u64..7000).prop_map(Op::Tick),
    ]
}

fn message(id: Uuid, conversation_id: Uuid, sender_id: Uuid, content: &str, second: u32) -> Message {
    Message {
        id,
        conversation_id,
        sender_id,
        content: content.into(),
        media_type: MediaType::None,
        media_url: None,
        reply_to: None,
        reactions: vec![],
        is_read: false,
        read_at: None,
        created_at: Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, second % 60).unwrap(),
        client_ref: None,
    }
}

fn slot_message(conversation: u128, slot: u128, from_me: bool) -> Message {
    let sender = if from_me { me() } else { peer() };
    let id = Uuid::from_u128(1_000 + conversation * 100 + slot);
    message(id, conversation_id(conversation), sender, "pushed", slot as u32)
}

fn user(id: Uuid) -> UserInfo {
    UserInfo {
        id,
        name: "someone".into(),
        role: Role::Doctor,
    }
}

fn messenger() -> Messenger {
    let mut messenger = Messenger::new(me());
    let now = Instant::now();
    messenger.handle(ClientEvent::Gateway(GatewayEvent::Ready { user_id: me() }), now);
    let conversations = (0..CONVERSATIONS)
        .map(|i| Conversation {
            id: conversation_id(i),
            patient_id: me(),
            doctor_id: peer(),
            last_message: None,
            unread_count: 0,
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap(),
        })
        .collect();
    messenger.handle(ClientEvent::ConversationsLoaded(conversations), now);
    messenger
}

fn apply(messenger: &mut Messenger, op: Op, now: &mut Instant) {
    match op {
        Op::Open(i) => {
            messenger.open_conversation(conversation_id(i));
        }
        Op::Close => {
            messenger.close_conversation();
        }
        Op::Push {
            conversation,
            slot,
            from_me,
        } => {
            let event = GatewayEvent::NewMessage {
                message: slot_message(conversation, slot, from_me),
            };
            messenger.handle(ClientEvent::Gateway(event), *now);
        }
        Op::Load { conversation, slots } => {
            let messages = slots
                .into_iter()
                .map(|slot| slot_message(conversation, slot, slot % 2 == 0))
                .collect();
            messenger.handle(
                ClientEvent::MessagesLoaded {
                    conversation_id: conversation_id(conversation),
                    messages,
                },
                *now,
            );
        }
        Op::Send(content) => {
            messenger.send_message(&content, None, None);
        }
        Op::Acknowledge(n) => {
            let Some(pending) = messenger.messages().iter().rev().find(|m| m.is_temporary()).cloned()
            else {
                return;
            };
            let Some(temp_id) = pending.temp_id else {
                return;
            };
            let mut stored = pending.message.clone();
            stored.id = Uuid::from_u128(50_000 + n);
            stored.client_ref = Some(temp_id.client_ref());

            messenger.handle(
                ClientEvent::Gateway(GatewayEvent::NewMessage {
                    message: stored.clone(),
                }),
                *now,
            );
            messenger.handle(
                ClientEvent::SendSucceeded {
                    temp_id,
                    message: stored,
                },
                *now,
            );
        }
        Op::Fail => {
            let temp_id = messenger.messages().iter().find_map(|m| m.temp_id);
            if let Some(temp_id) = temp_id {
                messenger.handle(
                    ClientEvent::SendFailed {
                        temp_id,
                        error: "offline".into(),
                    },
                    *now,
                );
            }
        }
        Op::Typing {
            conversation,
            from_me,
        } => {
            let id = if from_me { me() } else { peer() };
            messenger.handle(
                ClientEvent::Gateway(GatewayEvent::TypingStart {
                    conversation_id: conversation_id(conversation),
                    user: user(id),
                }),
                *now,
            );
        }
        Op::Disconnect => {
            messenger.handle(ClientEvent::Disconnected, *now);
        }
        Op::Ready => {
            messenger.handle(ClientEvent::Gateway(GatewayEvent::Ready { user_id: me() }), *now);
        }
        Op::Tick(ms) => {
            *now += Duration::from_millis(ms);
            messenger.tick(*now);
        }
    }
}

fn check_invariants(messenger: &Messenger) -> Result<(), TestCaseError> {
    let messages = messenger.messages();

    let mut ids = HashSet::new();
    for entry in messages {
        prop_assert!(ids.insert(entry.message.id), "duplicate id {}", entry.message.id);
    }

    match messenger.active_conversation() {
        Some(active) => {
            prop_assert!(messages.iter().all(|m| m.message.conversation_id == active));
            let unread = messenger.conversation(active).map(|c| c.unread_count);
            prop_assert_eq!(unread.unwrap_or(0), 0);
        }
        None => prop_assert!(messages.is_empty()),
    }

    let first_temporary = messages.iter().position(|m| m.is_temporary());
    if let Some(first) = first_temporary {
        prop_assert!(messages[first..].iter().all(|m| m.is_temporary()));
    }

    prop_assert!(messenger.typing_users().iter().all(|u| u.id != me()));
    Ok(())
}

proptest! {
    #[test]
    fn prop_list_invariants_hold(ops in prop::collection::vec(op_strategy(), 0..60)) {
        let mut messenger = messenger();
        let mut now = Instant::now();

        for op in ops {
            apply(&mut messenger, op, &mut now);
            check_invariants(&messenger)?;
        }
    }

    #[test]
    fn prop_unread_counts_distinct_incoming(slots in prop::collection::vec(0u128..6, 0..20)) {
        let mut messenger = messenger();
        let now = Instant::now();
        messenger.open_conversation(conversation_id(0));

        // Same text, sender and instant for every push; only the id differs.
        // Consecutive redeliveries of one id are the only duplicates filtered.
        let mut expected = 0;
        let mut last = None;
        for slot in slots {
            if last != Some(slot) {
                expected += 1;
            }
            last = Some(slot);
            let id = Uuid::from_u128(9_000 + slot);
            let event = GatewayEvent::NewMessage { message: message(id, conversation_id(1), peer(), "ok", 0) };
            messenger.handle(ClientEvent::Gateway(event), now);
        }

        prop_assert_eq!(messenger.conversation(conversation_id(1)).map(|c| c.unread_count), Some(expected));
        prop_assert_eq!(messenger.conversation(conversation_id(0)).map(|c| c.unread_count), Some(0));
    }

    #[test]
    fn prop_acknowledged_send_leaves_one_copy(contents in prop::collection::vec("[a-z]{1,8}", 1..6)) {
        let mut messenger = messenger();
        let mut now = Instant::now();
        messenger.open_conversation(conversation_id(0));

        for (n, content) in contents.iter().enumerate() {
            apply(&mut messenger, Op::Send(content.clone()), &mut now);
            apply(&mut messenger, Op::Acknowledge(n as u128), &mut now);
        }

        let shown = messenger.messages();
        prop_assert_eq!(shown.len(), contents.len());
        prop_assert!(shown.iter().all(|m| !m.is_temporary()));
    }
}
