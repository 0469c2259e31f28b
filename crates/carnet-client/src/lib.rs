//! Client side of Carnet de Santé messaging and booking.
//!
//! [`Messenger`] is the pure synchronization state machine; [`Driver`] runs
//! it against a live [`Session`] and [`ApiClient`].

pub mod action;
pub mod api;
pub mod booking;
pub mod driver;
pub mod error;
pub mod event;
pub mod messenger;
pub mod outgoing;
pub mod session;
pub mod subscription;
pub mod typing;

pub use action::ClientAction;
pub use api::ApiClient;
pub use booking::{BookingOutcome, SlotView, book_slot, slot_views};
pub use driver::{Driver, DriverHandle, Intent};
pub use error::ClientError;
pub use event::ClientEvent;
pub use messenger::{Attachment, ChatMessage, ConnectionState, Messenger};
pub use outgoing::{OutgoingState, TempId};
pub use session::{Session, SessionConfig, SessionEvent};
pub use subscription::{EventHub, Subscription};
