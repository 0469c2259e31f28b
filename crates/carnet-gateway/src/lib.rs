//! Realtime gateway: one WebSocket per client session, events fanned out by
//! the [`dispatcher::Dispatcher`].

pub mod connection;
pub mod dispatcher;
