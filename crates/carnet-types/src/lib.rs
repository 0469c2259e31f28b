//! Types shared by the Carnet de Santé server and client: REST payloads,
//! gateway events and the domain models both sides render.

pub mod api;
pub mod events;
pub mod models;
