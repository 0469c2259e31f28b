pub mod appointments;
pub mod auth;
pub mod care_links;
pub mod conversations;
pub mod convert;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod reactions;
pub mod schedules;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{get, post},
};

use carnet_gateway::connection;

pub use auth::{AppState, AppStateInner};
pub use error::ApiError;

/// All REST routes plus the `/gateway` WebSocket. Layers such as CORS and
/// request tracing are added by the binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/health", get(health))
        .route("/gateway", get(ws_upgrade));

    let protected_routes = Router::new()
        .route("/me", get(auth::me))
        .route(
            "/care-links",
            get(care_links::list_care_links).post(care_links::create_care_link),
        )
        .route(
            "/conversations",
            get(conversations::list_conversations).post(conversations::create_conversation),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route("/conversations/{conversation_id}/read", post(messages::mark_read))
        .route(
            "/conversations/{conversation_id}/messages/{message_id}/reactions",
            post(reactions::toggle_reaction),
        )
        .route(
            "/doctors/me/schedule",
            get(schedules::get_my_schedule).put(schedules::put_my_schedule),
        )
        .route("/doctors/me/unavailability", post(schedules::add_unavailability))
        .route("/doctors/{doctor_id}/slots", get(schedules::get_slots))
        .route(
            "/appointments",
            get(appointments::list_appointments).post(appointments::book_appointment),
        )
        .route(
            "/appointments/{appointment_id}/cancel",
            post(appointments::cancel_appointment),
        )
        .layer(from_fn_with_state(state.clone(), middleware::require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(
            socket,
            state.dispatcher.clone(),
            state.db.clone(),
            state.jwt_secret.clone(),
        )
    })
}
