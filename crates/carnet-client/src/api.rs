//! REST client for the Carnet API.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use carnet_types::api::{
    AuthResponse, BookAppointmentRequest, CreateCareLinkRequest, CreateConversationRequest,
    ErrorBody, LoginRequest, MarkReadResponse, RegisterRequest, SendMessageRequest, SlotsResponse,
    ToggleReactionRequest, ToggleReactionResponse, UnavailabilityRequest, UpdateScheduleRequest,
};
use carnet_types::models::{
    Appointment, Conversation, DoctorSchedule, Message, Unavailability, UserProfile,
};

use crate::error::ClientError;

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    /// `base_url` is the server root, e.g. `http://127.0.0.1:3000`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// WebSocket URL of the gateway on the same host.
    pub fn gateway_url(&self) -> String {
        let ws_base = self
            .base_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!("{}/gateway", ws_base)
    }

    // -- Auth --

    /// Registers and keeps the returned token for later calls.
    pub async fn register(&mut self, req: &RegisterRequest) -> Result<AuthResponse, ClientError> {
        let auth: AuthResponse = self.send(self.post("/auth/register").json(req)).await?;
        self.token = Some(auth.token.clone());
        Ok(auth)
    }

    pub async fn login(&mut self, req: &LoginRequest) -> Result<AuthResponse, ClientError> {
        let auth: AuthResponse = self.send(self.post("/auth/login").json(req)).await?;
        self.token = Some(auth.token.clone());
        Ok(auth)
    }

    pub fn logout(&mut self) {
        self.token = None;
    }

    pub async fn me(&self) -> Result<UserProfile, ClientError> {
        self.send(self.get("/me")).await
    }

    // -- Care links --

    pub async fn link_doctor(&self, doctor_id: Uuid) -> Result<UserProfile, ClientError> {
        self.send(self.post("/care-links").json(&CreateCareLinkRequest { doctor_id }))
            .await
    }

    pub async fn care_links(&self) -> Result<Vec<UserProfile>, ClientError> {
        self.send(self.get("/care-links")).await
    }

    // -- Messaging --

    pub async fn list_conversations(&self) -> Result<Vec<Conversation>, ClientError> {
        self.send(self.get("/conversations")).await
    }

    pub async fn open_conversation(&self, participant_id: Uuid) -> Result<Conversation, ClientError> {
        let body = CreateConversationRequest { participant_id };
        self.send(self.post("/conversations").json(&body)).await
    }

    /// History oldest first. `before` pages backwards from a loaded message.
    pub async fn get_messages(
        &self,
        conversation_id: Uuid,
        limit: Option<u32>,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, ClientError> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }
        if let Some(before) = before {
            query.push(("before", before.to_rfc3339_opts(SecondsFormat::Millis, true)));
        }
        let path = format!("/conversations/{}/messages", conversation_id);
        self.send(self.get(&path).query(&query)).await
    }

    pub async fn send_message(
        &self,
        conversation_id: Uuid,
        req: &SendMessageRequest,
    ) -> Result<Message, ClientError> {
        let path = format!("/conversations/{}/messages", conversation_id);
        self.send(self.post(&path).json(req)).await
    }

    pub async fn mark_read(&self, conversation_id: Uuid) -> Result<MarkReadResponse, ClientError> {
        let path = format!("/conversations/{}/read", conversation_id);
        self.send(self.post(&path)).await
    }

    pub async fn toggle_reaction(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        emoji: &str,
    ) -> Result<ToggleReactionResponse, ClientError> {
        let path = format!(
            "/conversations/{}/messages/{}/reactions",
            conversation_id, message_id
        );
        let body = ToggleReactionRequest {
            emoji: emoji.to_string(),
        };
        self.send(self.post(&path).json(&body)).await
    }

    // -- Scheduling --

    pub async fn my_schedule(&self) -> Result<DoctorSchedule, ClientError> {
        self.send(self.get("/doctors/me/schedule")).await
    }

    pub async fn update_schedule(
        &self,
        req: &UpdateScheduleRequest,
    ) -> Result<DoctorSchedule, ClientError> {
        self.send(self.put("/doctors/me/schedule").json(req)).await
    }

    pub async fn add_unavailability(
        &self,
        req: &UnavailabilityRequest,
    ) -> Result<Unavailability, ClientError> {
        self.send(self.post("/doctors/me/unavailability").json(req)).await
    }

    pub async fn slots(&self, doctor_id: Uuid, date: NaiveDate) -> Result<SlotsResponse, ClientError> {
        #[derive(Serialize)]
        struct SlotsQuery {
            date: NaiveDate,
        }
        let path = format!("/doctors/{}/slots", doctor_id);
        self.send(self.get(&path).query(&SlotsQuery { date })).await
    }

    /// A taken slot comes back as [`ClientError::Conflict`].
    pub async fn book(&self, req: &BookAppointmentRequest) -> Result<Appointment, ClientError> {
        self.send(self.post("/appointments").json(req)).await
    }

    pub async fn appointments(&self) -> Result<Vec<Appointment>, ClientError> {
        self.send(self.get("/appointments")).await
    }

    pub async fn cancel_appointment(&self, appointment_id: Uuid) -> Result<Appointment, ClientError> {
        let path = format!("/appointments/{}/cancel", appointment_id);
        self.send(self.post(&path)).await
    }

    // -- Plumbing --

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.authorize(self.http.get(self.url(path)))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.authorize(self.http.post(self.url(path)))
    }

    fn put(&self, path: &str) -> RequestBuilder {
        self.authorize(self.http.put(self.url(path)))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ClientError> {
        let response = builder.send().await?;
        let response = error_for_status(response).await?;
        Ok(response.json().await?)
    }
}

/// Turn a non-2xx response into the matching [`ClientError`], reading the
/// server's `{ "error": ... }` body when there is one.
async fn error_for_status(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => body.error,
        Err(_) if text.is_empty() => status.to_string(),
        Err(_) => text,
    };
    debug!("Request failed with {}: {}", status, message);
    Err(ClientError::from_status(status.as_u16(), message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_url_follows_scheme() {
        assert_eq!(
            ApiClient::new("http://127.0.0.1:3000/").gateway_url(),
            "ws://127.0.0.1:3000/gateway"
        );
        assert_eq!(
            ApiClient::new("https://carnet.example").gateway_url(),
            "wss://carnet.example/gateway"
        );
    }

    #[test]
    fn token_lifecycle() {
        let mut api = ApiClient::new("http://localhost:3000").with_token("abc");
        assert_eq!(api.token(), Some("abc"));
        api.logout();
        assert_eq!(api.token(), None);
    }
}
