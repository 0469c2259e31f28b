use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// 400: the server rejected the input.
    #[error("{0}")]
    Validation(String),

    #[error("not authenticated")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// 409: e.g. the appointment slot was taken in the meantime.
    #[error("{0}")]
    Conflict(String),

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("session is closed")]
    Closed,
}

impl ClientError {
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            400 | 422 => Self::Validation(message),
            401 => Self::Unauthorized,
            403 => Self::Forbidden(message),
            404 => Self::NotFound(message),
            409 => Self::Conflict(message),
            _ => Self::Status { status, message },
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_map_to_variants() {
        assert!(ClientError::from_status(409, "taken".into()).is_conflict());
        assert!(matches!(
            ClientError::from_status(400, "bad".into()),
            ClientError::Validation(m) if m == "bad"
        ));
        assert!(matches!(ClientError::from_status(401, String::new()), ClientError::Unauthorized));
        assert!(matches!(
            ClientError::from_status(502, "gateway".into()),
            ClientError::Status { status: 502, .. }
        ));
    }
}
