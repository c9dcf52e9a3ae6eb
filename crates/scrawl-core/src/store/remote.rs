//! Remote note store client over a JSON HTTP API.

use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use tokio::sync::watch;

use super::{ChangeNotifier, RemoteError, RemoteResult, RemoteStore};
use crate::models::{Note, NoteId};
use crate::util::{is_http_url, normalize_text_option};

/// Cloud mirror of a user's notes.
///
/// Thin client over the notes API: list/get/upsert/delete, bearer-token
/// auth. The change generation reflects mutations made through this
/// handle; server-side changes are only discovered by the next sync pull.
#[derive(Clone)]
pub struct HttpRemoteStore {
    base_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
    changes: std::sync::Arc<ChangeNotifier>,
}

impl std::fmt::Debug for HttpRemoteStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemoteStore")
            .field("base_url", &self.base_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl HttpRemoteStore {
    pub fn new(base_url: impl Into<String>) -> RemoteResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        Ok(Self {
            base_url,
            auth_token: None,
            client: reqwest::Client::builder().build()?,
            changes: std::sync::Arc::new(ChangeNotifier::new()),
        })
    }

    /// Attach a bearer token for authenticated endpoints.
    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = normalize_text_option(Some(token.into()));
        self
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.header("Accept", "application/json");
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn notes_url(&self, user_id: &str) -> String {
        format!("{}/v1/users/{user_id}/notes", self.base_url)
    }

    fn note_url(&self, id: &NoteId) -> String {
        format!("{}/v1/notes/{}", self.base_url, id)
    }
}

impl RemoteStore for HttpRemoteStore {
    async fn list(&self, user_id: &str) -> RemoteResult<Vec<Note>> {
        let response = self
            .request(self.client.get(self.notes_url(user_id)))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Api(parse_api_error(status, &body)));
        }

        Ok(response.json::<Vec<Note>>().await?)
    }

    async fn get(&self, id: &NoteId) -> RemoteResult<Option<Note>> {
        let response = self
            .request(self.client.get(self.note_url(id)))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Api(parse_api_error(status, &body)));
        }

        Ok(Some(response.json::<Note>().await?))
    }

    async fn upsert(&self, note: &Note, user_id: &str) -> RemoteResult<NoteId> {
        // The server assigns an id when the note arrives without one.
        let builder = if note.id.is_unassigned() {
            self.client.post(self.notes_url(user_id))
        } else {
            self.client.put(format!(
                "{}/v1/users/{user_id}/notes/{}",
                self.base_url, note.id
            ))
        };

        let response = self.request(builder.json(note)).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Api(parse_api_error(status, &body)));
        }

        let payload = response.json::<UpsertResponse>().await?;
        let id = match normalize_text_option(payload.id) {
            Some(id) => NoteId::from(id),
            None if !note.id.is_unassigned() => note.id.clone(),
            None => {
                return Err(RemoteError::InvalidPayload(
                    "upsert response did not include an assigned id".to_string(),
                ))
            }
        };

        self.changes.notify();
        Ok(id)
    }

    async fn delete(&self, id: &NoteId) -> RemoteResult<()> {
        let response = self
            .request(self.client.delete(self.note_url(id)))
            .send()
            .await?;

        // Deleting an already-absent note is idempotent.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Api(parse_api_error(status, &body)));
        }

        self.changes.notify();
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }
}

#[derive(Debug, Deserialize)]
struct UpsertResponse {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> RemoteResult<String> {
    let base_url = normalize_text_option(Some(raw)).ok_or_else(|| {
        RemoteError::InvalidConfiguration("base URL must not be empty".to_string())
    })?;
    if is_http_url(&base_url) {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(RemoteError::InvalidConfiguration(
            "base URL must include http:// or https://".to_string(),
        ))
    }
}
