//! REST implementation of the directory client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::DirectoryError;
use crate::onboarding::model::EntityKind;

use super::{Context, ContextScope, CreatedEntity, Directory, SubContext, Usage};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Directory client over the school-management REST API.
pub struct HttpDirectory {
    client: reqwest::Client,
    base_url: String,
    token: Option<SecretString>,
}

impl HttpDirectory {
    pub fn new(base_url: &str, token: Option<SecretString>) -> Result<Self, DirectoryError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, DirectoryError> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let err = classify(status, &body);
        warn!(status = %status, error = %err, "Directory request failed");
        Err(err)
    }

    async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R, DirectoryError> {
        debug!(path, "Directory GET");
        let response = self.send(self.client.get(self.url(path))).await?;
        response
            .json()
            .await
            .map_err(|e| DirectoryError::Transport(format!("Unreadable response: {e}")))
    }
}

/// Map an HTTP failure to the directory error contract.
pub(crate) fn classify(status: StatusCode, body: &str) -> DirectoryError {
    let detail = error_detail(body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    });
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            DirectoryError::Validation(detail)
        }
        StatusCode::CONFLICT => DirectoryError::Conflict(detail),
        StatusCode::NOT_FOUND => DirectoryError::NotFound(detail),
        _ => DirectoryError::Transport(format!("HTTP {}: {}", status.as_u16(), detail)),
    }
}

/// Pull a human-readable message out of an error body, JSON or plain.
fn error_detail(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        for key in ["message", "error", "detail"] {
            if let Some(msg) = value.get(key).and_then(|v| v.as_str()) {
                return Some(msg.to_string());
            }
        }
    }
    Some(trimmed.chars().take(300).collect())
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn list_contexts(&self, scope: ContextScope) -> Result<Vec<Context>, DirectoryError> {
        self.get_json(&format!("/contexts?scope={}", scope.singular()))
            .await
    }

    async fn list_sub_contexts(&self, context_id: &str) -> Result<Vec<SubContext>, DirectoryError> {
        self.get_json(&format!("/contexts/{context_id}/sub-contexts"))
            .await
    }

    async fn get_usage(&self, context_id: &str) -> Result<Usage, DirectoryError> {
        self.get_json(&format!("/contexts/{context_id}/usage")).await
    }

    async fn create_entity(
        &self,
        context_id: &str,
        kind: EntityKind,
        fields: serde_json::Value,
    ) -> Result<CreatedEntity, DirectoryError> {
        let path = format!("/contexts/{context_id}/{}", kind.plural());
        debug!(path = %path, "Directory create");
        let response = self
            .send(self.client.post(self.url(&path)).json(&fields))
            .await?;
        response
            .json()
            .await
            .map_err(|e| DirectoryError::Transport(format!("Unreadable response: {e}")))
    }

    async fn assign_to_sub_context(
        &self,
        sub_context_id: &str,
        entity_id: &str,
        role_hint: Option<&str>,
    ) -> Result<(), DirectoryError> {
        let path = format!("/sub-contexts/{sub_context_id}/members");
        let body = serde_json::json!({
            "entity_id": entity_id,
            "role": role_hint,
        });
        self.send(self.client.post(self.url(&path)).json(&body))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_maps_contract_errors() {
        assert!(matches!(
            classify(StatusCode::UNPROCESSABLE_ENTITY, r#"{"message": "bad email"}"#),
            DirectoryError::Validation(m) if m == "bad email"
        ));
        assert!(matches!(
            classify(StatusCode::CONFLICT, r#"{"error": "email taken"}"#),
            DirectoryError::Conflict(m) if m == "email taken"
        ));
        assert!(matches!(
            classify(StatusCode::NOT_FOUND, ""),
            DirectoryError::NotFound(m) if m == "Not Found"
        ));
        assert!(classify(StatusCode::BAD_GATEWAY, "upstream down").is_transport());
    }

    #[test]
    fn error_detail_falls_back_to_plain_text() {
        assert_eq!(error_detail("  oops  ").as_deref(), Some("oops"));
        assert_eq!(error_detail(""), None);
        assert_eq!(
            error_detail(r#"{"detail": "school closed"}"#).as_deref(),
            Some("school closed")
        );
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let dir = HttpDirectory::new("https://api.example.test/v1/", None).unwrap();
        assert_eq!(dir.url("/contexts"), "https://api.example.test/v1/contexts");
    }
}
