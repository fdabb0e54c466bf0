//! HTTP driver tests: the session routes exercised through `oneshot`.

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use chrono::{Duration, Utc};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use roster_onboard::config::FlowConfig;
use roster_onboard::directory::{Context, ContextScope, CreatedEntity, Directory, SubContext, Usage};
use roster_onboard::error::{DirectoryError, ParserError};
use roster_onboard::onboarding::{
    Candidate, EntityKind, FlowRouteState, OnboardingEntity, SessionDeps, SessionManager,
    flow_routes,
};
use roster_onboard::parser::{EntityParser, ModificationAction, ModificationOutcome, ParseOutcome};

/// Decodes the same fixed JSON rows for whichever kind is asked.
struct FixedParser {
    rows: Value,
}

#[async_trait]
impl<T: OnboardingEntity> EntityParser<T> for FixedParser {
    async fn parse_from_text(&self, _text: &str) -> Result<ParseOutcome<T>, ParserError> {
        let candidates: Vec<Candidate<T>> =
            serde_json::from_value(self.rows.clone()).map_err(|e| ParserError::InvalidResponse {
                reason: e.to_string(),
            })?;
        Ok(ParseOutcome {
            candidates,
            message: String::new(),
        })
    }

    async fn apply_modification(
        &self,
        _text: &str,
        current: &[Candidate<T>],
    ) -> Result<ModificationOutcome<T>, ParserError> {
        Ok(ModificationOutcome {
            candidates: current.to_vec(),
            message: String::new(),
            action: ModificationAction::Unclear,
        })
    }
}

/// One context of every scope, unlimited capacity, no sub-contexts.
/// `empty` lists no contexts at all.
struct OpenDirectory {
    empty: bool,
}

#[async_trait]
impl Directory for OpenDirectory {
    async fn list_contexts(&self, scope: ContextScope) -> Result<Vec<Context>, DirectoryError> {
        if self.empty {
            return Ok(Vec::new());
        }
        Ok(vec![Context {
            id: format!("{scope}-1"),
            name: format!("Main {scope}"),
            scope,
            capacity_limit: None,
            current_usage: 0,
        }])
    }

    async fn list_sub_contexts(&self, _context_id: &str) -> Result<Vec<SubContext>, DirectoryError> {
        Ok(Vec::new())
    }

    async fn get_usage(&self, _context_id: &str) -> Result<Usage, DirectoryError> {
        Ok(Usage {
            current: 0,
            limit: None,
        })
    }

    async fn create_entity(
        &self,
        _context_id: &str,
        _kind: EntityKind,
        fields: Value,
    ) -> Result<CreatedEntity, DirectoryError> {
        Ok(CreatedEntity {
            id: format!("id-{}", fields["name"].as_str().unwrap_or_default()),
            fields: fields.as_object().cloned().unwrap_or_default(),
        })
    }

    async fn assign_to_sub_context(
        &self,
        _sub_context_id: &str,
        _entity_id: &str,
        _role_hint: Option<&str>,
    ) -> Result<(), DirectoryError> {
        Ok(())
    }
}

fn app() -> (Router, Arc<SessionManager>) {
    app_with(OpenDirectory { empty: false })
}

fn app_with(directory: OpenDirectory) -> (Router, Arc<SessionManager>) {
    let parser = Arc::new(FixedParser {
        rows: json!([
            {"name": "Alice Moreau", "birthdate": "2012-04-23", "valid": true, "error": null},
            {"name": "Ben Osei", "birthdate": "2013-03-03", "valid": true, "error": null}
        ]),
    });
    let sessions = Arc::new(SessionManager::new(SessionDeps::new(
        parser,
        Arc::new(directory),
        FlowConfig::default(),
    )));
    let router = flow_routes(FlowRouteState {
        sessions: sessions.clone(),
    });
    (router, sessions)
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn open_students(router: &Router) -> String {
    let (status, body) = send(router, "POST", "/api/flows", Some(json!({"kind": "students"}))).await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_is_ok() {
    let (router, _) = app();
    let (status, body) = send(&router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn open_returns_first_messages() {
    let (router, sessions) = app();
    let (status, body) = send(&router, "POST", "/api/flows", Some(json!({"kind": "student"}))).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["kind"], "student");
    assert_eq!(body["state"]["step"], "choose_mode");
    assert_eq!(body["state"]["input_enabled"], false);
    let buttons = &body["emitted"][0]["buttons"];
    assert_eq!(buttons[0]["value"], json!({"kind": "choose_mode", "mode": "single"}));
    assert_eq!(sessions.len().await, 1);
}

#[tokio::test]
async fn unknown_kind_is_rejected() {
    let (router, _) = app();
    let (status, body) = send(&router, "POST", "/api/flows", Some(json!({"kind": "parents"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("parents"));
}

#[tokio::test]
async fn missing_session_is_not_found() {
    let (router, _) = app();
    let uri = format!("/api/flows/{}", uuid::Uuid::new_v4());
    let (status, _) = send(&router, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn text_while_waiting_on_a_button_conflicts() {
    let (router, _) = app();
    let id = open_students(&router).await;
    let (status, _) = send(
        &router,
        "POST",
        &format!("/api/flows/{id}/input"),
        Some(json!({"text": "Alice"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn command_not_on_screen_conflicts() {
    let (router, _) = app();
    let id = open_students(&router).await;
    let (status, body) = send(
        &router,
        "POST",
        &format!("/api/flows/{id}/command"),
        Some(json!({"kind": "confirm"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("confirm"));
}

#[tokio::test]
async fn batch_flow_runs_to_completion() {
    let (router, _) = app();
    let id = open_students(&router).await;
    let command = format!("/api/flows/{id}/command");

    let (status, body) = send(
        &router,
        "POST",
        &command,
        Some(json!({"kind": "choose_mode", "mode": "batch"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"]["step"], "collect_input_batch");
    assert_eq!(body["state"]["context_id"], "classroom-1");

    let (status, body) = send(
        &router,
        "POST",
        &format!("/api/flows/{id}/input"),
        Some(json!({"text": "Alice Moreau 2012-04-23, Ben Osei 2013-03-03"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"]["step"], "confirm_table");
    assert_eq!(body["state"]["valid_candidates"], 2);
    let table = body["emitted"]
        .as_array()
        .unwrap()
        .iter()
        .find_map(|m| m.get("table"))
        .expect("table message");
    assert_eq!(table["rows"].as_array().unwrap().len(), 2);

    let (status, body) = send(&router, "POST", &command, Some(json!({"kind": "confirm"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"]["step"], "complete");
    assert_eq!(body["state"]["succeeded"], 2);

    let (status, view) = send(&router, "GET", &format!("/api/flows/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["state"]["step"], "complete");
    assert!(view["messages"].as_array().unwrap().len() >= 6);
}

#[tokio::test]
async fn close_command_discards_the_session() {
    let (router, sessions) = app();
    let id = open_students(&router).await;

    let (status, body) = send(
        &router,
        "POST",
        &format!("/api/flows/{id}/command"),
        Some(json!({"kind": "close"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"]["step"], "closed");
    assert!(sessions.is_empty().await);

    let (status, _) = send(&router, "GET", &format!("/api/flows/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_removes_the_session() {
    let (router, _) = app();
    let id = open_students(&router).await;
    let uri = format!("/api/flows/{id}");

    let (status, _) = send(&router, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&router, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn idle_sessions_expire() {
    let (router, sessions) = app();
    let id = open_students(&router).await;

    assert_eq!(sessions.expire_idle_at(Utc::now() + Duration::minutes(10)).await, 0);
    assert_eq!(sessions.len().await, 1);

    assert_eq!(sessions.expire_idle_at(Utc::now() + Duration::minutes(61)).await, 1);
    assert!(sessions.is_empty().await);
    let (status, _) = send(&router, "GET", &format!("/api/flows/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn halted_sessions_expire_before_idle_ones() {
    let (router, sessions) = app_with(OpenDirectory { empty: true });
    let halted = open_students(&router).await;
    let (status, body) = send(
        &router,
        "POST",
        &format!("/api/flows/{halted}/command"),
        Some(json!({"kind": "choose_mode", "mode": "batch"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"]["step"], "halted");

    let waiting = open_students(&router).await;
    assert_eq!(sessions.len().await, 2);

    assert_eq!(sessions.expire_idle_at(Utc::now() + Duration::minutes(6)).await, 1);
    let (status, _) = send(&router, "GET", &format!("/api/flows/{halted}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&router, "GET", &format!("/api/flows/{waiting}"), None).await;
    assert_eq!(status, StatusCode::OK);
}
