mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::{Harness, Script};
use companion_chat::auth::{DatabaseIdentityResolver, IdentityResolver};
use companion_chat::chat::ChatEvent;
use companion_chat::memory_db::Role;
use companion_chat::{build_router, Config, UnifiedAppState};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct TestApp {
    harness: Harness,
    router: Router,
    token: String,
}

impl TestApp {
    fn new(scripts: Vec<Script>) -> Self {
        let harness = Harness::new(scripts);
        let token = harness.db.users.issue_token(&harness.user.id).unwrap();
        let identity: Arc<dyn IdentityResolver> =
            Arc::new(DatabaseIdentityResolver::new(harness.db.clone(), Duration::from_secs(60)));
        let config = Config::from_lookup(|_| None).unwrap();
        let state = UnifiedAppState::from_parts(
            config,
            harness.db.clone(),
            harness.codec.clone(),
            harness.pipeline.clone(),
            identity,
        );
        Self { router: build_router(state), harness, token }
    }

    fn other_token(&self) -> String {
        let other = common::create_user(&self.harness.db, "bo@example.com", Some("Bo"));
        self.harness.db.users.issue_token(&other.id).unwrap()
    }

    async fn call(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = self.router.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    async fn json(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let (status, bytes) = self.call(method, uri, Some(&self.token), body).await;
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, value)
    }

    async fn send(&self, body: Value) -> Vec<ChatEvent> {
        let (status, bytes) = self.call("POST", "/chat/send", Some(&self.token), Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        sse_events(&String::from_utf8(bytes).unwrap())
    }
}

fn sse_events(body: &str) -> Vec<ChatEvent> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect()
}

// ===== Authentication =====

#[tokio::test]
async fn test_missing_or_unknown_token_is_unauthorized() {
    let app = TestApp::new(vec![]);

    for token in [None, Some("bogus")] {
        let (status, bytes) = app.call("GET", "/chat/conversations", token, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["detail"], "Not authenticated");
    }
}

#[tokio::test]
async fn test_health_is_public() {
    let app = TestApp::new(vec![]);
    let (status, bytes) = app.call("GET", "/healthz", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, b"OK");
}

#[tokio::test]
async fn test_me_returns_profile() {
    let app = TestApp::new(vec![]);
    let (status, body) = app.json("GET", "/auth/me", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "ana@example.com");
    assert_eq!(body["id"], app.harness.user.id.as_str());
}

#[tokio::test]
async fn test_me_derives_name_from_email_when_missing() {
    let app = TestApp::new(vec![]);
    let unnamed = common::create_user(&app.harness.db, "bo.smith@example.com", None);
    let token = app.harness.db.users.issue_token(&unnamed.id).unwrap();

    let (status, bytes) = app.call("GET", "/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["full_name"], "Bo.smith");
}

#[tokio::test]
async fn test_profile_update_reaches_next_prompt() {
    let app = TestApp::new(vec![]);
    // Resolve once so the identity is cached before the update
    app.json("GET", "/auth/me", None).await;

    let (status, body) = app
        .json(
            "PATCH",
            "/auth/me",
            Some(json!({ "full_name": "Marta Ruiz", "favorite_activity": "climbing", "daily_goals": "" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["full_name"], "Marta Ruiz");
    assert_eq!(body["favorite_activity"], "climbing");
    assert_eq!(body["daily_goals"], Value::Null);

    let (_, me) = app.json("GET", "/auth/me", None).await;
    assert_eq!(me["full_name"], "Marta Ruiz");

    app.send(json!({ "content": "Hello" })).await;
    let system = &app.harness.provider.last_request()[0].content;
    assert!(system.contains("always address the user as exactly \"Marta\""));
    assert!(system.contains("climbing"));
}

#[tokio::test]
async fn test_malformed_json_gets_detail_body() {
    let app = TestApp::new(vec![]);
    let id = app.harness.db.conversations.create_conversation(&app.harness.user.id, "t").unwrap().id;

    for (method, uri) in [
        ("POST", "/chat/send".to_string()),
        ("PATCH", format!("/chat/conversations/{}", id)),
        ("PATCH", "/auth/me".to_string()),
    ] {
        let request = Request::builder()
            .method(method)
            .uri(&uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", app.token))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{} {}", method, uri);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["detail"].is_string());
    }
}

// ===== Chat send =====

#[tokio::test]
async fn test_send_streams_sse_frames() {
    let app = TestApp::new(vec![Script::tokens(&["Hi", " there"])]);

    let events = app.send(json!({ "content": "Hello" })).await;

    let conversation_id = match events.first() {
        Some(ChatEvent::ConversationCreated { conversation_id }) => conversation_id.clone(),
        other => panic!("expected conversation_id frame, got {:?}", other),
    };
    assert_eq!(common::relayed_text(&events), "Hi there");
    match events.last() {
        Some(ChatEvent::Done { done, conversation_id: id, .. }) => {
            assert!(*done);
            assert_eq!(id, &conversation_id);
        }
        other => panic!("expected done frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_send_rejects_empty_content() {
    let app = TestApp::new(vec![]);
    let (status, body) = app.json("POST", "/chat/send", Some(json!({ "content": "" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].is_string());
}

#[tokio::test]
async fn test_send_to_foreign_conversation_is_not_found() {
    let app = TestApp::new(vec![]);
    let other = common::create_user(&app.harness.db, "bo@example.com", None);
    let theirs = app.harness.db.conversations.create_conversation(&other.id, "theirs").unwrap();

    let (status, _) = app
        .json("POST", "/chat/send", Some(json!({ "content": "hi", "conversation_id": theirs.id })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ===== Conversations =====

#[tokio::test]
async fn test_conversation_crud() {
    let app = TestApp::new(vec![]);

    let (status, created) = app.json("POST", "/chat/conversations", None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["title"], "New conversation");
    let id = created["id"].as_str().unwrap().to_string();

    let (status, named) = app
        .json("POST", "/chat/conversations", Some(json!({ "title": "Trip plans" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(named["title"], "Trip plans");

    let (_, listed) = app.json("GET", "/chat/conversations", None).await;
    let titles: Vec<&str> = listed.as_array().unwrap().iter().map(|c| c["title"].as_str().unwrap()).collect();
    assert_eq!(titles, vec!["Trip plans", "New conversation"]);

    let uri = format!("/chat/conversations/{}", id);
    let (status, renamed) = app.json("PATCH", &uri, Some(json!({ "title": "Renamed" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(renamed["title"], "Renamed");

    let (status, _) = app.json("PATCH", &uri, Some(json!({ "title": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.json("DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.json("DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_other_users_cannot_touch_conversation() {
    let app = TestApp::new(vec![]);
    let (_, created) = app.json("POST", "/chat/conversations", None).await;
    let id = created["id"].as_str().unwrap().to_string();
    let intruder = app.other_token();
    let uri = format!("/chat/conversations/{}", id);

    let (status, _) = app.call("DELETE", &uri, Some(&intruder), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app
        .call("PATCH", &uri, Some(&intruder), Some(json!({ "title": "mine now" })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, bytes) = app.call("GET", "/chat/conversations", Some(&intruder), None).await;
    assert_eq!(serde_json::from_slice::<Value>(&bytes).unwrap(), json!([]));
}

// ===== History =====

#[tokio::test]
async fn test_history_returns_decrypted_turns_without_system_messages() {
    let app = TestApp::new(vec![Script::tokens(&["Hi there"])]);
    let events = app.send(json!({ "content": "Hello" })).await;
    let Some(ChatEvent::ConversationCreated { conversation_id }) = events.first().cloned() else {
        panic!("missing conversation_id frame");
    };
    let note = app.harness.codec.encrypt("internal note").unwrap();
    app.harness
        .db
        .conversations
        .append_message(&app.harness.user.id, &conversation_id, Role::System, &note)
        .unwrap();

    let (status, body) = app
        .json("GET", &format!("/chat/history?conversation_id={}", conversation_id), None)
        .await;

    assert_eq!(status, StatusCode::OK);
    let turns: Vec<(String, String)> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|m| (m["role"].as_str().unwrap().to_string(), m["content"].as_str().unwrap().to_string()))
        .collect();
    assert_eq!(
        turns,
        vec![
            ("user".to_string(), "Hello".to_string()),
            ("assistant".to_string(), "Hi there".to_string()),
        ]
    );

    let (_, bytes) = app
        .call(
            "GET",
            &format!("/chat/history?conversation_id={}", conversation_id),
            Some(&app.other_token()),
            None,
        )
        .await;
    assert_eq!(serde_json::from_slice::<Value>(&bytes).unwrap(), json!([]));
}

#[tokio::test]
async fn test_history_query_validation() {
    let app = TestApp::new(vec![]);

    let (status, body) = app.json("GET", "/chat/history", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    let (status, _) = app.json("GET", "/chat/history?conversation_id=not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
