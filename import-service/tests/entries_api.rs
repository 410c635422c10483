use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use import_service::mapping::{ImportSessions, OverwritePolicy};
use import_service::services::providers::mock::MockSuggestionProvider;
use import_service::services::{EntryService, InMemoryEntryStore, InMemoryTagCache};
use import_service::{build_router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

struct TestApp {
    router: Router,
    store: Arc<InMemoryEntryStore>,
    cache: Arc<InMemoryTagCache>,
}

fn setup() -> TestApp {
    let store = Arc::new(InMemoryEntryStore::new());
    let cache = Arc::new(InMemoryTagCache::new());
    let entries = EntryService::new(store.clone(), cache.clone(), 60);
    let sessions = ImportSessions::new(
        Arc::new(MockSuggestionProvider::name_match()),
        OverwritePolicy::default(),
        Duration::from_secs(60),
    );

    TestApp {
        router: build_router(AppState::new(entries, sessions)),
        store,
        cache,
    }
}

fn entry(description: &str) -> Value {
    json!({
        "project_id": "6f1c2a8e-4b7d-4c55-9a53-0f1e2d3c4b5a",
        "date": "2024-03-01",
        "duration": 3600,
        "description": description
    })
}

fn post_entries(team_id: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/entries")
        .header("content-type", "application/json");
    if let Some(team_id) = team_id {
        builder = builder.header("X-Team-ID", team_id);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn create_entries_stamps_team_and_invalidates_once() {
    let app = setup();

    let response = app
        .router
        .oneshot(post_entries(
            Some("org_1"),
            json!([entry("design review"), entry("pairing")]),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(response.headers().contains_key("x-request-id"));

    let body = json_body(response).await;
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r["team_id"] == "org_1"));
    assert_eq!(rows[0]["description"], "design review");
    assert_eq!(rows[1]["description"], "pairing");

    assert_eq!(app.store.insert_calls(), 1);
    assert_eq!(app.store.rows().len(), 2);
    assert_eq!(
        app.cache.invalidations(),
        vec!["tracker_projects_org_1".to_string()]
    );
}

#[tokio::test]
async fn store_failure_is_surfaced_and_cache_still_invalidated() {
    let app = setup();
    app.store.fail_writes(true);

    let response = app
        .router
        .oneshot(post_entries(Some("org_1"), json!([entry("a")])))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Database error");

    assert_eq!(
        app.cache.invalidations(),
        vec!["tracker_projects_org_1".to_string()]
    );
}

#[tokio::test]
async fn missing_team_header_is_unauthorized() {
    let app = setup();

    let response = app
        .router
        .oneshot(post_entries(None, json!([entry("a")])))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.store.insert_calls(), 0);
    assert!(app.cache.invalidations().is_empty());
}

#[tokio::test]
async fn invalid_batch_is_rejected_before_writing() {
    let app = setup();

    let mut bad = entry("a");
    bad["duration"] = json!(-1);

    let response = app
        .router
        .clone()
        .oneshot(post_entries(Some("org_1"), json!([bad])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = app
        .router
        .oneshot(post_entries(Some("org_1"), json!([])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    assert_eq!(app.store.insert_calls(), 0);
}

#[tokio::test]
async fn list_reflects_writes_for_the_callers_team_only() {
    let app = setup();

    app.router
        .clone()
        .oneshot(post_entries(Some("org_1"), json!([entry("a")])))
        .await
        .unwrap();
    app.router
        .clone()
        .oneshot(post_entries(Some("org_2"), json!([entry("b")])))
        .await
        .unwrap();

    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/entries")
                .header("X-Team-ID", "org_1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["description"], "a");
}

#[tokio::test]
async fn health_and_readiness_report_ok() {
    let app = setup();

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["service"], "import-service");

    let response = app
        .router
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
