use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use import_service::mapping::{ImportSessions, OverwritePolicy};
use import_service::models::PartialMapping;
use import_service::services::providers::mock::{MockSuggestionProvider, Script};
use import_service::services::{EntryService, InMemoryEntryStore, InMemoryTagCache};
use import_service::{build_router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

fn setup(provider: MockSuggestionProvider) -> Router {
    setup_with_ttl(provider, Duration::from_secs(60))
}

fn setup_with_ttl(provider: MockSuggestionProvider, idle_ttl: Duration) -> Router {
    let entries = EntryService::new(
        Arc::new(InMemoryEntryStore::new()),
        Arc::new(InMemoryTagCache::new()),
        60,
    );
    let sessions = ImportSessions::new(Arc::new(provider), OverwritePolicy::default(), idle_ttl);
    build_router(AppState::new(entries, sessions))
}

fn partial(pairs: &[(&str, &str)]) -> PartialMapping {
    pairs.iter().map(|(k, v)| (*k, *v)).collect()
}

fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("X-Team-ID", "org_1")
        .header("content-type", "application/json");
    match body {
        Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn field<'a>(snapshot: &'a Value, key: &str) -> &'a Value {
    snapshot["fields"]
        .as_array()
        .unwrap()
        .iter()
        .find(|f| f["field"] == key)
        .unwrap()
}

async fn wait_until_idle(router: &Router, id: &str) -> Value {
    for _ in 0..100 {
        let (_, snapshot) = send(router, request("GET", &format!("/imports/{}", id), None)).await;
        if snapshot["streaming"] == false {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("suggestion stream did not finish");
}

#[tokio::test]
async fn suggest_endpoint_streams_partials_then_done() {
    let router = setup(MockSuggestionProvider::scripted(vec![Script::new(vec![
        partial(&[("date", "Posted")]),
        partial(&[("date", "Posted"), ("amount", "Value")]),
    ])]));

    let response = router
        .oneshot(request(
            "POST",
            "/mappings/suggest",
            Some(json!({
                "file_columns": ["Posted", "Value"],
                "first_rows": [{"Posted": "2024-03-01", "Value": "12.00"}]
            })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/event-stream"
    );

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();

    assert_eq!(text.matches("event: partial").count(), 2);
    assert!(text.contains(r#""amount":"Value""#));
    assert!(text.contains(r#""date":"Posted""#));
    assert!(text.trim_end().ends_with("data: {}"));
    assert!(text.contains("event: done"));
}

#[tokio::test]
async fn suggest_endpoint_rejects_empty_columns() {
    let router = setup(MockSuggestionProvider::scripted(vec![]));

    let (status, body) = send(
        &router,
        request(
            "POST",
            "/mappings/suggest",
            Some(json!({ "file_columns": [], "first_rows": [] })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("file_columns"));
}

#[tokio::test]
async fn import_session_maps_columns_and_confirms() {
    let router = setup(MockSuggestionProvider::scripted(vec![Script::new(vec![
        partial(&[("date", "Date")]),
        partial(&[("date", "Date"), ("amount", "Bogus")]),
        partial(&[("date", "Date"), ("amount", "Amount"), ("description", "Memo")]),
    ])]));

    let (status, created) = send(&router, request("POST", "/imports", None)).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["streaming"], false);

    let (status, _) = send(
        &router,
        request(
            "PUT",
            &format!("/imports/{}/sample", id),
            Some(json!({
                "columns": ["Date", "Amount", "Memo"],
                "rows": [{"Date": "03/05/2024", "Amount": "-1,234.50", "Memo": "ACME CORP"}]
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let snapshot = wait_until_idle(&router, &id).await;
    assert_eq!(field(&snapshot, "date")["value"], "Date");
    assert_eq!(field(&snapshot, "amount")["value"], "Amount");
    assert_eq!(field(&snapshot, "amount")["provenance"], "suggested");
    assert_eq!(field(&snapshot, "description")["preview"], "Acme Corp");
    assert_eq!(field(&snapshot, "date")["preview"], "2024-03-05");
    assert_eq!(field(&snapshot, "balance")["loading"], false);

    let (status, _) = send(&router, request("POST", &format!("/imports/{}/confirm", id), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, snapshot) = send(
        &router,
        request(
            "PUT",
            &format!("/imports/{}/account", id),
            Some(json!({ "id": "acc_1", "name": "Checking", "currency": "USD" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["currency"], "USD");
    assert_eq!(snapshot["show_currency"], false);
    assert_eq!(field(&snapshot, "amount")["preview"], "-$1,234.50");

    let (status, confirmed) =
        send(&router, request("POST", &format!("/imports/{}/confirm", id), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(confirmed["bank_account_id"], "acc_1");
    assert_eq!(confirmed["currency"], "USD");
    assert_eq!(confirmed["columns"]["description"], "Memo");
}

#[tokio::test]
async fn manual_edit_is_validated_against_file_columns() {
    let router = setup(MockSuggestionProvider::scripted(vec![Script::new(vec![])]));

    let (_, created) = send(&router, request("POST", "/imports", None)).await;
    let id = created["id"].as_str().unwrap().to_string();
    send(
        &router,
        request(
            "PUT",
            &format!("/imports/{}/sample", id),
            Some(json!({ "columns": ["Date", "Balance"], "rows": [] })),
        ),
    )
    .await;
    wait_until_idle(&router, &id).await;

    let (status, _) = send(
        &router,
        request(
            "PUT",
            &format!("/imports/{}/fields/date", id),
            Some(json!({ "value": "Nope" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, snapshot) = send(
        &router,
        request(
            "PUT",
            &format!("/imports/{}/fields/balance", id),
            Some(json!({ "value": "Balance" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(field(&snapshot, "balance")["value"], "Balance");
    assert_eq!(field(&snapshot, "balance")["provenance"], "user");
    assert!(field(&snapshot, "balance")["options"]
        .as_array()
        .unwrap()
        .contains(&json!("None")));

    let (status, _) = send(
        &router,
        request(
            "PUT",
            &format!("/imports/{}/fields/colour", id),
            Some(json!({ "value": "Date" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn sessions_are_scoped_to_the_team() {
    let router = setup(MockSuggestionProvider::scripted(vec![]));

    let (_, created) = send(&router, request("POST", "/imports", None)).await;
    let id = created["id"].as_str().unwrap().to_string();

    let other_team = Request::builder()
        .uri(format!("/imports/{}", id))
        .header("X-Team-ID", "org_2")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(other_team).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let (status, _) = send(&router, request("DELETE", &format!("/imports/{}", id), None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn idle_session_is_gone_after_its_ttl() {
    let router = setup_with_ttl(
        MockSuggestionProvider::scripted(vec![]),
        Duration::from_millis(50),
    );

    let (_, created) = send(&router, request("POST", "/imports", None)).await;
    let id = created["id"].as_str().unwrap().to_string();

    let (status, _) = send(&router, request("GET", &format!("/imports/{}", id), None)).await;
    assert_eq!(status, StatusCode::OK);

    tokio::time::sleep(Duration::from_millis(100)).await;

    let (status, body) = send(&router, request("GET", &format!("/imports/{}", id), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, _) = send(&router, request("DELETE", &format!("/imports/{}", id), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
