//! Integration tests for the migration job endpoints.
//!
//! Tests cover:
//! - POST /api/v1/migrations (start a job)
//! - POST /api/v1/migrations/dry-run
//! - GET /api/v1/migrations and GET /api/v1/migrations/:job_id
//! - DELETE /api/v1/migrations/:job_id (cancel)
//! - GET /api/v1/migrations/history

mod common;

use std::time::Duration;

use axum::http::{Method, StatusCode};
use common::{
    delete_request, get_request, json_request, legacy_settings, parse_response_body,
    source_post, source_users, TestApp,
};
use domain::models::SourceKind;
use domain::services::StaticSourceConnector;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

async fn start_job(app: &TestApp, body: Value) -> Uuid {
    let response = app
        .router
        .clone()
        .oneshot(json_request(Method::POST, "/api/v1/migrations", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = parse_response_body(response).await;
    body["job_id"].as_str().unwrap().parse().unwrap()
}

/// Waits for the job task, then reads the descriptor back over HTTP.
async fn finished_job(app: &TestApp, job_id: Uuid) -> Value {
    app.service.wait(job_id).await.unwrap();
    let response = app
        .router
        .clone()
        .oneshot(get_request(&format!("/api/v1/migrations/{}", job_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    parse_response_body(response).await
}

// =============================================================================
// POST /api/v1/migrations Tests
// =============================================================================

#[tokio::test]
async fn test_start_migration_imports_everything() {
    let source = StaticSourceConnector::new(SourceKind::Legacy)
        .with_users(source_users(2))
        .with_posts(vec![source_post(10, 1, false), source_post(11, 2, false)]);
    let app = TestApp::new(source);

    let job_id = start_job(&app, legacy_settings()).await;
    let job = finished_job(&app, job_id).await;

    assert_eq!(job["status"], "completed");
    assert_eq!(job["result"]["counts"]["users"], 2);
    assert_eq!(job["result"]["counts"]["posts"], 2);
    assert_eq!(job["result"]["counts"]["files"], 2);
    assert_eq!(job["error_count"], 0);
    assert!(job["ended_at"].is_string());

    assert_eq!(app.store.users().await.len(), 2);
    assert_eq!(app.store.snippets().await.len(), 2);
}

#[tokio::test]
async fn test_post_with_unknown_owner_is_skipped() {
    let source = StaticSourceConnector::new(SourceKind::Legacy)
        .with_users(source_users(2))
        .with_posts(vec![source_post(10, 99, false)]);
    let app = TestApp::new(source);

    let job_id = start_job(&app, legacy_settings()).await;
    let job = finished_job(&app, job_id).await;

    assert_eq!(job["status"], "completed");
    assert_eq!(job["result"]["counts"]["posts"], 0);
    assert_eq!(job["error_count"], 1);
    assert_eq!(job["result"]["skipped"]["post"], json!(["10"]));
    assert!(app.store.snippets().await.is_empty());
}

#[tokio::test]
async fn test_rerun_maps_existing_users() {
    let users = source_users(2);
    let store = persistence::InMemoryTargetStore::new();
    store.seed_user(&users[0].username).await;
    let source = StaticSourceConnector::new(SourceKind::Legacy).with_users(users);
    let app = TestApp::with_store(source, store);

    let job_id = start_job(&app, legacy_settings()).await;
    let job = finished_job(&app, job_id).await;

    assert_eq!(job["result"]["counts"]["users"], 2);
    assert_eq!(app.store.users().await.len(), 2);
}

#[tokio::test]
async fn test_generated_passwords_only_on_job_detail() {
    let users = source_users(1);
    let username = users[0].username.clone();
    let source = StaticSourceConnector::new(SourceKind::Legacy).with_users(users);
    let app = TestApp::new(source);

    let mut settings = legacy_settings();
    settings["reset_passwords"] = json!(true);
    let job_id = start_job(&app, settings).await;
    let job = finished_job(&app, job_id).await;

    let plaintext = job["result"]["generated_passwords"][&username]
        .as_str()
        .unwrap()
        .to_string();
    assert!(!plaintext.is_empty());

    let stored = app.store.users().await;
    let hash = stored[0].1.password_hash.clone().unwrap();
    assert_ne!(hash, plaintext);
    assert!(!hash.contains(&plaintext));

    let response = app
        .router
        .clone()
        .oneshot(get_request("/api/v1/migrations"))
        .await
        .unwrap();
    let listing = parse_response_body(response).await;
    assert!(!listing.to_string().contains(&plaintext));

    let summary = app.store.summary(job_id).await.unwrap();
    assert!(!serde_json::to_string(&summary).unwrap().contains(&plaintext));
}

#[tokio::test]
async fn test_settings_snapshot_hides_secrets() {
    let app = TestApp::new(StaticSourceConnector::new(SourceKind::Legacy));

    let job_id = start_job(&app, legacy_settings()).await;
    let job = finished_job(&app, job_id).await;

    let url = job["settings"]["source_url"].as_str().unwrap();
    assert!(!url.contains("secret"));
    assert!(url.contains("***"));
}

#[tokio::test]
async fn test_start_migration_validation_errors() {
    let app = TestApp::new(StaticSourceConnector::new(SourceKind::Github));

    let missing_token = json!({
        "source_kind": "github",
        "source_url": "https://api.github.com",
        "username": "alice"
    });
    let response = app
        .router
        .clone()
        .oneshot(json_request(Method::POST, "/api/v1/migrations", missing_token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = parse_response_body(response).await;
    assert_eq!(body["error"], "validation_error");

    let bad_batch = json!({
        "source_kind": "legacy",
        "source_url": "postgres://db/legacy",
        "batch_size": 0
    });
    let response = app
        .router
        .clone()
        .oneshot(json_request(Method::POST, "/api/v1/migrations", bad_batch))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .router
        .clone()
        .oneshot(get_request("/api/v1/migrations"))
        .await
        .unwrap();
    let listing = parse_response_body(response).await;
    assert!(listing["jobs"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_source_validation_failure_fails_job() {
    let source = StaticSourceConnector::new(SourceKind::Legacy).with_validate_error(
        domain::MigrationError::SchemaValidation("table gists missing".into()),
    );
    let app = TestApp::new(source);

    let job_id = start_job(&app, legacy_settings()).await;
    let job = finished_job(&app, job_id).await;

    assert_eq!(job["status"], "failed");
    assert!(job["current_operation"]
        .as_str()
        .unwrap()
        .contains("table gists missing"));
    assert!(app.store.users().await.is_empty());
}

// =============================================================================
// POST /api/v1/migrations/dry-run Tests
// =============================================================================

#[tokio::test]
async fn test_dry_run_filters_private_posts() {
    let mut posts = Vec::new();
    for id in 1..=10 {
        posts.push(source_post(id, 1, id <= 3));
    }
    let source = StaticSourceConnector::new(SourceKind::Legacy)
        .with_users(source_users(1))
        .with_posts(posts);
    let app = TestApp::new(source);

    let mut settings = legacy_settings();
    settings["migrate_private_items"] = json!(false);
    let response = app
        .router
        .clone()
        .oneshot(json_request(Method::POST, "/api/v1/migrations/dry-run", settings))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    assert_eq!(body["posts"], 7);
    assert_eq!(body["files"], 7);
    assert_eq!(body["users"], 1);
    assert_eq!(app.store.write_count().await, 0);
}

#[tokio::test]
async fn test_dry_run_matches_live_run() {
    let users = source_users(3);
    let posts = vec![
        source_post(10, 1, false),
        source_post(11, 2, true),
        source_post(12, 42, false),
    ];
    let source = || {
        StaticSourceConnector::new(SourceKind::Legacy)
            .with_users(users.clone())
            .with_posts(posts.clone())
    };

    let dry = TestApp::new(source());
    let response = dry
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/migrations/dry-run",
            legacy_settings(),
        ))
        .await
        .unwrap();
    let projected = parse_response_body(response).await;
    assert_eq!(dry.store.write_count().await, 0);

    let live = TestApp::new(source());
    let job_id = start_job(&live, legacy_settings()).await;
    let job = finished_job(&live, job_id).await;

    let counts = &job["result"]["counts"];
    assert_eq!(projected["users"], counts["users"]);
    assert_eq!(projected["posts"], counts["posts"]);
    assert_eq!(projected["files"], counts["files"]);
    assert_eq!(projected["skipped"], 1);
}

#[tokio::test]
async fn test_dry_run_source_failure_is_bad_gateway() {
    let source = StaticSourceConnector::new(SourceKind::Legacy)
        .with_validate_error(domain::MigrationError::Connection("refused".into()));
    let app = TestApp::new(source);

    let response = app
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/migrations/dry-run",
            legacy_settings(),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = parse_response_body(response).await;
    assert_eq!(body["error"], "source_unavailable");
}

// =============================================================================
// GET / DELETE /api/v1/migrations/:job_id Tests
// =============================================================================

#[tokio::test]
async fn test_get_unknown_job_returns_404() {
    let app = TestApp::new(StaticSourceConnector::new(SourceKind::Legacy));

    let response = app
        .router
        .clone()
        .oneshot(get_request(&format!("/api/v1/migrations/{}", Uuid::new_v4())))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = parse_response_body(response).await;
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_cancel_running_job() {
    let posts = (1..=5).map(|id| source_post(id, 1, false)).collect();
    let source = StaticSourceConnector::new(SourceKind::Legacy)
        .with_users(source_users(1))
        .with_posts(posts)
        .with_page_delay(Duration::from_millis(200));
    let app = TestApp::new(source);

    let mut settings = legacy_settings();
    settings["batch_size"] = json!(1);
    let job_id = start_job(&app, settings).await;

    let response = app
        .router
        .clone()
        .oneshot(delete_request(&format!("/api/v1/migrations/{}", job_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    assert_eq!(body["status"], "cancelled");
    assert!(body["ended_at"].is_string());

    let job = finished_job(&app, job_id).await;
    assert_eq!(job["status"], "cancelled");
    assert!(app.store.snippets().await.len() < 5);

    let response = app
        .router
        .clone()
        .oneshot(delete_request(&format!("/api/v1/migrations/{}", job_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_cancel_finished_job_conflicts() {
    let app = TestApp::new(
        StaticSourceConnector::new(SourceKind::Legacy).with_users(source_users(1)),
    );
    let job_id = start_job(&app, legacy_settings()).await;
    finished_job(&app, job_id).await;

    let response = app
        .router
        .clone()
        .oneshot(delete_request(&format!("/api/v1/migrations/{}", job_id)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

// =============================================================================
// GET /api/v1/migrations/history Tests
// =============================================================================

#[tokio::test]
async fn test_history_lists_finished_jobs() {
    let app = TestApp::new(
        StaticSourceConnector::new(SourceKind::Legacy)
            .with_users(source_users(2))
            .with_posts(vec![source_post(10, 1, false)]),
    );

    let first = start_job(&app, legacy_settings()).await;
    finished_job(&app, first).await;
    let second = start_job(&app, legacy_settings()).await;
    finished_job(&app, second).await;

    let response = app
        .router
        .clone()
        .oneshot(get_request("/api/v1/migrations/history?page=1&per_page=1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = parse_response_body(response).await;
    assert_eq!(body["page"], 1);
    assert_eq!(body["per_page"], 1);
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["status"], "completed");

    let summary = app.store.summary(first).await.unwrap();
    // two users, one post and its file
    assert_eq!(summary.items_imported, 4);
}
