mod common;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use common::TestApp;
use reqwest::StatusCode;
use sync_service::services::routes::RouteError;

fn submit_body(submission_id: &str, route: &str) -> serde_json::Value {
    serde_json::json!({
        "submission_id": submission_id,
        "route": route,
        "answers": {
            "event_id": "ev-1",
            "supplier_name": "Acme",
            "contact_email": "bids@acme.example",
            "proposal_title": "Unit pricing proposal",
        },
        "attachments": [
            { "name": "quote.pdf", "content_base64": BASE64.encode(b"%PDF-1.7") }
        ],
    })
}

#[tokio::test]
async fn local_submission_is_idempotent_after_delivery() {
    let app = TestApp::spawn().await;

    let (status, body) = app.submit("t1", submit_body("m1", "local")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "delivered");
    assert!(body["location"].as_str().unwrap().starts_with("local:"));

    let (status, body) = app.submit("t1", submit_body("m1", "local")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "delivered");

    // Exactly one file on disk, not two.
    let files = app.exported_files("t1");
    assert_eq!(files, vec!["submission_m1.zip".to_string()]);
}

#[tokio::test]
async fn submission_status_is_queryable() {
    let app = TestApp::spawn().await;
    app.submit("t1", submit_body("m2", "local")).await;

    let response = app
        .client
        .get(format!("{}/tenants/t1/submissions/m2", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "delivered");

    let missing = app
        .client
        .get(format!("{}/tenants/t1/submissions/nope", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_submissions_are_rejected() {
    let app = TestApp::spawn().await;

    let (status, _) = app
        .submit(
            "t1",
            serde_json::json!({
                "submission_id": "m3",
                "route": "local",
                "answers": { "supplier_name": "Acme" },
            }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = app
        .submit(
            "t1",
            serde_json::json!({
                "submission_id": "x",
                "route": "local",
                "answers": {
                    "event_id": "e", "supplier_name": "Acme",
                    "contact_email": "a@b.example",
                },
            }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    assert!(app.exported_files("t1").is_empty());
}

#[tokio::test]
async fn permanent_email_rejection_fails_without_retries() {
    let app = TestApp::spawn().await;
    app.email_route
        .push_failure(RouteError::InvalidRecipient("550 no such user".into()))
        .await;

    let (status, body) = app.submit("t1", submit_body("m4", "email")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "failed");
    assert!(body["last_error"]
        .as_str()
        .unwrap()
        .contains("Invalid recipient"));

    // Terminal: resubmitting performs no further delivery attempt.
    let (_, body) = app.submit("t1", submit_body("m4", "email")).await;
    assert_eq!(body["status"], "failed");
    assert_eq!(app.email_route.attempt_count(), 1);
}

#[tokio::test]
async fn transient_email_failure_is_retried_to_success() {
    let app = TestApp::spawn().await;
    app.email_route
        .push_failure(RouteError::Connection("connection refused".into()))
        .await;

    let (status, body) = app.submit("t1", submit_body("m5", "email")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "delivered");
    assert_eq!(body["attempts"], 2);
}

#[tokio::test]
async fn route_conflict_on_resubmission_is_rejected() {
    let app = TestApp::spawn().await;
    for _ in 0..3 {
        app.email_route
            .push_failure(RouteError::Connection("refused".into()))
            .await;
    }

    let (_, body) = app.submit("t1", submit_body("m6", "email")).await;
    assert_eq!(body["status"], "failed");

    let (status, _) = app.submit("t1", submit_body("m6", "local")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}
