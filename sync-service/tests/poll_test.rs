mod common;

use chrono::{TimeZone, Utc};
use common::TestApp;
use connector_core::error::AppError;
use sync_service::services::remote::RemoteRow;

fn remote_row(id: &str, modified_secs: i64) -> RemoteRow {
    RemoteRow {
        row_id: id.to_string(),
        payload: serde_json::json!({ "id": id, "cr83d_name": format!("row {}", id) }),
        modified_utc: Utc.timestamp_opt(modified_secs, 0).unwrap(),
    }
}

#[tokio::test]
async fn forced_full_poll_then_incremental_noop() {
    let app = TestApp::spawn().await;
    app.register_tables("t1", &["cr83d_school"]).await;
    app.source.insert_rows(
        "t1",
        "cr83d_school",
        vec![
            remote_row("a", 100),
            remote_row("b", 200),
            remote_row("c", 300),
        ],
    );

    let report = app.poll("t1", None, true).await;
    assert_eq!(report["cr83d_school"]["fetched_count"], 3);
    assert!(report["cr83d_school"].get("error").is_none());

    // Unchanged remote source: the cursor filters everything out.
    let report = app.poll("t1", None, false).await;
    assert_eq!(report["cr83d_school"]["fetched_count"], 0);

    let rows: serde_json::Value = app
        .client
        .get(format!(
            "{}/tenants/t1/tables/cr83d_school/rows",
            app.address
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rows["total"], 3);
    // Newest first.
    assert_eq!(rows["rows"][0]["row_id"], "c");
}

#[tokio::test]
async fn repeated_polls_do_not_duplicate_rows() {
    let app = TestApp::spawn().await;
    app.register_tables("t1", &["cr83d_school"]).await;
    app.source
        .insert_rows("t1", "cr83d_school", vec![remote_row("a", 100)]);

    app.poll("t1", None, true).await;
    app.poll("t1", None, true).await;

    let rows: serde_json::Value = app
        .client
        .get(format!(
            "{}/tenants/t1/tables/cr83d_school/rows",
            app.address
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rows["total"], 1);
}

#[tokio::test]
async fn transient_failures_recover_within_budget() {
    let app = TestApp::spawn().await;
    app.register_tables("t1", &["cr83d_school"]).await;
    app.source
        .insert_rows("t1", "cr83d_school", vec![remote_row("a", 100)]);
    app.source
        .push_failure(AppError::TransientRemote("503".into()))
        .await;
    app.source
        .push_failure(AppError::TransientRemote("503".into()))
        .await;

    let report = app.poll("t1", None, false).await;
    assert_eq!(report["cr83d_school"]["fetched_count"], 1);
    assert!(report["cr83d_school"].get("error").is_none());
}

#[tokio::test]
async fn budget_exhaustion_reports_the_table_and_spares_others() {
    let app = TestApp::spawn().await;
    app.register_tables("t1", &["cr83d_event", "cr83d_school"])
        .await;
    app.source
        .insert_rows("t1", "cr83d_school", vec![remote_row("a", 100)]);
    app.source
        .insert_rows("t1", "cr83d_event", vec![remote_row("b", 100)]);
    // One more transient failure than the budget of 4 tolerates.
    for _ in 0..5 {
        app.source
            .push_failure(AppError::TransientRemote("503".into()))
            .await;
    }

    let report = app.poll("t1", Some("cr83d_school"), false).await;
    let error = report["cr83d_school"]["error"].as_str().unwrap();
    assert!(error.contains("transient_remote"));

    // The sibling table is isolated from the failure (one scripted
    // failure remains and is retried away).
    let report = app.poll("t1", Some("cr83d_event"), false).await;
    assert_eq!(report["cr83d_event"]["fetched_count"], 1);
    assert!(report["cr83d_event"].get("error").is_none());
}

#[tokio::test]
async fn polling_without_registration_returns_empty_report() {
    let app = TestApp::spawn().await;
    let report = app.poll("t-unknown", None, false).await;
    assert_eq!(report, serde_json::json!({}));
}

#[tokio::test]
async fn connectivity_test_reports_identity() {
    let app = TestApp::spawn().await;
    let response: serde_json::Value = app
        .client
        .post(format!("{}/tenants/t1/connection/test", app.address))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(response["ok"], true);
    assert!(response["identity"]["UserId"].is_string());
}
