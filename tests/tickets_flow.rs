mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, json_body, parse_id, TestApp};
use serde_json::json;

#[tokio::test]
async fn ticket_lifecycle_feeds_the_faq() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, user) = app.user_with_token("Ira", "ira@example.com").await?;
    let (_, admin) = app.admin_with_token("admin@example.com").await?;

    let response = app
        .post_json(
            "/api/tickets",
            &json!({
                "question": "How are payouts sent?",
                "files": [{ "url": "https://files.test/s.png", "name": "s.png", "content_type": "image/png" }]
            }),
            Some(&user),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let ticket = json_body(response).await?;
    assert_eq!(ticket["status"], "open");
    assert_eq!(ticket["files"][0]["name"], "s.png");
    let ticket_id = parse_id(&ticket["id"])?;

    let response = app
        .post_json(
            &format!("/api/tickets/{ticket_id}/comments"),
            &json!({ "body": "It is urgent" }),
            Some(&user),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app.get("/api/admin/tickets?status=open", Some(&admin)).await?;
    assert_eq!(json_body(response).await?.as_array().map(Vec::len), Some(1));

    let response = app
        .patch_json(
            &format!("/api/admin/tickets/{ticket_id}"),
            &json!({ "answer": "Via UPI once both parties finalise.", "published": true }),
            Some(&admin),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let answered = json_body(response).await?;
    assert_eq!(answered["status"], "answered");
    assert_eq!(answered["published"], true);

    let response = app.get("/api/help/faq", None).await?;
    let faq = json_body(response).await?;
    assert_eq!(faq[0]["question"], "How are payouts sent?");
    assert_eq!(faq[0]["answer"], "Via UPI once both parties finalise.");

    let response = app
        .get(&format!("/api/tickets/{ticket_id}"), Some(&user))
        .await?;
    let detail = json_body(response).await?;
    assert_eq!(detail["comments"][0]["body"], "It is urgent");

    let response = app
        .patch_json(
            &format!("/api/admin/tickets/{ticket_id}"),
            &json!({ "status": "closed" }),
            Some(&admin),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .post_json(
            &format!("/api/tickets/{ticket_id}/comments"),
            &json!({ "body": "One more thing" }),
            Some(&user),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn tickets_are_private_to_their_owner() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, owner) = app.user_with_token("Owner", "owner@example.com").await?;
    let (_, other) = app.user_with_token("Other", "other@example.com").await?;
    let (_, admin) = app.admin_with_token("admin@example.com").await?;

    let response = app
        .post_json("/api/tickets", &json!({ "question": "Refund?" }), Some(&owner))
        .await?;
    let ticket_id = parse_id(&json_body(response).await?["id"])?;

    let response = app
        .get(&format!("/api/tickets/{ticket_id}"), Some(&other))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.get("/api/tickets", Some(&other)).await?;
    assert_eq!(json_body(response).await?, json!([]));

    let response = app
        .get(&format!("/api/tickets/{ticket_id}"), Some(&admin))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .patch_json(
            &format!("/api/admin/tickets/{ticket_id}"),
            &json!({ "published": true }),
            Some(&admin),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json("/api/tickets", &json!({ "question": "  " }), Some(&owner))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .delete(&format!("/api/admin/tickets/{ticket_id}"), Some(&admin))
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = app.get("/api/tickets", Some(&owner)).await?;
    assert_eq!(json_body(response).await?, json!([]));

    app.cleanup().await?;
    Ok(())
}
