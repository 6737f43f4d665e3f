mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, json_body, parse_id, TestApp};
use cyphire::hub::WorkroomEvent;
use serde_json::json;

struct Room {
    app: TestApp,
    client: String,
    worker: String,
    workroom_id: uuid::Uuid,
    task_id: uuid::Uuid,
}

async fn hired_room(price: i64) -> Result<Room> {
    let app = TestApp::new().await?;
    let (_, client) = app.user_with_token("Client", "client@example.com").await?;
    let (worker_id, worker) = app.user_with_token("Worker", "worker@example.com").await?;
    let task_id = app.create_task(&client, "Brand kit", price).await?;
    let workroom_id = app.hire(&client, worker_id, &worker, task_id).await?;
    Ok(Room {
        app,
        client,
        worker,
        workroom_id,
        task_id,
    })
}

#[tokio::test]
async fn participants_exchange_messages_in_order() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let room = hired_room(100_000).await?;
    let app = &room.app;
    let messages_path = format!("/api/workrooms/{}/messages", room.workroom_id);

    let mut events = app.state.hub.subscribe(room.workroom_id);

    for (i, token) in [&room.client, &room.worker, &room.client].iter().enumerate() {
        let response = app
            .post_json(&messages_path, &json!({ "text": format!("msg {i}") }), Some(token.as_str()))
            .await?;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    match events.try_recv()? {
        WorkroomEvent::MessageCreated { message } => assert_eq!(message["text"], "msg 0"),
        other => panic!("unexpected event {other:?}"),
    }

    let response = app.get(&messages_path, Some(&room.worker)).await?;
    let page = json_body(response).await?;
    let texts: Vec<&str> = page["messages"]
        .as_array()
        .expect("messages")
        .iter()
        .filter_map(|m| m["text"].as_str())
        .collect();
    assert_eq!(texts, vec!["msg 0", "msg 1", "msg 2"]);
    assert!(page["next_before"].is_null());

    let response = app
        .get(&format!("{messages_path}?limit=2"), Some(&room.worker))
        .await?;
    let newest = json_body(response).await?;
    assert_eq!(newest["messages"][0]["text"], "msg 1");
    let cursor = newest["next_before"].as_i64().expect("cursor for older page");

    let response = app
        .get(
            &format!("{messages_path}?limit=2&before={cursor}"),
            Some(&room.worker),
        )
        .await?;
    let older = json_body(response).await?;
    assert_eq!(older["messages"].as_array().map(Vec::len), Some(1));
    assert_eq!(older["messages"][0]["text"], "msg 0");

    let first_seq = older["messages"][0]["seq"].as_i64().expect("seq");
    let response = app
        .get(
            &format!("{messages_path}?after={first_seq}"),
            Some(&room.client),
        )
        .await?;
    assert_eq!(
        json_body(response).await?["messages"].as_array().map(Vec::len),
        Some(2)
    );

    let (_, outsider) = app.user_with_token("Outsider", "out@example.com").await?;
    let response = app.get(&messages_path, Some(&outsider)).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let response = app
        .post_json(&messages_path, &json!({ "text": "hi" }), Some(&outsider))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    room.app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn repeated_nonce_returns_stored_message() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let room = hired_room(100_000).await?;
    let app = &room.app;
    let messages_path = format!("/api/workrooms/{}/messages", room.workroom_id);
    let payload = json!({
        "text": "draft attached",
        "attachments": [{ "url": "https://files.test/a.pdf", "name": "a.pdf" }],
        "client_nonce": "n-1"
    });

    let response = app.post_json(&messages_path, &payload, Some(&room.worker)).await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let first = json_body(response).await?;

    let response = app.post_json(&messages_path, &payload, Some(&room.worker)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let second = json_body(response).await?;
    assert_eq!(first["id"], second["id"]);
    assert_eq!(first["attachments"][0]["name"], "a.pdf");

    let response = app
        .post_json(&messages_path, &json!({ "text": "   " }), Some(&room.worker))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    room.app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn finalise_locks_room_and_enables_payout() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let room = hired_room(100_000).await?;
    let app = &room.app;
    let base = format!("/api/workrooms/{}", room.workroom_id);
    let (_, admin) = app.admin_with_token("admin@example.com").await?;

    let response = app
        .post_json(&format!("{base}/payout"), &json!({ "upi_id": "worker@okaxis" }), Some(&room.worker))
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .post_json(&format!("{base}/finalise"), &json!({}), Some(&room.client))
        .await?;
    let state = json_body(response).await?;
    assert_eq!(state["role"], "client");
    assert_eq!(state["locked"], false);

    let response = app
        .post_json(&format!("{base}/messages"), &json!({ "text": "still open" }), Some(&room.worker))
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .post_json(&format!("{base}/finalise"), &json!({}), Some(&room.worker))
        .await?;
    let state = json_body(response).await?;
    assert_eq!(state["locked"], true);

    let response = app
        .post_json(&format!("{base}/messages"), &json!({ "text": "too late" }), Some(&room.client))
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app.get(&format!("/api/tasks/{}", room.task_id), None).await?;
    assert_eq!(json_body(response).await?["task"]["status"], "completed");

    let response = app
        .post_json(&format!("{base}/payout"), &json!({ "upi_id": "worker@okaxis" }), Some(&room.client))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .post_json(&format!("{base}/payout"), &json!({ "upi_id": "worker@okaxis" }), Some(&room.worker))
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let log = json_body(response).await?;
    assert_eq!(log["gross_amount"], 100_000);
    assert_eq!(log["fee"], 10_000);
    assert_eq!(log["net_amount"], 90_000);
    assert_eq!(log["paid"], false);
    let log_id = parse_id(&log["id"])?;

    let response = app
        .post_json(&format!("{base}/payout"), &json!({ "upi_id": "worker@okaxis" }), Some(&room.worker))
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app.get(&base, Some(&room.worker)).await?;
    let workroom = json_body(response).await?;
    assert_eq!(workroom["role"], "worker");
    assert_eq!(workroom["locked"], true);
    assert_eq!(workroom["task"]["payment_requested"], true);
    assert_eq!(parse_id(&workroom["payout"]["id"])?, log_id);

    let response = app.get("/api/admin/stats", Some(&admin)).await?;
    let stats = json_body(response).await?;
    assert_eq!(stats["unpaid_payouts"], 1);
    assert_eq!(stats["unpaid_payout_total"], 90_000);

    let payment_path = format!("/api/admin/payments/{log_id}");
    let response = app
        .patch_json(&payment_path, &json!({ "paid": true }), Some(&admin))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let paid = json_body(response).await?;
    assert_eq!(paid["paid"], true);
    assert!(paid["paid_at"].is_string());

    // Marking an already paid log again keeps the original timestamp.
    let response = app
        .patch_json(&payment_path, &json!({ "paid": true }), Some(&admin))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await?["paid_at"], paid["paid_at"]);

    let response = app.get("/api/admin/payments?paid=false", Some(&admin)).await?;
    assert_eq!(json_body(response).await?, json!([]));

    let response = app.get("/api/admin/stats", Some(&admin)).await?;
    let stats = json_body(response).await?;
    assert_eq!(stats["unpaid_payouts"], 0);
    assert_eq!(stats["unpaid_payout_total"], 0);

    let response = app
        .patch_json(&payment_path, &json!({ "paid": false }), Some(&admin))
        .await?;
    let unpaid = json_body(response).await?;
    assert_eq!(unpaid["paid"], false);
    assert!(unpaid["paid_at"].is_null());

    room.app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn socket_checks_token_and_membership_before_upgrading() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let room = hired_room(100_000).await?;
    let app = &room.app;
    let (_, outsider) = app.user_with_token("Outsider", "outsider@example.com").await?;
    let socket = format!("/api/workrooms/{}/ws", room.workroom_id);

    let response = app.get(&format!("{socket}?token=not-a-jwt"), None).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.get(&socket, None).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.get(&format!("{socket}?token={outsider}"), None).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let unknown = format!("/api/workrooms/{}/ws?token={}", uuid::Uuid::new_v4(), room.worker);
    let response = app.get(&unknown, None).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // A participant passes the checks; a plain GET is then refused for lacking the upgrade.
    let response = app.get(&format!("{socket}?token={}", room.client), None).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await?["error"], "websocket upgrade required");

    room.app.cleanup().await?;
    Ok(())
}
