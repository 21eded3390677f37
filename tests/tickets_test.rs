mod common;

use axum::http::{Method, StatusCode};
use common::{setup_test_app, TestApp};
use econnectone::Role;
use serde_json::{json, Value};

async fn technical(t: &TestApp, token: &str) -> i64 {
    let (status, body) = t
        .post(
            "/api/tickets",
            token,
            json!({
                "kind": "technical",
                "subject": "POS terminal offline",
                "description": "Screen stays blank after reboot",
                "category": "pos_terminal"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "create failed: {}", body);
    body["ticket"]["id"].as_i64().unwrap()
}

async fn deposit(t: &TestApp, token: &str, amount: &str) -> i64 {
    let (status, body) = t
        .post(
            "/api/tickets",
            token,
            json!({
                "kind": "deposit",
                "subject": "Cash top-up",
                "amount": amount,
                "paymentMethod": "bank_transfer"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "deposit failed: {}", body);
    body["ticket"]["id"].as_i64().unwrap()
}

async fn patch(t: &TestApp, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
    t.send(Method::PATCH, uri, Some(token), Some(body)).await
}

#[tokio::test]
async fn test_technical_status_transitions() {
    let t = setup_test_app().await;
    t.seed_user("agent@example.com", Role::Csp).await;
    t.seed_user("desk@example.com", Role::Staff).await;
    let agent = t.login("agent@example.com").await;
    let staff = t.login("desk@example.com").await;

    let id = technical(&t, &agent).await;
    let uri = format!("/api/tickets/{}/status", id);

    let (status, _) = patch(&t, &uri, &agent, json!({ "status": "in_progress" })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = patch(&t, &uri, &staff, json!({ "status": "escalated" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Approval only happens through the wallet endpoints.
    let (status, _) = patch(&t, &uri, &staff, json!({ "status": "approved" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, ticket) = patch(&t, &uri, &staff, json!({ "status": "in_progress" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ticket["status"], "in_progress");

    let (status, _) = patch(&t, &uri, &staff, json!({ "status": "in_progress" })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = patch(&t, &uri, &staff, json!({ "status": "rejected" })).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, ticket) = patch(
        &t,
        &uri,
        &staff,
        json!({ "status": "resolved", "note": "Replaced the battery" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ticket["status"], "resolved");
    assert_eq!(ticket["resolutionNote"], "Replaced the battery");

    let (status, ticket) = patch(&t, &uri, &staff, json!({ "status": "closed" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ticket["status"], "closed");

    // Closed is terminal.
    let (status, _) = patch(&t, &uri, &staff, json!({ "status": "open" })).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = patch(
        &t,
        "/api/tickets/9999/status",
        &staff,
        json!({ "status": "in_progress" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Staff cannot read the audit trail.
    let (status, _) = t.get("/api/audit-logs?action=ticket.status", &staff).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_rejecting_financial_ticket_needs_approver_and_note() {
    let t = setup_test_app().await;
    t.seed_user("agent@example.com", Role::Csp).await;
    t.seed_user("desk@example.com", Role::Staff).await;
    t.seed_user("sup@example.com", Role::Supervisor).await;
    let agent = t.login("agent@example.com").await;
    let staff = t.login("desk@example.com").await;
    let sup = t.login("sup@example.com").await;

    let id = deposit(&t, &agent, "5000").await;
    let uri = format!("/api/tickets/{}/status", id);

    // Staff may work the ticket but not reject it.
    let (status, _) = patch(&t, &uri, &staff, json!({ "status": "in_progress" })).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = patch(
        &t,
        &uri,
        &staff,
        json!({ "status": "rejected", "note": "no proof" }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = patch(&t, &uri, &sup, json!({ "status": "rejected" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = patch(&t, &uri, &sup, json!({ "status": "rejected", "note": "  " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Financial tickets never resolve.
    let (status, _) = patch(&t, &uri, &sup, json!({ "status": "resolved" })).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, ticket) = patch(
        &t,
        &uri,
        &sup,
        json!({ "status": "rejected", "note": "Payment not received" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ticket["status"], "rejected");
    assert_eq!(ticket["resolutionNote"], "Payment not received");

    let (status, _) = patch(
        &t,
        &uri,
        &sup,
        json!({ "status": "rejected", "note": "again" }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = t
        .send(
            Method::POST,
            &format!("/api/wallets/approve/{}", id),
            Some(&sup),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, wallet) = t.get("/api/wallets/me", &agent).await;
    assert_eq!(wallet["balance"], "0");

    let (_, logs) = t
        .get(&format!("/api/audit-logs?action=ticket.reject&entityId={}", id), &sup)
        .await;
    assert_eq!(logs["total"], 1);
}

#[tokio::test]
async fn test_assign_only_to_active_back_office() {
    let t = setup_test_app().await;
    let agent_id = t.seed_user("agent@example.com", Role::Csp).await;
    let staff_id = t.seed_user("desk@example.com", Role::Staff).await;
    t.seed_user("sup@example.com", Role::Supervisor).await;
    let agent = t.login("agent@example.com").await;
    let staff = t.login("desk@example.com").await;
    let sup = t.login("sup@example.com").await;

    let id = technical(&t, &agent).await;
    let uri = format!("/api/tickets/{}/assign", id);

    let (status, _) = patch(&t, &uri, &staff, json!({ "assigneeId": staff_id })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = patch(&t, &uri, &sup, json!({ "assigneeId": agent_id })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = patch(&t, &uri, &sup, json!({ "assigneeId": 9999 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, ticket) = patch(&t, &uri, &sup, json!({ "assigneeId": staff_id })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ticket["assignedTo"], staff_id);

    let (_, mine) = t
        .get(&format!("/api/tickets?assignedTo={}", staff_id), &staff)
        .await;
    assert_eq!(mine["total"], 1);

    let (status, ticket) = patch(&t, &uri, &sup, json!({ "assigneeId": null })).await;
    assert_eq!(status, StatusCode::OK);
    assert!(ticket["assignedTo"].is_null());

    let (status, _) = patch(
        &t,
        "/api/tickets/9999/assign",
        &sup,
        json!({ "assigneeId": staff_id }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_comments_and_agent_visibility() {
    let t = setup_test_app().await;
    let owner_id = t.seed_user("agent@example.com", Role::Csp).await;
    t.seed_user("other@example.com", Role::Csp).await;
    t.seed_user("desk@example.com", Role::Staff).await;
    let owner = t.login("agent@example.com").await;
    let other = t.login("other@example.com").await;
    let staff = t.login("desk@example.com").await;

    let id = technical(&t, &owner).await;
    let ticket_uri = format!("/api/tickets/{}", id);
    let comments_uri = format!("/api/tickets/{}/comments", id);

    // Another agent's ticket reads as missing everywhere.
    let (status, _) = t.get(&ticket_uri, &other).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = t.post(&comments_uri, &other, json!({ "body": "me too" })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, listed) = t.get("/api/tickets", &other).await;
    assert_eq!(listed["total"], 0);
    let (_, listed) = t
        .get(&format!("/api/tickets?createdBy={}", owner_id), &other)
        .await;
    assert_eq!(listed["total"], 0);

    let (status, comment) = t
        .post(&comments_uri, &owner, json!({ "body": "Still broken this morning" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(comment["authorId"], owner_id);
    let (status, _) = t
        .post(&comments_uri, &staff, json!({ "body": "Technician booked" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = t.post(&comments_uri, &staff, json!({ "body": "   " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, full) = t.get(&ticket_uri, &owner).await;
    assert_eq!(status, StatusCode::OK);
    let comments = full["comments"].as_array().unwrap();
    assert_eq!(comments.len(), 2);
    assert_eq!(comments[0]["body"], "Still broken this morning");
    assert_eq!(comments[1]["body"], "Technician booked");
    assert_eq!(full["detail"]["type"], "technical");
    assert_eq!(full["detail"]["category"], "pos_terminal");
}

#[tokio::test]
async fn test_stats_and_admin_delete() {
    let t = setup_test_app().await;
    t.seed_user("agent@example.com", Role::Csp).await;
    t.seed_user("desk@example.com", Role::Staff).await;
    t.seed_user("sup@example.com", Role::Supervisor).await;
    t.seed_user("root@example.com", Role::Admin).await;
    let agent = t.login("agent@example.com").await;
    let staff = t.login("desk@example.com").await;
    let sup = t.login("sup@example.com").await;
    let admin = t.login("root@example.com").await;

    let tech = technical(&t, &agent).await;
    let dep = deposit(&t, &agent, "5000").await;
    let (status, _) = t
        .post(
            "/api/tickets",
            &agent,
            json!({
                "kind": "withdrawal",
                "subject": "Payout",
                "amount": "2000.50",
                "bankName": "First Bank",
                "accountNumber": "0123456789",
                "accountName": "Agent One"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = t.get("/api/tickets/stats", &agent).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, stats) = t.get("/api/tickets/stats", &staff).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total"], 3);
    assert_eq!(stats["byStatus"]["open"], 3);
    assert_eq!(stats["byKind"]["technical"], 1);
    assert_eq!(stats["byKind"]["deposit"], 1);
    assert_eq!(stats["byKind"]["withdrawal"], 1);
    assert_eq!(stats["flagged"], 0);
    assert_eq!(stats["pendingDepositTotal"], "5000");
    assert_eq!(stats["pendingWithdrawalTotal"], "2000.5");

    let uri = format!("/api/tickets/{}", dep);
    let (status, _) = t.send(Method::DELETE, &uri, Some(&sup), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = t.send(Method::DELETE, &uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = t.send(Method::DELETE, &uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = t.get(&uri, &agent).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, stats) = t.get("/api/tickets/stats", &staff).await;
    assert_eq!(stats["total"], 2);
    assert!(stats["byKind"].get("deposit").is_none());
    assert_eq!(stats["pendingDepositTotal"], "0");

    // Closing the technical ticket moves it out of the open bucket.
    let (status, _) = patch(
        &t,
        &format!("/api/tickets/{}/status", tech),
        &staff,
        json!({ "status": "closed" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, stats) = t.get("/api/tickets/stats", &staff).await;
    assert_eq!(stats["byStatus"]["open"], 1);
    assert_eq!(stats["byStatus"]["closed"], 1);

    let (_, logs) = t
        .get(&format!("/api/audit-logs?action=ticket.delete&entityId={}", dep), &admin)
        .await;
    assert_eq!(logs["total"], 1);
}
