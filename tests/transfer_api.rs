//! HTTP-level tests for the transfer service.
//!
//! Each test builds the full router over an in-memory store, seeds it
//! through `POST /create-users` and drives it with `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use account_transfer_service::{
    handlers::{self, users::CreateUsersResponse},
    models::{account::AccountResponse, transfer::TransferResponse},
    services::retry::RetryPolicy,
    state::AppState,
    store::memory::MemoryStore,
};
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use rstest::rstest;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

struct TestApp {
    router: Router,
    alice: AccountResponse,
    bob: AccountResponse,
}

impl TestApp {
    async fn seeded() -> Self {
        let state = AppState::in_memory(Arc::new(MemoryStore::new()), RetryPolicy::default());
        let router = handlers::router(state);

        let (status, body) = send(
            &router,
            Request::post("/create-users").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let created: CreateUsersResponse = serde_json::from_value(body).unwrap();
        assert_eq!(created.message, "Users created");

        let mut users = created.users.into_iter();
        let alice = users.next().unwrap();
        let bob = users.next().unwrap();
        assert_eq!(alice.name, "Alice");
        assert_eq!(bob.name, "Bob");

        Self { router, alice, bob }
    }

    async fn transfer(&self, body: Value) -> (StatusCode, Value) {
        self.post_transfer(body.to_string(), None).await
    }

    async fn post_transfer(&self, body: String, key: Option<&str>) -> (StatusCode, Value) {
        let mut request =
            Request::post("/transfer").header(header::CONTENT_TYPE, "application/json");
        if let Some(key) = key {
            request = request.header("Idempotency-Key", key);
        }
        send(&self.router, request.body(Body::from(body)).unwrap()).await
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        send(&self.router, Request::get(uri).body(Body::empty()).unwrap()).await
    }

    async fn balance(&self, id: Uuid) -> i64 {
        let (status, body) = self.get(&format!("/users/{id}")).await;
        assert_eq!(status, StatusCode::OK);
        body["balance"].as_i64().unwrap()
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn test_transfer_updates_both_balances() {
    let app = TestApp::seeded().await;

    let (status, body) = app
        .transfer(json!({ "fromUserId": app.alice.id, "toUserId": app.bob.id, "amount": 300 }))
        .await;

    assert_eq!(status, StatusCode::OK);
    let response: TransferResponse = serde_json::from_value(body).unwrap();
    assert_eq!(response.message, "Transferred 300 from Alice to Bob");
    assert_eq!(response.sender_balance.get(), 700);
    assert_eq!(response.receiver_balance.get(), 800);
    assert!(!response.replayed);

    assert_eq!(app.balance(app.alice.id).await, 700);
    assert_eq!(app.balance(app.bob.id).await, 800);
}

#[tokio::test]
async fn test_insufficient_balance_is_rejected() {
    let app = TestApp::seeded().await;

    let (status, body) = app
        .transfer(json!({ "fromUserId": app.alice.id, "toUserId": app.bob.id, "amount": 5000 }))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "message": "Insufficient balance" }));
    assert_eq!(app.balance(app.alice.id).await, 1000);
    assert_eq!(app.balance(app.bob.id).await, 500);
}

#[tokio::test]
async fn test_unknown_receiver_is_not_found() {
    let app = TestApp::seeded().await;

    let (status, body) = app
        .transfer(json!({ "fromUserId": app.alice.id, "toUserId": Uuid::new_v4(), "amount": 100 }))
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "message": "User not found" }));
    assert_eq!(app.balance(app.alice.id).await, 1000);
}

#[rstest]
#[case::not_json("{not json")]
#[case::missing_amount(r#"{"fromUserId":"FROM","toUserId":"TO"}"#)]
#[case::fractional_amount(r#"{"fromUserId":"FROM","toUserId":"TO","amount":10.5}"#)]
#[case::string_amount(r#"{"fromUserId":"FROM","toUserId":"TO","amount":"300"}"#)]
#[case::bad_user_id(r#"{"fromUserId":"alice","toUserId":"TO","amount":300}"#)]
#[case::zero_amount(r#"{"fromUserId":"FROM","toUserId":"TO","amount":0}"#)]
#[case::self_transfer(r#"{"fromUserId":"FROM","toUserId":"FROM","amount":10}"#)]
#[tokio::test]
async fn test_invalid_requests_are_bad_request(#[case] template: &str) {
    let app = TestApp::seeded().await;
    let body = template
        .replace("FROM", &app.alice.id.to_string())
        .replace("TO", &app.bob.id.to_string());

    let (status, body) = app.post_transfer(body, None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid transfer request");
    assert!(body["error"].is_string());
    assert_eq!(app.balance(app.alice.id).await, 1000);
}

#[tokio::test]
async fn test_replay_with_header_key_returns_original_result() {
    let app = TestApp::seeded().await;
    let body =
        json!({ "fromUserId": app.alice.id, "toUserId": app.bob.id, "amount": 300 }).to_string();

    let (status, first) = app.post_transfer(body.clone(), Some("invoice-789")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, second) = app.post_transfer(body, Some("invoice-789")).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(second["transferId"], first["transferId"]);
    assert_eq!(second["senderBalance"], 700);
    assert_eq!(second["replayed"], true);
    assert_eq!(app.balance(app.alice.id).await, 700);
    assert_eq!(app.balance(app.bob.id).await, 800);
}

#[tokio::test]
async fn test_reused_key_with_different_amount_is_bad_request() {
    let app = TestApp::seeded().await;

    let (status, _) = app
        .transfer(json!({
            "fromUserId": app.alice.id,
            "toUserId": app.bob.id,
            "amount": 300,
            "idempotencyKey": "k-1"
        }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .transfer(json!({
            "fromUserId": app.alice.id,
            "toUserId": app.bob.id,
            "amount": 200,
            "idempotencyKey": "k-1"
        }))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid transfer request");
    assert_eq!(app.balance(app.alice.id).await, 700);
}

#[tokio::test]
async fn test_transfer_record_is_queryable() {
    let app = TestApp::seeded().await;

    let (_, body) = app
        .transfer(json!({ "fromUserId": app.bob.id, "toUserId": app.alice.id, "amount": 125 }))
        .await;
    let transfer_id = body["transferId"].as_str().unwrap().to_string();

    let (status, record) = app.get(&format!("/transfers/{transfer_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["status"], "applied");
    assert_eq!(record["amount"], 125);
    assert_eq!(record["senderBalance"], 375);
    assert_eq!(record["receiverBalance"], 1125);

    let (status, body) = app.get(&format!("/transfers/{}", Uuid::new_v4())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Transfer not found");
}

#[tokio::test]
async fn test_create_users_resets_balances() {
    let app = TestApp::seeded().await;
    app.transfer(json!({ "fromUserId": app.alice.id, "toUserId": app.bob.id, "amount": 300 }))
        .await;

    let (status, body) = send(
        &app.router,
        Request::post("/create-users").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, users) = app.get("/users").await;
    assert_eq!(status, StatusCode::OK);
    let mut names: Vec<_> = users
        .as_array()
        .unwrap()
        .iter()
        .map(|user| user["name"].as_str().unwrap().to_string())
        .collect();
    names.sort();
    assert_eq!(names, ["Alice", "Bob"]);
    assert_eq!(body["users"][0]["balance"], 1000);

    let (status, _) = app.get(&format!("/users/{}", app.alice.id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_reports_store() {
    let app = TestApp::seeded().await;

    let (status, body) = app.get("/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_conserve_money() {
    let app = Arc::new(TestApp::seeded().await);

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let app = app.clone();
            tokio::spawn(async move {
                let (from, to) = if i % 2 == 0 {
                    (app.alice.id, app.bob.id)
                } else {
                    (app.bob.id, app.alice.id)
                };
                app.transfer(json!({ "fromUserId": from, "toUserId": to, "amount": 10 }))
                    .await
                    .0
            })
        })
        .collect();

    for handle in handles {
        let status = handle.await.unwrap();
        assert!(
            status == StatusCode::OK || status == StatusCode::CONFLICT,
            "unexpected status {status}"
        );
    }

    let total = app.balance(app.alice.id).await + app.balance(app.bob.id).await;
    assert_eq!(total, 1500);
}
