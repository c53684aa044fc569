mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;

use common::{spawn_app, spawn_app_with, test_config};

#[tokio::test]
async fn test_health() {
    let app = spawn_app();
    let (status, body) = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "OK");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_register_login_profile() {
    let app = spawn_app();
    let (status, body) = app
        .post(
            "/api/auth/register",
            None,
            json!({ "email": "Alice@Example.com", "password": "password123", "name": "Alice" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["message"], "User created successfully");
    assert_eq!(body["user"]["email"], "alice@example.com");
    assert!(body["user"].get("password").is_none());

    let (status, body) = app
        .post(
            "/api/auth/login",
            None,
            json!({ "email": "alice@example.com", "password": "password123" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Login successful");
    let token = body["token"].as_str().unwrap().to_string();

    let (status, body) = app.get("/api/auth/profile", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["name"], "Alice");
}

#[tokio::test]
async fn test_registration_rejections() {
    let app = spawn_app();
    app.register("dup@example.com").await;

    let (status, _) = app
        .post(
            "/api/auth/register",
            None,
            json!({ "email": "dup@example.com", "password": "password123", "name": "Again" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .post(
            "/api/auth/register",
            None,
            json!({ "email": "not-an-email", "password": "short", "name": "" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Validation error");
    assert!(body["errors"].as_array().unwrap().len() >= 2);
}

#[tokio::test]
async fn test_bad_credentials_and_tokens() {
    let app = spawn_app();
    app.register("carol@example.com").await;

    let (status, body) = app
        .post(
            "/api/auth/login",
            None,
            json!({ "email": "carol@example.com", "password": "wrong-password" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid credentials");

    let (status, body) = app.request(Method::GET, "/api/bots", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "No authentication token provided");

    let (status, _) = app.get("/api/bots", "garbage.token.value").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_bot_lifecycle() {
    let app = spawn_app();
    let token = app.register("bots@example.com").await;

    let bot = app.create_bot(&token).await;
    let uuid = uuid::Uuid::parse_str(bot["uuid"].as_str().unwrap()).unwrap();
    assert_eq!(uuid.get_version_num(), 4);
    assert_eq!(bot["secret"].as_str().unwrap().len(), 64);
    assert_eq!(bot["status"], "active");
    assert_eq!(
        bot["webhookUrl"],
        format!("https://relay.test/api/webhook/{}", uuid)
    );

    let (status, list) = app.get("/api/bots", &token).await;
    assert_eq!(status, StatusCode::OK);
    let bots = list["bots"].as_array().unwrap();
    assert_eq!(bots.len(), 1);
    assert!(bots[0].get("secret").is_none());

    let path = format!("/api/bots/{}", bot["id"].as_str().unwrap());
    let (status, body) = app
        .put(&path, &token, json!({ "name": "Renamed", "pairs": ["ETHUSDT", "BTCUSDT"] }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["bot"]["name"], "Renamed");
    assert_eq!(body["bot"]["uuid"], bot["uuid"]);

    let (status, _) = app.put(&path, &token, json!({ "pairs": [] })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = app.put(&path, &token, json!({ "status": "paused" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.request(Method::DELETE, &path, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.get(&path, &token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bot_validation() {
    let app = spawn_app();
    let token = app.register("validate@example.com").await;

    let (status, _) = app
        .post("/api/bots", Some(&token), json!({ "name": "", "pairs": ["BTCUSDT"] }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post("/api/bots", Some(&token), json!({ "name": "Empty", "pairs": [] }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.get("/api/bots/not-a-uuid", &token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bots_are_private_to_owner() {
    let app = spawn_app();
    let owner = app.register("mine@example.com").await;
    let other = app.register("yours@example.com").await;
    let bot = app.create_bot(&owner).await;
    let path = format!("/api/bots/{}", bot["id"].as_str().unwrap());

    assert_eq!(app.get(&path, &other).await.0, StatusCode::NOT_FOUND);
    assert_eq!(
        app.put(&path, &other, json!({ "name": "Stolen" })).await.0,
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        app.request(Method::DELETE, &path, Some(&other), None).await.0,
        StatusCode::NOT_FOUND
    );

    let (_, list) = app.get("/api/bots", &other).await;
    assert!(list["bots"].as_array().unwrap().is_empty());
    assert_eq!(app.get(&path, &owner).await.0, StatusCode::OK);
}

#[tokio::test]
async fn test_api_keys_status() {
    let app = spawn_app();
    let token = app.register("keys@example.com").await;

    let (_, body) = app.get("/api/users/api-keys/status", &token).await;
    assert_eq!(body["hasKeys"], false);

    app.set_api_keys(&token).await;
    app.set_api_keys(&token).await;

    let (status, body) = app.get("/api/users/api-keys/status", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hasKeys"], true);
}

#[tokio::test]
async fn test_balance_requires_keys() {
    let app = spawn_app();
    let token = app.register("balance@example.com").await;

    let (status, _) = app.get("/api/users/balance", &token).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    app.set_api_keys(&token).await;
    let (status, body) = app.get("/api/users/balance", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["balances"][0]["asset"], "USDT");

    let (status, body) = app.get("/api/users/open-orders?symbol=BTCUSDT", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["orders"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_candidate_connection() {
    let app = spawn_app();
    let token = app.register("conn@example.com").await;

    let (status, body) = app
        .post(
            "/api/users/test-api-connection",
            Some(&token),
            json!({ "apiKey": "valid-key", "apiSecret": "s" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true, "canTrade": true }));

    let (status, body) = app
        .post(
            "/api/users/test-api-connection",
            Some(&token),
            json!({ "apiKey": "wrong-key", "apiSecret": "s" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert!(body["error"].is_string());

    let (_, body) = app.get("/api/users/api-keys/status", &token).await;
    assert_eq!(body["hasKeys"], false);
}

#[tokio::test]
async fn test_password_change() {
    let app = spawn_app();
    let token = app.register("pw@example.com").await;

    let (status, _) = app
        .put(
            "/api/users/password",
            &token,
            json!({ "currentPassword": "nope-nope", "newPassword": "newpassword1" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .put(
            "/api/users/password",
            &token,
            json!({ "currentPassword": "password123", "newPassword": "newpassword1" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .post(
            "/api/auth/login",
            None,
            json!({ "email": "pw@example.com", "password": "newpassword1" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_rate_limit() {
    let app = spawn_app_with(test_config(&[("RATE_LIMIT_PER_MINUTE", "3")]));

    for _ in 0..3 {
        let (status, _) = app.request(Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let app = spawn_app();
    let (status, _) = app
        .request(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!("just a string")),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
