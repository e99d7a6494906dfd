//! HTTP API tests over the in-memory backends

mod common;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use barterly_server::routes::api_router;
    use barterly_server::state::AppState;
    use barterly_server::storage::MemoryObjectStore;
    use barterly_server::store::Store;

    use crate::common::test_config;

    fn app() -> Router {
        let state = AppState::new(
            &test_config(),
            Store::memory(),
            Arc::new(MemoryObjectStore::new()),
        );
        api_router(state)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    /// Register a user, returning (access token, user id)
    async fn sign_up(app: &Router, username: &str) -> (String, String) {
        let (status, body) = send(
            app,
            json_request(
                "POST",
                "/auth/sign-up",
                None,
                json!({
                    "email": format!("{}@example.com", username),
                    "password": "hunter22",
                    "username": username,
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        (
            body["data"]["access_token"].as_str().unwrap().to_string(),
            body["data"]["user"]["id"].as_str().unwrap().to_string(),
        )
    }

    async fn create_listing(app: &Router, token: &str, title: &str) -> String {
        let (status, body) = send(
            app,
            json_request(
                "POST",
                "/api/listings",
                Some(token),
                json!({
                    "title": title,
                    "description": "Solid wood",
                    "condition": "Like New",
                    "category": "Furniture",
                    "estimated_value": 35.5,
                    "images": ["https://img.example.com/1.jpg", "https://img.example.com/2.jpg"],
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["data"]["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_auth_flow() {
        let app = app();
        let (token, user_id) = sign_up(&app, "alice").await;

        let (status, body) = send(&app, get("/auth/session", Some(&token))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["id"], user_id.as_str());

        let (status, body) = send(&app, get("/api/profile", Some(&token))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["username"], "alice");

        let (status, body) = send(&app, get("/auth/session", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");

        // Same username again
        let (status, _) = send(
            &app,
            json_request(
                "POST",
                "/auth/sign-up",
                None,
                json!({"email": "other@example.com", "password": "hunter22", "username": "alice"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(
            &app,
            json_request(
                "POST",
                "/auth/sign-in",
                None,
                json!({"email": "alice@example.com", "password": "wrong-password"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(
            &app,
            json_request("POST", "/auth/sign-out", Some(&token), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, get("/auth/session", Some(&token))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_listing_round_trip_and_search() {
        let app = app();
        let (token, _) = sign_up(&app, "alice").await;
        let chair = create_listing(&app, &token, "Red Chair").await;
        create_listing(&app, &token, "Desk lamp").await;

        let (status, body) = send(&app, get(&format!("/api/listings/{}", chair), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["condition"], "Like New");
        assert_eq!(
            body["data"]["images"],
            json!(["https://img.example.com/1.jpg", "https://img.example.com/2.jpg"])
        );
        assert_eq!(body["data"]["owner"]["username"], "alice");

        let (status, body) = send(
            &app,
            json_request("POST", "/api/listings/refresh?search=CHAIR", None, json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["state"], "ready");
        let listings = body["data"]["listings"].as_array().unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0]["id"], chair.as_str());

        let (_, body) = send(&app, get("/api/listings/categories", None)).await;
        assert_eq!(body["data"], json!(["Furniture"]));

        let (_, body) = send(&app, get("/api/listings/categories/defaults", None)).await;
        assert_eq!(body["data"][0], "Electronics");
        assert_eq!(body["data"].as_array().unwrap().len(), 7);

        let (_, body) = send(&app, get("/api/listings/mine?available=true", Some(&token))).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 2);

        // Five images is one too many
        let (status, body) = send(
            &app,
            json_request(
                "POST",
                "/api/listings",
                Some(&token),
                json!({
                    "title": "Rug",
                    "description": "",
                    "condition": "Good",
                    "category": "Home",
                    "estimated_value": 10,
                    "images": ["a", "b", "c", "d", "e"],
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);

        let missing = format!("/api/listings/{}", uuid::Uuid::new_v4());
        let (status, _) = send(&app, get(&missing, None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_trade_flow_over_http() {
        let app = app();
        let (alice, _) = sign_up(&app, "alice").await;
        let (bob, bob_id) = sign_up(&app, "bob").await;
        let lamp = create_listing(&app, &alice, "Lamp").await;
        let chair = create_listing(&app, &bob, "Chair").await;

        let (status, body) = send(
            &app,
            json_request(
                "POST",
                "/api/trades",
                Some(&alice),
                json!({
                    "receiver_id": bob_id,
                    "requester_items": [lamp],
                    "receiver_items": [chair]
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        let trade_id = body["data"]["id"].as_str().unwrap().to_string();

        let (_, body) = send(&app, get("/api/trades?box=received", Some(&bob))).await;
        assert_eq!(body["data"][0]["id"], trade_id.as_str());
        assert_eq!(body["data"][0]["requester"]["username"], "alice");

        let (status, _) = send(
            &app,
            json_request(
                "POST",
                &format!("/api/trades/{}/accept", trade_id),
                Some(&alice),
                json!({}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(
            &app,
            json_request(
                "POST",
                &format!("/api/trades/{}/messages", trade_id),
                Some(&bob),
                json!({"content": "Deal if you add the shade"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);

        let (status, body) = send(
            &app,
            json_request(
                "POST",
                &format!("/api/trades/{}/accept", trade_id),
                Some(&bob),
                json!({}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "completed");

        let (status, body) = send(
            &app,
            json_request(
                "POST",
                &format!("/api/trades/{}/reject", trade_id),
                Some(&bob),
                json!({}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "INVALID_TRANSITION");

        let (_, body) = send(&app, get(&format!("/api/trades/{}", trade_id), Some(&alice))).await;
        assert_eq!(body["data"]["trader_name"], "bob");

        let messages = format!("/api/trades/{}/messages", trade_id);
        let (_, body) = send(&app, get(&messages, Some(&alice))).await;
        assert_eq!(body["data"][0]["content"], "Deal if you add the shade");

        let (_, body) = send(&app, get("/api/profile", Some(&alice))).await;
        assert_eq!(body["data"]["trades_completed"], 1);
    }

    fn multipart(uri: &str, token: &str, content_type: &str, data: &[u8]) -> Request<Body> {
        let boundary = "barterly-test-boundary";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"photo.png\"\r\nContent-Type: {ct}\r\n\r\n",
                b = boundary,
                ct = content_type
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_image_upload() {
        let app = app();
        let (token, user_id) = sign_up(&app, "alice").await;

        let (status, body) = send(
            &app,
            multipart("/api/storage/items", &token, "image/png", b"\x89PNG"),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        let url = body["data"]["url"].as_str().unwrap();
        assert!(url.starts_with(&format!("memory://items/{}/", user_id)));
        assert!(url.ends_with(".png"));

        let (status, _) = send(
            &app,
            multipart("/api/storage/items", &token, "text/plain", b"hello"),
        )
        .await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);

        // Scriptable image types would be served from the API origin
        let (status, _) = send(
            &app,
            multipart(
                "/api/storage/items",
                &token,
                "image/svg+xml",
                b"<svg><script>alert(1)</script></svg>",
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);

        // Over the configured limit
        let (status, _) = send(
            &app,
            multipart("/api/storage/avatars", &token, "image/png", &[0u8; 2048]),
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

        let (status, _) = send(
            &app,
            multipart("/api/storage/secrets", &token, "image/png", b"x"),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health() {
        let app = app();
        let (status, body) = send(&app, get("/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["database"], "connected");
        assert_eq!(
            body["websocket"],
            json!({
                "clients": 0,
                "authenticated": 0,
                "feed_subscribers": 0,
                "trade_subscriptions": 0
            })
        );
    }
}
