use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use chrono::{TimeDelta, Utc};
use http_body_util::BodyExt;
use tower::ServiceExt;

use langscout_core::batch_code;
use langscout_core::models::ResponseState;
use langscout_core::traits::{BatchStore, DomainStore, ProxyRegistry};
use langscout_core::work_queue::WorkQueue;

use crate::integration::common::{TEST_API_KEY, setup_test_app};

fn authed(method: &str, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {TEST_API_KEY}"));
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn body_json(response: Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn health_returns_200() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["database"], "ok");
    assert_eq!(json["pool"]["proxies"], 0);
    assert_eq!(json["pool"]["total_capacity"], 2);
    assert_eq!(json["live_batches"], 0);
}

#[tokio::test]
async fn unauthenticated_request_returns_401() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(Request::get("/v1/domains").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_api_key_returns_401() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(
            Request::get("/v1/domains")
                .header("authorization", "Bearer wrong-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["error"], "unauthorized");
}

#[tokio::test]
async fn submit_batch_and_poll_pending() {
    let app = setup_test_app().await;
    let hosts = ["a.example", "b.example"];
    let callback = "http://cb.example/hook";

    let response = app
        .router
        .clone()
        .oneshot(authed(
            "POST",
            "/v1/batches",
            Some(serde_json::json!({ "hosts": hosts, "callback": callback })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let json = body_json(response).await;
    let code = json["code"].as_str().unwrap().to_string();
    assert_eq!(code, batch_code(Some(callback), &hosts));
    assert_eq!(json["expected"], 2);
    assert_eq!(json["created"], true);
    assert_eq!(
        app.state.db.domain_repo().pending_count().await.unwrap(),
        2
    );

    let response = app
        .router
        .oneshot(authed("GET", &format!("/v1/batches/{code}"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let json = body_json(response).await;
    assert_eq!(json["collected"], 0);
    assert_eq!(json["expected"], 2);
}

#[tokio::test]
async fn resubmitting_a_live_batch_returns_same_code() {
    let app = setup_test_app().await;
    let body = serde_json::json!({ "hosts": ["same.example"] });

    let first = app
        .router
        .clone()
        .oneshot(authed("POST", "/v1/batches", Some(body.clone())))
        .await
        .unwrap();
    let first = body_json(first).await;

    let second = app
        .router
        .oneshot(authed("POST", "/v1/batches", Some(body)))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::ACCEPTED);
    let second = body_json(second).await;

    assert_eq!(first["code"], second["code"]);
    assert_eq!(second["created"], false);
}

#[tokio::test]
async fn submit_rejects_bad_input() {
    let app = setup_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(authed(
            "POST",
            "/v1/batches",
            Some(serde_json::json!({ "hosts": [] })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "validation_error");

    let response = app
        .router
        .oneshot(authed(
            "POST",
            "/v1/batches",
            Some(serde_json::json!({ "hosts": ["a.example"], "callback": "ftp://cb.example" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn tracked_batch_becomes_ready() {
    let app = setup_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(authed(
            "POST",
            "/v1/batches",
            Some(serde_json::json!({ "hosts": ["done.example"] })),
        ))
        .await
        .unwrap();
    let code = body_json(response).await["code"]
        .as_str()
        .unwrap()
        .to_string();

    let repo = app.state.db.domain_repo();
    let mut domain = repo.claim_user_task().await.unwrap().unwrap().domain;
    domain.response_state = ResponseState::Ok;
    domain.content_language = "en".into();
    repo.save_domain(&domain).await.unwrap();
    app.state.tracker.record(&code, domain.id);

    let response = app
        .router
        .oneshot(authed("GET", &format!("/v1/batches/{code}"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["code"], code.as_str());
    assert_eq!(json["domains"][0]["host"], "done.example");
    assert_eq!(json["domains"][0]["response_state"], "ok");
    assert_eq!(json["domains"][0]["content_language"], "en");
}

#[tokio::test]
async fn persisted_batch_is_served_after_restart() {
    let app = setup_test_app().await;
    let repo = app.state.db.domain_repo();

    let mut domain = repo
        .upsert_domains(&["restart.example".to_string()])
        .await
        .unwrap()
        .remove(0);
    app.state
        .db
        .batch_repo()
        .create_batch_record("persisted", &[domain.id], None, Utc::now() + TimeDelta::hours(1))
        .await
        .unwrap();

    let response = app
        .router
        .clone()
        .oneshot(authed("GET", "/v1/batches/persisted", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert!(json.get("collected").is_none());

    domain.response_state = ResponseState::NotFound;
    repo.save_domain(&domain).await.unwrap();

    let response = app
        .router
        .oneshot(authed("GET", "/v1/batches/persisted", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["domains"][0]["response_state"], "not_found");
}

#[tokio::test]
async fn unknown_batch_returns_404() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(authed("GET", "/v1/batches/nope", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"], "not_found");
}

#[tokio::test]
async fn list_get_and_delete_domains() {
    let app = setup_test_app().await;
    let domains = app
        .state
        .db
        .domain_repo()
        .upsert_domains(&["one.example".to_string(), "two.example".to_string()])
        .await
        .unwrap();
    let id = domains[1].id;

    let response = app
        .router
        .clone()
        .oneshot(authed("GET", "/v1/domains?limit=10", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["total"], 2);
    assert_eq!(json["domains"][0]["host"], "one.example");

    let response = app
        .router
        .clone()
        .oneshot(authed("GET", &format!("/v1/domains/{id}"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["host"], "two.example");
    assert_eq!(json["response_state"], "unvisited");

    let response = app
        .router
        .clone()
        .oneshot(authed("DELETE", &format!("/v1/domains/{id}"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .router
        .oneshot(authed("GET", &format!("/v1/domains/{id}"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn add_proxies_reloads_pool() {
    let app = setup_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(authed(
            "POST",
            "/v1/proxies",
            Some(serde_json::json!({
                "proxies": [
                    { "endpoint": "10.0.0.1:3128", "scheme": "https" },
                    { "endpoint": "10.0.0.2:1080", "scheme": "socks5",
                      "username": "user", "password": "secret" }
                ]
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["inserted"], 2);
    assert_eq!(json["pool_size"], 2);
    assert_eq!(app.state.proxy_pool.stats().proxies, 2);

    let response = app
        .router
        .clone()
        .oneshot(authed("GET", "/v1/proxies", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["total"], 2);
    assert_eq!(json["proxies"][1]["authenticated"], true);
    assert!(!json.to_string().contains("secret"));

    let id = json["proxies"][0]["id"].as_i64().unwrap();
    let response = app
        .router
        .clone()
        .oneshot(authed("DELETE", &format!("/v1/proxies/{id}"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(app.state.proxy_pool.stats().proxies, 1);

    let response = app
        .router
        .oneshot(authed("DELETE", &format!("/v1/proxies/{id}"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn add_proxies_rejects_bad_scheme() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(authed(
            "POST",
            "/v1/proxies",
            Some(serde_json::json!({
                "proxies": [{ "endpoint": "10.0.0.1:3128", "scheme": "carrier-pigeon" }]
            })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(
        app.state
            .db
            .proxy_repo()
            .list_proxies(0, 0)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn echo_is_public() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(
            Request::post("/echo")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"code":"abc","domain_ids":[1,2]}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["received"], true);
}
