// crates/portico-rpc/tests/scenarios.rs
//
// In-process scenarios: the server chain, the bundled services, and the
// gateway wired together without a socket.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{header, Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use serde_json::{json, Value};
use tokio::time::Instant;

use portico_core::call::{collect_stream, stream_from_iter, Call};
use portico_core::credential::{Credential, SchemePolicy};
use portico_core::error::{AuthError, RpcError};
use portico_core::metadata::{Metadata, AUTHORIZATION};
use portico_rpc::handlers::{self, echo, math, user, EchoOptions};
use portico_rpc::middleware::{build_chain, StageConfig};
use portico_rpc::{Gateway, GatewayConfig, RpcCore, ServiceRegistry};
use portico_store::InMemoryUserStore;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn basic_policy() -> SchemePolicy {
    SchemePolicy::Basic {
        username: "admin".to_string(),
        password: "password".to_string(),
    }
}

fn admin_header() -> String {
    Credential::Basic {
        username: "admin".to_string(),
        password: "password".to_string(),
    }
    .to_header()
    .unwrap()
}

fn server_core(policy: SchemePolicy, echo: EchoOptions) -> RpcCore {
    let mut registry = ServiceRegistry::new();
    handlers::register_all(&mut registry, echo, Arc::new(InMemoryUserStore::new()));
    let chain = build_chain(&["logging", "auth"], &StageConfig::server(policy)).unwrap();
    RpcCore::new(registry, chain)
}

fn authorized(call: Call) -> Call {
    let mut metadata = Metadata::new();
    metadata.insert(AUTHORIZATION, admin_header());
    call.with_metadata(metadata)
}

fn rest(method: Method, path: &str, body: &str, auth: Option<&str>) -> Request<Full<Bytes>> {
    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    builder.body(Full::new(Bytes::from(body.to_string()))).unwrap()
}

async fn json_body(response: http::Response<Full<Bytes>>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// ---------------------------------------------------------------------------
// Deadlines
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn slow_handler_hits_one_second_deadline() {
    let core = server_core(
        basic_policy(),
        EchoOptions {
            delay: Duration::from_secs(2),
            ..EchoOptions::default()
        },
    );
    let call = authorized(Call::unary(echo::UNARY_ECHO, json!({"message": "Madman"})))
        .with_timeout(Duration::from_secs(1));

    let started = Instant::now();
    let err = core.dispatch(call).await.unwrap_err();
    assert_eq!(err, RpcError::DeadlineExceeded);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_millis(1500), "took {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn generous_deadline_lets_slow_handler_finish() {
    let core = server_core(
        basic_policy(),
        EchoOptions {
            delay: Duration::from_secs(2),
            ..EchoOptions::default()
        },
    );
    let call = authorized(Call::unary(echo::UNARY_ECHO, json!({"message": "Madman"})))
        .with_timeout(Duration::from_secs(5));
    let reply = core.dispatch(call).await.unwrap();
    assert_eq!(reply.into_unary().unwrap(), json!({"message": "Madman"}));
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_then_get_and_unknown_user() {
    let core = server_core(basic_policy(), EchoOptions::default());

    let err = core
        .dispatch(authorized(Call::unary(user::GET, json!({"username": "Bob"}))))
        .await
        .unwrap_err();
    assert_eq!(err, RpcError::NotFound("user not found".to_string()));

    core.dispatch(authorized(Call::unary(
        user::CREATE,
        json!({"user": {"username": "Alice", "password": "123"}}),
    )))
    .await
    .unwrap();

    let reply = core
        .dispatch(authorized(Call::unary(user::GET, json!({"username": "Alice"}))))
        .await
        .unwrap();
    assert_eq!(reply.into_unary().unwrap()["user"]["username"], "Alice");
}

#[tokio::test]
async fn auth_runs_before_business_logic() {
    let core = server_core(basic_policy(), EchoOptions::default());

    let err = core
        .dispatch(Call::unary(
            user::CREATE,
            json!({"user": {"username": "Mallory", "password": "x"}}),
        ))
        .await
        .unwrap_err();
    assert_eq!(err, RpcError::Unauthenticated(AuthError::MissingCredential));

    // The refused create left no record behind.
    let err = core
        .dispatch(authorized(Call::unary(user::GET, json!({"username": "Mallory"}))))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::NotFound(_)));
}

// ---------------------------------------------------------------------------
// Streaming through the chain
// ---------------------------------------------------------------------------

#[tokio::test]
async fn streaming_calls_pass_the_chain_once() {
    let core = server_core(basic_policy(), EchoOptions::default());

    let reply = core
        .dispatch(authorized(Call::server_streaming(
            math::PRIME_FACTORS,
            json!({"num": 120}),
        )))
        .await
        .unwrap();
    let factors: Vec<i64> = collect_stream(reply.into_stream(), None)
        .await
        .unwrap()
        .iter()
        .map(|v| v["result"].as_i64().unwrap())
        .collect();
    assert_eq!(factors, vec![2, 2, 2, 3, 5]);

    let requests = stream_from_iter(vec![json!({"num": 3}), json!({"num": 4})]);
    let reply = core
        .dispatch(authorized(Call::client_streaming(math::AVERAGE, requests)))
        .await
        .unwrap();
    assert_eq!(reply.into_unary().unwrap(), json!({"result": 3.5}));

    let requests = stream_from_iter(vec![json!({"num": 3})]);
    let err = core
        .dispatch(Call::bidirectional(math::MAXIMUM, requests))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Unauthenticated(_)));
}

// ---------------------------------------------------------------------------
// Gateway over the in-process core
// ---------------------------------------------------------------------------

fn gateway() -> Gateway {
    let core = server_core(basic_policy(), EchoOptions::default());
    Gateway::new(GatewayConfig::default(), Arc::new(core)).unwrap()
}

#[tokio::test]
async fn rest_create_with_empty_username_is_400() {
    let gateway = gateway();
    let response = gateway
        .handle(rest(
            Method::POST,
            "/v1/users",
            r#"{"username": "", "password": "123"}"#,
            Some(&admin_header()),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    assert_eq!(
        json_body(response).await,
        json!({"code": 3, "kind": "invalid_argument", "message": "username cannot be empty"})
    );
}

#[tokio::test]
async fn rest_user_round_trip() {
    let gateway = gateway();
    let auth = admin_header();

    let response = gateway
        .handle(rest(
            Method::POST,
            "/v1/users",
            r#"{"username": "Alice", "password": "123"}"#,
            Some(&auth),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({}));

    let response = gateway
        .handle(rest(Method::GET, "/v1/users/Alice", "", Some(&auth)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["user"]["username"], "Alice");

    let response = gateway
        .handle(rest(Method::GET, "/v1/users/Bob", "", Some(&auth)))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn rest_without_credentials_is_401() {
    let gateway = gateway();
    let response = gateway
        .handle(rest(Method::POST, "/v1/math/sum", r#"{"first_num": 1}"#, None))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["kind"], "unauthenticated");
    assert_eq!(body["reason"], "missing_credential");

    let response = gateway
        .handle(rest(
            Method::POST,
            "/v1/math/sum",
            r#"{"first_num": 1}"#,
            Some("Bearer some-secret-token"),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["reason"], "scheme_mismatch");
}

#[tokio::test]
async fn rest_streaming_routes() {
    let gateway = gateway();
    let auth = admin_header();

    let response = gateway
        .handle(rest(Method::GET, "/v1/math/prime-factors/12", "", Some(&auth)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!([{"result": 2}, {"result": 2}, {"result": 3}])
    );

    let response = gateway
        .handle(rest(
            Method::POST,
            "/v1/math/average",
            r#"[{"num": 1}, {"num": 2}, {"num": 3}, {"num": 4}]"#,
            Some(&auth),
        ))
        .await;
    assert_eq!(json_body(response).await, json!({"result": 2.5}));

    let response = gateway
        .handle(rest(Method::GET, "/v1/greeter/hello/world", "", Some(&auth)))
        .await;
    assert_eq!(json_body(response).await, json!({"message": "Hello world"}));
}

#[tokio::test]
async fn rest_timeout_header_bounds_the_call() {
    let core = server_core(
        basic_policy(),
        EchoOptions {
            delay: Duration::from_millis(500),
            ..EchoOptions::default()
        },
    );
    let gateway = Gateway::new(GatewayConfig::default(), Arc::new(core)).unwrap();

    let mut request = rest(Method::GET, "/v1/echo/hi", "", Some(&admin_header()));
    request
        .headers_mut()
        .insert("grpc-timeout", http::HeaderValue::from_static("50m"));
    let response = gateway.handle(request).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(response).await["kind"], "deadline_exceeded");
}
