use axum::http::{HeaderMap, StatusCode};
use axum::response::Html;
use axum::routing::get;
use axum::{Json, Router};
use poolsense_devkit::stub_http::StubReply;
use poolsense_devkit::StubTransport;
use poolsense_kernel::api::{DateRange, Endpoint, PoolApi, PoolApiClient, ReqwestTransport};
use poolsense_kernel::error::PoolApiError;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use time::macros::date;
use tokio::net::TcpListener;

const BASE: &str = "https://pool.example";

fn client(stub: &StubTransport) -> PoolApiClient<StubTransport> {
    PoolApiClient::new(stub.clone(), BASE, "test_api_key_789")
}

#[tokio::test]
async fn success_returns_decoded_json_and_sends_token() {
    let stub = StubTransport::new();
    stub.route_endpoint(
        Endpoint::UserProfile,
        StubReply::Json(200, json!({"btc": {"ok_workers": 1}})),
    );

    let payload = client(&stub).user_profile("btc").await.unwrap();
    assert_eq!(payload["btc"]["ok_workers"], 1);

    let requests = stub.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url, "https://pool.example/accounts/profile/json/btc/");
    assert_eq!(requests[0].header("Pool-Auth-Token"), Some("test_api_key_789"));
}

#[tokio::test]
async fn unauthorized_and_forbidden_are_auth_errors() {
    for status in [401u16, 403] {
        let stub = StubTransport::new();
        stub.route_endpoint(Endpoint::Workers, StubReply::Text(status, "denied".into()));
        let err = client(&stub).workers("btc").await.unwrap_err();
        assert!(err.is_auth(), "{status}");
        assert_eq!(err.status(), Some(status));
        assert_eq!(err.endpoint(), "workers");
    }
}

#[tokio::test]
async fn other_statuses_carry_the_body() {
    let stub = StubTransport::new();
    stub.route_endpoint(
        Endpoint::PoolStats,
        StubReply::Text(500, "internal error".into()),
    );
    match client(&stub).pool_stats("btc").await.unwrap_err() {
        PoolApiError::Api { status, body, endpoint } => {
            assert_eq!(status, 500);
            assert_eq!(body, "internal error");
            assert_eq!(endpoint, "pool_stats");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn transport_failures_are_network_errors() {
    let stub = StubTransport::new();
    stub.route_endpoint(
        Endpoint::DailyRewards,
        StubReply::NetworkError("dns failure".into()),
    );
    let err = client(&stub).daily_rewards("btc").await.unwrap_err();
    assert!(err.is_transient());
    assert!(err.to_string().contains("dns failure"));
}

#[tokio::test]
async fn non_json_success_body_is_a_decode_error() {
    let stub = StubTransport::new();
    stub.route_endpoint(Endpoint::Payouts, StubReply::Text(200, "<html>".into()));
    let range = DateRange::ending_on(date!(2024 - 01 - 08), 7);
    let err = client(&stub).payouts("btc", &range).await.unwrap_err();
    assert!(matches!(err, PoolApiError::Decode { .. }));
}

#[tokio::test]
async fn parameterized_endpoints_render_urls() {
    let stub = StubTransport::new();
    let api = client(&stub);
    let range = DateRange::ending_on(date!(2024 - 01 - 08), 7);

    api.daily_hash_rate("btc", "user").await.unwrap();
    api.block_rewards("btc", &range).await.unwrap();
    api.payouts("btc", &range).await.unwrap();

    let urls: Vec<String> = stub.requests().into_iter().map(|r| r.url).collect();
    assert_eq!(
        urls,
        vec![
            "https://pool.example/accounts/hash_rate_daily/json/user/btc/",
            "https://pool.example/accounts/block_rewards/json/btc?from=2024-01-01&to=2024-01-08",
            "https://pool.example/accounts/payouts/json/btc?from=2024-01-01&to=2024-01-08",
        ]
    );
}

#[tokio::test]
async fn inverted_ranges_are_passed_through() {
    let stub = StubTransport::new();
    let range = DateRange {
        from: date!(2024 - 02 - 01),
        to: date!(2024 - 01 - 01),
    };
    client(&stub).block_rewards("btc", &range).await.unwrap();
    assert!(stub.requests()[0]
        .url
        .ends_with("?from=2024-02-01&to=2024-01-01"));
}

/// Local pool stand-in served over real HTTP.
async fn spawn_pool_server() -> SocketAddr {
    let app = Router::new()
        .route(
            "/accounts/profile/json/{coin}/",
            get(|headers: HeaderMap| async move {
                let token = headers
                    .get("Pool-Auth-Token")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                Json(json!({"btc": {"ok_workers": 2}, "token": token}))
            }),
        )
        .route(
            "/stats/json/{coin}/",
            get(|| async { Html("<html>maintenance</html>") }),
        )
        .route(
            "/accounts/workers/json/{coin}/",
            get(|| async { (StatusCode::UNAUTHORIZED, "bad token") }),
        )
        .route(
            "/accounts/rewards/json/{coin}/",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "backend exploded") }),
        );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn reqwest_client(addr: SocketAddr) -> PoolApiClient<ReqwestTransport> {
    PoolApiClient::with_reqwest(format!("http://{addr}"), "live_key", Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn reqwest_transport_decodes_json_and_sends_token() {
    let addr = spawn_pool_server().await;
    let payload: Value = reqwest_client(addr).user_profile("btc").await.unwrap();
    assert_eq!(payload["btc"]["ok_workers"], 2);
    assert_eq!(payload["token"], "live_key");
}

#[tokio::test]
async fn reqwest_transport_maps_html_success_to_decode() {
    let addr = spawn_pool_server().await;
    let err = reqwest_client(addr).pool_stats("btc").await.unwrap_err();
    assert!(matches!(err, PoolApiError::Decode { .. }), "{err:?}");
    assert!(!err.is_transient());
}

#[tokio::test]
async fn reqwest_transport_maps_statuses() {
    let addr = spawn_pool_server().await;
    let api = reqwest_client(addr);

    let err = api.workers("btc").await.unwrap_err();
    assert!(err.is_auth());
    assert_eq!(err.status(), Some(401));

    match api.daily_rewards("btc").await.unwrap_err() {
        PoolApiError::Api { status, body, .. } => {
            assert_eq!(status, 500);
            assert_eq!(body, "backend exploded");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn reqwest_transport_maps_refused_connection_to_network() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = reqwest_client(addr).user_profile("btc").await.unwrap_err();
    assert!(err.is_transient(), "{err:?}");
    assert_eq!(err.endpoint(), "user_profile");
}
