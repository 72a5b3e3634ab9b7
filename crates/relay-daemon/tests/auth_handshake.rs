//! Hermetic tests of the two-stage auth handshake against a local
//! `wiremock` server standing in for `radiko.jp`.

use std::time::Duration;

use relay_daemon::auth::AuthClient;
use relay_daemon::endpoints::Endpoints;
use relay_proto::config::AccountConfig;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn auth1_success() -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("x-radiko-authtoken", "test-auth-token")
        .insert_header("x-radiko-keyoffset", "0")
        .insert_header("x-radiko-keylength", "16")
}

fn auth1_success_with_token(token: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("x-radiko-authtoken", token)
        .insert_header("x-radiko-keyoffset", "0")
        .insert_header("x-radiko-keylength", "16")
}

fn auth2_success() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_string("JP13,TOKYO,1,1")
}

#[tokio::test]
async fn successful_handshake_populates_token_and_area() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/api/auth1"))
        .respond_with(auth1_success())
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/api/auth2"))
        .and(header("X-Radiko-AuthToken", "test-auth-token"))
        .respond_with(auth2_success())
        .mount(&server)
        .await;

    let client = AuthClient::with_endpoints(Endpoints::new(server.uri()));
    client.refresh().await.expect("handshake should succeed");

    assert_eq!(client.token().await.as_deref(), Some("test-auth-token"));
    assert_eq!(client.snapshot().await.area_id.as_deref(), Some("JP13"));
}

#[tokio::test]
async fn handshake_retries_after_a_transient_auth1_failure() {
    let server = MockServer::start().await;

    // First AUTH1 call fails; the second (retry) succeeds.
    Mock::given(method("GET"))
        .and(path("/v2/api/auth1"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/api/auth1"))
        .respond_with(auth1_success())
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/api/auth2"))
        .respond_with(auth2_success())
        .mount(&server)
        .await;

    let client = AuthClient::with_endpoints(Endpoints::new(server.uri()));
    client.refresh().await.expect("handshake should recover after one retry");
    assert!(client.token().await.is_some());
}

#[tokio::test]
async fn handshake_fails_after_exhausting_retries() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/api/auth1"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = AuthClient::with_endpoints(Endpoints::new(server.uri()));
    assert!(client.refresh().await.is_err());
    assert!(client.token().await.is_none());
}

#[tokio::test]
async fn login_failure_does_not_prevent_non_premium_token_acquisition() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/ap/member/login/login"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/api/auth1"))
        .respond_with(auth1_success())
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/api/auth2"))
        .respond_with(auth2_success())
        .mount(&server)
        .await;

    let client = AuthClient::with_endpoints(Endpoints::new(server.uri()));
    let account = AccountConfig {
        premium_mail: Some("user@example.com".into()),
        premium_pass: Some("hunter2".into()),
    };

    let result = client.init(&account).await;
    assert!(result.is_err(), "init should surface the login failure");
    assert!(
        client.token().await.is_some(),
        "token should still be acquired in non-premium mode"
    );
    assert!(!client.premium_active().await);
}

#[tokio::test]
async fn concurrent_refresh_calls_coalesce_onto_the_same_handshake() {
    let server = MockServer::start().await;

    // The first AUTH1 call is slow and wins the handshake lock; a second
    // call arriving while it's in flight must wait for it and reuse its
    // result rather than performing its own (distinguishable) handshake.
    Mock::given(method("GET"))
        .and(path("/v2/api/auth1"))
        .respond_with(auth1_success_with_token("token-1").set_delay(Duration::from_millis(200)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/api/auth1"))
        .respond_with(auth1_success_with_token("token-2"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/api/auth2"))
        .respond_with(auth2_success())
        .mount(&server)
        .await;

    let client = AuthClient::with_endpoints(Endpoints::new(server.uri()));
    let other = client.clone();

    let (first, second) = tokio::join!(
        client.refresh(),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            other.refresh().await
        }
    );

    first.expect("first handshake should succeed");
    second.expect("coalesced refresh should observe the first handshake's result");
    assert_eq!(
        client.token().await.as_deref(),
        Some("token-1"),
        "the coalesced caller must not have triggered a second, independent handshake"
    );
}
