//! Integration tests for the SSO login handshake.

use forum_liker::config::Config;
use forum_liker::session::Session;
use forum_liker::LikerError;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "secret-token";

async fn start_servers() -> (MockServer, MockServer) {
    (MockServer::start().await, MockServer::start().await)
}

fn test_config(forum: &MockServer, training: &MockServer) -> Config {
    Config::for_testing(&forum.uri(), &training.uri())
}

async fn mount_identity(training: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/user"))
        .and(body_json(json!({"action": "me"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"username": "me"})))
        .mount(training)
        .await;
}

async fn mount_sso_redirect(forum: &MockServer, training: &MockServer, fragment: &str) {
    Mock::given(method("GET"))
        .and(path("/session/sso"))
        .and(query_param("return_path", "/"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", format!("{}/login{fragment}", training.uri())),
        )
        .mount(forum)
        .await;

    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><title>Training</title></html>"))
        .mount(training)
        .await;
}

async fn mount_sso_validation(training: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/sso"))
        .and(body_json(json!({"payload": "PAYLOAD==", "sig": "SIG"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"parameters": "sso=SIGNED&sig=OK"})),
        )
        .mount(training)
        .await;
}

async fn mount_sso_login(forum: &MockServer, username: Option<&str>) {
    let mut response = ResponseTemplate::new(200).set_body_string("");
    if let Some(username) = username {
        response = response.insert_header("X-Discourse-Username", username);
    }
    Mock::given(method("GET"))
        .and(path("/session/sso_login"))
        .and(query_param("sso", "SIGNED"))
        .and(query_param("sig", "OK"))
        .respond_with(response)
        .mount(forum)
        .await;
}

async fn mount_csrf(forum: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/session/csrf.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"csrf": "csrf-123"})))
        .mount(forum)
        .await;
}

async fn mount_full_login(forum: &MockServer, training: &MockServer) {
    mount_identity(training).await;
    mount_sso_redirect(forum, training, "#/sso?sso=PAYLOAD%3D%3D&sig=SIG").await;
    mount_sso_validation(training).await;
    mount_sso_login(forum, Some("me")).await;
    mount_csrf(forum).await;
}

#[tokio::test]
async fn test_login_completes_handshake() {
    let (forum, training) = start_servers().await;
    mount_full_login(&forum, &training).await;

    let session = Session::login(&test_config(&forum, &training), TOKEN)
        .await
        .expect("login failed");

    assert_eq!(session.username(), "me");
    assert_eq!(session.csrf_token(), "csrf-123");
    assert_eq!(
        session.forum_endpoint("/posts.json"),
        format!("{}/posts.json", forum.uri())
    );
}

#[tokio::test]
async fn test_login_sends_token_cookie() {
    let (forum, training) = start_servers().await;

    // Only answer the identity check when the credential cookie is attached
    Mock::given(method("POST"))
        .and(path("/api/user"))
        .and(header("cookie", "token=secret-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"username": "me"})))
        .expect(1)
        .mount(&training)
        .await;
    mount_sso_redirect(&forum, &training, "#/sso?sso=PAYLOAD%3D%3D&sig=SIG").await;
    mount_sso_validation(&training).await;
    mount_sso_login(&forum, Some("me")).await;
    mount_csrf(&forum).await;

    let session = Session::login(&test_config(&forum, &training), TOKEN).await;
    assert!(session.is_ok(), "login failed: {session:?}");
}

#[tokio::test]
async fn test_rejected_token_is_login_failed() {
    let (forum, training) = start_servers().await;
    Mock::given(method("POST"))
        .and(path("/api/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "unauthorized"})))
        .mount(&training)
        .await;

    // Later hops must never be reached
    Mock::given(method("GET"))
        .and(path("/session/sso"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&forum)
        .await;

    let err = Session::login(&test_config(&forum, &training), TOKEN)
        .await
        .unwrap_err();
    assert!(matches!(err, LikerError::LoginFailed), "got {err:?}");
}

#[tokio::test]
async fn test_html_error_page_on_identity_check_is_login_failed() {
    let (forum, training) = start_servers().await;
    Mock::given(method("POST"))
        .and(path("/api/user"))
        .respond_with(
            ResponseTemplate::new(502).set_body_string("<html><title>502 Bad Gateway</title></html>"),
        )
        .mount(&training)
        .await;

    let err = Session::login(&test_config(&forum, &training), TOKEN)
        .await
        .unwrap_err();
    assert!(matches!(err, LikerError::LoginFailed), "got {err:?}");
}

#[tokio::test]
async fn test_missing_sig_fails_handshake() {
    let (forum, training) = start_servers().await;
    mount_identity(&training).await;
    mount_sso_redirect(&forum, &training, "#/sso?sso=PAYLOAD%3D%3D").await;

    let err = Session::login(&test_config(&forum, &training), TOKEN)
        .await
        .unwrap_err();
    assert!(
        matches!(err, LikerError::SsoHandshakeFailed(ref m) if m.contains("sig")),
        "got {err:?}"
    );
}

#[tokio::test]
async fn test_unreachable_training_site_is_login_failed() {
    let forum = MockServer::start().await;
    // Nothing listens on port 1
    let config = Config::for_testing(&forum.uri(), "http://127.0.0.1:1");

    let err = Session::login(&config, TOKEN).await.unwrap_err();
    assert!(matches!(err, LikerError::LoginFailed), "got {err:?}");
}

#[tokio::test]
async fn test_missing_username_header_fails_handshake() {
    let (forum, training) = start_servers().await;
    mount_identity(&training).await;
    mount_sso_redirect(&forum, &training, "#/sso?sso=PAYLOAD%3D%3D&sig=SIG").await;
    mount_sso_validation(&training).await;
    mount_sso_login(&forum, None).await;
    mount_csrf(&forum).await;

    let err = Session::login(&test_config(&forum, &training), TOKEN)
        .await
        .unwrap_err();
    assert!(matches!(err, LikerError::SsoHandshakeFailed(_)), "got {err:?}");
}

#[tokio::test]
async fn test_sso_validation_error_propagates() {
    let (forum, training) = start_servers().await;
    mount_identity(&training).await;
    mount_sso_redirect(&forum, &training, "#/sso?sso=PAYLOAD%3D%3D&sig=SIG").await;
    Mock::given(method("POST"))
        .and(path("/api/sso"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"errors": ["bad signature"]})))
        .mount(&training)
        .await;

    let err = Session::login(&test_config(&forum, &training), TOKEN)
        .await
        .unwrap_err();
    assert!(matches!(err, LikerError::Api(ref m) if m == "bad signature"), "got {err:?}");
}

#[tokio::test]
async fn test_rate_limited_request_is_retried() {
    let (forum, training) = start_servers().await;

    // First CSRF request is throttled, the retry succeeds
    Mock::given(method("GET"))
        .and(path("/session/csrf.json"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&forum)
        .await;
    mount_full_login(&forum, &training).await;

    let session = Session::login(&test_config(&forum, &training), TOKEN)
        .await
        .expect("login failed");
    assert_eq!(session.csrf_token(), "csrf-123");
}

#[tokio::test]
async fn test_rate_limit_gives_up_after_max_attempts() {
    let (forum, training) = start_servers().await;

    Mock::given(method("GET"))
        .and(path("/session/csrf.json"))
        .respond_with(
            ResponseTemplate::new(429).set_body_string("<html><title>Too Many Requests</title></html>"),
        )
        .expect(3)
        .mount(&forum)
        .await;
    mount_full_login(&forum, &training).await;

    let err = Session::login(&test_config(&forum, &training), TOKEN)
        .await
        .unwrap_err();
    assert!(matches!(err, LikerError::Generic(ref m) if m == "Too Many Requests"), "got {err:?}");
}
