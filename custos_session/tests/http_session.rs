#![cfg(all(feature = "http", feature = "file"))]

mod common;

use custos_clock::{ManualClock, UnixTime};
use custos_session::{
    backend::{Credentials, HttpAuthBackend},
    persistence::FileSessionPersistence,
    SessionManager, TokenPair,
};
use wiremock::{
    matchers::{body_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use common::tokens;

const NOW: UnixTime = UnixTime(1_700_000_000);

fn token_body(pair: &TokenPair) -> serde_json::Value {
    serde_json::json!({
        "access_token": pair.access_token().as_str(),
        "refresh_token": pair.refresh_token().as_str(),
        "token_type": "bearer",
    })
}

fn manager(
    server: &MockServer,
    file: &std::path::Path,
) -> SessionManager<HttpAuthBackend, ManualClock> {
    let base = reqwest::Url::parse(&format!("{}/", server.uri())).unwrap();
    SessionManager::builder(HttpAuthBackend::new(reqwest::Client::new(), base))
        .with_persistence(FileSessionPersistence::new(file))
        .with_clock(ManualClock::new(NOW))
        .build()
}

#[tokio::test]
async fn remembered_session_survives_a_restart_and_refreshes_once() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("session.json");

    let issued = tokens("ada", &["user"], UnixTime(NOW.0 + 30), "refresh-1");
    let renewed = tokens("ada", &["user"], UnixTime(NOW.0 + 3_600), "refresh-2");

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(&issued)))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(serde_json::json!({ "refresh_token": "refresh-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(&renewed)))
        .expect(1)
        .mount(&server)
        .await;

    let first = manager(&server, &file);
    first
        .login(&Credentials::new("ada@example.com", "correct horse"), true)
        .await
        .unwrap();
    drop(first);

    let second = manager(&server, &file);
    assert!(second.restore().await);
    assert!(second.guard().has_role("user"));

    let (a, b, c) = tokio::join!(
        second.get_valid_access_token(),
        second.get_valid_access_token(),
        second.get_valid_access_token(),
    );
    for token in [a, b, c] {
        assert_eq!(&*token.unwrap(), renewed.access_token());
    }

    let third = manager(&server, &file);
    assert!(third.restore().await);
    assert_eq!(third.snapshot().tokens(), Some(&renewed));
}

#[tokio::test]
async fn wrong_password_surfaces_the_detail() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(serde_json::json!({ "detail": "Incorrect email or password" })),
        )
        .mount(&server)
        .await;

    let manager = manager(&server, &dir.path().join("session.json"));
    let error = manager
        .login(&Credentials::new("ada@example.com", "wrong"), true)
        .await
        .unwrap_err();

    assert_eq!(error.message(), "Incorrect email or password");
    assert!(!manager.snapshot().is_authenticated());
    assert!(!dir.path().join("session.json").exists());
}

#[tokio::test]
async fn logout_clears_the_file_even_when_the_server_fails() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("session.json");
    let issued = tokens("ada", &["user"], UnixTime(NOW.0 + 3_600), "refresh-1");

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(&issued)))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .and(header(
            "authorization",
            format!("Bearer {}", issued.access_token().as_str()).as_str(),
        ))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager(&server, &file);
    manager
        .login(&Credentials::new("ada@example.com", "correct horse"), true)
        .await
        .unwrap();
    assert!(file.exists());

    manager.logout().await;

    assert!(!manager.snapshot().is_authenticated());
    assert!(!file.exists());
}

#[tokio::test]
async fn rejected_refresh_ends_the_stored_session() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("session.json");
    let issued = tokens("ada", &["user"], UnixTime(NOW.0 - 10), "refresh-1");

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(&issued)))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(serde_json::json!({ "detail": "Invalid refresh token" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let manager = manager(&server, &file);
    manager
        .login(&Credentials::new("ada@example.com", "correct horse"), true)
        .await
        .unwrap();

    assert!(!manager.refresh_session().await);
    assert!(!manager.guard().is_authenticated());
    assert!(!file.exists());
}
