//! End-to-end tests over real HTTP.
//!
//! The full router is served on an ephemeral port with the in-memory store and
//! a notifier that captures delivered codes, then driven with `reqwest`:
//! 1. Signup stages the registration and delivers a code.
//! 2. Verify promotes it and returns a token.
//! 3. Signin with the password delivers a second code.
//! 4. Verify confirms the signin and returns a fresh token.
//! 5. The token unlocks the placement lookup.

use anyhow::{Context, Result};
use async_trait::async_trait;
use provisio::{
    api,
    provision::{
        ProvisionConfig, Provisioner, Stores,
        hasher::Argon2Hasher,
        notifier::{CodeMessage, Notifier, Purpose},
        store::MemoryStore,
        token::JwtMinter,
    },
};
use reqwest::StatusCode;
use secrecy::SecretString;
use serde_json::{Value, json};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::Mutex, task::JoinHandle};

#[derive(Default)]
struct Mailbox {
    sent: Mutex<Vec<CodeMessage>>,
}

#[async_trait]
impl Notifier for Mailbox {
    async fn deliver(&self, message: &CodeMessage) -> Result<()> {
        self.sent.lock().await.push(message.clone());
        Ok(())
    }
}

impl Mailbox {
    async fn last(&self) -> Result<CodeMessage> {
        self.sent
            .lock()
            .await
            .last()
            .cloned()
            .context("no code delivered")
    }
}

struct TestServer {
    base: String,
    client: reqwest::Client,
    mailbox: Arc<Mailbox>,
    handle: JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl TestServer {
    async fn start() -> Result<Self> {
        let store = Arc::new(MemoryStore::default());
        store.seed_district("d1", "North");
        store.seed_district("d2", "South");
        store.seed_sub_district("s1", "d1", "North East");
        store.seed_sub_district("s2", "d2", "South West");
        store.seed_facility("f1", "s1", "Clinic A");
        store.seed_facility("f2", "s1", "Clinic B");

        let mailbox = Arc::new(Mailbox::default());
        let provisioner = Provisioner::new(
            Stores::shared(store),
            Arc::new(Argon2Hasher::with_cost(1024, 1)?),
            mailbox.clone(),
            Arc::new(JwtMinter::new(
                &SecretString::from("http-flow-secret".to_string()),
                "provisio".to_string(),
                Duration::from_secs(600),
            )),
            ProvisionConfig::default(),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr: SocketAddr = listener.local_addr()?;
        let app = api::app(Arc::new(provisioner), None);
        let handle = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app.into_make_service()).await {
                eprintln!("test server stopped: {err}");
            }
        });

        Ok(Self {
            base: format!("http://{addr}"),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()?,
            mailbox,
            handle,
        })
    }

    async fn post(&self, path: &str, body: &Value) -> Result<(StatusCode, Value)> {
        let response = self
            .client
            .post(format!("{}{path}", self.base))
            .json(body)
            .send()
            .await?;
        let status = response.status();
        Ok((status, response.json().await?))
    }

    async fn domains(&self, token: &str) -> Result<(StatusCode, Value)> {
        let response = self
            .client
            .get(format!("{}/domains", self.base))
            .bearer_auth(token)
            .send()
            .await?;
        let status = response.status();
        Ok((status, response.json().await?))
    }
}

#[tokio::test]
async fn signup_signin_and_domains_over_http() -> Result<()> {
    let server = TestServer::start().await?;

    let (status, body) = server
        .post(
            "/signup",
            &json!({
                "subjectId": "alice",
                "firstName": "Alice",
                "lastName": "Liddell",
                "email": "Alice@Example.com",
                "password": "p1",
                "districtId": "d1"
            }),
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["message"], "OTP sent successfully to your email");

    let message = server.mailbox.last().await?;
    assert_eq!(message.to_email, "alice@example.com");
    assert_eq!(message.purpose, Purpose::Signup);

    let (status, body) = server
        .post(
            "/verify-otp",
            &json!({"subjectId": "alice", "code": message.code}),
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    let signup_token = body["token"]
        .as_str()
        .context("missing token")?
        .to_string();
    assert_eq!(body["identity"]["email"], "alice@example.com");
    assert_eq!(body["identity"]["districtId"], "d1");

    let (status, body) = server
        .post("/signin", &json!({"subjectId": "alice", "password": "wrong"}))
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Incorrect password");

    let (status, body) = server
        .post("/signin", &json!({"userId": "alice", "password": "p1"}))
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["message"], "OTP sent to your email");

    let message = server.mailbox.last().await?;
    assert_eq!(message.purpose, Purpose::Signin);

    let (status, body) = server
        .post("/verify-otp", &json!({"userId": "alice", "otp": message.code}))
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    let signin_token = body["token"]
        .as_str()
        .context("missing token")?
        .to_string();
    assert_ne!(signin_token, signup_token);

    let (status, body) = server.domains(&signin_token).await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    let districts = body["districts"].as_array().context("districts")?;
    assert_eq!(districts.len(), 1);
    assert_eq!(districts[0]["districtId"], "d1");
    let facilities = body["facilities"].as_array().context("facilities")?;
    assert_eq!(facilities.len(), 2);

    Ok(())
}

#[tokio::test]
async fn verify_without_any_pending_state_is_rejected() -> Result<()> {
    let server = TestServer::start().await?;

    let (status, body) = server
        .post("/verify-otp", &json!({"subjectId": "nobody", "code": "123456"}))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "OTP expired or didn't match");

    let (status, _) = server
        .post("/verify-otp", &json!({"subjectId": "nobody", "code": "12ab"}))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn invalid_signup_input_is_rejected() -> Result<()> {
    let server = TestServer::start().await?;

    let (status, body) = server
        .post(
            "/signup",
            &json!({
                "subjectId": "alice",
                "firstName": "Alice",
                "email": "not-an-email",
                "password": "p1"
            }),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let text = body["message"].as_str().context("missing message")?;
    assert!(text.starts_with("Incorrect input"), "{text}");
    assert!(server.mailbox.sent.lock().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn domains_rejects_missing_token() -> Result<()> {
    let server = TestServer::start().await?;

    let response = server
        .client
        .get(format!("{}/domains", server.base))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}
