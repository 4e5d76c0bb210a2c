//! Out-of-band delivery of challenge codes.
//!
//! The `Provisioner` hands each issued code to a `Notifier` and waits for the
//! outcome: a failed send is reported to the client as `DeliveryFailed`, there
//! is no retry queue. Two senders ship with the crate:
//!
//! - `LogNotifier` writes the message to the log. Local development only.
//! - `WebhookNotifier` posts the rendered email as JSON to a mail relay.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::{fmt, time::Duration};
use tracing::{debug, info};
use url::Url;

use crate::APP_USER_AGENT;

const EMAIL_SUBJECT: &str = "Your OTP Code";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    Signup,
    Signin,
}

impl Purpose {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Signup => "signup",
            Self::Signin => "signin",
        }
    }
}

#[derive(Clone)]
pub struct CodeMessage {
    pub to_email: String,
    pub subject_id: String,
    pub code: String,
    pub purpose: Purpose,
    pub valid_for: Duration,
}

impl CodeMessage {
    /// Plain-text body.
    #[must_use]
    pub fn text_body(&self) -> String {
        format!(
            "Your OTP code is: {}. It is valid for {}.",
            self.code,
            validity_phrase(self.valid_for)
        )
    }

    /// HTML body.
    #[must_use]
    pub fn html_body(&self) -> String {
        format!(
            "<p>Your OTP code is: <strong>{}</strong>. It is valid for {}.</p>",
            self.code,
            validity_phrase(self.valid_for)
        )
    }
}

impl fmt::Debug for CodeMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeMessage")
            .field("to_email", &self.to_email)
            .field("subject_id", &self.subject_id)
            .field("code", &"***")
            .field("purpose", &self.purpose)
            .field("valid_for", &self.valid_for)
            .finish()
    }
}

fn validity_phrase(valid_for: Duration) -> String {
    let seconds = valid_for.as_secs();
    if seconds >= 60 && seconds % 60 == 0 {
        let minutes = seconds / 60;
        if minutes == 1 {
            "1 minute".to_string()
        } else {
            format!("{minutes} minutes")
        }
    } else {
        format!("{seconds} seconds")
    }
}

/// Delivers a code to a contact address, single attempt.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver the message or return an error describing the transport failure.
    async fn deliver(&self, message: &CodeMessage) -> Result<()>;
}

/// Local dev sender that logs the message instead of sending real email.
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, message: &CodeMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            subject_id = %message.subject_id,
            purpose = message.purpose.as_str(),
            body = %message.text_body(),
            "code delivery stub"
        );
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RelayPayload<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: String,
    html: String,
    purpose: Purpose,
    subject_id: &'a str,
}

/// Posts rendered emails to an HTTP mail relay.
pub struct WebhookNotifier {
    client: Client,
    url: Url,
    token: Option<SecretString>,
    from: String,
}

impl WebhookNotifier {
    /// Build the relay client once at startup.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        url: Url,
        token: Option<SecretString>,
        from: String,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to build notifier HTTP client")?;
        Ok(Self {
            client,
            url,
            token,
            from,
        })
    }
}

impl fmt::Debug for WebhookNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookNotifier")
            .field("url", &self.url.as_str())
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("from", &self.from)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver(&self, message: &CodeMessage) -> Result<()> {
        let payload = RelayPayload {
            from: &self.from,
            to: &message.to_email,
            subject: EMAIL_SUBJECT,
            text: message.text_body(),
            html: message.html_body(),
            purpose: message.purpose,
            subject_id: &message.subject_id,
        };

        let mut request = self.client.post(self.url.as_str()).json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("mail relay request to {} failed", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("mail relay returned {status}: {body}");
        }

        debug!(to_email = %message.to_email, "code delivered via mail relay");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::HeaderMap, http::StatusCode, routing::post};
    use serde_json::Value;
    use std::sync::Arc;
    use tokio::{net::TcpListener, sync::Mutex};

    fn message() -> CodeMessage {
        CodeMessage {
            to_email: "a@x.com".to_string(),
            subject_id: "alice".to_string(),
            code: "482913".to_string(),
            purpose: Purpose::Signup,
            valid_for: Duration::from_secs(60),
        }
    }

    async fn relay(status: StatusCode) -> Result<(Url, Arc<Mutex<Vec<(Option<String>, Value)>>>)> {
        let seen: Arc<Mutex<Vec<(Option<String>, Value)>>> = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        let app = Router::new().route(
            "/send",
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let captured = captured.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|value| value.to_str().ok())
                        .map(str::to_string);
                    captured.lock().await.push((auth, body));
                    status
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok((Url::parse(&format!("http://{addr}/send"))?, seen))
    }

    #[test]
    fn bodies_mention_code_and_window() {
        let message = message();
        assert_eq!(
            message.text_body(),
            "Your OTP code is: 482913. It is valid for 1 minute."
        );
        assert!(message.html_body().contains("<strong>482913</strong>"));
        assert_eq!(validity_phrase(Duration::from_secs(900)), "15 minutes");
        assert_eq!(validity_phrase(Duration::from_secs(45)), "45 seconds");
    }

    #[test]
    fn debug_hides_code() {
        assert!(!format!("{:?}", message()).contains("482913"));
    }

    #[tokio::test]
    async fn log_notifier_always_succeeds() -> Result<()> {
        LogNotifier.deliver(&message()).await
    }

    #[tokio::test]
    async fn webhook_posts_payload_with_bearer() -> Result<()> {
        let (url, seen) = relay(StatusCode::ACCEPTED).await?;
        let notifier = WebhookNotifier::new(
            url,
            Some(SecretString::from("relay-token".to_string())),
            "no-reply@provisio.local".to_string(),
            Duration::from_secs(5),
        )?;
        notifier.deliver(&message()).await?;

        let seen = seen.lock().await;
        assert_eq!(seen.len(), 1);
        let (auth, body) = &seen[0];
        assert_eq!(auth.as_deref(), Some("Bearer relay-token"));
        assert_eq!(body["to"], "a@x.com");
        assert_eq!(body["subject"], EMAIL_SUBJECT);
        assert_eq!(body["purpose"], "signup");
        assert_eq!(body["subjectId"], "alice");
        Ok(())
    }

    #[tokio::test]
    async fn webhook_reports_relay_errors() -> Result<()> {
        let (url, _seen) = relay(StatusCode::BAD_GATEWAY).await?;
        let notifier = WebhookNotifier::new(
            url,
            None,
            "no-reply@provisio.local".to_string(),
            Duration::from_secs(5),
        )?;
        let result = notifier.deliver(&message()).await;
        assert!(result.is_err());
        Ok(())
    }
}
