// src/notify/email.rs
use anyhow::{Context, Result};
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::{Notification, Notifier};

pub struct EmailSender {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl EmailSender {
    /// `Ok(None)` when SMTP_HOST is unset; an error when it is set but the
    /// rest of the SMTP settings are missing or invalid.
    pub fn from_env() -> Result<Option<Self>> {
        let Ok(host) = std::env::var("SMTP_HOST") else {
            return Ok(None);
        };
        let var = |k: &str| std::env::var(k).with_context(|| format!("{k} missing"));
        let user = var("SMTP_USER")?;
        let pass = var("SMTP_PASS")?;
        let from_addr = var("NOTIFY_EMAIL_FROM")?;
        let to_addr = var("NOTIFY_EMAIL_TO")?;

        let creds = Credentials::new(user, pass);
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
            .context("invalid SMTP_HOST")?
            .credentials(creds)
            .build();

        let from = from_addr.parse().context("invalid NOTIFY_EMAIL_FROM")?;
        let to = to_addr.parse().context("invalid NOTIFY_EMAIL_TO")?;

        Ok(Some(Self { mailer, from, to }))
    }
}

fn build_message(from: Mailbox, to: Mailbox, n: &Notification) -> Result<Message> {
    let subject = format!("[dialog-scout] {}", n.title);
    let body = format!("{}\n\nTimestamp: {}\n", n.body, n.ts.to_rfc3339());

    Message::builder()
        .from(from)
        .to(to)
        .subject(subject)
        .header(header::ContentType::TEXT_PLAIN)
        .body(body)
        .context("build email")
}

#[async_trait::async_trait]
impl Notifier for EmailSender {
    async fn send(&self, n: &Notification) -> Result<()> {
        let msg = build_message(self.from.clone(), self.to.clone(), n)?;
        self.mailer.send(msg).await.context("send email")?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "email"
    }
}
