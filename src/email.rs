//! Outgoing mail for account verification and invitations.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::config::AppConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    async fn send(&self, email: OutgoingEmail) -> Result<()>;
}

enum Transport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
}

pub struct LettreMailer {
    transport: Transport,
    from: Mailbox,
}

impl LettreMailer {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let (transport, from) = match &config.smtp {
            Some(smtp) => {
                let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
                    .with_context(|| format!("failed to create SMTP transport for {}", smtp.host))?
                    .port(smtp.port)
                    .credentials(Credentials::new(
                        smtp.username.clone(),
                        smtp.password.clone(),
                    ))
                    .build();
                (Transport::Smtp(transport), smtp.from.clone())
            }
            None => {
                let dir = Path::new(&config.mail_drop_dir);
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create {}", dir.display()))?;
                tracing::warn!(
                    mail_drop_dir = %dir.display(),
                    "SMTP_HOST not set, writing outgoing mail to disk"
                );
                (
                    Transport::File(AsyncFileTransport::<Tokio1Executor>::new(dir)),
                    "docbuilder@localhost".to_string(),
                )
            }
        };

        let from = from
            .parse::<Mailbox>()
            .map_err(|err| anyhow!("invalid sender address {from}: {err}"))?;
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for LettreMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<()> {
        let to = email
            .to
            .parse::<Mailbox>()
            .map_err(|err| anyhow!("invalid recipient address: {err}"))?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject)
            .header(ContentType::TEXT_HTML)
            .body(email.body)
            .context("failed to build email message")?;

        match &self.transport {
            Transport::Smtp(smtp) => {
                smtp.send(message).await.context("failed to send SMTP email")?;
            }
            Transport::File(file) => {
                file.send(message)
                    .await
                    .context("failed to write email to disk")?;
            }
        }
        Ok(())
    }
}

pub fn verification_link(frontend_url: &str, token: &str) -> String {
    format!("{}/verify?token={}", frontend_url.trim_end_matches('/'), token)
}

pub fn invitation_link(frontend_url: &str, token: &str) -> String {
    format!(
        "{}/set-password?token={}",
        frontend_url.trim_end_matches('/'),
        token
    )
}

pub fn verification_email(to: &str, frontend_url: &str, token: &str) -> OutgoingEmail {
    let link = verification_link(frontend_url, token);
    OutgoingEmail {
        to: to.to_string(),
        subject: "Confirm your email address".to_string(),
        body: format!(
            r#"<p>Welcome!</p>
<p>Please confirm your email address by following the link below:</p>
<p><a href="{link}">{link}</a></p>
<p>The link is valid for 24 hours.</p>"#
        ),
    }
}

pub fn invitation_email(
    to: &str,
    inviter: &str,
    frontend_url: &str,
    token: &str,
) -> OutgoingEmail {
    let link = invitation_link(frontend_url, token);
    OutgoingEmail {
        to: to.to_string(),
        subject: "You have been invited".to_string(),
        body: format!(
            r#"<p>{inviter} invited you to join their organization.</p>
<p>Choose a password to activate your account:</p>
<p><a href="{link}">{link}</a></p>
<p>The link is valid for 24 hours.</p>"#
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_do_not_double_slashes() {
        assert_eq!(
            verification_link("https://app.example.com/", "abc"),
            "https://app.example.com/verify?token=abc"
        );
        assert_eq!(
            invitation_link("https://app.example.com", "abc"),
            "https://app.example.com/set-password?token=abc"
        );
    }

    #[test]
    fn invitation_mentions_inviter_and_link() {
        let email = invitation_email("new@example.com", "Ada Lovelace", "http://x", "t0k");
        assert_eq!(email.to, "new@example.com");
        assert!(email.body.contains("Ada Lovelace"));
        assert!(email.body.contains("http://x/set-password?token=t0k"));
    }

    #[tokio::test]
    async fn file_transport_writes_messages() {
        let dir = tempfile::tempdir().unwrap();
        let mailer = LettreMailer {
            transport: Transport::File(AsyncFileTransport::<Tokio1Executor>::new(dir.path())),
            from: "docbuilder@localhost".parse().unwrap(),
        };
        mailer
            .send(verification_email("a@example.com", "http://x", "tok"))
            .await
            .unwrap();
        let written = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(written, 1);
    }
}
