use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use lettre::message::{Mailbox, Message, MultiPart};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};
use serde::Deserialize;

use super::{headline, Sink};
use crate::registry::AdapterSpec;
use crate::types::Item;

fn default_port() -> u16 {
    465
}

/// `type = "email"` instance settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub smtp_server: String,
    #[serde(default = "default_port")]
    pub smtp_port: u16,
    pub smtp_user: String,
    pub smtp_password: String,
    /// Defaults to `smtp_user`.
    #[serde(default)]
    pub from_email: Option<String>,
    pub to_emails: Vec<String>,
}

pub struct EmailSink {
    name: String,
    title: String,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl EmailSink {
    pub fn new(
        name: impl Into<String>,
        title: impl Into<String>,
        cfg: EmailConfig,
    ) -> Result<Self> {
        if cfg.smtp_server.trim().is_empty() {
            bail!("email sink needs `smtp_server`");
        }
        if cfg.smtp_user.trim().is_empty() || cfg.smtp_password.is_empty() {
            bail!("email sink needs `smtp_user` and `smtp_password`");
        }
        if cfg.to_emails.is_empty() {
            bail!("email sink needs at least one address in `to_emails`");
        }

        let from_addr = cfg.from_email.as_deref().unwrap_or(&cfg.smtp_user);
        let from: Mailbox = from_addr
            .parse()
            .with_context(|| format!("invalid sender address {from_addr:?}"))?;
        let to = cfg
            .to_emails
            .iter()
            .map(|a| {
                a.trim()
                    .parse::<Mailbox>()
                    .with_context(|| format!("invalid recipient address {a:?}"))
            })
            .collect::<Result<Vec<_>>>()?;

        let creds = Credentials::new(cfg.smtp_user.clone(), cfg.smtp_password.clone());
        // 587 is the submission port (STARTTLS); anything else is implicit TLS.
        let builder = match cfg.smtp_port {
            587 => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.smtp_server),
            _ => AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.smtp_server),
        };
        let builder =
            builder.with_context(|| format!("invalid smtp_server {:?}", cfg.smtp_server))?;
        let mailer = builder.port(cfg.smtp_port).credentials(creds).build();

        Ok(Self {
            name: name.into(),
            title: title.into(),
            mailer,
            from,
            to,
        })
    }

    pub fn from_spec(spec: &AdapterSpec<'_>) -> Result<Self> {
        Self::new(spec.name, spec.digest_title, spec.config.decode()?)
    }

    fn build_message(&self, items: &[Item], digest: &str) -> Result<Message> {
        let html = format!(
            concat!(
                "<html><body>",
                "<pre style=\"font-family: Arial, sans-serif; white-space: pre-wrap;\">",
                "{}</pre></body></html>"
            ),
            html_escape::encode_text(digest)
        );
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(headline(&self.title, items.len()));
        for to in &self.to {
            builder = builder.to(to.clone());
        }
        builder
            .multipart(MultiPart::alternative_plain_html(digest.to_string(), html))
            .context("build email")
    }
}

#[async_trait]
impl Sink for EmailSink {
    async fn notify(&self, items: &[Item], digest: &str) -> Result<bool> {
        if items.is_empty() {
            return Ok(true);
        }
        let msg = match self.build_message(items, digest) {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(sink = %self.name, error = %format!("{e:#}"), "email build failed");
                return Ok(false);
            }
        };
        match self.mailer.send(msg).await {
            Ok(_) => {
                tracing::info!(
                    sink = %self.name,
                    count = items.len(),
                    recipients = self.to.len(),
                    "email sent"
                );
                Ok(true)
            }
            Err(e) => {
                tracing::error!(sink = %self.name, error = %e, "smtp send failed");
                Ok(false)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> EmailConfig {
        EmailConfig {
            smtp_server: "smtp.example.test".into(),
            smtp_port: 465,
            smtp_user: "bot@example.test".into(),
            smtp_password: "pw".into(),
            from_email: None,
            to_emails: vec!["a@example.test".into(), " b@example.test ".into()],
        }
    }

    #[test]
    fn builds_multipart_message_for_all_recipients() {
        let sink = EmailSink::new("mail", "News", cfg()).unwrap();
        let items = vec![Item::new("t", "s")];
        let msg = sink.build_message(&items, "# News\n1. <t>").unwrap();
        let raw = String::from_utf8(msg.formatted()).unwrap();
        assert!(raw.contains("a@example.test"));
        assert!(raw.contains("b@example.test"));
        assert!(raw.contains("News (1 items)"));
        assert!(raw.contains("&lt;t&gt;"));
    }

    #[test]
    fn bad_addresses_fail_construction() {
        let mut c = cfg();
        c.to_emails = vec!["not an address".into()];
        assert!(EmailSink::new("mail", "News", c).is_err());

        let mut c = cfg();
        c.to_emails.clear();
        assert!(EmailSink::new("mail", "News", c).is_err());
    }

    #[test]
    fn decodes_from_instance_fields() {
        let ic = crate::config::InstanceConfig::new("email")
            .with_field("smtp_server", "smtp.example.test")
            .with_field("smtp_port", 587)
            .with_field("smtp_user", "bot@example.test")
            .with_field("smtp_password", "pw")
            .with_field("to_emails", serde_json::json!(["a@example.test"]));
        let spec = AdapterSpec {
            config: &ic,
            name: "mail",
            digest_title: "News",
        };
        assert!(EmailSink::from_spec(&spec).is_ok());
    }
}
