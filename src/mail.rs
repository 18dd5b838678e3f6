use anyhow::Result;
use chrono::Local;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::MailConfig;

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);
const PLAIN_FALLBACK: &str = "HTML report - please view in HTML-capable email client.";

#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Sent,
    /// Written to the outbox, either by design (no SMTP host) or after a failed send.
    Saved(PathBuf),
    /// No recipient configured.
    Disabled,
}

#[derive(Debug, Clone)]
pub struct MailAttachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

fn looks_like_html(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("<html") || lower.contains("<!doctype")
}

pub fn safe_subject(subject: &str) -> String {
    subject
        .replace(' ', "_")
        .replace('/', "-")
        .chars()
        .take(50)
        .collect()
}

fn build_message(
    mail: &MailConfig,
    to: &str,
    subject: &str,
    body: &str,
    html: bool,
    attachment: Option<&MailAttachment>,
) -> Result<Message> {
    let mut builder = Message::builder()
        .from(mail.from.parse::<Mailbox>()?)
        .subject(subject);

    for address in to.split(',').map(str::trim).filter(|a| !a.is_empty()) {
        builder = builder.to(address.parse::<Mailbox>()?);
    }

    let attachment = match attachment {
        Some(a) => {
            info!("Attached: {} ({} bytes)", a.filename, a.data.len());
            Some(
                Attachment::new(a.filename.clone())
                    .body(a.data.clone(), ContentType::parse(&a.content_type)?),
            )
        }
        None => None,
    };

    let message = if html && looks_like_html(body) {
        let alternative =
            MultiPart::alternative_plain_html(PLAIN_FALLBACK.to_string(), body.to_string());
        match attachment {
            Some(part) => builder.multipart(MultiPart::mixed().multipart(alternative).singlepart(part))?,
            None => builder.multipart(alternative)?,
        }
    } else {
        let text = SinglePart::plain(body.to_string());
        match attachment {
            Some(part) => builder.multipart(MultiPart::mixed().singlepart(text).singlepart(part))?,
            None => builder.singlepart(text)?,
        }
    };

    Ok(message)
}

fn save_to_outbox(outbox: &Path, subject: &str, suffix: &str, message: &Message) -> Result<PathBuf> {
    fs::create_dir_all(outbox)?;

    let ts = Local::now().format("%Y%m%d-%H%M%S");
    let path = outbox.join(format!("{ts}-{}{suffix}.eml", safe_subject(subject)));
    fs::write(&path, message.formatted())?;

    Ok(path)
}

async fn deliver(mail: &MailConfig, host: &str, message: Message) -> Result<()> {
    let builder = if mail.starttls {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
    };

    let mut builder = builder.port(mail.smtp_port).timeout(Some(SMTP_TIMEOUT));

    if let Some(user) = &mail.smtp_user {
        builder = builder.credentials(Credentials::new(
            user.clone(),
            mail.smtp_password.clone().unwrap_or_default(),
        ));
    }

    builder.build().send(message).await?;
    Ok(())
}

/// Send via SMTP, or drop the message in the outbox when SMTP is not set up
/// or the send fails. Only an outbox write failure is returned as an error.
pub async fn send_email(
    mail: &MailConfig,
    outbox: &Path,
    subject: &str,
    body: &str,
    html: bool,
    attachment: Option<&MailAttachment>,
) -> Result<Delivery> {
    let Some(to) = mail.to.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
        warn!("MAIL_TO not configured, email reports disabled");
        return Ok(Delivery::Disabled);
    };

    let message = build_message(mail, to, subject, body, html, attachment)?;

    let Some(host) = mail.smtp_host.as_deref().map(str::trim).filter(|h| !h.is_empty()) else {
        info!("SMTP not configured, saving email to outbox");
        let path = save_to_outbox(outbox, subject, "", &message)?;
        info!("Email saved to: {}", path.display());
        return Ok(Delivery::Saved(path));
    };

    match deliver(mail, host, message).await {
        Ok(()) => {
            info!("Email sent to: {to}");
            Ok(Delivery::Sent)
        }
        Err(e) => {
            error!("Failed to send email: {e}");
            let fallback = build_message(
                mail,
                to,
                subject,
                &format!("Failed to send: {e}\n\n{body}"),
                false,
                None,
            )?;
            let path = save_to_outbox(outbox, subject, "-failed", &fallback)?;
            error!("Email send failed, saved to: {}", path.display());
            Ok(Delivery::Saved(path))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mail_to(to: Option<&str>) -> MailConfig {
        MailConfig {
            to: to.map(String::from),
            ..MailConfig::default()
        }
    }

    #[test]
    fn subject_is_made_filename_safe() {
        assert_eq!(safe_subject("List-Sync Report - 2026/10/18"), "List-Sync_Report_-_2026-10-18");
        assert_eq!(safe_subject(&"x".repeat(80)).len(), 50);
    }

    #[tokio::test]
    async fn missing_recipient_disables_mail() {
        let dir = tempfile::tempdir().unwrap();
        let delivery = send_email(&mail_to(None), dir.path(), "s", "b", false, None)
            .await
            .unwrap();
        assert_eq!(delivery, Delivery::Disabled);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn blank_recipient_from_config_file_disables_mail() {
        let config: crate::config::Config =
            serde_json::from_str(r#"{"mail": {"to": "  "}}"#).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let delivery = send_email(&config.mail, dir.path(), "s", "b", false, None)
            .await
            .unwrap();
        assert_eq!(delivery, Delivery::Disabled);
    }

    #[tokio::test]
    async fn no_smtp_host_saves_multipart_to_outbox() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = dir.path().join("reports/outbox");
        let attachment = MailAttachment {
            filename: "full.html".into(),
            content_type: "text/html; charset=utf-8".into(),
            data: b"<html>all</html>".to_vec(),
        };

        let delivery = send_email(
            &mail_to(Some("ops@example.com")),
            &outbox,
            "Daily Report",
            "<!DOCTYPE html><html><body>hi</body></html>",
            true,
            Some(&attachment),
        )
        .await
        .unwrap();

        let Delivery::Saved(path) = delivery else {
            panic!("expected outbox delivery, got {delivery:?}");
        };
        assert!(path.starts_with(&outbox));
        assert!(path.to_string_lossy().ends_with("-Daily_Report.eml"));

        let eml = fs::read_to_string(&path).unwrap();
        assert!(eml.contains("Subject: Daily Report"));
        assert!(eml.contains("multipart/alternative"));
        assert!(eml.contains("full.html"));
        assert!(eml.contains(PLAIN_FALLBACK));
    }

    #[tokio::test]
    async fn plain_body_is_not_wrapped_as_html() {
        let dir = tempfile::tempdir().unwrap();
        let delivery = send_email(
            &mail_to(Some("ops@example.com")),
            dir.path(),
            "Plain",
            "just text",
            true,
            None,
        )
        .await
        .unwrap();

        let Delivery::Saved(path) = delivery else {
            panic!("expected outbox delivery");
        };
        let eml = fs::read_to_string(path).unwrap();
        assert!(!eml.contains("multipart/alternative"));
        assert!(eml.contains("just text"));
    }

    #[tokio::test]
    async fn failed_send_falls_back_to_outbox() {
        let dir = tempfile::tempdir().unwrap();
        let mail = MailConfig {
            smtp_host: Some("127.0.0.1".into()),
            smtp_port: 1,
            starttls: false,
            ..mail_to(Some("ops@example.com"))
        };

        let delivery = send_email(&mail, dir.path(), "Report", "body text", false, None)
            .await
            .unwrap();

        let Delivery::Saved(path) = delivery else {
            panic!("expected failed delivery to be saved");
        };
        assert!(path.to_string_lossy().ends_with("-Report-failed.eml"));
        let eml = fs::read_to_string(path).unwrap();
        assert!(eml.contains("Failed to send:"));
        assert!(eml.contains("body text"));
    }

    #[test]
    fn bad_sender_address_is_an_error() {
        let mail = MailConfig {
            from: "not an address".into(),
            ..mail_to(Some("ops@example.com"))
        };
        assert!(build_message(&mail, "ops@example.com", "s", "b", false, None).is_err());
    }
}
