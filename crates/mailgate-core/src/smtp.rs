//! Transient SMTP client
//!
//! A transport is assembled on demand from decrypted credentials, used for
//! one verify or send, and discarded. The sender address on outbound mail
//! is always the SMTP username; the account's primary email is display
//! metadata and deliberately not used here.

use std::time::Duration;

use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use mailgate_common::{Error, Result};
use mailgate_store::models::{ConnectionSecurity, ServerSettings};
use tokio::time::timeout;
use tracing::debug;
use ulid::Ulid;

const SMTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Outbound message payload
#[derive(Debug, Clone, Default)]
pub struct OutgoingMessage {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub text: Option<String>,
    pub html: Option<String>,
    pub attachments: Vec<OutgoingAttachment>,
}

/// Decoded outbound attachment
#[derive(Debug, Clone)]
pub struct OutgoingAttachment {
    pub filename: String,
    pub content: Vec<u8>,
    pub content_type: String,
}

/// Submission result
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOutcome {
    pub message_id: String,
    pub accepted: Vec<String>,
    pub rejected: Vec<String>,
}

fn transport(settings: &ServerSettings) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
    let builder = match settings.connection {
        // Implicit TLS on connect.
        ConnectionSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host),
        // Plaintext connect, then a mandatory STARTTLS upgrade; a server
        // that does not offer the upgrade fails the connection.
        ConnectionSecurity::StartTls => {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
        }
    }
    .map_err(|e| Error::Upstream(format!("SMTP transport setup failed: {}", e)))?;

    Ok(builder
        .port(settings.port)
        .credentials(Credentials::new(
            settings.username.clone(),
            settings.password.clone(),
        ))
        .build())
}

/// Connect and authenticate, then disconnect
pub async fn verify(settings: &ServerSettings) -> Result<()> {
    let mailer = transport(settings)?;

    let ok = timeout(SMTP_TIMEOUT, mailer.test_connection())
        .await
        .map_err(|_| Error::Upstream(format!("SMTP connection to {} timed out", settings.host)))?
        .map_err(|e| classify_smtp_error(e, &settings.host))?;

    if !ok {
        return Err(Error::Upstream(format!(
            "SMTP server {} rejected the connection test",
            settings.host
        )));
    }

    debug!("SMTP connection to {} verified", settings.host);
    Ok(())
}

fn classify_smtp_error(e: lettre::transport::smtp::Error, host: &str) -> Error {
    if e.is_permanent() {
        Error::AuthFailure(format!("SMTP server {} rejected the credentials: {}", host, e))
    } else {
        Error::Upstream(format!("SMTP connection to {} failed: {}", host, e))
    }
}

fn parse_mailbox(address: &str, which: &str) -> Result<Mailbox> {
    address
        .parse()
        .map_err(|e| Error::Validation(format!("{} address {} is invalid: {}", which, address, e)))
}

fn generate_message_id(from: &Mailbox) -> String {
    format!(
        "<{}@{}>",
        Ulid::new().to_string().to_lowercase(),
        from.email.domain()
    )
}

fn build_message(
    from: Mailbox,
    outgoing: &OutgoingMessage,
    message_id: &str,
) -> Result<Message> {
    if outgoing.to.is_empty() {
        return Err(Error::Validation(
            "at least one recipient is required".to_string(),
        ));
    }

    let mut builder = Message::builder()
        .from(from)
        .subject(outgoing.subject.clone())
        .message_id(Some(message_id.to_string()));

    for to in &outgoing.to {
        builder = builder.to(parse_mailbox(to, "to")?);
    }
    for cc in &outgoing.cc {
        builder = builder.cc(parse_mailbox(cc, "cc")?);
    }
    for bcc in &outgoing.bcc {
        builder = builder.bcc(parse_mailbox(bcc, "bcc")?);
    }

    enum Body {
        Alternative(MultiPart),
        Single(SinglePart),
    }

    let body = match (&outgoing.text, &outgoing.html) {
        (Some(text), Some(html)) => Body::Alternative(MultiPart::alternative_plain_html(
            text.clone(),
            html.clone(),
        )),
        (Some(text), None) => Body::Single(SinglePart::plain(text.clone())),
        (None, Some(html)) => Body::Single(SinglePart::html(html.clone())),
        (None, None) => {
            return Err(Error::Validation(
                "either text or html body is required".to_string(),
            ))
        }
    };

    let message = if outgoing.attachments.is_empty() {
        match body {
            Body::Alternative(alternative) => builder.multipart(alternative),
            Body::Single(single) => builder.singlepart(single),
        }
    } else {
        let mut mixed = match body {
            Body::Alternative(alternative) => MultiPart::mixed().multipart(alternative),
            Body::Single(single) => MultiPart::mixed().singlepart(single),
        };

        for attachment in &outgoing.attachments {
            let content_type = ContentType::parse(&attachment.content_type).map_err(|_| {
                Error::Validation(format!(
                    "attachment {} has invalid content type {}",
                    attachment.filename, attachment.content_type
                ))
            })?;
            mixed = mixed.singlepart(
                Attachment::new(attachment.filename.clone())
                    .body(attachment.content.clone(), content_type),
            );
        }

        builder.multipart(mixed)
    };

    message.map_err(|e| Error::Validation(format!("message assembly failed: {}", e)))
}

/// Submit one outbound message
pub async fn send(settings: &ServerSettings, outgoing: &OutgoingMessage) -> Result<SendOutcome> {
    let from = parse_mailbox(&settings.username, "from")?;
    let message_id = generate_message_id(&from);
    let message = build_message(from, outgoing, &message_id)?;

    let mailer = transport(settings)?;
    timeout(SMTP_TIMEOUT, mailer.send(message))
        .await
        .map_err(|_| Error::Upstream(format!("SMTP submission to {} timed out", settings.host)))?
        .map_err(|e| classify_smtp_error(e, &settings.host))?;

    // The SMTP dialogue does not itemize per-recipient status; a submission
    // accepted by the server reports every recipient as accepted.
    let mut accepted = outgoing.to.clone();
    accepted.extend(outgoing.cc.iter().cloned());
    accepted.extend(outgoing.bcc.iter().cloned());

    debug!(
        "message {} submitted via {} for {} recipients",
        message_id,
        settings.host,
        accepted.len()
    );

    Ok(SendOutcome {
        message_id,
        accepted,
        rejected: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(connection: ConnectionSecurity) -> ServerSettings {
        ServerSettings {
            host: "smtp.example.com".to_string(),
            port: 587,
            username: "sender@example.com".to_string(),
            password: "p".to_string(),
            connection,
        }
    }

    fn outgoing() -> OutgoingMessage {
        OutgoingMessage {
            to: vec!["rcpt@example.net".to_string()],
            subject: "greetings".to_string(),
            text: Some("plain body".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_transport_builds_for_both_modes() {
        assert!(transport(&settings(ConnectionSecurity::Tls)).is_ok());
        assert!(transport(&settings(ConnectionSecurity::StartTls)).is_ok());
    }

    #[test]
    fn test_build_message_headers() {
        let from = parse_mailbox("sender@example.com", "from").unwrap();
        let message_id = "<test@example.com>".to_string();
        let message = build_message(from, &outgoing(), &message_id).unwrap();

        let rendered = String::from_utf8(message.formatted()).unwrap();
        assert!(rendered.contains("From: sender@example.com"));
        assert!(rendered.contains("To: rcpt@example.net"));
        assert!(rendered.contains("Subject: greetings"));
        assert!(rendered.contains("plain body"));
    }

    #[test]
    fn test_build_message_alternative_parts() {
        let from = parse_mailbox("sender@example.com", "from").unwrap();
        let mut out = outgoing();
        out.html = Some("<b>rich body</b>".to_string());

        let message = build_message(from, &out, "<t@x>").unwrap();
        let rendered = String::from_utf8(message.formatted()).unwrap();
        assert!(rendered.contains("multipart/alternative"));
        assert!(rendered.contains("plain body"));
        assert!(rendered.contains("rich body"));
    }

    #[test]
    fn test_build_message_with_attachment() {
        let from = parse_mailbox("sender@example.com", "from").unwrap();
        let mut out = outgoing();
        out.attachments.push(OutgoingAttachment {
            filename: "notes.txt".to_string(),
            content: b"attached bytes".to_vec(),
            content_type: "text/plain".to_string(),
        });

        let message = build_message(from, &out, "<t@x>").unwrap();
        let rendered = String::from_utf8(message.formatted()).unwrap();
        assert!(rendered.contains("multipart/mixed"));
        assert!(rendered.contains("notes.txt"));
    }

    #[test]
    fn test_build_message_requires_recipients() {
        let from = parse_mailbox("sender@example.com", "from").unwrap();
        let mut out = outgoing();
        out.to.clear();

        let err = build_message(from, &out, "<t@x>").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_build_message_requires_body() {
        let from = parse_mailbox("sender@example.com", "from").unwrap();
        let mut out = outgoing();
        out.text = None;

        let err = build_message(from, &out, "<t@x>").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_build_message_rejects_bad_recipient() {
        let from = parse_mailbox("sender@example.com", "from").unwrap();
        let mut out = outgoing();
        out.to = vec!["not an address".to_string()];

        let err = build_message(from, &out, "<t@x>").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_message_id_uses_sender_domain() {
        let from: Mailbox = "sender@example.com".parse().unwrap();
        let id = generate_message_id(&from);
        assert!(id.starts_with('<'));
        assert!(id.ends_with("@example.com>"));
    }
}
