//! Transient IMAP message operations
//!
//! Each operation opens its own connection, selects the inbox, does its
//! work and logs out again — success or failure. Nothing here touches the
//! live watcher's connection.

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mailgate_common::{Error, Result};
use mailgate_store::models::ServerSettings;
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};
use serde::Serialize;
use tokio::time::timeout;

use super::{
    connect_and_login, flag_name, logout, select_inbox, uid_next, ImapSession, COMMAND_TIMEOUT,
    LIST_FETCH_TIMEOUT, SINGLE_FETCH_TIMEOUT,
};

/// How far below UIDNEXT the windowed listing reaches per requested message
const LIST_WINDOW_FACTOR: u32 = 5;

/// Fetch items for envelope-level listings
const META_ITEMS: &str = "(UID FLAGS INTERNALDATE BODY.PEEK[HEADER.FIELDS (SUBJECT FROM TO DATE)])";

/// Fetch items for a full single-message read
const DETAIL_ITEMS: &str = "(UID FLAGS INTERNALDATE BODY.PEEK[])";

/// Envelope-level view of one message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMeta {
    pub uid: u32,
    pub subject: Option<String>,
    pub from: Vec<String>,
    pub to: Vec<String>,
    pub date: Option<DateTime<Utc>>,
    pub flags: Vec<String>,
}

/// Decoded body views of one message
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedBody {
    pub text: Option<String>,
    pub html: Option<String>,
    pub attachments: Vec<AttachmentMeta>,
}

/// Attachment metadata
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentMeta {
    pub filename: Option<String>,
    pub content_type: String,
    pub size: usize,
}

/// Full view of one message
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDetail {
    pub uid: u32,
    pub subject: Option<String>,
    pub from: Vec<String>,
    pub to: Vec<String>,
    pub date: Option<DateTime<Utc>>,
    pub flags: Vec<String>,
    pub parsed: ParsedBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rfc822: Option<String>,
}

/// List the most recent inbox messages over a short-lived connection
pub async fn list_recent(
    settings: &ServerSettings,
    limit: usize,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<MessageMeta>> {
    let limit = limit.clamp(1, 100);
    let mut session = connect_and_login(settings).await?;

    let result = match timeout(
        LIST_FETCH_TIMEOUT,
        list_recent_inner(&mut session, limit, since),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(Error::Upstream("IMAP list fetch timed out".to_string())),
    };

    logout(session).await;
    result
}

async fn list_recent_inner(
    session: &mut ImapSession,
    limit: usize,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<MessageMeta>> {
    let mailbox = select_inbox(session).await?;
    let next = uid_next(&mailbox)?;

    let set = match since {
        Some(since) => {
            let query = format!("SINCE {}", since.format("%d-%b-%Y"));
            let found = timeout(COMMAND_TIMEOUT, session.uid_search(&query))
                .await
                .map_err(|_| Error::Upstream("IMAP search timed out".to_string()))?
                .map_err(|e| Error::Upstream(format!("IMAP search failed: {}", e)))?;

            let mut uids: Vec<u32> = found.into_iter().collect();
            uids.sort_unstable();
            let newest: Vec<u32> = uids.into_iter().rev().take(limit).collect();
            if newest.is_empty() {
                return Ok(Vec::new());
            }
            newest
                .iter()
                .map(|uid| uid.to_string())
                .collect::<Vec<_>>()
                .join(",")
        }
        None => {
            let hi = next.saturating_sub(1);
            if hi == 0 {
                return Ok(Vec::new());
            }
            let lo = std::cmp::max(1, hi.saturating_sub(limit as u32 * LIST_WINDOW_FACTOR));
            format!("{}:{}", lo, hi)
        }
    };

    let mut metas = fetch_metas(session, &set).await?;

    // Newest first, trimmed to the requested page.
    metas.sort_by(|a, b| b.uid.cmp(&a.uid));
    metas.truncate(limit);
    Ok(metas)
}

/// Fetch one message including its raw source over a short-lived connection
pub async fn fetch_one(
    settings: &ServerSettings,
    uid: u32,
    include_raw: bool,
) -> Result<MessageDetail> {
    let mut session = connect_and_login(settings).await?;

    let result = match timeout(
        SINGLE_FETCH_TIMEOUT,
        fetch_one_inner(&mut session, uid, include_raw),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(Error::Upstream("IMAP message fetch timed out".to_string())),
    };

    logout(session).await;
    result
}

async fn fetch_one_inner(
    session: &mut ImapSession,
    uid: u32,
    include_raw: bool,
) -> Result<MessageDetail> {
    select_inbox(session).await?;

    let mut found = None;
    {
        let mut stream = session
            .uid_fetch(uid.to_string(), DETAIL_ITEMS)
            .await
            .map_err(|e| Error::Upstream(format!("IMAP fetch failed: {}", e)))?;

        while let Some(fetch) = stream
            .try_next()
            .await
            .map_err(|e| Error::Upstream(format!("IMAP fetch failed: {}", e)))?
        {
            if fetch.uid == Some(uid) {
                found = Some(fetch);
            }
        }
    }

    let fetch = found.ok_or_else(|| Error::NotFound(format!("message {} does not exist", uid)))?;
    let raw = fetch
        .body()
        .ok_or_else(|| Error::Upstream("IMAP server returned no message body".to_string()))?
        .to_vec();

    let (subject, from, to) = match mailparse::parse_headers(&raw) {
        Ok((headers, _)) => (
            headers.get_first_value("Subject"),
            address_list(&headers, "From"),
            address_list(&headers, "To"),
        ),
        Err(_) => (None, Vec::new(), Vec::new()),
    };

    Ok(MessageDetail {
        uid,
        subject,
        from,
        to,
        date: fetch.internal_date().map(|d| d.with_timezone(&Utc)),
        flags: fetch.flags().map(|f| flag_name(&f)).collect(),
        parsed: parse_body(&raw),
        rfc822: include_raw.then(|| String::from_utf8_lossy(&raw).into_owned()),
    })
}

/// Fetch envelope-level metadata for a UID set
pub(crate) async fn fetch_metas(session: &mut ImapSession, set: &str) -> Result<Vec<MessageMeta>> {
    let mut fetches = Vec::new();
    {
        let stream = timeout(COMMAND_TIMEOUT, session.uid_fetch(set, META_ITEMS))
            .await
            .map_err(|_| Error::Upstream("IMAP fetch timed out".to_string()))?
            .map_err(|e| Error::Upstream(format!("IMAP fetch failed: {}", e)))?;

        let mut stream = stream;
        loop {
            let next = timeout(COMMAND_TIMEOUT, stream.try_next())
                .await
                .map_err(|_| Error::Upstream("IMAP fetch timed out".to_string()))?
                .map_err(|e| Error::Upstream(format!("IMAP fetch failed: {}", e)))?;
            match next {
                Some(fetch) => fetches.push(fetch),
                None => break,
            }
        }
    }

    Ok(fetches.iter().filter_map(meta_from_fetch).collect())
}

fn meta_from_fetch(fetch: &async_imap::types::Fetch) -> Option<MessageMeta> {
    let uid = fetch.uid?;

    let (subject, from, to) = match fetch.header().map(mailparse::parse_headers) {
        Some(Ok((headers, _))) => (
            headers.get_first_value("Subject"),
            address_list(&headers, "From"),
            address_list(&headers, "To"),
        ),
        _ => (None, Vec::new(), Vec::new()),
    };

    Some(MessageMeta {
        uid,
        subject,
        from,
        to,
        date: fetch.internal_date().map(|d| d.with_timezone(&Utc)),
        flags: fetch.flags().map(|f| flag_name(&f)).collect(),
    })
}

fn address_list(headers: &[mailparse::MailHeader<'_>], name: &str) -> Vec<String> {
    let Some(value) = headers.get_first_value(name) else {
        return Vec::new();
    };

    match mailparse::addrparse(&value) {
        Ok(list) => list
            .iter()
            .flat_map(|addr| match addr {
                mailparse::MailAddr::Single(single) => vec![format_single(single)],
                mailparse::MailAddr::Group(group) => {
                    group.addrs.iter().map(format_single).collect()
                }
            })
            .collect(),
        Err(_) => vec![value],
    }
}

fn format_single(info: &mailparse::SingleInfo) -> String {
    match &info.display_name {
        Some(name) if !name.is_empty() => format!("{} <{}>", name, info.addr),
        _ => info.addr.clone(),
    }
}

/// Decode text, html and attachment metadata from a raw message
pub(crate) fn parse_body(raw: &[u8]) -> ParsedBody {
    let mut body = ParsedBody::default();
    if let Ok(mail) = mailparse::parse_mail(raw) {
        collect_parts(&mail, &mut body);
    }
    body
}

fn collect_parts(part: &ParsedMail<'_>, out: &mut ParsedBody) {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            collect_parts(sub, out);
        }
        return;
    }

    let disposition = part.get_content_disposition();
    let filename = disposition
        .params
        .get("filename")
        .cloned()
        .or_else(|| part.ctype.params.get("name").cloned());

    let is_attachment = disposition.disposition == DispositionType::Attachment
        || (filename.is_some() && !part.ctype.mimetype.starts_with("text/"));

    if is_attachment {
        out.attachments.push(AttachmentMeta {
            filename,
            content_type: part.ctype.mimetype.clone(),
            size: part.get_body_raw().map(|b| b.len()).unwrap_or(0),
        });
    } else if part.ctype.mimetype.eq_ignore_ascii_case("text/plain") {
        if out.text.is_none() {
            out.text = part.get_body().ok();
        }
    } else if part.ctype.mimetype.eq_ignore_ascii_case("text/html") {
        if out.html.is_none() {
            out.html = part.get_body().ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_list_single_and_named() {
        let raw = b"From: Alice Example <alice@example.com>\r\nTo: bob@example.com\r\n\r\n";
        let (headers, _) = mailparse::parse_headers(raw).unwrap();

        assert_eq!(
            address_list(&headers, "From"),
            vec!["Alice Example <alice@example.com>".to_string()]
        );
        assert_eq!(address_list(&headers, "To"), vec!["bob@example.com".to_string()]);
        assert!(address_list(&headers, "Cc").is_empty());
    }

    #[test]
    fn test_address_list_multiple_recipients() {
        let raw = b"To: a@x.co, B <b@x.co>\r\n\r\n";
        let (headers, _) = mailparse::parse_headers(raw).unwrap();

        let to = address_list(&headers, "To");
        assert_eq!(to, vec!["a@x.co".to_string(), "B <b@x.co>".to_string()]);
    }

    #[test]
    fn test_encoded_subject_is_decoded() {
        let raw = b"Subject: =?utf-8?B?SGVsbG8gV29ybGQ=?=\r\n\r\n";
        let (headers, _) = mailparse::parse_headers(raw).unwrap();
        assert_eq!(headers.get_first_value("Subject").as_deref(), Some("Hello World"));
    }

    #[test]
    fn test_parse_body_plain() {
        let raw = b"Subject: hi\r\nContent-Type: text/plain\r\n\r\njust text\r\n";
        let body = parse_body(raw);
        assert!(body.text.as_deref().unwrap().contains("just text"));
        assert!(body.html.is_none());
        assert!(body.attachments.is_empty());
    }

    #[test]
    fn test_parse_body_multipart_with_attachment() {
        let raw = concat!(
            "Subject: report\r\n",
            "MIME-Version: 1.0\r\n",
            "Content-Type: multipart/mixed; boundary=\"b1\"\r\n",
            "\r\n",
            "--b1\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "see attached\r\n",
            "--b1\r\n",
            "Content-Type: text/html\r\n",
            "\r\n",
            "<p>see attached</p>\r\n",
            "--b1\r\n",
            "Content-Type: application/pdf; name=\"report.pdf\"\r\n",
            "Content-Disposition: attachment; filename=\"report.pdf\"\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "JVBERi0=\r\n",
            "--b1--\r\n",
        )
        .as_bytes();

        let body = parse_body(raw);
        assert!(body.text.as_deref().unwrap().contains("see attached"));
        assert!(body.html.as_deref().unwrap().contains("<p>"));
        assert_eq!(body.attachments.len(), 1);

        let attachment = &body.attachments[0];
        assert_eq!(attachment.filename.as_deref(), Some("report.pdf"));
        assert_eq!(attachment.content_type, "application/pdf");
        assert!(attachment.size > 0);
    }

    #[test]
    fn test_message_meta_serializes_camel_case() {
        let meta = MessageMeta {
            uid: 7,
            subject: None,
            from: vec![],
            to: vec![],
            date: None,
            flags: vec![],
        };
        let value = serde_json::to_value(&meta).unwrap();
        assert!(value.get("uid").is_some());
        assert!(value.get("subject").is_some());
    }
}
