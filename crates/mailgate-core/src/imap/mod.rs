//! IMAP client plumbing
//!
//! Transient operations and the live watcher share the connect, TLS,
//! login and select helpers in this module. Every network step carries an
//! explicit timeout; exceeding one surfaces as an upstream error.

pub mod fetch;
mod tls;
pub(crate) mod watcher;

use std::time::Duration;

use async_imap::types::{Flag, Mailbox};
use async_imap::{Client, Session};
use mailgate_common::{Error, Result};
use mailgate_store::models::{ConnectionSecurity, ServerSettings};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Stream requirements for an IMAP connection
pub trait ImapStream:
    tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + std::fmt::Debug + 'static
{
}

impl<T> ImapStream for T where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + std::fmt::Debug + 'static
{
}

/// Authenticated IMAP session over either transport mode
pub type ImapSession = Session<Box<dyn ImapStream>>;

pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const GREETING_TIMEOUT: Duration = Duration::from_secs(15);
pub(crate) const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
pub(crate) const LIST_FETCH_TIMEOUT: Duration = Duration::from_secs(45);
pub(crate) const SINGLE_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const LOGOUT_TIMEOUT: Duration = Duration::from_secs(5);

async fn read_greeting(client: &mut Client<Box<dyn ImapStream>>, host: &str) -> Result<()> {
    let greeting = timeout(GREETING_TIMEOUT, client.read_response())
        .await
        .map_err(|_| Error::Upstream(format!("IMAP greeting from {} timed out", host)))?;

    match greeting {
        Some(Ok(_)) => Ok(()),
        Some(Err(e)) => Err(Error::Upstream(format!(
            "IMAP greeting from {} failed: {}",
            host, e
        ))),
        None => Err(Error::Upstream(format!(
            "IMAP server {} closed the connection before greeting",
            host
        ))),
    }
}

fn classify_login_error(e: async_imap::error::Error, host: &str) -> Error {
    match e {
        async_imap::error::Error::No(_) => {
            Error::AuthFailure(format!("IMAP server {} rejected the credentials", host))
        }
        other => Error::Upstream(format!("IMAP login to {} failed: {}", host, other)),
    }
}

/// Open a connection, negotiate transport security and authenticate
pub async fn connect_and_login(settings: &ServerSettings) -> Result<ImapSession> {
    let host = settings.host.as_str();

    let tcp = timeout(
        CONNECT_TIMEOUT,
        TcpStream::connect((host, settings.port)),
    )
    .await
    .map_err(|_| Error::Upstream(format!("IMAP connect to {}:{} timed out", host, settings.port)))?
    .map_err(|e| Error::Upstream(format!("IMAP connect to {}:{} failed: {}", host, settings.port, e)))?;

    let client: Client<Box<dyn ImapStream>> = match settings.connection {
        ConnectionSecurity::Tls => {
            let tls_stream = tls::wrap_tls(host, tcp).await?;
            let mut client = Client::new(Box::new(tls_stream) as Box<dyn ImapStream>);
            read_greeting(&mut client, host).await?;
            client
        }
        ConnectionSecurity::StartTls => {
            // Plaintext greeting first, then a mandatory upgrade. A server
            // that refuses STARTTLS fails the connection here.
            let mut client = Client::new(Box::new(tcp) as Box<dyn ImapStream>);
            read_greeting(&mut client, host).await?;
            timeout(COMMAND_TIMEOUT, client.run_command_and_check_ok("STARTTLS", None))
                .await
                .map_err(|_| Error::Upstream(format!("STARTTLS with {} timed out", host)))?
                .map_err(|e| Error::Upstream(format!("STARTTLS refused by {}: {}", host, e)))?;

            let plain = client.into_inner();
            let tls_stream = tls::wrap_tls(host, plain).await?;
            Client::new(Box::new(tls_stream) as Box<dyn ImapStream>)
        }
    };

    debug!("IMAP connected to {}:{}, logging in", host, settings.port);

    let session = timeout(
        COMMAND_TIMEOUT,
        client.login(&settings.username, &settings.password),
    )
    .await
    .map_err(|_| Error::Upstream(format!("IMAP login to {} timed out", host)))?
    .map_err(|(e, _client)| classify_login_error(e, host))?;

    Ok(session)
}

/// Select the primary inbox and return its state
pub(crate) async fn select_inbox(session: &mut ImapSession) -> Result<Mailbox> {
    timeout(COMMAND_TIMEOUT, session.select("INBOX"))
        .await
        .map_err(|_| Error::Upstream("SELECT INBOX timed out".to_string()))?
        .map_err(|e| Error::Upstream(format!("SELECT INBOX failed: {}", e)))
}

/// UIDNEXT as advertised at select time
pub(crate) fn uid_next(mailbox: &Mailbox) -> Result<u32> {
    mailbox
        .uid_next
        .ok_or_else(|| Error::Upstream("IMAP server did not advertise UIDNEXT".to_string()))
}

/// Best-effort logout; connection state is discarded either way
pub(crate) async fn logout(mut session: ImapSession) {
    let _ = timeout(LOGOUT_TIMEOUT, session.logout()).await;
}

/// Connectivity probe: connect, authenticate, select the inbox, log out
pub async fn verify(settings: &ServerSettings) -> Result<()> {
    let mut session = connect_and_login(settings).await?;
    let result = select_inbox(&mut session).await;
    logout(session).await;
    result.map(|_| ())
}

/// Render an IMAP flag as its wire name
pub(crate) fn flag_name(flag: &Flag<'_>) -> String {
    match flag {
        Flag::Seen => "\\Seen".to_string(),
        Flag::Answered => "\\Answered".to_string(),
        Flag::Flagged => "\\Flagged".to_string(),
        Flag::Deleted => "\\Deleted".to_string(),
        Flag::Draft => "\\Draft".to_string(),
        Flag::Recent => "\\Recent".to_string(),
        Flag::MayCreate => "\\*".to_string(),
        Flag::Custom(name) => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_names() {
        assert_eq!(flag_name(&Flag::Seen), "\\Seen");
        assert_eq!(flag_name(&Flag::Flagged), "\\Flagged");
        assert_eq!(flag_name(&Flag::Custom("$Important".into())), "$Important");
    }
}
