//! TLS support for outbound IMAP connections

use std::sync::Arc;

use mailgate_common::{Error, Result};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use super::ImapStream;

/// Wrap a stream in a client TLS session for `hostname`
pub(crate) async fn wrap_tls<S>(hostname: &str, stream: S) -> Result<TlsStream<S>>
where
    S: ImapStream,
{
    let mut root_cert_store = tokio_rustls::rustls::RootCertStore::empty();
    root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = tokio_rustls::rustls::ClientConfig::builder()
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();

    let connector = TlsConnector::from(Arc::new(config));
    let name = rustls_pki_types::ServerName::try_from(hostname)
        .map_err(|_| Error::Validation(format!("invalid TLS server name: {}", hostname)))?
        .to_owned();

    connector
        .connect(name, stream)
        .await
        .map_err(|e| Error::Upstream(format!("TLS handshake with {} failed: {}", hostname, e)))
}
