//! Account models and key layout

use chrono::{DateTime, Utc};
use mailgate_common::types::{AccountId, EmailAddress, TenantId};
use mailgate_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// Transport security mode for a mail server connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionSecurity {
    /// Implicit TLS on connect
    #[serde(rename = "TLS")]
    Tls,
    /// Plaintext connect followed by a mandatory STARTTLS upgrade
    #[serde(rename = "STARTTLS")]
    StartTls,
}

/// Connection parameters for one mail server
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub connection: ConnectionSecurity,
}

impl ServerSettings {
    /// Validate required fields
    pub fn validate(&self, which: &str) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Validation(format!("{}.host is required", which)));
        }
        if self.port == 0 {
            return Err(Error::Validation(format!("{}.port must be positive", which)));
        }
        if self.username.is_empty() {
            return Err(Error::Validation(format!("{}.username is required", which)));
        }
        if self.password.is_empty() {
            return Err(Error::Validation(format!("{}.password is required", which)));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ServerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("connection", &self.connection)
            .finish()
    }
}

/// Decrypted credential payload for one account
///
/// Never persisted in cleartext and never logged; list responses only ever
/// carry the masked primary email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Secret {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub primary_email: String,
    pub imap: ServerSettings,
    pub smtp: ServerSettings,
}

impl Secret {
    /// Validate the payload against the account schema
    pub fn validate(&self) -> Result<()> {
        if EmailAddress::parse(&self.primary_email).is_none() {
            return Err(Error::Validation(format!(
                "primaryEmail is not a well-formed address: {}",
                self.primary_email
            )));
        }
        self.imap.validate("imap")?;
        self.smtp.validate("smtp")?;
        Ok(())
    }
}

/// Ciphertext container for a [`Secret`]
///
/// All byte fields are base64-encoded for storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u32,
    pub algorithm: String,
    pub salt: String,
    pub iv: String,
    pub tag: String,
    pub ct: String,
}

/// The unit persisted in the key-value store under `acc:{accountId}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    pub id: AccountId,
    pub tenant_id: TenantId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub enc: Envelope,
}

/// List view of an account; the primary email is masked
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub id: AccountId,
    pub tenant_id: TenantId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub primary_email_masked: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Server settings as returned by the detail endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSettingsView {
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_password: Option<bool>,
    pub connection: ConnectionSecurity,
}

impl ServerSettingsView {
    fn from_settings(settings: &ServerSettings, include_password: bool) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            username: settings.username.clone(),
            password: include_password.then(|| settings.password.clone()),
            has_password: (!include_password).then_some(true),
            connection: settings.connection,
        }
    }
}

/// Secret as returned by the detail endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub primary_email: String,
    pub imap: ServerSettingsView,
    pub smtp: ServerSettingsView,
}

impl SecretView {
    /// Build the detail view, with passwords present only on request
    pub fn from_secret(secret: &Secret, include_passwords: bool) -> Self {
        Self {
            label: secret.label.clone(),
            primary_email: secret.primary_email.clone(),
            imap: ServerSettingsView::from_settings(&secret.imap, include_passwords),
            smtp: ServerSettingsView::from_settings(&secret.smtp, include_passwords),
        }
    }
}

/// Detail view of an account
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDetail {
    pub id: AccountId,
    pub tenant_id: TenantId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub secret: SecretView,
}

/// Store key for one account record
pub fn account_key(account_id: &str) -> String {
    format!("acc:{}", account_id)
}

/// Store key for a tenant's account-id set
pub fn tenant_accounts_key(tenant_id: &str) -> String {
    format!("tenant:{}:accounts", tenant_id)
}

/// Build the masked email for list views
pub fn mask_email(email: &str) -> String {
    EmailAddress::parse(email)
        .map(|e| e.masked())
        .unwrap_or_else(|| email.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(connection: ConnectionSecurity) -> ServerSettings {
        ServerSettings {
            host: "mail.example.com".to_string(),
            port: 993,
            username: "user@example.com".to_string(),
            password: "hunter2".to_string(),
            connection,
        }
    }

    fn secret() -> Secret {
        Secret {
            label: Some("work".to_string()),
            primary_email: "user@example.com".to_string(),
            imap: settings(ConnectionSecurity::Tls),
            smtp: settings(ConnectionSecurity::StartTls),
        }
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(account_key("01H00000000000000000000000"), "acc:01H00000000000000000000000");
        assert_eq!(tenant_accounts_key("u1"), "tenant:u1:accounts");
    }

    #[test]
    fn test_connection_security_wire_names() {
        assert_eq!(
            serde_json::to_string(&ConnectionSecurity::Tls).unwrap(),
            "\"TLS\""
        );
        assert_eq!(
            serde_json::to_string(&ConnectionSecurity::StartTls).unwrap(),
            "\"STARTTLS\""
        );
        let parsed: ConnectionSecurity = serde_json::from_str("\"STARTTLS\"").unwrap();
        assert_eq!(parsed, ConnectionSecurity::StartTls);
    }

    #[test]
    fn test_secret_round_trip() {
        let secret = secret();
        let json = serde_json::to_string(&secret).unwrap();
        assert!(json.contains("\"primaryEmail\""));
        let back: Secret = serde_json::from_str(&json).unwrap();
        assert_eq!(back, secret);
    }

    #[test]
    fn test_secret_validation_rejects_bad_email() {
        let mut s = secret();
        s.primary_email = "not-an-address".to_string();
        assert!(matches!(s.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_settings_validation() {
        let mut s = settings(ConnectionSecurity::Tls);
        s.host = "".to_string();
        assert!(s.validate("imap").is_err());

        let mut s = settings(ConnectionSecurity::Tls);
        s.port = 0;
        assert!(s.validate("imap").is_err());

        let mut s = settings(ConnectionSecurity::Tls);
        s.password = "".to_string();
        assert!(s.validate("smtp").is_err());

        assert!(settings(ConnectionSecurity::StartTls).validate("smtp").is_ok());
    }

    #[test]
    fn test_debug_redacts_password() {
        let s = settings(ConnectionSecurity::Tls);
        let debug = format!("{:?}", s);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_secret_view_redaction() {
        let secret = secret();

        let redacted = SecretView::from_secret(&secret, false);
        assert!(redacted.imap.password.is_none());
        assert_eq!(redacted.imap.has_password, Some(true));
        let json = serde_json::to_string(&redacted).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(json.contains("\"hasPassword\":true"));

        let full = SecretView::from_secret(&secret, true);
        assert_eq!(full.smtp.password.as_deref(), Some("hunter2"));
        assert!(full.smtp.has_password.is_none());
    }

    #[test]
    fn test_account_record_wire_shape() {
        let record = AccountRecord {
            id: "01H00000000000000000000000".to_string(),
            tenant_id: "u1".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            enc: Envelope {
                version: 1,
                algorithm: "AES-256-GCM".to_string(),
                salt: "c2FsdA==".to_string(),
                iv: "aXY=".to_string(),
                tag: "dGFn".to_string(),
                ct: "Y3Q=".to_string(),
            },
        };
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("tenantId").is_some());
        assert!(json.get("createdAt").is_some());
        assert_eq!(json["enc"]["algorithm"], "AES-256-GCM");
    }
}
