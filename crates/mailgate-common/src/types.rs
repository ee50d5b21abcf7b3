//! Common types for mailgate

use serde::{Deserialize, Serialize};

/// Unique identifier for accounts (26-character ULID string)
pub type AccountId = String;

/// Opaque identifier for the owning principal
pub type TenantId = String;

/// IMAP message UID
pub type Uid = u32;

/// Email address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailAddress {
    pub local: String,
    pub domain: String,
}

impl EmailAddress {
    /// Create a new email address
    pub fn new(local: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            domain: domain.into(),
        }
    }

    /// Parse an email address from a string
    pub fn parse(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.splitn(2, '@').collect();
        if parts.len() == 2 && !parts[0].is_empty() && !parts[1].is_empty() {
            Some(Self::new(parts[0], parts[1]))
        } else {
            None
        }
    }

    /// Mask the local part for list views, keeping the domain verbatim.
    ///
    /// The first and last character of the local part stay visible with
    /// asterisks between them. Two-character locals keep one visible
    /// character (`ab` becomes `a*`); one-character locals have nothing to
    /// hide and are returned unchanged.
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.local.chars().collect();
        let masked_local = match chars.len() {
            0 | 1 => self.local.clone(),
            2 => format!("{}*", chars[0]),
            n => format!(
                "{}{}{}",
                chars[0],
                "*".repeat(n - 2),
                chars[n - 1]
            ),
        };
        format!("{}@{}", masked_local, self.domain)
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

impl std::str::FromStr for EmailAddress {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
            .ok_or_else(|| crate::Error::Validation(format!("invalid email address: {}", s)))
    }
}
