//! Account repository

use async_trait::async_trait;
use chrono::Utc;
use mailgate_common::types::TenantId;
use mailgate_common::{Error, Result};
use std::sync::Arc;
use tracing::warn;
use ulid::Ulid;

use crate::crypto::{self, MasterKey};
use crate::kv::KvStore;
use crate::models::{
    account_key, mask_email, tenant_accounts_key, AccountRecord, AccountSummary, Secret,
};

/// Account repository trait
#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn create(&self, tenant_id: &str, secret: Secret) -> Result<AccountRecord>;
    async fn list(&self, tenant_id: &str) -> Result<Vec<AccountSummary>>;
    async fn get(&self, account_id: &str) -> Result<(AccountRecord, Secret)>;
    async fn update(&self, account_id: &str, secret: Secret) -> Result<()>;
    /// Remove the record and its tenant-index membership. Missing accounts
    /// are treated as success; returns the owning tenant when one existed.
    async fn delete(&self, account_id: &str) -> Result<Option<TenantId>>;
}

/// Key-value store backed account repository
pub struct KvAccountRepository {
    kv: Arc<dyn KvStore>,
    master: MasterKey,
}

impl KvAccountRepository {
    pub fn new(kv: Arc<dyn KvStore>, master: MasterKey) -> Self {
        Self { kv, master }
    }

    async fn load_record(&self, account_id: &str) -> Result<Option<AccountRecord>> {
        let Some(raw) = self.kv.get(&account_key(account_id)).await? else {
            return Ok(None);
        };
        let record: AccountRecord = serde_json::from_str(&raw)
            .map_err(|e| Error::Store(format!("account record is not decodable: {}", e)))?;

        // The record's own fields are not trusted for anything
        // security-relevant; a blob copied under another key declares the
        // wrong id and is rejected before any decryption attempt.
        if record.id != account_id {
            return Err(Error::AuthFailure(format!(
                "record under key {} declares id {}",
                account_id, record.id
            )));
        }

        Ok(Some(record))
    }

    async fn write_record(&self, record: &AccountRecord) -> Result<()> {
        let raw = serde_json::to_string(record)
            .map_err(|e| Error::Internal(format!("account record serialization failed: {}", e)))?;
        self.kv.set(&account_key(&record.id), &raw).await
    }
}

#[async_trait]
impl AccountRepository for KvAccountRepository {
    async fn create(&self, tenant_id: &str, secret: Secret) -> Result<AccountRecord> {
        if tenant_id.is_empty() {
            return Err(Error::Validation("tenantId is required".to_string()));
        }
        secret.validate()?;

        let id = Ulid::new().to_string();
        let now = Utc::now();
        let aad = crypto::binding(&id, tenant_id);
        let enc = crypto::seal(&self.master, &secret, &aad)?;

        let record = AccountRecord {
            id: id.clone(),
            tenant_id: tenant_id.to_string(),
            created_at: now,
            updated_at: now,
            enc,
        };

        self.write_record(&record).await?;

        // The record and the index live in two keys; if the index write
        // fails, compensate with a best-effort delete so the caller's error
        // does not leave an orphan behind.
        if let Err(e) = self.kv.sadd(&tenant_accounts_key(tenant_id), &id).await {
            if let Err(cleanup) = self.kv.del(&account_key(&id)).await {
                warn!("orphaned account record {} left behind: {}", id, cleanup);
            }
            return Err(e);
        }

        Ok(record)
    }

    async fn list(&self, tenant_id: &str) -> Result<Vec<AccountSummary>> {
        let ids = self.kv.smembers(&tenant_accounts_key(tenant_id)).await?;

        let mut summaries = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(record) = self.load_record(&id).await? else {
                // Dangling index member; the record was deleted out of band.
                warn!("tenant {} index references missing account {}", tenant_id, id);
                continue;
            };

            // Bind to the index being listed, not the record's embedded
            // tenant field; a record smuggled into another tenant's index
            // fails authentication here.
            let aad = crypto::binding(&id, tenant_id);
            let secret = crypto::open(&self.master, &record.enc, &aad)?;

            summaries.push(AccountSummary {
                id,
                tenant_id: tenant_id.to_string(),
                label: secret.label,
                primary_email_masked: mask_email(&secret.primary_email),
                created_at: record.created_at,
                updated_at: record.updated_at,
            });
        }

        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(summaries)
    }

    async fn get(&self, account_id: &str) -> Result<(AccountRecord, Secret)> {
        let record = self
            .load_record(account_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("account {} does not exist", account_id)))?;

        // The binding comes from the key the caller requested; only the
        // tenant half is read from the record, and a reassigned tenant
        // field breaks the seal-time binding just the same.
        let aad = crypto::binding(account_id, &record.tenant_id);
        let secret = crypto::open(&self.master, &record.enc, &aad)?;
        Ok((record, secret))
    }

    async fn update(&self, account_id: &str, secret: Secret) -> Result<()> {
        secret.validate()?;

        let mut record = self
            .load_record(account_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("account {} does not exist", account_id)))?;

        // Authenticate the stored envelope under the requested key before
        // replacing it; a record sitting under a forged key must not be
        // resealed into a valid one.
        let aad = crypto::binding(account_id, &record.tenant_id);
        crypto::open(&self.master, &record.enc, &aad)?;

        // Re-seal under the existing binding; the whole secret is replaced.
        record.enc = crypto::seal(&self.master, &secret, &aad)?;
        record.updated_at = Utc::now();

        self.write_record(&record).await
    }

    async fn delete(&self, account_id: &str) -> Result<Option<TenantId>> {
        // Delete stays permissive: a blob that would fail the id check is
        // still removed rather than left stuck under its key.
        let Some(raw) = self.kv.get(&account_key(account_id)).await? else {
            return Ok(None);
        };
        let record: AccountRecord = serde_json::from_str(&raw)
            .map_err(|e| Error::Store(format!("account record is not decodable: {}", e)))?;

        self.kv.del(&account_key(account_id)).await?;
        self.kv
            .srem(&tenant_accounts_key(&record.tenant_id), account_id)
            .await?;
        Ok(Some(record.tenant_id))
    }
}
