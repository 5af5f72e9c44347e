//! Credential store
//!
//! Credentials are produced by an external connect flow. Dispatch only reads
//! them, checks expiry, and flags them invalid after an authentication failure
//! so that a reconnect or refresh can take over.

use secrecy::{ExposeSecret, SecretString};

use crate::db::Database;
use crate::types::Credential;
use crate::{PromocastError, Result};

/// Default margin before `expires_at` at which a token stops being used
pub const DEFAULT_EXPIRY_SKEW_SECONDS: i64 = 60;

#[derive(Debug, Clone, Copy)]
pub struct CredentialStore {
    expiry_skew: i64,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new(DEFAULT_EXPIRY_SKEW_SECONDS)
    }
}

impl CredentialStore {
    pub fn new(expiry_skew: i64) -> Self {
        Self {
            expiry_skew: expiry_skew.max(0),
        }
    }

    /// Every connected account of a user on a platform, default account first
    pub async fn list_accounts(
        &self,
        db: &Database,
        user_id: &str,
        platform: &str,
    ) -> Result<Vec<Credential>> {
        db.list_credentials(user_id, platform).await
    }

    /// Connected accounts that are usable at `now`
    pub async fn valid_accounts(
        &self,
        db: &Database,
        user_id: &str,
        platform: &str,
        now: i64,
    ) -> Result<Vec<Credential>> {
        let accounts = self.list_accounts(db, user_id, platform).await?;
        Ok(accounts
            .into_iter()
            .filter(|c| self.is_valid(c, now))
            .collect())
    }

    /// A token is usable while it is not flagged and `now < expires_at - skew`
    pub fn is_valid(&self, credential: &Credential, now: i64) -> bool {
        if credential.invalid {
            return false;
        }
        match credential.expires_at {
            Some(expires_at) => now < expires_at.saturating_sub(self.expiry_skew),
            None => true,
        }
    }

    pub async fn mark_invalid(&self, db: &Database, credential_id: &str) -> Result<()> {
        if !db.mark_credential_invalid(credential_id).await? {
            return Err(PromocastError::NotFound(format!(
                "credential {}",
                credential_id
            )));
        }
        tracing::warn!(credential_id = %credential_id, "Credential flagged invalid");
        Ok(())
    }

    /// Store a credential obtained by an external connect flow
    ///
    /// Reconnecting an existing (user, platform, account) refreshes its tokens
    /// and clears the invalid flag. Returns the stored credential id.
    pub async fn connect(&self, db: &Database, credential: &Credential) -> Result<String> {
        for (field, value) in [
            ("user_id", credential.user_id.as_str()),
            ("platform", credential.platform.as_str()),
            ("account_identifier", credential.account_identifier.as_str()),
            ("access_token", credential.access_token.expose_secret()),
        ] {
            if value.trim().is_empty() {
                return Err(PromocastError::InvalidInput(format!(
                    "{} cannot be empty",
                    field
                )));
            }
        }

        let id = db.upsert_credential(credential).await?;
        tracing::info!(
            credential_id = %id,
            platform = %credential.platform,
            account = %credential.account_identifier,
            "Credential connected"
        );
        Ok(id)
    }

    /// Replace the tokens of a credential after an external refresh
    pub async fn rotate_token(
        &self,
        db: &Database,
        credential_id: &str,
        access_token: SecretString,
        refresh_token: Option<SecretString>,
        expires_at: Option<i64>,
    ) -> Result<()> {
        if access_token.expose_secret().trim().is_empty() {
            return Err(PromocastError::InvalidInput(
                "access_token cannot be empty".to_string(),
            ));
        }

        let updated = db
            .rotate_credential(credential_id, &access_token, refresh_token.as_ref(), expires_at)
            .await?;
        if !updated {
            return Err(PromocastError::NotFound(format!(
                "credential {}",
                credential_id
            )));
        }

        tracing::info!(credential_id = %credential_id, "Credential token rotated");
        Ok(())
    }

    pub async fn disconnect(&self, db: &Database, credential_id: &str) -> Result<()> {
        if !db.delete_credential(credential_id).await? {
            return Err(PromocastError::NotFound(format!(
                "credential {}",
                credential_id
            )));
        }
        tracing::info!(credential_id = %credential_id, "Credential disconnected");
        Ok(())
    }
}
