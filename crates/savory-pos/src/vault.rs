//! # Credential Vault
//!
//! Encrypted-at-rest storage for per-tenant provider credentials.
//!
//! ## Blob Format
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │          base64( nonce[12] ‖ ChaCha20-Poly1305(json(creds)) )           │
//! │                                                                         │
//! │  key   = SHA-256(vault secret)  — derived once per vault instance       │
//! │  nonce = 12 random bytes per encryption                                 │
//! │                                                                         │
//! │  Callers never see the mechanism: the accessor hands out decoded        │
//! │  PosCredentials and takes them back, nothing else.                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `set`/`clear` persist immediately through the tenant repository; there
//! is no write buffering.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{PosError, PosResult};
use savory_core::{PosCredentials, TenantPos};
use savory_db::TenantRepository;

/// Nonce length for ChaCha20-Poly1305.
const NONCE_LEN: usize = 12;

// =============================================================================
// Vault (pure crypto)
// =============================================================================

/// Encrypts/decrypts credential blobs. Cheap to clone.
#[derive(Clone)]
pub struct CredentialVault {
    cipher: ChaCha20Poly1305,
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose key material through Debug.
        f.write_str("CredentialVault")
    }
}

impl CredentialVault {
    /// Derives the vault key from the deployment secret.
    pub fn new(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let cipher = ChaCha20Poly1305::new(Key::from_slice(digest.as_slice()));
        CredentialVault { cipher }
    }

    /// Encrypts credentials into an opaque blob.
    pub fn encrypt(&self, creds: &PosCredentials) -> PosResult<String> {
        let plaintext = serde_json::to_vec(creds)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_ref())
            .map_err(|_| PosError::Vault("encryption failed".to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    /// Decrypts a blob back into credentials.
    pub fn decrypt(&self, blob: &str) -> PosResult<PosCredentials> {
        let raw = BASE64
            .decode(blob)
            .map_err(|_| PosError::Vault("credential blob is not valid base64".to_string()))?;
        if raw.len() < NONCE_LEN {
            return Err(PosError::Vault("credential blob is truncated".to_string()));
        }

        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| PosError::Vault("credential blob failed authentication".to_string()))?;

        Ok(serde_json::from_slice(&plaintext)?)
    }
}

// =============================================================================
// Accessor (vault + persistence)
// =============================================================================

/// Get/set/clear credentials for a tenant, persisting through the tenant
/// repository.
#[derive(Debug, Clone)]
pub struct VaultAccessor {
    vault: CredentialVault,
    tenants: TenantRepository,
}

impl VaultAccessor {
    /// Creates a new accessor.
    pub fn new(vault: CredentialVault, tenants: TenantRepository) -> Self {
        VaultAccessor { vault, tenants }
    }

    /// Decodes the tenant's credential set.
    ///
    /// A tenant with no configured provider (or no stored blob) yields an
    /// empty credential set, not an error.
    pub fn get(&self, tenant: &TenantPos) -> PosResult<PosCredentials> {
        if !tenant.provider.is_configured() {
            return Ok(PosCredentials::empty());
        }
        match tenant.credential_blob.as_deref() {
            None | Some("") => Ok(PosCredentials::empty()),
            Some(blob) => self.vault.decrypt(blob),
        }
    }

    /// Encrypts and persists a credential set immediately.
    pub async fn set(&self, tenant_id: &str, creds: &PosCredentials) -> PosResult<()> {
        let blob = self.vault.encrypt(creds)?;
        self.tenants
            .save_credential_blob(tenant_id, &blob, creds.expires_at)
            .await?;
        debug!(tenant = %tenant_id, "Credential blob persisted");
        Ok(())
    }

    /// Encrypts a credential set without persisting (callers that write the
    /// whole connection row in one statement).
    pub fn seal(&self, creds: &PosCredentials) -> PosResult<String> {
        self.vault.encrypt(creds)
    }

    /// Removes the tenant's stored credentials immediately.
    pub async fn clear(&self, tenant_id: &str) -> PosResult<()> {
        self.tenants.save_credential_blob(tenant_id, "", None).await?;
        debug!(tenant = %tenant_id, "Credential blob cleared");
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use savory_core::Provider;
    use savory_db::{Database, DbConfig};

    fn creds() -> PosCredentials {
        PosCredentials {
            access_token: Some("sq0atp-token".to_string()),
            refresh_token: Some("sq0rtp-refresh".to_string()),
            expires_at: None,
            merchant_id: Some("M1".to_string()),
            api_base: None,
        }
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let vault = CredentialVault::new("vault-secret");
        let blob = vault.encrypt(&creds()).unwrap();

        // Blob is opaque
        assert!(!blob.contains("sq0atp-token"));

        let decoded = vault.decrypt(&blob).unwrap();
        assert_eq!(decoded, creds());
    }

    #[test]
    fn test_nonce_makes_blobs_unique() {
        let vault = CredentialVault::new("vault-secret");
        let a = vault.encrypt(&creds()).unwrap();
        let b = vault.encrypt(&creds()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_rejected() {
        let blob = CredentialVault::new("vault-secret").encrypt(&creds()).unwrap();
        assert!(CredentialVault::new("other-secret").decrypt(&blob).is_err());
    }

    #[test]
    fn test_garbage_blob_rejected() {
        let vault = CredentialVault::new("vault-secret");
        assert!(vault.decrypt("not base64 at all!!").is_err());
        assert!(vault.decrypt("AAAA").is_err());
    }

    #[tokio::test]
    async fn test_accessor_roundtrip() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.tenants().create("t1", "Cafe Uno", "USD").await.unwrap();
        db.tenants()
            .save_connection("t1", Provider::Square, Some("M1"), None, "placeholder", None)
            .await
            .unwrap();

        let accessor = VaultAccessor::new(CredentialVault::new("vault-secret"), db.tenants());
        accessor.set("t1", &creds()).await.unwrap();

        let tenant = db.tenants().get_required("t1").await.unwrap();
        let decoded = accessor.get(&tenant).unwrap();
        assert_eq!(decoded.access_token.as_deref(), Some("sq0atp-token"));

        accessor.clear("t1").await.unwrap();
        let tenant = db.tenants().get_required("t1").await.unwrap();
        assert!(accessor.get(&tenant).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_tenant_yields_empty_set() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.tenants().create("t1", "Cafe Uno", "USD").await.unwrap();

        let accessor = VaultAccessor::new(CredentialVault::new("vault-secret"), db.tenants());
        let tenant = db.tenants().get_required("t1").await.unwrap();

        // No provider selected: empty credentials, not an error.
        let decoded = accessor.get(&tenant).unwrap();
        assert!(decoded.is_empty());
    }
}
