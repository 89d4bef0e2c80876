//! Connected external stores and their API tokens.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use branchledger_core::{typed_id, BranchId, BranchOwned, DomainError, DomainResult, Entity, TenantId};
use branchledger_inventory::WarehouseId;

typed_id!(StoreId, "StoreId");
typed_id!(StoreTokenId, "StoreTokenId");

/// Commerce platform behind a store. Decides signature and topic conventions.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Shopify,
    WooCommerce,
    Laravel,
    Custom,
}

impl StoreKind {
    /// Parse the `:platform` segment of a webhook URL.
    pub fn from_platform(platform: &str) -> Option<Self> {
        match platform.to_ascii_lowercase().as_str() {
            "shopify" => Some(StoreKind::Shopify),
            "woocommerce" => Some(StoreKind::WooCommerce),
            "laravel" => Some(StoreKind::Laravel),
            "custom" => Some(StoreKind::Custom),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StoreKind::Shopify => "shopify",
            StoreKind::WooCommerce => "woocommerce",
            StoreKind::Laravel => "laravel",
            StoreKind::Custom => "custom",
        }
    }

    /// Laravel and custom stores share the generic `{event, data}` envelope.
    pub fn is_generic(self) -> bool {
        matches!(self, StoreKind::Laravel | StoreKind::Custom)
    }
}

impl core::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An external storefront bound to exactly one branch.
///
/// Every webhook from the store writes into that branch; stock effects land
/// on `warehouse_id`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Store {
    pub id: StoreId,
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub kind: StoreKind,
    pub name: String,
    /// Fulfilment warehouse. Must belong to `branch_id`.
    pub warehouse_id: WarehouseId,
    pub webhook_secret: String,
    pub is_active: bool,
}

impl Store {
    pub fn new(
        tenant_id: TenantId,
        branch_id: BranchId,
        kind: StoreKind,
        name: impl Into<String>,
        warehouse_id: WarehouseId,
        webhook_secret: impl Into<String>,
    ) -> Self {
        Self {
            id: StoreId::new(),
            tenant_id,
            branch_id,
            kind,
            name: name.into(),
            warehouse_id,
            webhook_secret: webhook_secret.into(),
            is_active: true,
        }
    }

    /// A webhook is accepted only for an active store of the addressed platform.
    pub fn accepts(&self, kind: StoreKind) -> DomainResult<()> {
        if self.is_active && self.kind == kind {
            Ok(())
        } else {
            Err(DomainError::UnknownStoreOrInactive)
        }
    }
}

impl core::fmt::Debug for Store {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.id)
            .field("tenant_id", &self.tenant_id)
            .field("branch_id", &self.branch_id)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("warehouse_id", &self.warehouse_id)
            .field("webhook_secret", &"<redacted>")
            .field("is_active", &self.is_active)
            .finish()
    }
}

impl Entity for Store {
    type Id = StoreId;

    fn id(&self) -> &StoreId {
        &self.id
    }
}

impl BranchOwned for Store {
    fn branch_id(&self) -> BranchId {
        self.branch_id
    }
}

/// Stored API token. Only the SHA-256 digest of the raw token is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreToken {
    pub id: StoreTokenId,
    pub store_id: StoreId,
    pub branch_id: BranchId,
    /// Hex-encoded SHA-256 of the raw token.
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoreToken {
    pub fn issue(
        store: &Store,
        raw_token: &str,
        at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> DomainResult<Self> {
        if raw_token.len() < 16 {
            return Err(DomainError::validation("store token must be at least 16 characters"));
        }
        Ok(Self {
            id: StoreTokenId::new(),
            store_id: store.id,
            branch_id: store.branch_id,
            token_hash: hash_token(raw_token),
            created_at: at,
            expires_at,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    /// Constant-time comparison against the stored digest.
    pub fn verify(&self, raw_token: &str, now: DateTime<Utc>) -> bool {
        if self.is_expired(now) {
            return false;
        }
        let candidate = Sha256::digest(raw_token.as_bytes());
        match hex::decode(&self.token_hash) {
            Ok(stored) => constant_time_eq(&stored, candidate.as_slice()),
            Err(_) => false,
        }
    }
}

impl BranchOwned for StoreToken {
    fn branch_id(&self) -> BranchId {
        self.branch_id
    }
}

fn hash_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store(kind: StoreKind) -> Store {
        Store::new(
            TenantId::new(),
            BranchId::new(),
            kind,
            "Main shop",
            WarehouseId::new(),
            "s3cret",
        )
    }

    #[test]
    fn platform_must_match_and_store_must_be_active() {
        let mut s = store(StoreKind::Shopify);
        assert!(s.accepts(StoreKind::Shopify).is_ok());
        assert_eq!(s.accepts(StoreKind::WooCommerce), Err(DomainError::UnknownStoreOrInactive));
        s.is_active = false;
        assert_eq!(s.accepts(StoreKind::Shopify), Err(DomainError::UnknownStoreOrInactive));
    }

    #[test]
    fn platform_segment_parsing() {
        assert_eq!(StoreKind::from_platform("WooCommerce"), Some(StoreKind::WooCommerce));
        assert_eq!(StoreKind::from_platform("magento"), None);
    }

    #[test]
    fn secret_is_not_debug_printed() {
        let rendered = format!("{:?}", store(StoreKind::Custom));
        assert!(!rendered.contains("s3cret"));
    }

    #[test]
    fn token_verification_honours_hash_and_expiry() {
        let s = store(StoreKind::Laravel);
        let now = Utc::now();
        let token = StoreToken::issue(&s, "tok_0123456789abcdef", now, Some(now + Duration::hours(1))).unwrap();

        assert_ne!(token.token_hash, "tok_0123456789abcdef");
        assert!(token.verify("tok_0123456789abcdef", now));
        assert!(!token.verify("tok_0123456789abcdeX", now));
        assert!(!token.verify("tok_0123456789abcdef", now + Duration::hours(2)));
    }

    #[test]
    fn short_tokens_are_refused() {
        assert!(StoreToken::issue(&store(StoreKind::Custom), "short", Utc::now(), None).is_err());
    }
}
