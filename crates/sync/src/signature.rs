//! Webhook signature verification.
//!
//! All platforms sign the raw request body with HMAC-SHA256 keyed by the
//! store's webhook secret. Shopify and WooCommerce send the MAC base64
//! encoded; generic stores send it hex encoded.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use branchledger_core::{DomainError, DomainResult};

use crate::store::StoreKind;

type HmacSha256 = Hmac<Sha256>;

impl StoreKind {
    /// Header carrying the body signature.
    pub fn signature_header(self) -> &'static str {
        match self {
            StoreKind::Shopify => "X-Shopify-Hmac-Sha256",
            StoreKind::WooCommerce => "X-WC-Webhook-Signature",
            StoreKind::Laravel | StoreKind::Custom => "X-Webhook-Signature",
        }
    }
}

fn mac_for(secret: &str, body: &[u8]) -> DomainResult<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| DomainError::invariant("webhook secret rejected by HMAC"))?;
    mac.update(body);
    Ok(mac)
}

/// Compute the signature a platform would send for `body`.
pub fn sign(kind: StoreKind, secret: &str, body: &[u8]) -> DomainResult<String> {
    let tag = mac_for(secret, body)?.finalize().into_bytes();
    Ok(match kind {
        StoreKind::Shopify | StoreKind::WooCommerce => STANDARD.encode(tag),
        StoreKind::Laravel | StoreKind::Custom => hex::encode(tag),
    })
}

/// Check `provided` against the raw `body`.
///
/// Comparison happens on the decoded MAC via `verify_slice`, which is
/// constant-time. A missing or undecodable header is a signature failure.
pub fn verify_signature(
    kind: StoreKind,
    secret: &str,
    body: &[u8],
    provided: Option<&str>,
) -> DomainResult<()> {
    if secret.is_empty() {
        return Err(DomainError::InvalidSignature);
    }
    let provided = provided.map(str::trim).ok_or(DomainError::InvalidSignature)?;

    let decoded = match kind {
        StoreKind::Shopify | StoreKind::WooCommerce => STANDARD.decode(provided).ok(),
        StoreKind::Laravel | StoreKind::Custom => hex::decode(provided).ok(),
    }
    .ok_or(DomainError::InvalidSignature)?;

    mac_for(secret, body)?
        .verify_slice(&decoded)
        .map_err(|_| DomainError::InvalidSignature)
}

/// Hex SHA-256 of a raw body; identifies one delivery of a webhook.
pub fn body_digest(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}
