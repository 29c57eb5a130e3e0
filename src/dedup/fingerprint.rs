use crate::dedup::types::Fingerprint;
use sha2::{Digest, Sha256};

/// Deterministic digest of a locator string. Total over any well-formed
/// string; malformed locators are not validated here and hash as-is.
///
/// The contract is asynchronous even though the digest itself is cheap, so
/// callers always observe the same suspension point a remote digest service
/// would impose.
pub async fn fingerprint(locator: &str) -> Fingerprint {
    tokio::task::yield_now().await;
    let digest = Sha256::digest(locator.as_bytes());
    Fingerprint::from_hex(hex::encode(digest))
}
