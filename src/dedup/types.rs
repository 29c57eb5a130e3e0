use serde::{Deserialize, Serialize};

/// Identifier assigned by the download subsystem when a transfer is created.
/// Opaque to this crate; unique among concurrently active transfers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DownloadId(pub u32);

impl std::fmt::Display for DownloadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lowercase hex SHA-256 digest of a locator string.
///
/// This is a locator fingerprint, not a content checksum: two different
/// payloads served from the same locator are indistinguishable here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_hex(hex_digest: String) -> Self {
        Self(hex_digest)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One tracked download: the source locator and its fingerprint. The same
/// record shape backs both the In-Flight Registry and the Duplicate Index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub locator: String,
    pub fingerprint: Fingerprint,
}

/// Terminal-or-not state reported by a `DownloadStateChanged` event. Anything
/// the download subsystem reports that is neither `complete` nor
/// `interrupted` maps to `Other` and causes no transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Complete,
    Interrupted,
    #[serde(other)]
    Other,
}

/// Lifecycle events consumed by the reconciler, delivered by the host
/// adapter in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DownloadEvent {
    DownloadCreated { id: DownloadId, locator: String },
    DownloadStateChanged { id: DownloadId, new_state: TransferState },
}

impl DownloadEvent {
    pub fn download_id(&self) -> DownloadId {
        match self {
            Self::DownloadCreated { id, .. } => *id,
            Self::DownloadStateChanged { id, .. } => *id,
        }
    }
}

/// The human operator's answer to a duplicate flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Continue,
    Cancel,
}
