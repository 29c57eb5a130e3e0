use crate::dedup::types::DownloadId;
use async_trait::async_trait;

/// A transfer-mechanism command that did not take effect, e.g. because the
/// identifier no longer exists. Non-fatal by contract: the caller logs it
/// and the reconciliation transition proceeds as if the command succeeded.
#[derive(Debug)]
pub struct TransferCommandError {
    pub id: DownloadId,
    pub reason: String,
}

impl std::fmt::Display for TransferCommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "transfer command for download {} failed: {}", self.id, self.reason)
    }
}

impl std::error::Error for TransferCommandError {}

/// Commands the core issues against the external transfer mechanism. The
/// mechanics of pausing, resuming and cancelling are entirely outside this
/// crate.
#[async_trait]
pub trait TransferControl: Send + Sync {
    async fn pause(&self, id: DownloadId) -> Result<(), TransferCommandError>;
    async fn resume(&self, id: DownloadId) -> Result<(), TransferCommandError>;
    async fn cancel(&self, id: DownloadId) -> Result<(), TransferCommandError>;
}

/// External decision surface for flagged downloads.
///
/// `request_decision` is fire-and-forget: the human-facing prompt and the
/// transport that carries the answer back are not this crate's concern. The
/// answer arrives later through `DedupServiceHandle::apply_decision`, or
/// never. A second request for the same id supersedes the first. No timeout
/// is enforced here; a flagged download stays suspended until a decision
/// arrives or the mechanism reports it interrupted.
#[async_trait]
pub trait DecisionGateway: Send + Sync {
    async fn request_decision(&self, id: DownloadId, locator: &str);
}

/// Transfer control that only logs the commands it is asked to issue. Used
/// when no real download subsystem is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOnlyTransfer;

#[async_trait]
impl TransferControl for LogOnlyTransfer {
    async fn pause(&self, id: DownloadId) -> Result<(), TransferCommandError> {
        tracing::info!(id = %id, "pause transfer");
        Ok(())
    }

    async fn resume(&self, id: DownloadId) -> Result<(), TransferCommandError> {
        tracing::info!(id = %id, "resume transfer");
        Ok(())
    }

    async fn cancel(&self, id: DownloadId) -> Result<(), TransferCommandError> {
        tracing::info!(id = %id, "cancel transfer");
        Ok(())
    }
}

/// Decision gateway that only logs the request. Stands in for the prompt
/// surface when none is wired up.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOnlyGateway;

#[async_trait]
impl DecisionGateway for LogOnlyGateway {
    async fn request_decision(&self, id: DownloadId, locator: &str) {
        tracing::info!(id = %id, locator, "duplicate download needs a decision");
    }
}
