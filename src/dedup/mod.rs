pub mod errors;
pub mod fingerprint;
pub mod gateway;
pub mod service;
pub mod store;
pub mod types;

pub use errors::{DedupError, StoreError};
pub use fingerprint::fingerprint;
pub use gateway::{
    DecisionGateway, LogOnlyGateway, LogOnlyTransfer, TransferCommandError, TransferControl,
};
pub use service::{
    DedupCommand, DedupServiceConfig, DedupServiceHandle, DedupServiceStatus, start_service,
};
pub use store::{
    DOWNLOAD_LINKS_TABLE, JsonFileStore, MappingTable, MemoryStore, PENDING_DOWNLOADS, SyncStore,
    Table,
};
pub use types::{Decision, DownloadEvent, DownloadId, DownloadRecord, Fingerprint, TransferState};
