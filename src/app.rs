use crate::config::Config;
use crate::dedup::{
    self, DedupError, DedupServiceConfig, Decision, DownloadEvent, DownloadId, JsonFileStore,
    LogOnlyGateway, LogOnlyTransfer, SyncStore,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;

/// One line of host input: either a lifecycle event from the download
/// subsystem or an operator decision relayed back for a flagged download.
/// The host integration stays this thin on purpose; everything interesting
/// happens in the reconciler.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HostMessage {
    Event(DownloadEvent),
    Decision { id: DownloadId, action: Decision },
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!(
        log = %config.general.log_level,
        data_dir = %config.general.data_dir,
        "starting app"
    );

    let store: Arc<dyn SyncStore> = Arc::new(JsonFileStore::new(&config.general.data_dir));
    let (handle, _status_rx, join) = dedup::start_service(
        DedupServiceConfig {
            event_buffer: config.dedup.event_buffer,
        },
        store,
        Arc::new(LogOnlyTransfer),
        Arc::new(LogOnlyGateway),
    );

    tracing::info!("reading host messages from stdin; press Ctrl+C to stop");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<HostMessage>(line) {
                        Ok(HostMessage::Event(event)) => handle.submit_event(event).await?,
                        Ok(HostMessage::Decision { id, action }) => {
                            handle.apply_decision(action, id).await?
                        }
                        Err(err) => {
                            // A bad line never stops the stream.
                            tracing::warn!(error = %err, line, "ignoring unparseable host message");
                        }
                    }
                }
                Ok(None) => {
                    tracing::info!("host input closed");
                    break;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "failed reading host input");
                    break;
                }
            },
            _ = signal::ctrl_c() => {
                tracing::warn!("received Ctrl+C");
                break;
            }
        }
    }

    // Let submitted events finish reconciling before tearing down.
    handle.wait_idle().await?;
    handle.shutdown().await?;
    join.await.map_err(DedupError::from)??;

    tracing::info!("shutting down gracefully");
    Ok(())
}
