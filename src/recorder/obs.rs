//! OBS WebSocket client

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use obws::events::{Event, OutputState};
use obws::Client;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{EdgeDetector, RecorderEvent};
use crate::config::RecorderConfig;

/// Watches OBS recording state and reconnects when the connection drops
pub struct ObsClient {
    config: RecorderConfig,
}

impl ObsClient {
    pub fn new(config: RecorderConfig) -> Self {
        Self { config }
    }

    /// Run until cancelled or the receiver goes away
    pub async fn run(self, tx: mpsc::Sender<RecorderEvent>, cancel: CancellationToken) {
        info!(
            "Watching OBS at {}:{}",
            self.config.host, self.config.port
        );

        loop {
            let mut connected = false;

            match self.watch(&tx, &cancel, &mut connected).await {
                Ok(()) => break,
                Err(e) => {
                    if connected {
                        warn!("OBS connection lost: {:#}", e);
                    } else {
                        debug!("OBS not reachable: {:#}", e);
                    }
                }
            }

            if connected && tx.send(RecorderEvent::Disconnected).await.is_err() {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.reconnect_interval()) => {}
            }
        }

        debug!("OBS client stopped");
    }

    /// One connection's lifetime. `Ok` means stop for good.
    async fn watch(
        &self,
        tx: &mpsc::Sender<RecorderEvent>,
        cancel: &CancellationToken,
        connected: &mut bool,
    ) -> Result<()> {
        let client = Client::connect(
            self.config.host.as_str(),
            self.config.port,
            self.config.password.as_deref(),
        )
        .await
        .context("Failed to connect to OBS WebSocket")?;

        let obs_version = match client.general().version().await {
            Ok(version) => Some(version.obs_version.to_string()),
            Err(e) => {
                debug!("Failed to query OBS version: {}", e);
                None
            }
        };
        let record_directory = client
            .config()
            .record_directory()
            .await
            .ok()
            .map(PathBuf::from);

        info!("Connected to OBS {}", obs_version.as_deref().unwrap_or("(unknown version)"));
        *connected = true;
        if tx
            .send(RecorderEvent::Connected {
                obs_version,
                record_directory,
            })
            .await
            .is_err()
        {
            return Ok(());
        }

        let events = client
            .events()
            .context("Failed to subscribe to OBS events")?;
        tokio::pin!(events);

        // Recording may already be running when we connect
        let mut edges = EdgeDetector::new();
        let status = client.recording().status().await?;
        if let Some(event) = edges.observe(status.active, None) {
            info!("OBS was already recording at connect");
            if tx.send(event).await.is_err() {
                return Ok(());
            }
        }

        let mut poll_timer = tokio::time::interval(self.config.status_poll_interval());
        // A polled edge must be seen twice so the pushed event, which carries
        // the output path, normally wins
        let mut poll_mismatches = 0u32;

        loop {
            let observed = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),

                event = events.next() => match event {
                    Some(Event::RecordStateChanged { active, state, path }) => {
                        poll_mismatches = 0;
                        match state {
                            OutputState::Started if active => {
                                edges.observe(true, path.map(PathBuf::from))
                            }
                            OutputState::Stopped if !active => {
                                edges.observe(false, path.map(PathBuf::from))
                            }
                            _ => None,
                        }
                    }
                    Some(_) => None,
                    None => bail!("OBS event stream ended"),
                },

                // Fallback for missed events
                _ = poll_timer.tick() => {
                    let status = client
                        .recording()
                        .status()
                        .await
                        .context("Failed to poll OBS record status")?;
                    if status.active == edges.is_recording() {
                        poll_mismatches = 0;
                        None
                    } else {
                        poll_mismatches += 1;
                        if poll_mismatches >= 2 {
                            poll_mismatches = 0;
                            edges.observe(status.active, None)
                        } else {
                            None
                        }
                    }
                }
            };

            if let Some(event) = observed {
                debug!("OBS recording edge: {:?}", event);
                if tx.send(event).await.is_err() {
                    return Ok(());
                }
            }
        }
    }
}
