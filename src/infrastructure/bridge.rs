//! Message bridge between the isolated script and the host-page context.
//!
//! Neither side can call the other. Both share one broadcast surface (the page's
//! `window.postMessage` channel) on which every listener sees every message, its own
//! included. Reads are request/response guarded by a timeout; writes are fire-and-forget.

use crate::domain::models::{GridSnapshot, Slot, Timestamp};
use crate::infrastructure::error::{AutofillError, InfraError};
use crate::infrastructure::host_page::{
    HostPage, SlotTable, append_person_availability, resolve_identity,
};
use crate::infrastructure::save_endpoint::{SaveEndpoint, SaveReceipt, SaveTimesRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const REQUEST_DATA_TYPE: &str = "__w2m_request_data";
pub const GRID_DATA_TYPE: &str = "__w2m_gcal_data";
pub const MARK_AVAILABLE_TYPE: &str = "__w2m_mark_available";
pub const DEFAULT_BRIDGE_TIMEOUT: Duration = Duration::from_secs(3);

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum BridgeMessage {
    #[serde(rename = "__w2m_request_data")]
    RequestGrid,
    #[serde(rename = "__w2m_gcal_data")]
    GridData { data: GridSnapshot },
    #[serde(rename = "__w2m_mark_available")]
    MarkAvailable { timestamps: Vec<Timestamp> },
}

impl BridgeMessage {
    /// Decodes one of our messages; anything else on the channel yields `None`.
    pub fn decode(value: &Value) -> Option<Self> {
        let kind = value.get("type")?.as_str()?;
        if !matches!(
            kind,
            REQUEST_DATA_TYPE | GRID_DATA_TYPE | MARK_AVAILABLE_TYPE
        ) {
            return None;
        }
        match serde_json::from_value(value.clone()) {
            Ok(message) => Some(message),
            Err(error) => {
                warn!(kind, error = %error, "ignoring malformed bridge message");
                None
            }
        }
    }

    pub fn to_value(&self) -> Result<Value, InfraError> {
        serde_json::to_value(self).map_err(InfraError::from)
    }
}

/// The page-wide message surface shared by both contexts.
#[derive(Debug, Clone)]
pub struct WindowChannel {
    sender: broadcast::Sender<Value>,
}

impl Default for WindowChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowChannel {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Posts a raw message. Without listeners it is dropped, as `postMessage` would.
    pub fn post(&self, message: Value) {
        if self.sender.send(message).is_err() {
            debug!("window message dropped: no listeners");
        }
    }

    pub fn post_message(&self, message: &BridgeMessage) -> Result<(), InfraError> {
        self.post(message.to_value()?);
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.sender.subscribe()
    }
}

/// Bridge endpoint of the isolated (DOM-capable) script.
#[derive(Debug, Clone)]
pub struct IsolatedBridge {
    channel: WindowChannel,
    timeout: Duration,
}

impl IsolatedBridge {
    pub fn new(channel: WindowChannel) -> Self {
        Self {
            channel,
            timeout: DEFAULT_BRIDGE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Asks the host context for its slot table, in wire shape.
    ///
    /// Resolves within the bridge timeout; failures come back as `{slots: [], error}`.
    pub async fn request_grid_snapshot(&self) -> GridSnapshot {
        match self.exchange().await {
            Ok(snapshot) => snapshot,
            Err(error) => GridSnapshot::failed(error.to_string()),
        }
    }

    /// Reads the grid and classifies the outcome for a run.
    pub async fn read_slots(&self) -> Result<Vec<Slot>, AutofillError> {
        let snapshot = self.exchange().await?;
        if let Some(message) = snapshot.error {
            return Err(AutofillError::HostRead(message));
        }
        if snapshot.slots.is_empty() {
            return Err(AutofillError::NoGridData);
        }
        Ok(snapshot.slots)
    }

    /// Fire-and-forget write of the full set of timestamps to mark available.
    pub fn commit_availability(&self, timestamps: &BTreeSet<Timestamp>) -> Result<(), InfraError> {
        let message = BridgeMessage::MarkAvailable {
            timestamps: timestamps.iter().copied().collect(),
        };
        self.channel.post_message(&message)?;
        info!(slot_count = timestamps.len(), "availability write dispatched");
        Ok(())
    }

    async fn exchange(&self) -> Result<GridSnapshot, AutofillError> {
        let mut receiver = self.channel.subscribe();
        self.channel
            .post_message(&BridgeMessage::RequestGrid)
            .map_err(|error| AutofillError::HostRead(error.to_string()))?;

        let response = async {
            loop {
                match receiver.recv().await {
                    Ok(value) => {
                        if let Some(BridgeMessage::GridData { data }) = BridgeMessage::decode(&value)
                        {
                            return Ok(data);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "bridge listener lagged behind the window channel");
                    }
                    Err(RecvError::Closed) => {
                        return Err(AutofillError::HostRead(
                            "window message channel closed".to_string(),
                        ));
                    }
                }
            }
        };

        match tokio::time::timeout(self.timeout, response).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "timeout waiting for host grid response"
                );
                Err(AutofillError::BridgeTimeout)
            }
        }
    }
}

/// Bridge endpoint living in the host-page context.
pub struct HostBridge<P, E>
where
    P: HostPage,
    E: SaveEndpoint,
{
    page: Arc<P>,
    save_endpoint: Arc<E>,
}

impl<P, E> Clone for HostBridge<P, E>
where
    P: HostPage,
    E: SaveEndpoint,
{
    fn clone(&self) -> Self {
        Self {
            page: Arc::clone(&self.page),
            save_endpoint: Arc::clone(&self.save_endpoint),
        }
    }
}

impl<P, E> HostBridge<P, E>
where
    P: HostPage + 'static,
    E: SaveEndpoint + 'static,
{
    pub fn new(page: Arc<P>, save_endpoint: Arc<E>) -> Self {
        Self {
            page,
            save_endpoint,
        }
    }

    /// Subscribes immediately and serves requests until the channel closes.
    pub fn listen(&self, channel: &WindowChannel) -> JoinHandle<()> {
        let mut receiver = channel.subscribe();
        let channel = channel.clone();
        let bridge = self.clone();
        tokio::spawn(async move {
            loop {
                let value = match receiver.recv().await {
                    Ok(value) => value,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "host bridge lagged behind the window channel");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                match BridgeMessage::decode(&value) {
                    Some(BridgeMessage::RequestGrid) => {
                        info!("received request for page data");
                        let data = bridge.snapshot();
                        info!(slot_count = data.slots.len(), "dispatching grid response");
                        if let Err(error) =
                            channel.post_message(&BridgeMessage::GridData { data })
                        {
                            error!(error = %error, "failed to encode grid response");
                        }
                    }
                    Some(BridgeMessage::MarkAvailable { timestamps }) => {
                        let bridge = bridge.clone();
                        tokio::spawn(async move {
                            // No reply path for writes; the failure itself is logged inside.
                            if let Err(error) = bridge.mark_available(&timestamps).await {
                                debug!(error = error.label(), "availability write not completed");
                            }
                        });
                    }
                    Some(BridgeMessage::GridData { .. }) | None => {}
                }
            }
        })
    }

    /// Current slot table; an absent table is an empty grid, not an error.
    pub fn snapshot(&self) -> GridSnapshot {
        match SlotTable::read(self.page.as_ref()) {
            Some(table) => GridSnapshot::from_slots(table.slots()),
            None => {
                warn!("host slot tables are not defined; replying with an empty grid");
                GridSnapshot::default()
            }
        }
    }

    /// Writes availability into the page state and posts it to the save endpoint.
    pub async fn mark_available(
        &self,
        timestamps: &[Timestamp],
    ) -> Result<SaveReceipt, AutofillError> {
        info!(slot_count = timestamps.len(), "starting availability save");

        // The page may have re-rendered since the read; only the live table counts.
        let Some(table) = SlotTable::read(self.page.as_ref()) else {
            error!("required host variables not found; write aborted");
            return Err(AutofillError::NoGridData);
        };

        let identity = resolve_identity(self.page.as_ref()).inspect_err(|error| {
            error!(error = %error, "cannot resolve host identity; write aborted");
        })?;

        let index_by_timestamp = table.index_by_timestamp();
        let requested: BTreeSet<Timestamp> = timestamps.iter().copied().collect();
        let indices: Vec<usize> = requested
            .iter()
            .filter_map(|timestamp| index_by_timestamp.get(timestamp).copied())
            .collect();
        let appended =
            append_person_availability(self.page.as_ref(), &indices, &identity.person_id);
        debug!(appended, matched = indices.len(), "host availability table updated");

        let request = SaveTimesRequest::build(&identity, &table, &requested);
        info!(
            person = %request.person,
            event = %request.event,
            slot_count = request.slots.len(),
            "sending save request"
        );

        match self.save_endpoint.save_times(&request).await {
            Ok(receipt) if receipt.is_success() => {
                info!(status = receipt.status, "saved availability to server");
                Ok(receipt)
            }
            Ok(receipt) => {
                error!(status = receipt.status, "save failed");
                Err(AutofillError::SaveFailure(format!(
                    "http {}",
                    receipt.status
                )))
            }
            Err(error) => {
                error!(error = %error, "network error during save");
                Err(AutofillError::SaveFailure(error.to_string()))
            }
        }
    }
}
