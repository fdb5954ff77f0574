use crate::domain::models::Timestamp;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::host_page::{HostIdentity, SlotTable};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::BTreeSet;
use url::Url;

pub const DEFAULT_SAVE_PATH: &str = "/SaveTimes.php";

/// Form payload of the host page's own save endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveTimesRequest {
    pub person: String,
    pub event: String,
    pub slots: Vec<Timestamp>,
    pub availability: String,
}

impl SaveTimesRequest {
    /// One availability character per live table entry, `'1'` when requested.
    pub fn build(
        identity: &HostIdentity,
        table: &SlotTable,
        requested: &BTreeSet<Timestamp>,
    ) -> Self {
        let availability = table
            .timestamps()
            .iter()
            .map(|timestamp| if requested.contains(timestamp) { '1' } else { '0' })
            .collect();
        Self {
            person: identity.person_id.clone(),
            event: identity.event_id.clone(),
            slots: table.timestamps().to_vec(),
            availability,
        }
    }

    pub fn joined_slots(&self) -> String {
        self.slots
            .iter()
            .map(Timestamp::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Fields in wire order.
    pub fn form_fields(&self) -> [(&'static str, String); 5] {
        [
            ("person", self.person.clone()),
            ("event", self.event.clone()),
            ("slots", self.joined_slots()),
            ("availability", self.availability.clone()),
            ("ChangeToAvailable", "true".to_string()),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveReceipt {
    pub status: u16,
}

impl SaveReceipt {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait SaveEndpoint: Send + Sync {
    /// Posts the payload. Transport failures are errors; any HTTP status is a receipt.
    async fn save_times(&self, request: &SaveTimesRequest) -> Result<SaveReceipt, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestSaveEndpoint {
    client: Client,
    endpoint: Url,
}

impl ReqwestSaveEndpoint {
    pub fn new(endpoint: Url) -> Self {
        Self {
            client: Client::new(),
            endpoint,
        }
    }

    /// Resolves `save_path` against the origin of the page at `page_url`.
    pub fn for_page(page_url: &str, save_path: &str) -> Result<Self, InfraError> {
        let page = Url::parse(page_url)
            .map_err(|error| InfraError::InvalidConfig(format!("invalid page url: {error}")))?;
        let endpoint = page
            .join(save_path)
            .map_err(|error| InfraError::InvalidConfig(format!("invalid save path: {error}")))?;
        Ok(Self::new(endpoint))
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl SaveEndpoint for ReqwestSaveEndpoint {
    async fn save_times(&self, request: &SaveTimesRequest) -> Result<SaveReceipt, InfraError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .form(&request.form_fields())
            .send()
            .await
            .map_err(|error| InfraError::Http(format!("network error during save: {error}")))?;

        Ok(SaveReceipt {
            status: response.status().as_u16(),
        })
    }
}
