use crate::application::oauth::TokenBroker;
use crate::domain::models::{BusyInterval, CalendarEntry, QueryRange};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::to_busy_interval;
use crate::infrastructure::google_calendar_client::GoogleCalendarClient;
use async_trait::async_trait;
use std::sync::Arc;

/// Busy time across a set of calendars; the state machine's view of the remote calendar.
#[async_trait]
pub trait BusyIntervalSource: Send + Sync {
    async fn busy_intervals(
        &self,
        calendar_ids: &[String],
        range: QueryRange,
    ) -> Result<Vec<BusyInterval>, InfraError>;
}

/// Remote calendar client: silent token acquisition plus the Google REST adapter.
pub struct RemoteCalendarClient<B, C>
where
    B: TokenBroker,
    C: GoogleCalendarClient,
{
    token_broker: Arc<B>,
    calendar_client: Arc<C>,
}

impl<B, C> RemoteCalendarClient<B, C>
where
    B: TokenBroker,
    C: GoogleCalendarClient,
{
    pub fn new(token_broker: Arc<B>, calendar_client: Arc<C>) -> Self {
        Self {
            token_broker,
            calendar_client,
        }
    }

    pub async fn list_calendars(&self) -> Result<Vec<CalendarEntry>, InfraError> {
        let access_token = self.token_broker.acquire_token(false).await?;
        self.calendar_client.list_calendars(&access_token).await
    }

    /// Timed, non-cancelled events of one calendar overlapping `range`.
    pub async fn list_busy_events(
        &self,
        calendar_id: &str,
        range: QueryRange,
    ) -> Result<Vec<BusyInterval>, InfraError> {
        let access_token = self.token_broker.acquire_token(false).await?;
        self.fetch_busy(&access_token, calendar_id, range).await
    }

    async fn fetch_busy(
        &self,
        access_token: &str,
        calendar_id: &str,
        range: QueryRange,
    ) -> Result<Vec<BusyInterval>, InfraError> {
        let events = self
            .calendar_client
            .list_events(access_token, calendar_id, range)
            .await?;

        let mut intervals = Vec::with_capacity(events.len());
        for event in &events {
            match to_busy_interval(event) {
                Ok(Some(interval)) => intervals.push(interval),
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(calendar_id, error = %error, "calendar_event_skipped");
                }
            }
        }
        Ok(intervals)
    }
}

#[async_trait]
impl<B, C> BusyIntervalSource for RemoteCalendarClient<B, C>
where
    B: TokenBroker,
    C: GoogleCalendarClient,
{
    /// Calendars are fetched one after another; the first failure fails the whole fetch.
    async fn busy_intervals(
        &self,
        calendar_ids: &[String],
        range: QueryRange,
    ) -> Result<Vec<BusyInterval>, InfraError> {
        let access_token = self.token_broker.acquire_token(false).await?;
        let mut intervals = Vec::new();
        for calendar_id in calendar_ids {
            let busy = self.fetch_busy(&access_token, calendar_id, range).await?;
            tracing::debug!(calendar_id = %calendar_id, busy = busy.len(), "calendar_busy_fetched");
            intervals.extend(busy);
        }
        Ok(intervals)
    }
}
