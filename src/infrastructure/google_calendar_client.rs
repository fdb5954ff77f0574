use crate::domain::models::{CalendarEntry, QueryRange};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::{
    CalendarListItem, GoogleCalendarEvent, to_calendar_entry,
};
use async_trait::async_trait;
use reqwest::Client;
use url::Url;

const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3/";
const MAX_EVENTS_PER_PAGE: &str = "2500";

#[async_trait]
pub trait GoogleCalendarClient: Send + Sync {
    async fn list_calendars(&self, access_token: &str) -> Result<Vec<CalendarEntry>, InfraError>;

    /// Expanded single events overlapping `range`, every page concatenated.
    async fn list_events(
        &self,
        access_token: &str,
        calendar_id: &str,
        range: QueryRange,
    ) -> Result<Vec<GoogleCalendarEvent>, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestGoogleCalendarClient {
    client: Client,
    api_base: String,
}

impl Default for ReqwestGoogleCalendarClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ReqwestGoogleCalendarClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            api_base: CALENDAR_API_BASE.to_string(),
        }
    }

    /// Points the client at another API root, e.g. a local mock server.
    pub fn with_api_base(api_base: &str) -> Result<Self, InfraError> {
        Url::parse(api_base).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid calendar api base url: {error}"))
        })?;
        Ok(Self {
            client: Client::new(),
            api_base: api_base.to_string(),
        })
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), InfraError> {
        if value.trim().is_empty() {
            return Err(InfraError::OAuth(format!("{field} must not be empty")));
        }
        Ok(())
    }

    /// Prefers the API's `error.message`, as that is what users should see.
    fn api_error(status: reqwest::StatusCode, body: &str, fallback: &str) -> InfraError {
        let message = serde_json::from_str::<ApiErrorEnvelope>(body)
            .ok()
            .and_then(|envelope| envelope.error)
            .and_then(|error| error.message)
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| format!("{fallback} (http {})", status.as_u16()));
        InfraError::Http(message)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, InfraError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|error| InfraError::OAuth(format!("invalid calendar api base url: {error}")))?;
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("calendar api base URL cannot be a base".to_string())
            })?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }
}

#[derive(Debug, serde::Deserialize)]
struct ApiErrorEnvelope {
    error: Option<ApiErrorBody>,
}

#[derive(Debug, serde::Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct CalendarListResponse {
    items: Option<Vec<CalendarListItem>>,
}

#[derive(Debug, serde::Deserialize)]
struct EventsPageResponse {
    items: Option<Vec<GoogleCalendarEvent>>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[async_trait]
impl GoogleCalendarClient for ReqwestGoogleCalendarClient {
    async fn list_calendars(&self, access_token: &str) -> Result<Vec<CalendarEntry>, InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;

        let endpoint = self.endpoint(&["users", "me", "calendarList"])?;
        let response = self
            .client
            .get(endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|error| InfraError::Http(format!("network error while listing calendars: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Http(format!("failed reading calendar list response: {error}")))?;

        if !status.is_success() {
            return Err(Self::api_error(status, &body, "Failed to fetch calendars"));
        }

        let parsed: CalendarListResponse = serde_json::from_str(&body).map_err(|error| {
            InfraError::Http(format!("invalid calendar list payload: {error}"))
        })?;

        Ok(parsed
            .items
            .unwrap_or_default()
            .into_iter()
            .filter_map(to_calendar_entry)
            .collect())
    }

    async fn list_events(
        &self,
        access_token: &str,
        calendar_id: &str,
        range: QueryRange,
    ) -> Result<Vec<GoogleCalendarEvent>, InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;
        Self::ensure_non_empty(calendar_id, "calendar id")?;

        let endpoint = self.endpoint(&["calendars", calendar_id, "events"])?;
        let time_min = range.start.to_rfc3339();
        let time_max = range.end.to_rfc3339();
        let mut page_token: Option<String> = None;
        let mut events = Vec::new();

        loop {
            let mut request = self
                .client
                .get(endpoint.clone())
                .bearer_auth(access_token)
                .query(&[
                    ("timeMin", time_min.as_str()),
                    ("timeMax", time_max.as_str()),
                    ("singleEvents", "true"),
                    ("orderBy", "startTime"),
                    ("maxResults", MAX_EVENTS_PER_PAGE),
                ]);
            if let Some(page_token) = page_token.as_deref() {
                request = request.query(&[("pageToken", page_token)]);
            }

            let response = request.send().await.map_err(|error| {
                InfraError::Http(format!("network error while listing calendar events: {error}"))
            })?;

            let status = response.status();
            let body = response.text().await.map_err(|error| {
                InfraError::Http(format!("failed reading events list response: {error}"))
            })?;

            if !status.is_success() {
                return Err(Self::api_error(status, &body, "Failed to fetch events"));
            }

            let mut parsed: EventsPageResponse = serde_json::from_str(&body).map_err(|error| {
                InfraError::Http(format!("invalid events list payload: {error}"))
            })?;

            events.extend(parsed.items.take().unwrap_or_default());
            match parsed.next_page_token.take() {
                Some(next_page_token) => page_token = Some(next_page_token),
                None => break,
            }
        }

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use serde_json::json;
    use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

    fn range() -> QueryRange {
        QueryRange {
            start: DateTime::parse_from_rfc3339("2026-02-16T09:00:00Z")
                .expect("valid datetime")
                .with_timezone(&Utc),
            end: DateTime::parse_from_rfc3339("2026-02-16T17:00:00Z")
                .expect("valid datetime")
                .with_timezone(&Utc),
        }
    }

    #[tokio::test]
    async fn list_calendars_maps_items() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/users/me/calendarList"))
            .and(matchers::header("authorization", "Bearer token-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    { "id": "primary", "summary": "Me", "backgroundColor": "#ff0000" },
                    { "id": "team", "selected": false }
                ]
            })))
            .mount(&server)
            .await;

        let client = ReqwestGoogleCalendarClient::with_api_base(&server.uri()).expect("base url");
        let calendars = client.list_calendars("token-1").await.expect("calendar list");

        assert_eq!(calendars.len(), 2);
        assert_eq!(calendars[0].display_name, "Me");
        assert_eq!(calendars[0].color, "#ff0000");
        assert_eq!(calendars[1].display_name, "team");
        assert!(!calendars[1].enabled);
    }

    #[tokio::test]
    async fn list_events_follows_page_tokens() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/calendars/primary/events"))
            .and(matchers::query_param("singleEvents", "true"))
            .and(matchers::query_param("orderBy", "startTime"))
            .and(matchers::query_param("pageToken", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{
                    "id": "b",
                    "start": { "dateTime": "2026-02-16T12:00:00Z" },
                    "end": { "dateTime": "2026-02-16T13:00:00Z" }
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/calendars/primary/events"))
            .and(matchers::query_param("timeMin", "2026-02-16T09:00:00+00:00"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{
                    "id": "a",
                    "start": { "dateTime": "2026-02-16T10:00:00Z" },
                    "end": { "dateTime": "2026-02-16T11:00:00Z" }
                }],
                "nextPageToken": "page-2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ReqwestGoogleCalendarClient::with_api_base(&server.uri()).expect("base url");
        let events = client
            .list_events("token-1", "primary", range())
            .await
            .expect("events");

        let ids: Vec<_> = events.iter().filter_map(|event| event.id.as_deref()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn api_error_message_is_preserved() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": { "code": 403, "message": "Rate Limit Exceeded" }
            })))
            .mount(&server)
            .await;

        let client = ReqwestGoogleCalendarClient::with_api_base(&server.uri()).expect("base url");
        let error = client
            .list_events("token-1", "primary", range())
            .await
            .expect_err("forbidden");
        assert_eq!(error.to_string(), "HTTP error: Rate Limit Exceeded");
    }

    #[tokio::test]
    async fn empty_access_token_is_rejected_without_request() {
        let client = ReqwestGoogleCalendarClient::new();
        assert!(client.list_calendars("  ").await.is_err());
    }
}
