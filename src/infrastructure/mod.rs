pub mod bridge;
pub mod config;
pub mod credential_store;
pub mod dom;
pub mod error;
pub mod event_mapper;
pub mod google_calendar_client;
pub mod host_page;
pub mod logging;
pub mod oauth_client;
pub mod save_endpoint;
