pub mod autofill;
pub mod bootstrap;
pub mod calendar_feed;
pub mod commands;
pub mod oauth;
pub mod synthetic_input;
