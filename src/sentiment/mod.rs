pub mod buffer;
pub mod config;
pub mod connection;
pub mod controller;
pub mod events;
pub mod explain;
pub mod instruments;
pub mod planner;
pub mod profile;
pub mod types;

pub const LIVE_STATUS_EVENT: &str = "live_status";
pub const SERIES_UPDATE_EVENT: &str = "sentiment_series_update";
pub const STREAM_ERROR_EVENT: &str = "live_stream_error";
