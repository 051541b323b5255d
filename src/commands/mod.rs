pub mod explain;
pub mod health;
pub mod live_stream;
