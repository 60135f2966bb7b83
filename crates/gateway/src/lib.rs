//! AgentsLeak gateway: HTTP collector endpoints, dashboard REST API, and
//! the WebSocket pub/sub channel.

pub mod api;
pub mod cli;
pub mod state;
