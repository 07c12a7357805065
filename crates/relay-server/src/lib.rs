pub mod broadcast;
pub mod handlers;
pub mod server;
pub mod sink;

pub use broadcast::SseBroadcaster;
pub use server::{start, ServerConfig, ServerHandle};
pub use sink::DashboardEventSink;
