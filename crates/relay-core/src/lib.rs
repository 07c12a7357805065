pub mod agent;
pub mod backend;
pub mod defaults;
pub mod errors;
pub mod events;
pub mod ids;
pub mod messages;
pub mod session;
pub mod stream;
