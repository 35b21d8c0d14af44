//! Relays `@agent` commands typed into Messages to an agent service and sends
//! the replies back through Messages.app.

pub mod agent;
pub mod config;
pub mod dedup;
pub mod error;
pub mod platform;
pub mod relay;
pub mod scheduler;
pub mod store;
