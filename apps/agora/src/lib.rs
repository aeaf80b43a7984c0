pub mod auth;
pub mod channel;
pub mod cli;
pub mod config;
pub mod events;
pub mod metrics;
pub mod pagination;
pub mod protocol;
pub mod push;
pub mod report;
pub mod request;
pub mod resources;
pub mod session;
pub mod telemetry;
pub mod throttle;
pub mod transport;
