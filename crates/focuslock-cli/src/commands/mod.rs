pub mod config;
pub mod notifications;
pub mod stats;
pub mod timer;
