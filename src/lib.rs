pub mod bot;
pub mod config;
/// Per-user last-use timestamps and cooldown checks.
pub mod cooldown;
pub mod liveness;
pub mod metrics;
pub mod persistence;
pub mod service;
pub mod stock;
