pub mod buffer;
pub mod config;
pub mod event;
pub mod metrics;
pub mod payload;
pub mod pipeline;
pub mod scheduler;
pub mod sinks;

/// Topic the tariff management services log to.
pub const TARIFF_LOGS_TOPIC: &str = "tariff_logs";

/// Topic the insurance calculation services log to.
pub const INSURANCE_LOGS_TOPIC: &str = "insurance_logs";
