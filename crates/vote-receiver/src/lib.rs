//! Vote intake service core: validates vote submissions and hands them to Kafka through a
//! pool of producers.

pub mod broker;
pub mod config;
pub mod error;
pub mod telemetry;
pub mod votes;
